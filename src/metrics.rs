// src/metrics.rs

#[cfg(feature = "observability")]
pub use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
    increment_counter, Unit,
};

// NOTE: When observability feature is disabled, provide stub implementations
#[cfg(not(feature = "observability"))]
pub enum Unit {}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! counter {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
    ($name:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! gauge {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! histogram {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! increment_counter {
    ($name:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_counter {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_gauge {
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_histogram {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
use crate::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
    increment_counter,
};

/// Initializes the descriptions for all the metrics in the engine.
/// This should be called once at startup.
pub fn describe_metrics() {
    describe_gauge!("route_engine_up", "Engine liveness (1=up).");

    // Precomputation
    describe_histogram!(
        "precompute_cycle_duration_seconds",
        "Duration of a full precomputation cycle across all chains."
    );
    describe_counter!(
        "precompute_cycles_total",
        Unit::Count,
        "Precomputation cycles, labeled by result (ok, failed, skipped)."
    );
    describe_counter!(
        "precompute_slow_cycles_total",
        Unit::Count,
        "Cycles that exceeded the slow-cycle threshold."
    );
    describe_gauge!(
        "opportunity_matrix_routes",
        "Routes in the published matrix, labeled by chain."
    );
    describe_gauge!(
        "opportunity_matrix_pairs",
        "Token pairs with at least one route, labeled by chain."
    );

    // Queries
    describe_histogram!(
        "route_query_latency_seconds",
        "Latency of public route queries, labeled by operation."
    );
    describe_counter!(
        "route_query_errors_total",
        Unit::Count,
        "Failed route queries, labeled by error kind."
    );
    describe_counter!(
        "cache_hits_total",
        Unit::Count,
        "Cache hits, labeled by cache."
    );
    describe_counter!(
        "cache_miss_total",
        Unit::Count,
        "Cache misses, labeled by cache."
    );
    describe_gauge!("cache_size_gauge", "Entries per cache.");

    // Resilience
    describe_counter!(
        "circuit_breaker_opened_total",
        Unit::Count,
        "Times the engine circuit breaker opened."
    );
    describe_gauge!(
        "circuit_breaker_state",
        "Circuit breaker state (0=closed, 1=open, 2=half-open)."
    );
    describe_counter!(
        "rate_limited_total",
        Unit::Count,
        "Requests rejected by the per-caller rate limiter."
    );

    // Graph
    describe_counter!(
        "pool_updates_total",
        Unit::Count,
        "Liquidity pool updates applied, labeled by chain."
    );
    describe_counter!(
        "arbitrage_opportunities_total",
        Unit::Count,
        "Arbitrage-eligible routes found by precomputation, labeled by chain."
    );
}

/// Installs the Prometheus exporter on `addr`. Requires a running tokio runtime.
#[cfg(feature = "observability")]
pub fn install_prometheus_exporter(addr: std::net::SocketAddr) -> anyhow::Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    describe_metrics();
    Ok(())
}

// --- Helper functions to update metrics ---

pub fn record_precompute_cycle(result: &'static str, duration: std::time::Duration) {
    counter!("precompute_cycles_total", 1, "result" => result);
    histogram!("precompute_cycle_duration_seconds", duration.as_secs_f64());
}

pub fn increment_slow_cycles() {
    increment_counter!("precompute_slow_cycles_total");
}

pub fn set_matrix_routes(chain: &str, pairs: usize, routes: usize) {
    gauge!("opportunity_matrix_pairs", pairs as f64, "chain" => chain.to_string());
    gauge!("opportunity_matrix_routes", routes as f64, "chain" => chain.to_string());
}

pub fn record_query_latency(operation: &'static str, duration: std::time::Duration) {
    histogram!("route_query_latency_seconds", duration.as_secs_f64(), "op" => operation);
}

pub fn increment_query_errors(kind: &'static str) {
    counter!("route_query_errors_total", 1, "kind" => kind);
}

pub fn increment_cache_hit(cache_name: &str) {
    counter!("cache_hits_total", 1, "cache" => cache_name.to_string());
}

pub fn increment_cache_miss(cache_name: &str) {
    counter!("cache_miss_total", 1, "cache" => cache_name.to_string());
}

pub fn set_cache_size(cache_name: &str, size: f64) {
    gauge!("cache_size_gauge", size, "cache" => cache_name.to_string());
}

pub fn increment_circuit_breaker_opened() {
    increment_counter!("circuit_breaker_opened_total");
}

pub fn set_circuit_breaker_state(state: f64) {
    gauge!("circuit_breaker_state", state);
}

pub fn increment_rate_limited() {
    increment_counter!("rate_limited_total");
}

pub fn increment_pool_updates(chain: &str) {
    counter!("pool_updates_total", 1, "chain" => chain.to_string());
}

pub fn increment_arbitrage_opportunities(chain: &str, count: u64) {
    counter!("arbitrage_opportunities_total", count, "chain" => chain.to_string());
}

pub fn record_heartbeat() {
    gauge!("route_engine_up", 1.0);
}
