//! # Analytics
//!
//! Counters behind `get_performance_metrics`, plus the pure health evaluation and the
//! route analytics snapshot. Nothing here feeds back into routing.

use crate::circuit_breaker::{CircuitBreakerSnapshot, CircuitBreakerStateName};
use crate::graph_service::GraphStats;
use crate::settings::Health;
use crate::types::{LiquidityPool, PrecomputedRoute, RouteStep};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Atomic counters updated on the query and precomputation paths.
#[derive(Debug, Default)]
pub struct EngineAnalytics {
    queries_total: AtomicU64,
    queries_failed: AtomicU64,
    rate_limited: AtomicU64,
    circuit_rejections: AtomicU64,
    query_latency_us_total: AtomicU64,
    query_latency_us_max: AtomicU64,
    cycles_completed: AtomicU64,
    cycles_failed: AtomicU64,
    cycles_skipped: AtomicU64,
    slow_cycles: AtomicU64,
    last_cycle_ms: AtomicU64,
    pool_updates: AtomicU64,
    arbitrage_found: AtomicU64,
}

impl EngineAnalytics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_query(&self, latency: Duration, ok: bool) {
        let us = latency.as_micros() as u64;
        self.queries_total.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.queries_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.query_latency_us_total.fetch_add(us, Ordering::Relaxed);
        self.query_latency_us_max.fetch_max(us, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_circuit_rejection(&self) {
        self.circuit_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cycle(&self, duration: Duration, chains_failed: usize, slow: bool) {
        self.last_cycle_ms
            .store(duration.as_millis() as u64, Ordering::Relaxed);
        if chains_failed > 0 {
            self.cycles_failed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cycles_completed.fetch_add(1, Ordering::Relaxed);
        }
        if slow {
            self.slow_cycles.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_cycle_skipped(&self) {
        self.cycles_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pool_update(&self) {
        self.pool_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_arbitrage_found(&self, count: u64) {
        self.arbitrage_found.fetch_add(count, Ordering::Relaxed);
    }

    /// Failed queries and failed cycles over all queries and cycles.
    pub fn error_rate(&self) -> f64 {
        let failed = self.queries_failed.load(Ordering::Relaxed)
            + self.cycles_failed.load(Ordering::Relaxed);
        let total = self.queries_total.load(Ordering::Relaxed)
            + self.cycles_completed.load(Ordering::Relaxed)
            + self.cycles_failed.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            failed as f64 / total as f64
        }
    }

    pub fn snapshot(&self, cache_hits: u64, cache_misses: u64) -> PerformanceMetrics {
        let total = self.queries_total.load(Ordering::Relaxed);
        let lookups = cache_hits + cache_misses;
        PerformanceMetrics {
            queries_total: total,
            queries_failed: self.queries_failed.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            circuit_rejections: self.circuit_rejections.load(Ordering::Relaxed),
            avg_query_latency_us: if total == 0 {
                0.0
            } else {
                self.query_latency_us_total.load(Ordering::Relaxed) as f64 / total as f64
            },
            max_query_latency_us: self.query_latency_us_max.load(Ordering::Relaxed),
            cache_hit_rate: if lookups == 0 {
                0.0
            } else {
                cache_hits as f64 / lookups as f64
            },
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            cycles_failed: self.cycles_failed.load(Ordering::Relaxed),
            cycles_skipped: self.cycles_skipped.load(Ordering::Relaxed),
            slow_cycles: self.slow_cycles.load(Ordering::Relaxed),
            last_cycle_duration_ms: self.last_cycle_ms.load(Ordering::Relaxed),
            pool_updates: self.pool_updates.load(Ordering::Relaxed),
            arbitrage_opportunities_found: self.arbitrage_found.load(Ordering::Relaxed),
            error_rate: self.error_rate(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    pub queries_total: u64,
    pub queries_failed: u64,
    pub rate_limited: u64,
    pub circuit_rejections: u64,
    pub avg_query_latency_us: f64,
    pub max_query_latency_us: u64,
    pub cache_hit_rate: f64,
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub cycles_skipped: u64,
    pub slow_cycles: u64,
    pub last_cycle_duration_ms: u64,
    pub pool_updates: u64,
    pub arbitrage_opportunities_found: u64,
    pub error_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthReason {
    HighErrorRate,
    CriticalErrorRate,
    HighMemoryPressure,
    CriticalMemoryPressure,
    CircuitBreakerOpen,
    CircuitBreakerHalfOpen,
    StaleMatrix,
    NotRunning,
}

impl HealthReason {
    fn severity(&self) -> HealthStatus {
        match self {
            HealthReason::CriticalErrorRate
            | HealthReason::CriticalMemoryPressure
            | HealthReason::CircuitBreakerOpen
            | HealthReason::NotRunning => HealthStatus::Critical,
            _ => HealthStatus::Degraded,
        }
    }
}

/// Raw observations the health verdict is derived from.
#[derive(Debug, Clone)]
pub struct HealthInputs {
    pub running: bool,
    pub error_rate: f64,
    pub memory_estimate_bytes: u64,
    pub circuit_breaker: CircuitBreakerSnapshot,
    /// Age of the oldest published chain table; `None` before the first publish
    pub matrix_age_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub reasons: Vec<HealthReason>,
    pub error_rate: f64,
    pub memory_estimate_bytes: u64,
    pub memory_ratio: f64,
    pub circuit_breaker_state: &'static str,
    pub consecutive_failures: u32,
    pub matrix_age_ms: Option<u64>,
}

pub fn evaluate_health(inputs: &HealthInputs, config: &Health) -> SystemHealth {
    let mut reasons = Vec::new();

    if !inputs.running {
        reasons.push(HealthReason::NotRunning);
    }
    if inputs.error_rate >= config.critical_error_rate {
        reasons.push(HealthReason::CriticalErrorRate);
    } else if inputs.error_rate >= config.degraded_error_rate {
        reasons.push(HealthReason::HighErrorRate);
    }

    let memory_ratio = if config.memory_budget_bytes == 0 {
        0.0
    } else {
        inputs.memory_estimate_bytes as f64 / config.memory_budget_bytes as f64
    };
    if memory_ratio >= config.critical_memory_ratio {
        reasons.push(HealthReason::CriticalMemoryPressure);
    } else if memory_ratio >= config.degraded_memory_ratio {
        reasons.push(HealthReason::HighMemoryPressure);
    }

    match inputs.circuit_breaker.state {
        CircuitBreakerStateName::Open => reasons.push(HealthReason::CircuitBreakerOpen),
        CircuitBreakerStateName::HalfOpen => reasons.push(HealthReason::CircuitBreakerHalfOpen),
        CircuitBreakerStateName::Closed => {}
    }
    if inputs
        .matrix_age_ms
        .map_or(false, |age| age > config.stale_matrix_ms)
    {
        reasons.push(HealthReason::StaleMatrix);
    }

    let status = reasons
        .iter()
        .map(|r| r.severity())
        .max()
        .unwrap_or(HealthStatus::Healthy);

    SystemHealth {
        status,
        reasons,
        error_rate: inputs.error_rate,
        memory_estimate_bytes: inputs.memory_estimate_bytes,
        memory_ratio,
        circuit_breaker_state: inputs.circuit_breaker.state.as_str(),
        consecutive_failures: inputs.circuit_breaker.consecutive_failures,
        matrix_age_ms: inputs.matrix_age_ms,
    }
}

/// Rough resident size of the engine's collections.
pub fn estimate_memory_bytes(
    pools: usize,
    graph_edges: usize,
    matrix_routes: usize,
    matrix_steps: usize,
    cached_routes: usize,
) -> u64 {
    let pool_bytes = pools * (std::mem::size_of::<LiquidityPool>() + 96);
    let edge_bytes = graph_edges * 2 * (std::mem::size_of::<ethers::types::Address>() + 16);
    let route_bytes = matrix_routes * (std::mem::size_of::<PrecomputedRoute>() + 64)
        + matrix_steps * (std::mem::size_of::<RouteStep>() + 48);
    let cache_bytes = cached_routes * std::mem::size_of::<usize>() * 2;
    (pool_bytes + edge_bytes + route_bytes + cache_bytes) as u64
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChainRouteAnalytics {
    pub chain: String,
    pub cycle: u64,
    pub computed_at_ms: u64,
    pub pairs: usize,
    pub routes: usize,
    pub gas_optimal_routes: usize,
    pub arbitrage_candidates: usize,
    pub avg_hops: f64,
    pub avg_profitability: f64,
    pub avg_risk: f64,
    pub avg_confidence: f64,
}

impl ChainRouteAnalytics {
    pub fn from_routes<'a>(
        chain: &str,
        cycle: u64,
        computed_at_ms: u64,
        pairs: usize,
        gas_optimal_routes: usize,
        routes: impl Iterator<Item = &'a PrecomputedRoute>,
    ) -> Self {
        let mut out = ChainRouteAnalytics {
            chain: chain.to_string(),
            cycle,
            computed_at_ms,
            pairs,
            gas_optimal_routes,
            ..Default::default()
        };
        for route in routes {
            out.routes += 1;
            out.avg_hops += route.hops() as f64;
            out.avg_profitability += route.profitability_score;
            out.avg_risk += route.risk_score;
            out.avg_confidence += route.confidence_score;
            if route.is_cross_protocol() {
                out.arbitrage_candidates += 1;
            }
        }
        if out.routes > 0 {
            let n = out.routes as f64;
            out.avg_hops /= n;
            out.avg_profitability /= n;
            out.avg_risk /= n;
            out.avg_confidence /= n;
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RouteAnalytics {
    pub chains: Vec<ChainRouteAnalytics>,
    /// Protocol id and the number of matrix routes using it
    pub protocol_usage: Vec<(String, usize)>,
    pub protocol_efficiency: Vec<(String, f64)>,
    pub graph: GraphStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(state: CircuitBreakerStateName) -> CircuitBreakerSnapshot {
        CircuitBreakerSnapshot {
            state,
            consecutive_failures: 0,
            opened_total: 0,
            retry_after_ms: 0,
            last_failure_ago_ms: None,
        }
    }

    fn inputs() -> HealthInputs {
        HealthInputs {
            running: true,
            error_rate: 0.0,
            memory_estimate_bytes: 1024,
            circuit_breaker: breaker(CircuitBreakerStateName::Closed),
            matrix_age_ms: Some(1_000),
        }
    }

    #[test]
    fn test_healthy_by_default() {
        let health = evaluate_health(&inputs(), &Health::default());
        assert_eq!(health.status, HealthStatus::Healthy);
        assert!(health.reasons.is_empty());
    }

    #[test]
    fn test_degraded_and_critical_reasons() {
        let config = Health::default();
        let mut i = inputs();
        i.error_rate = 0.1;
        i.matrix_age_ms = Some(500_000);
        let health = evaluate_health(&i, &config);
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(
            health.reasons,
            vec![HealthReason::HighErrorRate, HealthReason::StaleMatrix]
        );

        i.circuit_breaker = breaker(CircuitBreakerStateName::Open);
        let health = evaluate_health(&i, &config);
        assert_eq!(health.status, HealthStatus::Critical);
        assert!(health.reasons.contains(&HealthReason::CircuitBreakerOpen));

        let mut m = inputs();
        m.memory_estimate_bytes = config.memory_budget_bytes;
        assert_eq!(
            evaluate_health(&m, &config).reasons,
            vec![HealthReason::CriticalMemoryPressure]
        );
    }

    #[test]
    fn test_counters() {
        let a = EngineAnalytics::new();
        a.record_query(Duration::from_micros(100), true);
        a.record_query(Duration::from_micros(300), false);
        a.record_cycle(Duration::from_millis(10), 0, false);
        let snap = a.snapshot(3, 1);
        assert_eq!(snap.queries_total, 2);
        assert_eq!(snap.max_query_latency_us, 300);
        assert!((snap.avg_query_latency_us - 200.0).abs() < 1e-9);
        assert!((snap.cache_hit_rate - 0.75).abs() < 1e-9);
        assert!((snap.error_rate - 1.0 / 3.0).abs() < 1e-9);
    }
}
