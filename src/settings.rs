// src/settings.rs

use config::{Config, ConfigError, Environment, File};
use ethers::types::U256;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Routing {
    /// Deepest multi-hop search stage (1..=3)
    #[serde(default = "default_max_hops")]
    pub max_hops: usize,
    #[serde(default = "default_max_routes_per_pair")]
    pub max_routes_per_pair: usize,
    /// Tokens per chain used to seed the precomputation cycle
    #[serde(default = "default_top_tokens_per_chain")]
    pub top_tokens_per_chain: usize,
    #[serde(default = "default_max_seed_pairs_per_chain")]
    pub max_seed_pairs_per_chain: usize,
    /// Minimum return in percent; routes scoring below `min_profit_threshold * 10` are dropped
    #[serde(default = "default_min_profit_threshold")]
    pub min_profit_threshold: f64,
    /// Reference input (1 native unit, in wei) used for precomputed routes and profitability
    #[serde(default = "default_reference_amount_wei")]
    pub reference_amount_wei: String,
    /// Upper bound on BFS queue pops per search
    #[serde(default = "default_max_bfs_expansions")]
    pub max_bfs_expansions: usize,
}

fn default_max_hops() -> usize {
    3
}
fn default_max_routes_per_pair() -> usize {
    5
}
fn default_top_tokens_per_chain() -> usize {
    20
}
fn default_max_seed_pairs_per_chain() -> usize {
    200
}
fn default_min_profit_threshold() -> f64 {
    0.1
}
fn default_reference_amount_wei() -> String {
    "1000000000000000000".to_string()
}
fn default_max_bfs_expansions() -> usize {
    10_000
}

impl Routing {
    pub fn reference_amount(&self) -> Result<U256, ConfigError> {
        U256::from_dec_str(self.reference_amount_wei.trim()).map_err(|e| {
            ConfigError::Message(format!(
                "routing.reference_amount_wei '{}' is not a decimal integer: {}",
                self.reference_amount_wei, e
            ))
        })
    }

    /// Profitability score floor on the 0-100 scale.
    pub fn min_profitability_score(&self) -> f64 {
        self.min_profit_threshold * 10.0
    }
}

impl Default for Routing {
    fn default() -> Self {
        Self {
            max_hops: default_max_hops(),
            max_routes_per_pair: default_max_routes_per_pair(),
            top_tokens_per_chain: default_top_tokens_per_chain(),
            max_seed_pairs_per_chain: default_max_seed_pairs_per_chain(),
            min_profit_threshold: default_min_profit_threshold(),
            reference_amount_wei: default_reference_amount_wei(),
            max_bfs_expansions: default_max_bfs_expansions(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Precompute {
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    /// Cycles slower than this emit a degradation signal
    #[serde(default = "default_slow_cycle_threshold_ms")]
    pub slow_cycle_threshold_ms: u64,
    #[serde(default = "default_top_pairs_limit")]
    pub top_pairs_limit: usize,
}

fn default_interval_seconds() -> u64 {
    30
}
fn default_slow_cycle_threshold_ms() -> u64 {
    5_000
}
fn default_top_pairs_limit() -> usize {
    50
}

impl Precompute {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

impl Default for Precompute {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
            slow_cycle_threshold_ms: default_slow_cycle_threshold_ms(),
            top_pairs_limit: default_top_pairs_limit(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueryCacheConfig {
    #[serde(default = "default_query_ttl_seconds")]
    pub query_ttl_seconds: u64,
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
}

fn default_query_ttl_seconds() -> u64 {
    60
}
fn default_cache_max_entries() -> usize {
    10_000
}

impl QueryCacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.query_ttl_seconds)
    }
}

impl Default for QueryCacheConfig {
    fn default() -> Self {
        Self {
            query_ttl_seconds: default_query_ttl_seconds(),
            max_entries: default_cache_max_entries(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Query {
    /// Price impact ceiling in percent when the caller does not pass one
    #[serde(default = "default_max_slippage")]
    pub default_max_slippage: f64,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "default_max_risk_score")]
    pub max_risk_score: f64,
    #[serde(default = "default_max_route_age_ms")]
    pub max_route_age_ms: u64,
    /// A cached route serves `amount_in` only within this factor of its reference amount
    #[serde(default = "default_amount_compatibility_factor")]
    pub amount_compatibility_factor: u64,
    #[serde(default = "default_option_count")]
    pub default_option_count: usize,
    #[serde(default = "default_max_arbitrage_results")]
    pub max_arbitrage_results: usize,
}

fn default_max_slippage() -> f64 {
    3.0
}
fn default_min_confidence() -> f64 {
    70.0
}
fn default_max_risk_score() -> f64 {
    30.0
}
fn default_max_route_age_ms() -> u64 {
    120_000
}
fn default_amount_compatibility_factor() -> u64 {
    10
}
fn default_option_count() -> usize {
    3
}
fn default_max_arbitrage_results() -> usize {
    20
}

impl Default for Query {
    fn default() -> Self {
        Self {
            default_max_slippage: default_max_slippage(),
            min_confidence: default_min_confidence(),
            max_risk_score: default_max_risk_score(),
            max_route_age_ms: default_max_route_age_ms(),
            amount_compatibility_factor: default_amount_compatibility_factor(),
            default_option_count: default_option_count(),
            max_arbitrage_results: default_max_arbitrage_results(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CircuitBreaker {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
    /// Takes precedence over `cooldown_seconds` when set
    #[serde(default)]
    pub cooldown_ms: Option<u64>,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_cooldown_seconds() -> u64 {
    60
}

impl CircuitBreaker {
    pub fn cooldown(&self) -> Duration {
        match self.cooldown_ms {
            Some(ms) => Duration::from_millis(ms),
            None => Duration::from_secs(self.cooldown_seconds),
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_seconds: default_cooldown_seconds(),
            cooldown_ms: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimit {
    #[serde(default = "default_requests_per_window")]
    pub requests_per_window: u32,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    /// Takes precedence over `window_seconds` when set
    #[serde(default)]
    pub window_ms: Option<u64>,
}

fn default_requests_per_window() -> u32 {
    1_000
}
fn default_window_seconds() -> u64 {
    60
}

impl RateLimit {
    pub fn window(&self) -> Duration {
        match self.window_ms {
            Some(ms) => Duration::from_millis(ms),
            None => Duration::from_secs(self.window_seconds),
        }
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            requests_per_window: default_requests_per_window(),
            window_seconds: default_window_seconds(),
            window_ms: None,
        }
    }
}

/// Tunables for profitability and the adaptive protocol-efficiency signal.
#[derive(Debug, Deserialize, Clone)]
pub struct Scoring {
    #[serde(default = "default_efficiency_weight")]
    pub efficiency_weight: f64,
    #[serde(default = "default_reliability_weight")]
    pub reliability_weight: f64,
    /// Multiplier when every hop runs on an MEV-protected protocol
    #[serde(default = "default_mev_bonus")]
    pub mev_bonus: f64,
    #[serde(default = "default_fast_execution_ms")]
    pub fast_execution_ms: u64,
    #[serde(default = "default_low_gas_threshold")]
    pub low_gas_threshold: u64,
    #[serde(default = "default_success_bonus")]
    pub success_bonus: f64,
    #[serde(default = "default_fast_low_gas_bonus")]
    pub fast_low_gas_bonus: f64,
    #[serde(default = "default_failure_penalty")]
    pub failure_penalty: f64,
}

fn default_efficiency_weight() -> f64 {
    0.6
}
fn default_reliability_weight() -> f64 {
    0.4
}
fn default_mev_bonus() -> f64 {
    1.1
}
fn default_fast_execution_ms() -> u64 {
    15_000
}
fn default_low_gas_threshold() -> u64 {
    200_000
}
fn default_success_bonus() -> f64 {
    1.0
}
fn default_fast_low_gas_bonus() -> f64 {
    2.0
}
fn default_failure_penalty() -> f64 {
    5.0
}

impl Default for Scoring {
    fn default() -> Self {
        Self {
            efficiency_weight: default_efficiency_weight(),
            reliability_weight: default_reliability_weight(),
            mev_bonus: default_mev_bonus(),
            fast_execution_ms: default_fast_execution_ms(),
            low_gas_threshold: default_low_gas_threshold(),
            success_bonus: default_success_bonus(),
            fast_low_gas_bonus: default_fast_low_gas_bonus(),
            failure_penalty: default_failure_penalty(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Health {
    #[serde(default = "default_degraded_error_rate")]
    pub degraded_error_rate: f64,
    #[serde(default = "default_critical_error_rate")]
    pub critical_error_rate: f64,
    #[serde(default = "default_memory_budget_bytes")]
    pub memory_budget_bytes: u64,
    #[serde(default = "default_degraded_memory_ratio")]
    pub degraded_memory_ratio: f64,
    #[serde(default = "default_critical_memory_ratio")]
    pub critical_memory_ratio: f64,
    /// A published matrix older than this marks the engine degraded
    #[serde(default = "default_stale_matrix_ms")]
    pub stale_matrix_ms: u64,
}

fn default_degraded_error_rate() -> f64 {
    0.05
}
fn default_critical_error_rate() -> f64 {
    0.20
}
fn default_memory_budget_bytes() -> u64 {
    512 * 1024 * 1024
}
fn default_degraded_memory_ratio() -> f64 {
    0.8
}
fn default_critical_memory_ratio() -> f64 {
    0.95
}
fn default_stale_matrix_ms() -> u64 {
    120_000
}

impl Default for Health {
    fn default() -> Self {
        Self {
            degraded_error_rate: default_degraded_error_rate(),
            critical_error_rate: default_critical_error_rate(),
            memory_budget_bytes: default_memory_budget_bytes(),
            degraded_memory_ratio: default_degraded_memory_ratio(),
            critical_memory_ratio: default_critical_memory_ratio(),
            stale_matrix_ms: default_stale_matrix_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub routing: Routing,
    #[serde(default)]
    pub precompute: Precompute,
    #[serde(default)]
    pub cache: QueryCacheConfig,
    #[serde(default)]
    pub query: Query,
    #[serde(default)]
    pub circuit_breaker: CircuitBreaker,
    #[serde(default)]
    pub rate_limit: RateLimit,
    #[serde(default)]
    pub scoring: Scoring,
    #[serde(default)]
    pub health: Health,
}

impl Settings {
    /// Loads `RouteEngine.toml` (optional) and `ROUTE_ENGINE__SECTION__KEY` overrides.
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name("RouteEngine").required(false))
            .add_source(Environment::with_prefix("ROUTE_ENGINE").separator("__"))
            .build()?;

        let settings: Self = s.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let s = Config::builder().add_source(File::from(path)).build()?;
        let settings: Self = s.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: &str| Err(ConfigError::Message(msg.to_string()));

        if !(1..=3).contains(&self.routing.max_hops) {
            return fail("routing.max_hops must be between 1 and 3");
        }
        if self.routing.max_routes_per_pair == 0 {
            return fail("routing.max_routes_per_pair must be non-zero");
        }
        if self.routing.top_tokens_per_chain < 2 {
            return fail("routing.top_tokens_per_chain must be at least 2");
        }
        if self.routing.max_seed_pairs_per_chain == 0 {
            return fail("routing.max_seed_pairs_per_chain must be non-zero");
        }
        if !self.routing.min_profit_threshold.is_finite() || self.routing.min_profit_threshold < 0.0 {
            return fail("routing.min_profit_threshold must be a non-negative number");
        }
        if self.routing.reference_amount()?.is_zero() {
            return fail("routing.reference_amount_wei must be non-zero");
        }
        if self.routing.max_bfs_expansions == 0 {
            return fail("routing.max_bfs_expansions must be non-zero");
        }
        if self.precompute.interval_seconds == 0 {
            return fail("precompute.interval_seconds must be non-zero");
        }
        if self.precompute.top_pairs_limit == 0 {
            return fail("precompute.top_pairs_limit must be non-zero");
        }
        if self.cache.query_ttl_seconds == 0 || self.cache.max_entries == 0 {
            return fail("cache.query_ttl_seconds and cache.max_entries must be non-zero");
        }
        if self.query.default_max_slippage < 0.0 || self.query.max_risk_score < 0.0 {
            return fail("query thresholds must be non-negative");
        }
        if self.query.amount_compatibility_factor == 0 {
            return fail("query.amount_compatibility_factor must be non-zero");
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return fail("circuit_breaker.failure_threshold must be non-zero");
        }
        if self.circuit_breaker.cooldown().is_zero() {
            return fail("circuit_breaker cooldown must be non-zero");
        }
        if self.rate_limit.requests_per_window == 0 || self.rate_limit.window().is_zero() {
            return fail("rate_limit budget and window must be non-zero");
        }
        let weights = self.scoring.efficiency_weight + self.scoring.reliability_weight;
        if (weights - 1.0).abs() > 1e-6 {
            return fail("scoring efficiency_weight + reliability_weight must equal 1.0");
        }
        if self.health.degraded_error_rate > self.health.critical_error_rate {
            return fail("health.degraded_error_rate must not exceed critical_error_rate");
        }
        Ok(())
    }
}
