//! # Engine Errors
//!
//! Error kinds surfaced by the public query surface of [`RouteEngine`](crate::engine::RouteEngine).
//!
//! "No provider for chain" and "no route found" are not errors: query methods report them
//! as `None` or an empty `Vec`. Everything here is something a caller has to react to.

/// Errors returned by the route engine's public API.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RouteEngineError {
    /// The circuit breaker is open; callers should back off until the cooldown elapses.
    #[error("circuit breaker is open (retry in {retry_after_ms}ms)")]
    CircuitOpen { retry_after_ms: u64 },

    /// The caller exceeded its request budget for the current window.
    #[error("caller '{caller}' exceeded its request budget")]
    RateLimited { caller: String },

    /// An internal error occurred while computing routes.
    #[error("route computation failed: {0}")]
    ComputationFailure(String),

    /// A pool update was rejected before reaching the graph.
    #[error("invalid liquidity pool: {0}")]
    InvalidPool(String),

    /// Settings failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The engine has not been initialized or was destroyed.
    #[error("route engine is not running")]
    NotRunning,
}

impl RouteEngineError {
    /// Label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RouteEngineError::CircuitOpen { .. } => "circuit_open",
            RouteEngineError::RateLimited { .. } => "rate_limited",
            RouteEngineError::ComputationFailure(_) => "computation_failure",
            RouteEngineError::InvalidPool(_) => "invalid_pool",
            RouteEngineError::InvalidConfig(_) => "invalid_config",
            RouteEngineError::NotRunning => "not_running",
        }
    }
}

impl From<config::ConfigError> for RouteEngineError {
    fn from(err: config::ConfigError) -> Self {
        RouteEngineError::InvalidConfig(err.to_string())
    }
}
