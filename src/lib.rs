//! # DEX Route Engine
//!
//! An in-process routing core for decentralized exchanges. It keeps a live model of
//! protocols and liquidity pools, precomputes the best swap routes between the most
//! liquid tokens of each chain on a fixed interval, and answers route, gas-optimal and
//! arbitrage queries from the published results.
//!
//! ## Overview
//!
//! - **Graph Model**: protocols, pools and the token adjacency they induce
//! - **Scoring**: profitability, risk and confidence per route, plus an adaptive
//!   per-protocol efficiency signal fed by execution outcomes
//! - **Route Search**: direct routes and bounded breadth-first multi-hop search
//! - **Precomputation**: a periodic cycle that rebuilds each chain's opportunity matrix
//!   off to the side and publishes it with one atomic swap
//! - **Resilience**: one engine-wide circuit breaker and a per-caller rate limiter in
//!   front of every query
//!
//! ## Architecture
//!
//! ### Inbound
//! Liquidity feeds push [`LiquidityPool`](types::LiquidityPool) updates, protocol
//! configuration pushes [`Protocol`](types::Protocol) descriptors, and a
//! [`GasPriceOracle`](gas_oracle::GasPriceOracle) is pulled once per cycle per chain.
//!
//! ### Outbound
//! [`RouteEngine`] query methods, read-only observability snapshots and an optional
//! typed event channel ([`EventRecorder`](events::EventRecorder)).
//!
//! The engine never executes trades and keeps no state across restarts.

// Core Types
/// Protocols, pools, route steps and precomputed routes
pub mod types;
/// Constant-product AMM math with checked integer arithmetic
pub mod amm_math;

// Graph & Routing
/// Protocol and liquidity graph
pub mod graph_service;
/// Route scoring and adaptive protocol efficiency
pub mod scoring;
/// Direct and multi-hop route search
pub mod router;
/// Per-chain routing tables and their atomic publication
pub mod opportunity_matrix;
/// Periodic opportunity matrix precomputation
pub mod route_precomputer;
/// Short-TTL query cache with exact invalidation
pub mod cache;
/// Arbitrage route classification and lookup
pub mod arbitrage;

// Resilience
/// Engine-wide circuit breaker
pub mod circuit_breaker;
/// Per-caller rate limiting
pub mod rate_limiter;

// Collaborators & Observability
/// Gas price feed boundary
pub mod gas_oracle;
/// Typed outbound engine events
pub mod events;
/// Performance counters, health evaluation and route analytics
pub mod analytics;
/// Metrics and observability
pub mod metrics;

// Engine
/// Query API and lifecycle
pub mod engine;

// Settings & Utilities
/// Configuration management
pub mod settings;
/// Error types
pub mod error;
/// General utilities
pub mod utils;

// Re-exports for convenience
pub use engine::{RouteEngine, RouteQuery};
pub use error::RouteEngineError;
pub use graph_service::GraphService;
pub use settings::Settings;
pub use types::{GasPrice, LiquidityPool, PrecomputedRoute, Protocol, RouteStep};
