//! Integration tests for the resilience layer
//!
//! Tests cover:
//! - Oversized inputs quoted without counting as failures
//! - Per-caller rate limiting, window reset and spread-out requests
//! - Pools with extreme reserves leaving precomputation cycles healthy

use dex_route_engine::events::{EngineEvent, EventRecorder};
use dex_route_engine::types::{LiquidityPool, Protocol};
use dex_route_engine::utils::now_millis;
use dex_route_engine::{RouteEngine, RouteEngineError, RouteQuery, Settings};
use ethers::types::{Address, U256};
use std::sync::Arc;
use std::time::{Duration, Instant};

const CHAIN: &str = "ethereum";

fn token(n: u64) -> Address {
    Address::from_low_u64_be(n)
}

fn e18(v: u64) -> U256 {
    U256::from(v) * U256::exp10(18)
}

fn protocol() -> Protocol {
    Protocol {
        id: "uniswap_v2".to_string(),
        chains: vec![CHAIN.to_string()],
        fee_bps: 30,
        base_gas: 100_000,
        gas_per_hop: 60_000,
        reliability: 90.0,
        mev_protection: false,
    }
}

fn pool() -> LiquidityPool {
    LiquidityPool {
        id: "a-b".to_string(),
        protocol: "uniswap_v2".to_string(),
        chain: CHAIN.to_string(),
        token0: token(1),
        token1: token(2),
        reserve0: e18(1_000),
        reserve1: e18(2_000),
        fee_bps: 30,
        liquidity_usd: 5_000_000.0,
        volume_24h_usd: 100_000.0,
        price_impact: 0.0,
        last_updated_ms: now_millis(),
    }
}

async fn start(settings: Settings) -> RouteEngine {
    let engine = RouteEngine::with_static_gas_prices(settings).unwrap();
    engine.upsert_protocol(protocol());
    engine.upsert_pool(pool()).unwrap();
    engine
        .initialize(vec![protocol()], vec![CHAIN.to_string()])
        .await
        .unwrap();
    engine
}

fn valid_query() -> RouteQuery {
    RouteQuery::new(token(1), token(2), CHAIN, e18(1))
}

/// Test that the largest representable input is quoted without counting as a failure
#[tokio::test]
async fn test_oversized_input_never_trips_breaker() {
    let engine = start(Settings::default()).await;
    let huge = RouteQuery::new(token(1), token(2), CHAIN, U256::MAX);

    for i in 0..10 {
        assert!(
            engine.get_best_route("bot", &huge).is_ok(),
            "oversized query {} failed",
            i + 1
        );
    }
    let health = engine.get_system_health();
    assert_eq!(health.consecutive_failures, 0);
    assert_eq!(health.circuit_breaker_state, "closed");
    assert_eq!(engine.get_performance_metrics().queries_failed, 0);
    assert!(engine.get_best_route("bot", &valid_query()).unwrap().is_some());

    engine.destroy().await;
}

/// Test that request 1001 within a minute is rate limited
#[tokio::test]
async fn test_rate_limit_default_budget() {
    let engine = start(Settings::default()).await;
    // unknown chain: the cheapest query that still passes every guard
    let query = RouteQuery::new(token(1), token(2), "nowhere", e18(1));

    for i in 0..1_000 {
        assert!(
            engine.get_best_route("bot", &query).is_ok(),
            "request {} rejected",
            i + 1
        );
    }
    assert_eq!(
        engine.get_best_route("bot", &query).unwrap_err(),
        RouteEngineError::RateLimited {
            caller: "bot".to_string()
        }
    );
    // other callers keep their own budget and rejections never trip the breaker
    assert!(engine.get_best_route("other", &query).is_ok());
    assert_eq!(engine.get_system_health().consecutive_failures, 0);
    assert_eq!(engine.get_performance_metrics().rate_limited, 1);

    engine.destroy().await;
}

/// Test that the budget comes back after the window
#[tokio::test]
async fn test_rate_limit_window_reset() {
    let mut settings = Settings::default();
    settings.rate_limit.requests_per_window = 3;
    settings.rate_limit.window_ms = Some(300);
    let engine = start(settings).await;

    for _ in 0..3 {
        assert!(engine.get_best_route("bot", &valid_query()).is_ok());
    }
    assert!(matches!(
        engine.get_best_route("bot", &valid_query()),
        Err(RouteEngineError::RateLimited { .. })
    ));

    tokio::time::sleep(Duration::from_millis(350)).await;
    assert!(engine.get_best_route("bot", &valid_query()).unwrap().is_some());

    engine.destroy().await;
}

/// Test that the budget holds for requests spread across the window
#[tokio::test]
async fn test_rate_limit_spread_requests() {
    let mut settings = Settings::default();
    settings.rate_limit.requests_per_window = 3;
    settings.rate_limit.window_ms = Some(300);
    let engine = start(settings).await;

    let started = Instant::now();
    let mut admitted = 0;
    while started.elapsed() < Duration::from_millis(250) {
        if engine.get_best_route("bot", &valid_query()).is_ok() {
            admitted += 1;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(admitted, 3);

    engine.destroy().await;
}

/// Test that a pool with extreme reserves neither fails the chain nor opens the breaker
#[tokio::test]
async fn test_extreme_pool_keeps_cycles_healthy() {
    let (recorder, mut rx) = EventRecorder::new();
    let engine = RouteEngine::with_static_gas_prices(Settings::default())
        .unwrap()
        .with_event_recorder(Arc::new(recorder));
    engine.upsert_protocol(protocol());
    engine.upsert_pool(pool()).unwrap();
    let mut extreme = pool();
    extreme.id = "c-d".to_string();
    extreme.token0 = token(3);
    extreme.token1 = token(4);
    extreme.reserve1 = U256::MAX / 2;
    engine.upsert_pool(extreme).unwrap();
    engine
        .initialize(vec![protocol()], vec![CHAIN.to_string()])
        .await
        .unwrap();

    for _ in 0..4 {
        let report = engine.precompute_now().await.unwrap();
        assert_eq!(report.chains_failed, 0);
    }
    while let Ok(event) = rx.try_recv() {
        assert!(
            !matches!(
                event,
                EngineEvent::PrecomputationFailed { .. } | EngineEvent::CircuitBreakerOpened { .. }
            ),
            "unexpected {:?}",
            event
        );
    }

    assert!(engine.get_best_route("bot", &valid_query()).unwrap().is_some());
    let health = engine.get_system_health();
    assert_eq!(health.consecutive_failures, 0);
    assert_eq!(engine.get_performance_metrics().cycles_failed, 0);

    engine.destroy().await;
}
