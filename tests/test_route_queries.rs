//! Integration tests for the route query API
//!
//! Tests cover:
//! - Direct route scenario (single pool, exact AMM output)
//! - Query filters (slippage, confidence, risk, route age)
//! - Cached results re-checked against the requested slippage
//! - Query cache hits and exact invalidation on pool updates
//! - Gas-optimal routes and live-search fallback

use dex_route_engine::types::{LiquidityPool, Protocol};
use dex_route_engine::utils::now_millis;
use dex_route_engine::{RouteEngine, RouteQuery, Settings};
use ethers::types::{Address, U256};

const CHAIN: &str = "ethereum";

fn token(n: u64) -> Address {
    Address::from_low_u64_be(n)
}

fn e18(v: u64) -> U256 {
    U256::from(v) * U256::exp10(18)
}

fn protocol(id: &str, reliability: f64, mev_protection: bool) -> Protocol {
    Protocol {
        id: id.to_string(),
        chains: vec![CHAIN.to_string()],
        fee_bps: 30,
        base_gas: 100_000,
        gas_per_hop: 60_000,
        reliability,
        mev_protection,
    }
}

fn pool(id: &str, protocol: &str, a: u64, b: u64, reserve_a: U256, reserve_b: U256, liquidity_usd: f64) -> LiquidityPool {
    LiquidityPool {
        id: id.to_string(),
        protocol: protocol.to_string(),
        chain: CHAIN.to_string(),
        token0: token(a),
        token1: token(b),
        reserve0: reserve_a,
        reserve1: reserve_b,
        fee_bps: 30,
        liquidity_usd,
        volume_24h_usd: 250_000.0,
        price_impact: 0.0,
        last_updated_ms: now_millis(),
    }
}

async fn engine_with(pools: Vec<LiquidityPool>) -> RouteEngine {
    let protocols = vec![protocol("uniswap_v2", 90.0, false), protocol("sushiswap", 85.0, false)];
    start(Settings::default(), protocols, pools).await
}

async fn start(settings: Settings, protocols: Vec<Protocol>, pools: Vec<LiquidityPool>) -> RouteEngine {
    let engine = RouteEngine::with_static_gas_prices(settings).unwrap();
    for p in &protocols {
        engine.upsert_protocol(p.clone());
    }
    for p in pools {
        engine.upsert_pool(p).unwrap();
    }
    engine
        .initialize(protocols, vec![CHAIN.to_string()])
        .await
        .unwrap();
    engine
}

/// Test the single-pool direct route scenario
#[tokio::test]
async fn test_direct_route_scenario() {
    let engine = engine_with(vec![pool(
        "a-b",
        "uniswap_v2",
        1,
        2,
        e18(1_000),
        e18(2_000),
        5_000_000.0,
    )])
    .await;

    let query = RouteQuery::new(token(1), token(2), CHAIN, e18(1));
    let route = engine
        .get_best_route("test", &query)
        .unwrap()
        .expect("direct route should be found");

    assert_eq!(route.hops(), 1);
    assert_eq!(route.path[0].pool_id, "a-b");
    // 1e18 * 9970 * 2000e18 / (1000e18 * 10000 + 1e18 * 9970)
    let with_fee = e18(1) * U256::from(9_970u64);
    let expected = with_fee * e18(2_000) / (e18(1_000) * U256::from(10_000u64) + with_fee);
    assert_eq!(route.expected_output, expected);
    assert!(route.expected_output > U256::from(1_990u64) * U256::exp10(15));
    assert!(route.expected_output < U256::from(1_995u64) * U256::exp10(15));

    // one hop at reliability 90 without MEV protection
    let expected_risk = 2.0 * route.total_price_impact + (100.0 - 90.0) / 10.0 + 5.0;
    assert!((route.risk_score - expected_risk).abs() < 1e-9);
    assert!(route.confidence_score >= 99.0);
    assert!(route.profitability_score > 0.0);
    assert!(route.is_well_formed());

    engine.destroy().await;
}

/// Test that every query filter can reject all candidates
#[tokio::test]
async fn test_filters_reject_violating_routes() {
    let engine = engine_with(vec![
        pool("deep", "uniswap_v2", 1, 2, e18(1_000), e18(2_000), 5_000_000.0),
        // confidence = (100 + 100_000 / 10_000) / 2 = 55
        pool("shallow", "uniswap_v2", 3, 4, e18(1_000), e18(2_000), 100_000.0),
    ])
    .await;

    // price impact of 1e18 into 1000e18 is ~0.0999%
    let tight = RouteQuery::new(token(1), token(2), CHAIN, e18(1)).with_max_slippage(0.01);
    assert!(engine.get_best_route("test", &tight).unwrap().is_none());

    let loose = RouteQuery::new(token(1), token(2), CHAIN, e18(1)).with_max_slippage(0.5);
    let route = engine.get_best_route("test", &loose).unwrap().unwrap();
    assert!(route.total_price_impact <= 0.5);

    let low_confidence = RouteQuery::new(token(3), token(4), CHAIN, e18(1));
    assert!(engine.get_best_route("test", &low_confidence).unwrap().is_none());

    // amounts far outside the reference amount never match a precomputed route
    let dust = RouteQuery::new(token(1), token(2), CHAIN, U256::from(1_000u64));
    for route in engine.get_route_options("test", &dust, None).unwrap() {
        assert_eq!(route.amount_in, U256::from(1_000u64));
    }

    let unknown_chain = RouteQuery::new(token(1), token(2), "solana", e18(1));
    assert!(engine.get_best_route("test", &unknown_chain).unwrap().is_none());

    engine.destroy().await;
}

/// Test route options are ranked and truncated
#[tokio::test]
async fn test_route_options_ranked() {
    let engine = engine_with(vec![
        pool("uni-ab", "uniswap_v2", 1, 2, e18(1_000), e18(2_000), 5_000_000.0),
        pool("sushi-ab", "sushiswap", 1, 2, e18(1_000), e18(1_900), 5_000_000.0),
        pool("uni-ac", "uniswap_v2", 1, 3, e18(1_000), e18(1_000), 5_000_000.0),
        pool("uni-cb", "uniswap_v2", 3, 2, e18(1_000), e18(2_000), 5_000_000.0),
    ])
    .await;

    let query = RouteQuery::new(token(1), token(2), CHAIN, e18(1));
    let options = engine.get_route_options("test", &query, Some(2)).unwrap();
    assert_eq!(options.len(), 2);
    assert!(options[0].profitability_score >= options[1].profitability_score);
    assert!(options.iter().all(|r| r.token_in == token(1) && r.token_out == token(2)));

    let all = engine.get_route_options("test", &query, Some(10)).unwrap();
    assert!(all.len() >= 2);
    assert!(all.len() <= engine.settings().routing.max_routes_per_pair);

    engine.destroy().await;
}

/// Test that a pool update evicts cached queries for its tokens
#[tokio::test]
async fn test_pool_update_invalidates_query_cache() {
    let engine = engine_with(vec![pool(
        "a-b",
        "uniswap_v2",
        1,
        2,
        e18(1_000),
        e18(2_000),
        5_000_000.0,
    )])
    .await;
    let query = RouteQuery::new(token(1), token(2), CHAIN, e18(1));

    let first = engine.get_best_route("test", &query).unwrap().unwrap();
    let second = engine.get_best_route("test", &query).unwrap().unwrap();
    assert_eq!(first, second);
    assert!((engine.get_performance_metrics().cache_hit_rate - 0.5).abs() < 1e-9);

    engine
        .upsert_pool(pool("a-b", "uniswap_v2", 1, 2, e18(1_000), e18(4_000), 5_000_000.0))
        .unwrap();
    engine.get_best_route("test", &query).unwrap();
    // the third lookup was a miss
    assert!((engine.get_performance_metrics().cache_hit_rate - 1.0 / 3.0).abs() < 1e-9);

    engine.precompute_now().await.unwrap();
    let refreshed = engine.get_best_route("test", &query).unwrap().unwrap();
    assert!(refreshed.expected_output > first.expected_output);

    engine.destroy().await;
}

/// Test gas-optimal routes and their removal when a pool changes
#[tokio::test]
async fn test_gas_optimal_route() {
    let engine = engine_with(vec![
        pool("uni-ab", "uniswap_v2", 1, 2, e18(1_000), e18(2_000), 5_000_000.0),
        pool("uni-ac", "uniswap_v2", 1, 3, e18(1_000), e18(1_000), 5_000_000.0),
        pool("sushi-cb", "sushiswap", 3, 2, e18(1_000), e18(2_000), 5_000_000.0),
    ])
    .await;

    let best = engine
        .get_gas_optimal_route("test", token(1), token(2), CHAIN)
        .unwrap()
        .expect("gas-optimal route");
    assert!(best.is_well_formed());
    let options = engine
        .get_route_options("test", &RouteQuery::new(token(1), token(2), CHAIN, e18(1)), Some(5))
        .unwrap();
    assert!(options
        .iter()
        .all(|r| r.gas_efficiency() <= best.gas_efficiency() + 1e-12));

    let pool_id = best.path[0].pool_id.clone();
    let stale = engine.graph().pool(&pool_id).unwrap();
    engine.upsert_pool(stale).unwrap();
    assert!(engine
        .get_gas_optimal_route("test", token(1), token(2), CHAIN)
        .unwrap()
        .is_none());

    engine.precompute_now().await.unwrap();
    assert!(engine
        .get_gas_optimal_route("test", token(1), token(2), CHAIN)
        .unwrap()
        .is_some());

    engine.destroy().await;
}

/// Test that pools added after the last cycle are reachable through live search
#[tokio::test]
async fn test_live_search_fallback() {
    let engine = engine_with(vec![pool(
        "a-b",
        "uniswap_v2",
        1,
        2,
        e18(1_000),
        e18(2_000),
        5_000_000.0,
    )])
    .await;

    engine
        .upsert_pool(pool("b-c", "sushiswap", 2, 3, e18(1_000), e18(3_000), 5_000_000.0))
        .unwrap();
    let query = RouteQuery::new(token(1), token(3), CHAIN, e18(1));
    let route = engine
        .get_best_route("test", &query)
        .unwrap()
        .expect("two-hop route via live search");
    assert_eq!(route.token_sequence(), vec![token(1), token(2), token(3)]);
    assert!(route.is_cross_protocol());

    engine.destroy().await;
}

/// Test that routes through pools older than the age limit are never returned
#[tokio::test]
async fn test_stale_pools_are_filtered() {
    let mut stale = pool("a-b", "uniswap_v2", 1, 2, e18(1_000), e18(2_000), 5_000_000.0);
    stale.last_updated_ms = now_millis() - 200_000;
    let engine = engine_with(vec![stale]).await;

    let query = RouteQuery::new(token(1), token(2), CHAIN, e18(1));
    // neither the precomputed table nor the live search may serve it
    assert!(engine.get_best_route("test", &query).unwrap().is_none());
    assert!(engine.get_route_options("test", &query, Some(5)).unwrap().is_empty());

    // a fresh snapshot of the same pool is served again
    engine
        .upsert_pool(pool("a-b", "uniswap_v2", 1, 2, e18(1_000), e18(2_000), 5_000_000.0))
        .unwrap();
    assert!(engine.get_best_route("test", &query).unwrap().is_some());

    engine.destroy().await;
}

/// Test that routes above the risk ceiling are rejected until the ceiling is raised
#[tokio::test]
async fn test_risky_routes_are_filtered() {
    // two hops at reliability 0 without MEV protection: 5 + 2 * (10 + 5) plus impact
    let shaky = || vec![protocol("shaky", 0.0, false)];
    let pools = || {
        vec![
            pool("a-e", "shaky", 1, 5, e18(1_000), e18(2_000), 5_000_000.0),
            pool("e-f", "shaky", 5, 6, e18(2_000), e18(4_000), 5_000_000.0),
        ]
    };
    let query = RouteQuery::new(token(1), token(6), CHAIN, e18(1));

    let strict = start(Settings::default(), shaky(), pools()).await;
    assert!(strict.get_best_route("test", &query).unwrap().is_none());
    strict.destroy().await;

    let mut settings = Settings::default();
    settings.query.max_risk_score = 100.0;
    let lenient = start(settings, shaky(), pools()).await;
    let route = lenient
        .get_best_route("test", &query)
        .unwrap()
        .expect("route allowed under a raised risk ceiling");
    assert_eq!(route.hops(), 2);
    assert!(route.risk_score > 30.0);
    lenient.destroy().await;
}

/// Test that a cached answer for one slippage limit is not served to a tighter one
#[tokio::test]
async fn test_cached_route_respects_tighter_slippage() {
    // 1e18 into 199e18 moves the price by exactly 0.5%
    let engine = engine_with(vec![pool(
        "a-b",
        "uniswap_v2",
        1,
        2,
        e18(199),
        e18(600),
        5_000_000.0,
    )])
    .await;

    let loose = RouteQuery::new(token(1), token(2), CHAIN, e18(1)).with_max_slippage(0.504);
    let route = engine.get_best_route("test", &loose).unwrap().unwrap();
    assert!(route.total_price_impact > 0.496);

    let tight = RouteQuery::new(token(1), token(2), CHAIN, e18(1)).with_max_slippage(0.496);
    assert!(engine.get_best_route("test", &tight).unwrap().is_none());
    // the looser limit is still answered from the cache
    assert!(engine.get_best_route("test", &loose).unwrap().is_some());

    engine.destroy().await;
}
