//! # Route Engine
//!
//! The engine instance owns every piece of routing state: the graph, the published
//! routing tables, the query cache, the circuit breaker and the rate limiter. Hosts push
//! protocol and pool updates into it and query it for routes.
//!
//! ## Query path
//!
//! Every query method runs the same guard sequence:
//!
//! 1. `NotRunning` unless `initialize` has completed
//! 2. per-caller rate limit (`RateLimited`, never counted as a breaker failure)
//! 3. circuit breaker (`CircuitOpen` while cooling down)
//! 4. the query itself; an internal error is a `ComputationFailure` and a breaker failure
//!
//! Route queries read the query cache, then the published table, then fall back to a
//! live search over the graph when no precomputed route survives filtering.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use dex_route_engine::engine::{RouteEngine, RouteQuery};
//! use dex_route_engine::settings::Settings;
//! use ethers::types::{Address, U256};
//! # async fn run(protocols: Vec<dex_route_engine::types::Protocol>) -> anyhow::Result<()> {
//! let engine = RouteEngine::with_static_gas_prices(Settings::default())?;
//! engine.initialize(protocols, vec!["ethereum".to_string()]).await?;
//!
//! let (weth, usdc) = (Address::from_low_u64_be(1), Address::from_low_u64_be(2));
//! let query = RouteQuery::new(weth, usdc, "ethereum", U256::exp10(18)).with_max_slippage(1.0);
//! let best = engine.get_best_route("my-bot", &query)?;
//! engine.destroy().await;
//! # Ok(())
//! # }
//! ```

use crate::analytics::{
    estimate_memory_bytes, evaluate_health, ChainRouteAnalytics, EngineAnalytics, HealthInputs,
    PerformanceMetrics, RouteAnalytics, SystemHealth,
};
use crate::arbitrage;
use crate::cache::{QueryCache, QueryKey};
use crate::circuit_breaker::CircuitBreaker;
use crate::error::RouteEngineError;
use crate::events::{EngineEvent, EventRecorder, EventSink};
use crate::gas_oracle::{GasPriceOracle, StaticGasPriceOracle};
use crate::graph_service::{GraphService, PoolUpdate};
use crate::metrics;
use crate::opportunity_matrix::RoutingTableStore;
use crate::rate_limiter::CallerRateLimiter;
use crate::route_precomputer::{CycleReport, PrecomputeDeps, RoutePrecomputer};
use crate::router::{sort_by_profitability, Router};
use crate::scoring::ScoringEngine;
use crate::settings::Settings;
use crate::types::{GasPrice, LiquidityPool, PrecomputedRoute, Protocol};
use crate::utils::{age_millis, now_millis};
use arc_swap::ArcSwapOption;
use ethers::types::{Address, U256};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// One route request. `max_slippage` is a price impact ceiling in percent; `None` uses
/// `query.default_max_slippage`.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteQuery {
    pub token_in: Address,
    pub token_out: Address,
    pub chain: String,
    pub amount_in: U256,
    pub max_slippage: Option<f64>,
}

impl RouteQuery {
    pub fn new(token_in: Address, token_out: Address, chain: &str, amount_in: U256) -> Self {
        Self {
            token_in,
            token_out,
            chain: chain.to_string(),
            amount_in,
            max_slippage: None,
        }
    }

    pub fn with_max_slippage(mut self, percent: f64) -> Self {
        self.max_slippage = Some(percent);
        self
    }
}

/// Background scheduler handles, present between `initialize` and `destroy`.
struct Lifecycle {
    precomputer: Arc<RoutePrecomputer>,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
    alive: Arc<AtomicBool>,
}

pub struct RouteEngine {
    settings: Settings,
    graph: Arc<GraphService>,
    scoring: Arc<ScoringEngine>,
    router: Router,
    tables: Arc<RoutingTableStore>,
    query_cache: Arc<QueryCache>,
    breaker: Arc<CircuitBreaker>,
    rate_limiter: Arc<CallerRateLimiter>,
    analytics: Arc<EngineAnalytics>,
    oracle: Arc<dyn GasPriceOracle>,
    static_oracle: Option<Arc<StaticGasPriceOracle>>,
    events: Option<Arc<EventRecorder>>,
    running: AtomicBool,
    precomputer: ArcSwapOption<RoutePrecomputer>,
    lifecycle: Mutex<Option<Lifecycle>>,
}

impl RouteEngine {
    /// Builds a stopped engine. Settings are validated here.
    pub fn new(settings: Settings, oracle: Arc<dyn GasPriceOracle>) -> Result<Self, RouteEngineError> {
        settings.validate()?;

        let graph = Arc::new(GraphService::new());
        let scoring = Arc::new(ScoringEngine::new(settings.scoring.clone()));
        let router = Router::new(
            Arc::clone(&graph),
            Arc::clone(&scoring),
            settings.routing.clone(),
        );
        let rate_limiter = CallerRateLimiter::new(&settings.rate_limit)
            .map_err(|e| RouteEngineError::InvalidConfig(format!("{:#}", e)))?;

        Ok(Self {
            graph,
            scoring,
            router,
            tables: Arc::new(RoutingTableStore::new()),
            query_cache: Arc::new(QueryCache::new(
                settings.cache.ttl(),
                settings.cache.max_entries,
            )),
            breaker: Arc::new(CircuitBreaker::new(&settings.circuit_breaker)),
            rate_limiter: Arc::new(rate_limiter),
            analytics: Arc::new(EngineAnalytics::new()),
            oracle,
            static_oracle: None,
            events: None,
            running: AtomicBool::new(false),
            precomputer: ArcSwapOption::empty(),
            lifecycle: Mutex::new(None),
            settings,
        })
    }

    /// Engine whose gas prices are pushed by the host through [`RouteEngine::set_gas_price`].
    pub fn with_static_gas_prices(settings: Settings) -> Result<Self, RouteEngineError> {
        let oracle = Arc::new(StaticGasPriceOracle::new());
        let mut engine = Self::new(settings, Arc::clone(&oracle) as Arc<dyn GasPriceOracle>)?;
        engine.static_oracle = Some(oracle);
        Ok(engine)
    }

    /// Attaches an event recorder. Must be called before `initialize`.
    pub fn with_event_recorder(mut self, recorder: Arc<EventRecorder>) -> Self {
        self.events = Some(recorder);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn graph(&self) -> &Arc<GraphService> {
        &self.graph
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Loads protocols, runs a first precomputation cycle and starts the periodic
    /// scheduler. Must be called from within a tokio runtime.
    pub async fn initialize(
        &self,
        protocols: Vec<Protocol>,
        chains: Vec<String>,
    ) -> Result<(), RouteEngineError> {
        let mut lifecycle = self.lifecycle.lock().await;
        for protocol in protocols {
            self.upsert_protocol(protocol);
        }
        if lifecycle.is_some() {
            warn!("⚠️ Route engine already initialized; protocols refreshed only");
            return Ok(());
        }

        let alive = Arc::new(AtomicBool::new(true));
        let deps = PrecomputeDeps {
            graph: Arc::clone(&self.graph),
            router: self.router.clone(),
            tables: Arc::clone(&self.tables),
            breaker: Arc::clone(&self.breaker),
            oracle: Arc::clone(&self.oracle),
            query_cache: Arc::clone(&self.query_cache),
            rate_limiter: Arc::clone(&self.rate_limiter),
            analytics: Arc::clone(&self.analytics),
            events: self.events.clone(),
            alive: Arc::clone(&alive),
        };
        let precomputer = Arc::new(
            RoutePrecomputer::new(deps, self.settings.clone(), chains.clone())
                .map_err(|e| RouteEngineError::InvalidConfig(format!("{:#}", e)))?,
        );

        let first = precomputer
            .run_cycle()
            .await
            .map_err(|e| RouteEngineError::ComputationFailure(format!("{:#}", e)))?;
        debug!("Initial precomputation: {:?}", first);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = Arc::clone(&precomputer).spawn(shutdown_rx);

        self.precomputer.store(Some(Arc::clone(&precomputer)));
        *lifecycle = Some(Lifecycle {
            precomputer,
            shutdown,
            handle,
            alive,
        });
        self.running.store(true, Ordering::Release);
        metrics::record_heartbeat();
        info!(
            "✅ Route engine initialized: {} protocols, chains {:?}, {} routes precomputed",
            self.graph.protocols().len(),
            chains,
            first.routes
        );
        Ok(())
    }

    /// Stops the scheduler (an in-flight cycle finishes first) and releases graph, table
    /// and cache state.
    pub async fn destroy(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        self.running.store(false, Ordering::Release);
        let Some(state) = lifecycle.take() else {
            return;
        };

        state.alive.store(false, Ordering::Release);
        let _ = state.shutdown.send(true);
        if let Err(e) = state.handle.await {
            warn!("⚠️ Precomputation task ended abnormally: {}", e);
        }
        self.precomputer.store(None);
        debug!(
            "Precomputer stopped after {} cycles",
            state.precomputer.cycles_started()
        );

        self.graph.clear();
        self.tables.clear();
        self.query_cache.clear();
        info!("Route engine destroyed");
    }

    /// Runs one precomputation cycle now. Returns a skipped report when a cycle is already
    /// in flight.
    pub async fn precompute_now(&self) -> Result<CycleReport, RouteEngineError> {
        let precomputer = self.precomputer.load_full().ok_or(RouteEngineError::NotRunning)?;
        precomputer
            .run_cycle()
            .await
            .map_err(|e| RouteEngineError::ComputationFailure(format!("{:#}", e)))
    }

    // ------------------------------------------------------------------
    // Inbound updates
    // ------------------------------------------------------------------

    /// Inserts or replaces a protocol descriptor. Learned efficiency survives a replace.
    pub fn upsert_protocol(&self, protocol: Protocol) {
        self.scoring.efficiency(&protocol);
        debug!("Protocol {} registered on {:?}", protocol.id, protocol.chains);
        self.graph.upsert_protocol(protocol);
    }

    /// Replaces a pool, evicts cached queries naming its tokens and drops gas-optimal
    /// routes through it.
    pub fn upsert_pool(&self, pool: LiquidityPool) -> Result<PoolUpdate, RouteEngineError> {
        let update = self
            .graph
            .upsert_pool(pool)
            .map_err(|e| RouteEngineError::InvalidPool(format!("{:#}", e)))?;

        let invalidated = self.query_cache.invalidate_tokens(&update.affected_tokens());
        let dropped = self.tables.drop_gas_optimal_for_pool(&update.pool_id);
        if dropped > 0 {
            debug!(
                "Dropped {} gas-optimal routes through pool {}",
                dropped, update.pool_id
            );
        }

        self.analytics.record_pool_update();
        metrics::increment_pool_updates(&update.chain);
        self.events.emit(EngineEvent::PoolUpdated {
            ts: now_millis(),
            pool_id: update.pool_id.clone(),
            chain: update.chain.clone(),
            token0: update.token0,
            token1: update.token1,
            invalidated_queries: invalidated,
        });
        Ok(update)
    }

    /// Removes a pool and invalidates like an update.
    pub fn remove_pool(&self, pool_id: &str) -> Option<LiquidityPool> {
        let pool = self.graph.remove_pool(pool_id)?;
        self.query_cache
            .invalidate_tokens(&[pool.token0, pool.token1]);
        self.tables.drop_gas_optimal_for_pool(pool_id);
        Some(pool)
    }

    /// Feeds an execution outcome into the protocol's adaptive efficiency. Returns the
    /// new value, or `None` for an unknown protocol.
    pub fn record_execution(
        &self,
        protocol_id: &str,
        success: bool,
        execution_time_ms: u64,
        gas_used: u64,
    ) -> Option<f64> {
        let protocol = self.graph.protocol(protocol_id)?;
        Some(
            self.scoring
                .record_execution(&protocol, success, execution_time_ms, gas_used),
        )
    }

    /// Pushes a gas price. Feeds the static oracle when the engine owns one, and updates
    /// the last known price used by queries right away.
    pub fn set_gas_price(&self, chain: &str, price: GasPrice) {
        if let Some(oracle) = &self.static_oracle {
            oracle.set_gas_price(chain, price);
        }
        if let Some(precomputer) = self.precomputer.load_full() {
            precomputer.set_gas_price(chain, price);
        }
    }

    // ------------------------------------------------------------------
    // Query API
    // ------------------------------------------------------------------

    /// Highest-profitability route surviving the query filters.
    pub fn get_best_route(
        &self,
        caller: &str,
        query: &RouteQuery,
    ) -> Result<Option<Arc<PrecomputedRoute>>, RouteEngineError> {
        self.guarded(caller, "best_route", || {
            Ok(self.select_routes(query)?.into_iter().next())
        })
    }

    /// Top `count` routes surviving the query filters; `None` uses
    /// `query.default_option_count`.
    pub fn get_route_options(
        &self,
        caller: &str,
        query: &RouteQuery,
        count: Option<usize>,
    ) -> Result<Vec<Arc<PrecomputedRoute>>, RouteEngineError> {
        let count = count.unwrap_or(self.settings.query.default_option_count);
        self.guarded(caller, "route_options", || {
            let mut routes = self.select_routes(query)?;
            routes.truncate(count);
            Ok(routes)
        })
    }

    /// Cross-protocol multi-hop routes of the published table with
    /// `profitability >= min_profit_percent * 10` and `risk <= max_risk_score`.
    pub fn get_arbitrage_opportunities(
        &self,
        caller: &str,
        chain: &str,
        min_profit_percent: f64,
        max_risk_score: f64,
    ) -> Result<Vec<Arc<PrecomputedRoute>>, RouteEngineError> {
        self.guarded(caller, "arbitrage", || {
            Ok(self
                .tables
                .get(chain)
                .map(|table| {
                    arbitrage::find_opportunities(
                        &table,
                        min_profit_percent,
                        max_risk_score,
                        self.settings.query.max_arbitrage_results,
                    )
                })
                .unwrap_or_default())
        })
    }

    /// Route with the best profitability per unit of gas for the pair.
    pub fn get_gas_optimal_route(
        &self,
        caller: &str,
        token_in: Address,
        token_out: Address,
        chain: &str,
    ) -> Result<Option<Arc<PrecomputedRoute>>, RouteEngineError> {
        self.guarded(caller, "gas_optimal", || {
            Ok(self
                .tables
                .get(chain)
                .and_then(|table| table.gas_optimal(token_in, token_out)))
        })
    }

    fn guarded<T>(
        &self,
        caller: &str,
        operation: &'static str,
        query: impl FnOnce() -> anyhow::Result<T>,
    ) -> Result<T, RouteEngineError> {
        if !self.is_running() {
            return Err(RouteEngineError::NotRunning);
        }
        if !self.rate_limiter.check(caller) {
            self.analytics.record_rate_limited();
            metrics::increment_query_errors("rate_limited");
            return Err(RouteEngineError::RateLimited {
                caller: caller.to_string(),
            });
        }
        if let Err(retry_after_ms) = self.breaker.try_acquire() {
            self.analytics.record_circuit_rejection();
            metrics::increment_query_errors("circuit_open");
            return Err(RouteEngineError::CircuitOpen { retry_after_ms });
        }

        let start = Instant::now();
        let outcome = query();
        let elapsed = start.elapsed();
        metrics::record_query_latency(operation, elapsed);
        self.analytics.record_query(elapsed, outcome.is_ok());

        match outcome {
            Ok(value) => {
                if self.breaker.record_success() {
                    self.events
                        .emit(EngineEvent::CircuitBreakerReset { ts: now_millis() });
                }
                Ok(value)
            }
            Err(e) => {
                let err = RouteEngineError::ComputationFailure(format!("{:#}", e));
                warn!("⚠️ {} query from {} failed: {}", operation, caller, err);
                metrics::increment_query_errors(err.kind());
                if self.breaker.record_failure() {
                    let snapshot = self.breaker.snapshot();
                    self.events.emit(EngineEvent::CircuitBreakerOpened {
                        ts: now_millis(),
                        consecutive_failures: snapshot.consecutive_failures,
                        retry_after_ms: snapshot.retry_after_ms,
                    });
                }
                Err(err)
            }
        }
    }

    /// Filtered, ranked candidates: cache, then published table, then live search.
    fn select_routes(&self, query: &RouteQuery) -> anyhow::Result<Vec<Arc<PrecomputedRoute>>> {
        if query.token_in == query.token_out || query.amount_in.is_zero() {
            return Ok(Vec::new());
        }
        if !self.graph.has_chain(&query.chain) {
            debug!("No pools known for chain {}", query.chain);
            return Ok(Vec::new());
        }

        let max_slippage = query
            .max_slippage
            .unwrap_or(self.settings.query.default_max_slippage);
        let key = QueryKey::new(
            query.token_in,
            query.token_out,
            &query.chain,
            query.amount_in,
            max_slippage,
        );
        let now = now_millis();
        let generation = self.query_cache.generation();

        if let Some(cached) = self.query_cache.get(&key) {
            let valid: Vec<_> = cached
                .into_iter()
                .filter(|r| self.accepts(r, query.amount_in, max_slippage, now))
                .collect();
            if !valid.is_empty() {
                return Ok(valid);
            }
        }

        let mut routes: Vec<Arc<PrecomputedRoute>> = self
            .tables
            .get(&query.chain)
            .map(|table| {
                table
                    .routes_for(query.token_in, query.token_out)
                    .iter()
                    .filter(|r| self.accepts(r, query.amount_in, max_slippage, now))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if routes.is_empty() {
            let ctx = match self.precomputer.load_full() {
                Some(precomputer) => precomputer.scoring_context(&query.chain),
                None => return Ok(Vec::new()),
            };
            routes = self
                .router
                .find_routes(
                    query.token_in,
                    query.token_out,
                    &query.chain,
                    query.amount_in,
                    &ctx,
                )?
                .into_iter()
                .filter(|r| self.accepts(r, query.amount_in, max_slippage, now))
                .map(Arc::new)
                .collect();
        }

        sort_by_profitability(&mut routes);
        if !routes.is_empty() {
            self.query_cache.insert_at(key, routes.clone(), generation);
        }
        Ok(routes)
    }

    fn is_fresh(&self, route: &PrecomputedRoute, now_ms: u64) -> bool {
        age_millis(route.last_updated_ms, now_ms) <= self.settings.query.max_route_age_ms
    }

    /// Query filters: impact, confidence, risk, age and amount compatibility.
    fn accepts(
        &self,
        route: &PrecomputedRoute,
        amount_in: U256,
        max_slippage: f64,
        now_ms: u64,
    ) -> bool {
        let q = &self.settings.query;
        route.total_price_impact <= max_slippage
            && route.confidence_score >= q.min_confidence
            && route.risk_score <= q.max_risk_score
            && self.is_fresh(route, now_ms)
            && amount_compatible(route.amount_in, amount_in, q.amount_compatibility_factor)
    }

    // ------------------------------------------------------------------
    // Observability
    // ------------------------------------------------------------------

    pub fn get_performance_metrics(&self) -> PerformanceMetrics {
        let cache = self.query_cache.stats();
        self.analytics.snapshot(cache.hits, cache.misses)
    }

    pub fn get_system_health(&self) -> SystemHealth {
        let tables = self.tables.load();
        let now = now_millis();
        let (mut routes, mut steps) = (0, 0);
        for table in tables.values() {
            routes += table.route_count();
            steps += table.routes().map(|r| r.hops()).sum::<usize>();
        }
        let graph = self.graph.stats();
        let inputs = HealthInputs {
            running: self.is_running(),
            error_rate: self.analytics.error_rate(),
            memory_estimate_bytes: estimate_memory_bytes(
                graph.pools,
                graph.edges,
                routes,
                steps,
                self.query_cache.len(),
            ),
            circuit_breaker: self.breaker.snapshot(),
            matrix_age_ms: tables
                .values()
                .map(|t| age_millis(t.computed_at_ms, now))
                .max(),
        };
        evaluate_health(&inputs, &self.settings.health)
    }

    pub fn get_route_analytics(&self) -> RouteAnalytics {
        let tables = self.tables.load();
        let mut usage: HashMap<String, usize> = HashMap::new();
        let mut chains: Vec<ChainRouteAnalytics> = tables
            .values()
            .map(|table| {
                for route in table.routes() {
                    for protocol in route.protocols() {
                        *usage.entry(protocol.to_string()).or_default() += 1;
                    }
                }
                ChainRouteAnalytics::from_routes(
                    &table.chain,
                    table.cycle,
                    table.computed_at_ms,
                    table.pair_count(),
                    table.gas_optimal_count(),
                    table.routes().map(|r| r.as_ref()),
                )
            })
            .collect();
        chains.sort_by(|a, b| a.chain.cmp(&b.chain));

        let mut protocol_usage: Vec<(String, usize)> = usage.into_iter().collect();
        protocol_usage.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        RouteAnalytics {
            chains,
            protocol_usage,
            protocol_efficiency: self.scoring.efficiency_snapshot(),
            graph: self.graph.stats(),
        }
    }
}

/// `amount` lies within `[reference / factor, reference * factor]`.
fn amount_compatible(reference: U256, amount: U256, factor: u64) -> bool {
    let factor = U256::from(factor.max(1));
    amount <= reference.saturating_mul(factor) && amount.saturating_mul(factor) >= reference
}
