//! # Route Precomputer
//!
//! Rebuilds the opportunity matrix of every configured chain on a fixed interval and
//! publishes each chain's table with a single pointer swap.
//!
//! ## Cycle
//!
//! 1. Refresh gas prices for all chains concurrently (last known price kept on failure)
//! 2. For each chain, search every seed pair in parallel (priority pairs touched by pool
//!    updates first, then directed pairs from the top-ranked tokens) off the async runtime
//! 3. Publish the new table, derive top routes and gas-optimal routes, announce new
//!    arbitrage opportunities
//!
//! A seed pair whose search fails is left out of the table and retried next cycle. Only
//! a chain where every seed pair fails counts as failed; it keeps serving its previous
//! table. Cycles never overlap: a tick that arrives while a cycle is still running is
//! skipped.

use crate::analytics::EngineAnalytics;
use crate::arbitrage;
use crate::cache::QueryCache;
use crate::circuit_breaker::CircuitBreaker;
use crate::events::{EngineEvent, EventRecorder, EventSink};
use crate::gas_oracle::GasPriceOracle;
use crate::graph_service::GraphService;
use crate::metrics;
use crate::opportunity_matrix::{ChainRoutingTable, PairKey, RoutingTableStore};
use crate::rate_limiter::CallerRateLimiter;
use crate::router::Router;
use crate::scoring::ScoringContext;
use crate::settings::Settings;
use crate::types::{GasPrice, PrecomputedRoute};
use crate::utils::{directed_pairs, now_millis};
use anyhow::{anyhow, Context, Result};
use dashmap::DashMap;
use ethers::types::{Address, U256};
use futures::future::join_all;
use log::{debug, error, info, warn};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, MissedTickBehavior};

/// Outcome of one precomputation cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub cycle: u64,
    pub skipped: bool,
    pub duration: Duration,
    pub chains_published: usize,
    pub chains_failed: usize,
    pub routes: usize,
    pub new_arbitrage: usize,
}

/// Shared state a cycle reads from and publishes into.
pub struct PrecomputeDeps {
    pub graph: Arc<GraphService>,
    pub router: Router,
    pub tables: Arc<RoutingTableStore>,
    pub breaker: Arc<CircuitBreaker>,
    pub oracle: Arc<dyn GasPriceOracle>,
    pub query_cache: Arc<QueryCache>,
    pub rate_limiter: Arc<CallerRateLimiter>,
    pub analytics: Arc<EngineAnalytics>,
    pub events: Option<Arc<EventRecorder>>,
    /// Cleared when the engine is destroyed; cycles finishing afterwards do not publish
    pub alive: Arc<AtomicBool>,
}

pub struct RoutePrecomputer {
    deps: PrecomputeDeps,
    settings: Settings,
    chains: Vec<String>,
    reference_amount: U256,
    gas_prices: DashMap<String, GasPrice>,
    cycle_running: AtomicBool,
    cycle_counter: AtomicU64,
}

/// Clears the re-entrancy flag when the cycle ends, however it ends.
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl RoutePrecomputer {
    pub fn new(deps: PrecomputeDeps, settings: Settings, chains: Vec<String>) -> Result<Self> {
        let reference_amount = settings
            .routing
            .reference_amount()
            .context("Invalid routing reference amount")?;
        Ok(Self {
            deps,
            settings,
            chains,
            reference_amount,
            gas_prices: DashMap::new(),
            cycle_running: AtomicBool::new(false),
            cycle_counter: AtomicU64::new(0),
        })
    }

    pub fn chains(&self) -> &[String] {
        &self.chains
    }

    /// Last gas price seen for `chain`; zero when none was ever received.
    pub fn gas_price(&self, chain: &str) -> GasPrice {
        self.gas_prices.get(chain).map(|p| *p).unwrap_or_default()
    }

    pub fn set_gas_price(&self, chain: &str, price: GasPrice) {
        self.gas_prices.insert(chain.to_string(), price);
    }

    pub fn is_cycle_running(&self) -> bool {
        self.cycle_running.load(Ordering::Acquire)
    }

    pub fn cycles_started(&self) -> u64 {
        self.cycle_counter.load(Ordering::Relaxed)
    }

    pub fn scoring_context(&self, chain: &str) -> ScoringContext {
        ScoringContext {
            reference_amount: self.reference_amount,
            gas_price: self.gas_price(chain).gas_price,
            now_ms: now_millis(),
        }
    }

    /// Runs the periodic loop until `shutdown` flips to `true`. The first tick fires one
    /// interval from now. An in-flight cycle is always allowed to finish.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.settings.precompute.interval();
            let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(
                "🔍 Route precomputer started (interval {:?}, chains {:?})",
                self.settings.precompute.interval(),
                self.chains
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_cycle().await {
                            error!("❌ Precomputation cycle failed: {:#}", e);
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Route precomputer stopped");
        })
    }

    /// Runs one cycle now. Returns a skipped report when another cycle is in flight.
    pub async fn run_cycle(self: &Arc<Self>) -> Result<CycleReport> {
        if self
            .cycle_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Precomputation cycle still running, skipping tick");
            self.deps.analytics.record_cycle_skipped();
            metrics::record_precompute_cycle("skipped", Duration::ZERO);
            return Ok(CycleReport {
                skipped: true,
                ..Default::default()
            });
        }
        let _guard = CycleGuard(&self.cycle_running);

        let cycle = self.cycle_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let start = Instant::now();
        debug!("Precomputation cycle #{} starting", cycle);

        self.refresh_gas_prices().await;

        let this = Arc::clone(self);
        let outcomes = tokio::task::spawn_blocking(move || this.compute_all(cycle))
            .await
            .map_err(|e| anyhow!("precomputation worker panicked: {}", e))?;

        let mut report = CycleReport {
            cycle,
            ..Default::default()
        };
        for (chain, outcome) in outcomes {
            match outcome {
                Ok(table) => {
                    if !self.deps.alive.load(Ordering::Acquire) {
                        debug!("Engine stopped during cycle #{}, dropping results", cycle);
                        continue;
                    }
                    report.routes += table.route_count();
                    report.new_arbitrage += self.publish(table);
                    report.chains_published += 1;
                }
                Err((e, seeds)) => {
                    report.chains_failed += 1;
                    self.handle_chain_failure(cycle, &chain, e, &seeds);
                }
            }
        }

        if report.chains_failed == 0 && report.chains_published > 0 && self.deps.breaker.record_success() {
            self.deps
                .events
                .emit(EngineEvent::CircuitBreakerReset { ts: now_millis() });
        }

        report.duration = start.elapsed();
        let duration_ms = report.duration.as_millis() as u64;
        let threshold_ms = self.settings.precompute.slow_cycle_threshold_ms;
        let slow = duration_ms > threshold_ms;
        if slow {
            warn!(
                "⚠️ Precomputation cycle #{} took {}ms (threshold {}ms)",
                cycle, duration_ms, threshold_ms
            );
            metrics::increment_slow_cycles();
            self.deps.events.emit(EngineEvent::SlowPrecomputation {
                ts: now_millis(),
                cycle,
                duration_ms,
                threshold_ms,
            });
        }

        self.deps
            .analytics
            .record_cycle(report.duration, report.chains_failed, slow);
        metrics::record_precompute_cycle(
            if report.chains_failed == 0 { "ok" } else { "failed" },
            report.duration,
        );
        self.deps.events.emit(EngineEvent::PrecomputationCompleted {
            ts: now_millis(),
            cycle,
            duration_ms,
            chains: report.chains_published,
            routes: report.routes,
        });

        let purged = self.deps.query_cache.purge_expired();
        self.deps.rate_limiter.retain_recent();
        info!(
            "✅ Precomputation cycle #{}: {} chains, {} routes, {} failed, {} cache entries purged in {:?}",
            cycle, report.chains_published, report.routes, report.chains_failed, purged, report.duration
        );
        Ok(report)
    }

    async fn refresh_gas_prices(&self) {
        let quotes = join_all(self.chains.iter().map(|chain| async move {
            (chain, self.deps.oracle.current_gas_price(chain).await)
        }))
        .await;

        for (chain, quote) in quotes {
            match quote {
                Ok(price) => {
                    self.gas_prices.insert(chain.clone(), price);
                }
                Err(e) => {
                    warn!(
                        "⚠️ Gas price refresh failed for {} via {} ({:#}); keeping last known {}",
                        chain,
                        self.deps.oracle.name(),
                        e,
                        self.gas_price(chain).gas_price
                    );
                }
            }
        }
    }

    /// Computes every chain; failures carry the priority pairs that must be requeued.
    #[allow(clippy::type_complexity)]
    fn compute_all(
        &self,
        cycle: u64,
    ) -> Vec<(String, std::result::Result<ChainRoutingTable, (anyhow::Error, Vec<PairKey>)>)> {
        self.chains
            .iter()
            .map(|chain| {
                let priority = self.deps.graph.take_priority_pairs(chain);
                let outcome = self
                    .compute_chain(cycle, chain, &priority)
                    .map_err(|e| (e, priority));
                (chain.clone(), outcome)
            })
            .collect()
    }

    /// Priority pairs first, then directed pairs over the top tokens, capped per chain.
    pub fn seed_pairs(&self, chain: &str, priority: &[PairKey]) -> Vec<PairKey> {
        let routing = &self.settings.routing;
        let mut tokens = self.deps.graph.tokens_for_chain(chain);
        tokens.truncate(routing.top_tokens_per_chain);

        let mut seen = HashSet::new();
        let mut seeds = Vec::new();
        for pair in priority
            .iter()
            .copied()
            .chain(directed_pairs(&tokens, routing.max_seed_pairs_per_chain))
        {
            if seeds.len() >= routing.max_seed_pairs_per_chain {
                break;
            }
            if pair.0 != pair.1 && seen.insert(pair) {
                seeds.push(pair);
            }
        }
        seeds
    }

    fn compute_chain(&self, cycle: u64, chain: &str, priority: &[PairKey]) -> Result<ChainRoutingTable> {
        let start = Instant::now();
        let seeds = self.seed_pairs(chain, priority);
        let ctx = self.scoring_context(chain);

        let searched: Vec<(PairKey, Result<Vec<PrecomputedRoute>>)> = seeds
            .par_iter()
            .map(|&(a, b)| {
                let routes = self
                    .deps
                    .router
                    .find_routes(a, b, chain, self.reference_amount, &ctx)
                    .with_context(|| format!("searching {:?} -> {:?}", a, b));
                ((a, b), routes)
            })
            .collect();

        let mut routes_by_pair: HashMap<PairKey, Vec<PrecomputedRoute>> = HashMap::new();
        let mut failed_pairs = Vec::new();
        let mut last_error = None;
        for (pair, outcome) in searched {
            match outcome {
                Ok(routes) if !routes.is_empty() => {
                    routes_by_pair.insert(pair, routes);
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Chain {}: seed pair failed: {:#}", chain, e);
                    failed_pairs.push(pair);
                    last_error = Some(e);
                }
            }
        }
        if let Some(e) = last_error {
            if failed_pairs.len() == seeds.len() {
                return Err(e.context(format!("all {} seed pairs failed on {}", seeds.len(), chain)));
            }
            warn!(
                "⚠️ Chain {}: {} of {} seed pairs failed, retrying them next cycle",
                chain,
                failed_pairs.len(),
                seeds.len()
            );
            self.deps.graph.requeue_priority_pairs(chain, &failed_pairs);
        }

        let table = ChainRoutingTable::build(
            chain,
            cycle,
            ctx.now_ms,
            routes_by_pair,
            self.settings.precompute.top_pairs_limit,
        );
        debug!(
            "Chain {}: {} seed pairs -> {} pairs / {} routes in {:?}",
            chain,
            seeds.len(),
            table.pair_count(),
            table.route_count(),
            start.elapsed()
        );
        Ok(table)
    }

    /// Publishes a chain table and announces arbitrage routes not present before.
    fn publish(&self, table: ChainRoutingTable) -> usize {
        let query = &self.settings.query;
        let min_profit = self.settings.routing.min_profit_threshold;
        let previous: HashSet<String> = self
            .deps
            .tables
            .get(&table.chain)
            .map(|t| {
                arbitrage::find_opportunities(&t, min_profit, query.max_risk_score, query.max_arbitrage_results)
                    .iter()
                    .map(|r| r.id())
                    .collect()
            })
            .unwrap_or_default();
        let opportunities = arbitrage::find_opportunities(
            &table,
            min_profit,
            query.max_risk_score,
            query.max_arbitrage_results,
        );

        let chain = table.chain.clone();
        metrics::set_matrix_routes(&chain, table.pair_count(), table.route_count());
        self.deps.tables.publish(table);
        self.deps.query_cache.invalidate_chain(&chain);

        let mut announced = 0;
        for route in opportunities.iter().filter(|r| !previous.contains(&r.id())) {
            announced += 1;
            self.deps.events.emit(EngineEvent::ArbitrageOpportunityFound {
                ts: now_millis(),
                chain: chain.clone(),
                route_id: route.id(),
                protocols: route.protocols().into_iter().map(String::from).collect(),
                profitability_score: route.profitability_score,
                risk_score: route.risk_score,
            });
        }
        if announced > 0 {
            info!("🔍 {} new arbitrage opportunities on {}", announced, chain);
            self.deps.analytics.record_arbitrage_found(announced as u64);
            metrics::increment_arbitrage_opportunities(&chain, announced as u64);
        }
        announced
    }

    fn handle_chain_failure(&self, cycle: u64, chain: &str, e: anyhow::Error, priority: &[(Address, Address)]) {
        error!(
            "❌ Precomputation cycle #{} failed for chain {} (previous matrix kept): {:#}",
            cycle, chain, e
        );
        self.deps.graph.requeue_priority_pairs(chain, priority);
        self.deps.events.emit(EngineEvent::PrecomputationFailed {
            ts: now_millis(),
            cycle,
            chain: chain.to_string(),
            error: format!("{:#}", e),
        });
        if self.deps.breaker.record_failure() {
            let snapshot = self.deps.breaker.snapshot();
            self.deps.events.emit(EngineEvent::CircuitBreakerOpened {
                ts: now_millis(),
                consecutive_failures: snapshot.consecutive_failures,
                retry_after_ms: snapshot.retry_after_ms,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gas_oracle::StaticGasPriceOracle;
    use crate::scoring::ScoringEngine;
    use crate::types::{LiquidityPool, Protocol};

    fn token(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    fn precomputer(settings: Settings) -> Arc<RoutePrecomputer> {
        let graph = Arc::new(GraphService::new());
        graph.upsert_protocol(Protocol {
            id: "uni".to_string(),
            chains: vec!["ethereum".to_string()],
            fee_bps: 30,
            base_gas: 100_000,
            gas_per_hop: 60_000,
            reliability: 90.0,
            mev_protection: false,
        });
        for (id, a, b, ra, rb) in [("p12", 1, 2, 1_000u64, 2_000u64), ("p23", 2, 3, 1_000, 2_000)] {
            graph
                .upsert_pool(LiquidityPool {
                    id: id.to_string(),
                    protocol: "uni".to_string(),
                    chain: "ethereum".to_string(),
                    token0: token(a),
                    token1: token(b),
                    reserve0: U256::from(ra) * U256::exp10(18),
                    reserve1: U256::from(rb) * U256::exp10(18),
                    fee_bps: 30,
                    liquidity_usd: 5_000_000.0,
                    volume_24h_usd: 0.0,
                    price_impact: 0.0,
                    last_updated_ms: now_millis(),
                })
                .unwrap();
        }
        let scoring = Arc::new(ScoringEngine::new(settings.scoring.clone()));
        let deps = PrecomputeDeps {
            router: Router::new(Arc::clone(&graph), scoring, settings.routing.clone()),
            graph,
            tables: Arc::new(RoutingTableStore::new()),
            breaker: Arc::new(CircuitBreaker::new(&settings.circuit_breaker)),
            oracle: Arc::new(StaticGasPriceOracle::new()),
            query_cache: Arc::new(QueryCache::new(settings.cache.ttl(), settings.cache.max_entries)),
            rate_limiter: Arc::new(CallerRateLimiter::new(&settings.rate_limit).unwrap()),
            analytics: Arc::new(EngineAnalytics::new()),
            events: None,
            alive: Arc::new(AtomicBool::new(true)),
        };
        Arc::new(RoutePrecomputer::new(deps, settings, vec!["ethereum".to_string()]).unwrap())
    }

    #[test]
    fn test_seed_pairs_priority_first_and_capped() {
        let mut settings = Settings::default();
        settings.routing.max_seed_pairs_per_chain = 3;
        let p = precomputer(settings);
        let priority = vec![(token(9), token(8))];
        let seeds = p.seed_pairs("ethereum", &priority);
        assert_eq!(seeds.len(), 3);
        assert_eq!(seeds[0], (token(9), token(8)));
        assert!(seeds.iter().all(|(a, b)| a != b));
    }

    #[tokio::test]
    async fn test_cycle_publishes_and_keeps_gas_on_oracle_failure() {
        let p = precomputer(Settings::default());
        p.set_gas_price("ethereum", GasPrice::from_gwei(7));

        let report = p.run_cycle().await.unwrap();
        assert!(!report.skipped);
        assert_eq!(report.chains_published, 1);
        assert!(report.routes > 0);
        // the static oracle has no quote for ethereum
        assert_eq!(p.gas_price("ethereum"), GasPrice::from_gwei(7));

        let table = p.deps.tables.get("ethereum").unwrap();
        assert_eq!(table.cycle, 1);
        assert!(!table.routes_for(token(1), token(3)).is_empty());
        assert!(table.routes().all(|r| r.is_well_formed()));
    }

    #[tokio::test]
    async fn test_oversized_pool_does_not_fail_chain() {
        let p = precomputer(Settings::default());
        let mut huge = p.deps.graph.pool("p12").unwrap();
        huge.id = "p14".to_string();
        huge.token1 = token(4);
        huge.reserve1 = U256::MAX / 2;
        p.deps.graph.upsert_pool(huge).unwrap();

        for _ in 0..6 {
            let report = p.run_cycle().await.unwrap();
            assert_eq!(report.chains_failed, 0);
            assert_eq!(report.chains_published, 1);
        }
        assert_eq!(p.deps.breaker.consecutive_failures(), 0);
        let table = p.deps.tables.get("ethereum").unwrap();
        assert!(!table.routes_for(token(1), token(2)).is_empty());
        assert!(!table.routes_for(token(1), token(4)).is_empty());
    }

    #[tokio::test]
    async fn test_failed_chain_keeps_previous_table() {
        let p = precomputer(Settings::default());
        p.run_cycle().await.unwrap();
        let published = p.deps.tables.get("ethereum").unwrap();

        let pairs = vec![(token(1), token(4))];
        p.handle_chain_failure(2, "ethereum", anyhow!("search worker lost"), &pairs);

        assert_eq!(p.deps.tables.get("ethereum").unwrap().cycle, published.cycle);
        assert_eq!(p.deps.breaker.consecutive_failures(), 1);
        // the pairs of the failed cycle are retried next cycle
        let requeued = p.deps.graph.take_priority_pairs("ethereum");
        assert!(requeued.contains(&(token(1), token(4))));

        // a successful cycle resets the failure count
        p.run_cycle().await.unwrap();
        assert_eq!(p.deps.breaker.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_overlapping_cycle_is_skipped() {
        let p = precomputer(Settings::default());
        p.cycle_running.store(true, Ordering::Release);
        let report = p.run_cycle().await.unwrap();
        assert!(report.skipped);
        assert!(p.deps.tables.get("ethereum").is_none());
    }

    #[tokio::test]
    async fn test_destroyed_engine_does_not_publish() {
        let p = precomputer(Settings::default());
        p.deps.alive.store(false, Ordering::Release);
        p.run_cycle().await.unwrap();
        assert!(p.deps.tables.get("ethereum").is_none());
    }
}
