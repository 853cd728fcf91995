//! # Router Module
//!
//! Route search over the live token graph: direct routes through every matching pool,
//! then bounded breadth-first multi-hop search, then scoring, filtering and ranking.
//!
//! Search stages run in order (direct, 2 hops, 3 hops) and a later stage only runs while
//! the candidate set is still smaller than `max_routes_per_pair`.

use crate::amm_math;
use crate::graph_service::GraphService;
use crate::scoring::{ScoringContext, ScoringEngine};
use crate::settings::Routing;
use crate::types::{LiquidityPool, PrecomputedRoute, Protocol, RouteStep};
use anyhow::Result;
use ethers::types::{Address, U256};
use log::debug;
use std::borrow::Borrow;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// BFS state: the token sequence walked so far.
type SearchState = Vec<Address>;

/// Direct and multi-hop route search over a shared graph.
#[derive(Debug, Clone)]
pub struct Router {
    graph: Arc<GraphService>,
    scoring: Arc<ScoringEngine>,
    config: Routing,
}

impl Router {
    pub fn new(graph: Arc<GraphService>, scoring: Arc<ScoringEngine>, config: Routing) -> Self {
        Self {
            graph,
            scoring,
            config,
        }
    }

    pub fn config(&self) -> &Routing {
        &self.config
    }

    /// Full search for one directed pair: candidates from every stage, scored, filtered
    /// by the profitability floor, sorted best-first and truncated.
    ///
    /// Fails only when no candidate could be scored against the live graph, which means
    /// the pools it was built from changed underneath the search.
    pub fn find_routes(
        &self,
        token_in: Address,
        token_out: Address,
        chain: &str,
        amount_in: U256,
        ctx: &ScoringContext,
    ) -> Result<Vec<PrecomputedRoute>> {
        if token_in == token_out || amount_in.is_zero() {
            return Ok(Vec::new());
        }
        let max_routes = self.config.max_routes_per_pair;

        let mut candidates = self.direct_routes(token_in, token_out, chain, amount_in, ctx.now_ms);

        if candidates.len() < max_routes && self.config.max_hops >= 2 {
            let paths = self.find_paths(chain, token_in, token_out, self.config.max_hops);
            for depth in 2..=self.config.max_hops {
                if candidates.len() >= max_routes {
                    break;
                }
                for tokens in paths.iter().filter(|p| p.len() == depth + 1) {
                    if let Some(route) = self.materialize(chain, tokens, amount_in, ctx.now_ms) {
                        candidates.push(route);
                    }
                }
            }
        }

        let floor = self.config.min_profitability_score();
        let mut seen = HashSet::new();
        let mut routes = Vec::with_capacity(candidates.len());
        let mut scored = 0usize;
        let mut last_error = None;
        for mut route in candidates {
            if !seen.insert(route.id()) {
                continue;
            }
            if let Err(e) = self.scoring.score_route(&self.graph, &mut route, ctx) {
                debug!("Dropping route {}: {:#}", route.id(), e);
                last_error = Some(e.context(format!("scoring route {}", route.id())));
                continue;
            }
            scored += 1;
            if route.profitability_score >= floor {
                routes.push(route);
            }
        }
        if scored == 0 {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        sort_by_profitability(&mut routes);
        routes.truncate(max_routes);
        Ok(routes)
    }

    /// One single-hop route per pool connecting the pair on `chain`.
    pub fn direct_routes(
        &self,
        token_in: Address,
        token_out: Address,
        chain: &str,
        amount_in: U256,
        now_ms: u64,
    ) -> Vec<PrecomputedRoute> {
        let mut routes = Vec::new();
        for pool in self.graph.pools_for_pair(chain, token_in, token_out) {
            let protocol = self.graph.protocol(&pool.protocol);
            let Some(step) = build_step(&pool, protocol.as_ref(), token_in, token_out, amount_in)
            else {
                continue;
            };
            if step.expected_amount_out.is_zero() {
                continue;
            }
            let base_gas = protocol.as_ref().map(|p| p.base_gas).unwrap_or_default();
            let data_ms = pool.last_updated_ms.min(now_ms);
            routes.push(assemble_route(chain, vec![step], amount_in, base_gas, data_ms));
        }
        routes
    }

    /// Breadth-first search for cycle-free token paths with 2..=`max_depth` hops.
    ///
    /// Paths are returned shortest first. The number of queue pops is bounded by
    /// `max_bfs_expansions`.
    pub fn find_paths(
        &self,
        chain: &str,
        token_in: Address,
        token_out: Address,
        max_depth: usize,
    ) -> Vec<Vec<Address>> {
        let mut found = Vec::new();
        let mut queue: VecDeque<SearchState> = VecDeque::new();
        queue.push_back(vec![token_in]);
        let mut expansions = 0usize;

        while let Some(path) = queue.pop_front() {
            expansions += 1;
            if expansions > self.config.max_bfs_expansions {
                debug!(
                    "BFS {:?}->{:?} on {} hit expansion bound ({} paths found)",
                    token_in,
                    token_out,
                    chain,
                    found.len()
                );
                break;
            }
            let hops = path.len() - 1;
            if hops >= max_depth {
                continue;
            }
            let Some(current) = path.last().copied() else {
                continue;
            };
            for next in self.graph.neighbors(chain, current) {
                if path.contains(&next) {
                    continue;
                }
                let mut extended = path.clone();
                extended.push(next);
                if next == token_out {
                    if hops + 1 >= 2 {
                        found.push(extended);
                    }
                } else if hops + 1 < max_depth {
                    queue.push_back(extended);
                }
            }
        }
        found
    }

    /// Turns a token path into a route using the best pool for each hop.
    ///
    /// Returns `None` when a hop has no usable pool or the output reaches zero.
    pub fn materialize(
        &self,
        chain: &str,
        tokens: &[Address],
        amount_in: U256,
        now_ms: u64,
    ) -> Option<PrecomputedRoute> {
        let mut steps = Vec::with_capacity(tokens.len().saturating_sub(1));
        let mut amount = amount_in;
        let mut base_gas = None;
        let mut data_ms = now_ms;

        for pair in tokens.windows(2) {
            let (pool, protocol) = self.best_pool(chain, pair[0], pair[1])?;
            let step = build_step(&pool, protocol.as_ref(), pair[0], pair[1], amount)?;
            if step.expected_amount_out.is_zero() {
                return None;
            }
            data_ms = data_ms.min(pool.last_updated_ms);
            if base_gas.is_none() {
                base_gas = Some(protocol.as_ref().map(|p| p.base_gas).unwrap_or_default());
            }
            amount = step.expected_amount_out;
            steps.push(step);
        }

        if steps.is_empty() {
            return None;
        }
        Some(assemble_route(
            chain,
            steps,
            amount_in,
            base_gas.unwrap_or_default(),
            data_ms,
        ))
    }

    /// Highest composite-score pool for the hop `a -> b`; ties go to the lower pool id.
    fn best_pool(
        &self,
        chain: &str,
        a: Address,
        b: Address,
    ) -> Option<(LiquidityPool, Option<Protocol>)> {
        let mut best: Option<(f64, LiquidityPool, Option<Protocol>)> = None;
        for pool in self.graph.pools_for_pair(chain, a, b) {
            if !pool.connects(a, b) {
                continue;
            }
            let protocol = self.graph.protocol(&pool.protocol);
            let score = self.scoring.pool_composite_score(&pool, protocol.as_ref());
            if best.as_ref().map_or(true, |(s, _, _)| score > *s) {
                best = Some((score, pool, protocol));
            }
        }
        best.map(|(_, pool, protocol)| (pool, protocol))
    }
}

/// Quotes one hop from `token_in` to `token_out`. Pools that do not connect the pair or
/// cannot be quoted (empty reserves, fee >= 100%) are skipped.
fn build_step(
    pool: &LiquidityPool,
    protocol: Option<&Protocol>,
    token_in: Address,
    token_out: Address,
    amount_in: U256,
) -> Option<RouteStep> {
    if !pool.connects(token_in, token_out) {
        debug!("Pool {} no longer connects {:?} -> {:?}", pool.id, token_in, token_out);
        return None;
    }
    let (reserve_in, reserve_out) = pool.reserves_for(token_in)?;

    let amount_out =
        match amm_math::calculate_amount_out(amount_in, reserve_in, reserve_out, pool.fee_bps) {
            Ok(out) => out,
            Err(e) => {
                debug!("Skipping pool {}: {}", pool.id, e);
                return None;
            }
        };

    let impact = amm_math::price_impact_percent(amount_in, reserve_in).max(pool.price_impact);
    Some(RouteStep {
        protocol: pool.protocol.clone(),
        pool_id: pool.id.clone(),
        token_in,
        token_out,
        amount_in,
        expected_amount_out: amount_out,
        price_impact: impact,
        gas_estimate: protocol.map(|p| p.gas_per_hop).unwrap_or_default(),
    })
}

/// `data_ms` is the oldest reserve snapshot the route was quoted from.
fn assemble_route(
    chain: &str,
    path: Vec<RouteStep>,
    amount_in: U256,
    base_gas: u64,
    data_ms: u64,
) -> PrecomputedRoute {
    let token_in = path[0].token_in;
    let last = &path[path.len() - 1];
    let token_out = last.token_out;
    let expected_output = last.expected_amount_out;
    let total_price_impact = path.iter().map(|s| s.price_impact).sum();
    let total_gas_estimate = base_gas + path.iter().map(|s| s.gas_estimate).sum::<u64>();

    PrecomputedRoute {
        token_in,
        token_out,
        chain: chain.to_string(),
        path,
        amount_in,
        expected_output,
        total_price_impact,
        total_gas_estimate,
        profitability_score: 0.0,
        risk_score: 0.0,
        confidence_score: 0.0,
        last_updated_ms: data_ms,
    }
}

/// Sorts best-first by profitability; ties keep a stable order by route id.
pub fn sort_by_profitability<R: Borrow<PrecomputedRoute>>(routes: &mut [R]) {
    routes.sort_by(|a, b| {
        let a: &PrecomputedRoute = Borrow::<PrecomputedRoute>::borrow(a);
        let b: &PrecomputedRoute = Borrow::<PrecomputedRoute>::borrow(b);
        b.profitability_score
            .partial_cmp(&a.profitability_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id().cmp(&b.id()))
    });
}
