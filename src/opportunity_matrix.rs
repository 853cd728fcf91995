//! # Opportunity Matrix
//!
//! Per-chain routing tables built by the precomputation cycle and published with a
//! single pointer swap.
//!
//! A [`ChainRoutingTable`] is immutable once built. Readers `load()` the current map of
//! tables and keep using the `Arc` they got even if a newer table is published meanwhile,
//! so a reader never sees a half-built matrix and never waits for a rebuild.

use crate::router::sort_by_profitability;
use crate::types::PrecomputedRoute;
use arc_swap::ArcSwap;
use ethers::types::Address;
use std::collections::HashMap;
use std::sync::Arc;

pub type PairKey = (Address, Address);
pub type RouteList = Vec<Arc<PrecomputedRoute>>;

/// Best routes per directed pair on one chain plus the structures derived from them.
#[derive(Debug, Clone)]
pub struct ChainRoutingTable {
    pub chain: String,
    /// Precomputation cycle that produced this table
    pub cycle: u64,
    pub computed_at_ms: u64,
    matrix: Arc<HashMap<PairKey, RouteList>>,
    top_routes: Arc<RouteList>,
    gas_optimal: Arc<HashMap<PairKey, Arc<PrecomputedRoute>>>,
}

impl ChainRoutingTable {
    /// Builds a table from ranked route lists. Pairs without routes are not stored.
    ///
    /// `top_routes` keeps the best route of each pair, best first, up to `top_pairs_limit`.
    /// The gas-optimal route of a pair maximizes profitability per unit of gas.
    pub fn build(
        chain: &str,
        cycle: u64,
        computed_at_ms: u64,
        routes_by_pair: HashMap<PairKey, Vec<PrecomputedRoute>>,
        top_pairs_limit: usize,
    ) -> Self {
        let mut matrix = HashMap::with_capacity(routes_by_pair.len());
        let mut gas_optimal = HashMap::new();
        let mut best_per_pair = Vec::new();

        for (pair, mut routes) in routes_by_pair {
            if routes.is_empty() {
                continue;
            }
            sort_by_profitability(&mut routes);
            let routes: RouteList = routes.into_iter().map(Arc::new).collect();

            if let Some(gas_best) = routes.iter().max_by(|a, b| {
                a.gas_efficiency()
                    .partial_cmp(&b.gas_efficiency())
                    .unwrap_or(std::cmp::Ordering::Equal)
            }) {
                gas_optimal.insert(pair, Arc::clone(gas_best));
            }
            best_per_pair.push(Arc::clone(&routes[0]));
            matrix.insert(pair, routes);
        }

        best_per_pair.sort_by(|a, b| {
            b.profitability_score
                .partial_cmp(&a.profitability_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id().cmp(&b.id()))
        });
        best_per_pair.truncate(top_pairs_limit);

        Self {
            chain: chain.to_string(),
            cycle,
            computed_at_ms,
            matrix: Arc::new(matrix),
            top_routes: Arc::new(best_per_pair),
            gas_optimal: Arc::new(gas_optimal),
        }
    }

    /// Ranked routes for `token_in -> token_out`; empty when the pair was not computed.
    pub fn routes_for(&self, token_in: Address, token_out: Address) -> &[Arc<PrecomputedRoute>] {
        self.matrix
            .get(&(token_in, token_out))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn gas_optimal(&self, token_in: Address, token_out: Address) -> Option<Arc<PrecomputedRoute>> {
        self.gas_optimal.get(&(token_in, token_out)).cloned()
    }

    pub fn gas_optimal_count(&self) -> usize {
        self.gas_optimal.len()
    }

    pub fn top_routes(&self) -> &[Arc<PrecomputedRoute>] {
        &self.top_routes
    }

    pub fn pair_count(&self) -> usize {
        self.matrix.len()
    }

    pub fn route_count(&self) -> usize {
        self.matrix.values().map(|v| v.len()).sum()
    }

    pub fn routes(&self) -> impl Iterator<Item = &Arc<PrecomputedRoute>> {
        self.matrix.values().flatten()
    }

    /// Copy of this table without gas-optimal entries that route through `pool_id`.
    /// `None` when no entry uses the pool.
    fn without_gas_optimal_pool(&self, pool_id: &str) -> Option<(Self, usize)> {
        let before = self.gas_optimal.len();
        let kept: HashMap<PairKey, Arc<PrecomputedRoute>> = self
            .gas_optimal
            .iter()
            .filter(|(_, route)| !route.uses_pool(pool_id))
            .map(|(k, v)| (*k, Arc::clone(v)))
            .collect();
        let dropped = before - kept.len();
        if dropped == 0 {
            return None;
        }
        let mut table = self.clone();
        table.gas_optimal = Arc::new(kept);
        Some((table, dropped))
    }
}

type TableMap = HashMap<String, Arc<ChainRoutingTable>>;

/// Atomically published routing tables keyed by chain.
#[derive(Debug, Default)]
pub struct RoutingTableStore {
    tables: ArcSwap<TableMap>,
}

impl RoutingTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every published table.
    pub fn load(&self) -> Arc<TableMap> {
        self.tables.load_full()
    }

    pub fn get(&self, chain: &str) -> Option<Arc<ChainRoutingTable>> {
        self.tables.load().get(chain).cloned()
    }

    /// Replaces the table for `table.chain`; other chains are untouched.
    pub fn publish(&self, table: ChainRoutingTable) {
        let table = Arc::new(table);
        self.tables.rcu(|current| {
            let mut next = TableMap::clone(current);
            next.insert(table.chain.clone(), Arc::clone(&table));
            next
        });
    }

    /// Drops gas-optimal entries that route through `pool_id` on every chain.
    pub fn drop_gas_optimal_for_pool(&self, pool_id: &str) -> usize {
        let mut dropped = 0;
        self.tables.rcu(|current| {
            dropped = 0;
            let mut next = TableMap::clone(current);
            for table in next.values_mut() {
                if let Some((filtered, n)) = table.without_gas_optimal_pool(pool_id) {
                    dropped += n;
                    *table = Arc::new(filtered);
                }
            }
            next
        });
        dropped
    }

    pub fn chains(&self) -> Vec<String> {
        let mut chains: Vec<String> = self.tables.load().keys().cloned().collect();
        chains.sort();
        chains
    }

    pub fn clear(&self) {
        self.tables.store(Arc::new(TableMap::new()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RouteStep;
    use ethers::types::U256;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    fn token(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    fn route(pool: &str, a: u64, b: u64, profit: f64, gas: u64, stamp: u64) -> PrecomputedRoute {
        PrecomputedRoute {
            token_in: token(a),
            token_out: token(b),
            chain: "ethereum".to_string(),
            path: vec![RouteStep {
                protocol: "uni".to_string(),
                pool_id: pool.to_string(),
                token_in: token(a),
                token_out: token(b),
                amount_in: U256::exp10(18),
                expected_amount_out: U256::exp10(18),
                price_impact: 0.1,
                gas_estimate: gas,
            }],
            amount_in: U256::exp10(18),
            expected_output: U256::exp10(18),
            total_price_impact: 0.1,
            total_gas_estimate: gas,
            profitability_score: profit,
            risk_score: 5.0,
            confidence_score: 90.0,
            last_updated_ms: stamp,
        }
    }

    fn table(cycle: u64) -> ChainRoutingTable {
        let mut pairs = HashMap::new();
        pairs.insert(
            (token(1), token(2)),
            vec![
                route("cheap", 1, 2, 40.0, 50_000, cycle),
                route("best", 1, 2, 60.0, 200_000, cycle),
            ],
        );
        pairs.insert((token(2), token(3)), vec![route("other", 2, 3, 80.0, 100_000, cycle)]);
        pairs.insert((token(3), token(4)), vec![]);
        ChainRoutingTable::build("ethereum", cycle, cycle, pairs, 50)
    }

    #[test]
    fn test_build_ranks_and_derives() {
        let t = table(1);
        let routes = t.routes_for(token(1), token(2));
        assert_eq!(routes[0].id(), "best");
        assert_eq!(t.gas_optimal(token(1), token(2)).unwrap().id(), "cheap");
        assert_eq!(t.top_routes()[0].id(), "other");
        assert_eq!(t.pair_count(), 2);
        assert_eq!(t.route_count(), 3);
        assert!(t.routes_for(token(2), token(1)).is_empty());
    }

    #[test]
    fn test_drop_gas_optimal_for_pool() {
        let store = RoutingTableStore::new();
        store.publish(table(1));
        assert_eq!(store.drop_gas_optimal_for_pool("cheap"), 1);
        let t = store.get("ethereum").unwrap();
        assert!(t.gas_optimal(token(1), token(2)).is_none());
        // matrix itself untouched
        assert_eq!(t.routes_for(token(1), token(2)).len(), 2);
        assert_eq!(store.drop_gas_optimal_for_pool("missing"), 0);
    }

    #[test]
    fn test_readers_never_see_mixed_tables() {
        let store = Arc::new(RoutingTableStore::new());
        store.publish(table(0));
        let stop = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                let stop = Arc::clone(&stop);
                thread::spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        let t = store.get("ethereum").unwrap();
                        let stamps: Vec<u64> = t.routes().map(|r| r.last_updated_ms).collect();
                        assert!(stamps.iter().all(|s| *s == t.cycle));
                    }
                })
            })
            .collect();

        for cycle in 1..200 {
            store.publish(table(cycle));
        }
        stop.store(true, Ordering::Relaxed);
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(store.get("ethereum").unwrap().cycle, 199);
    }
}
