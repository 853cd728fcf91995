//! # Graph Service
//!
//! The `GraphService` holds the in-memory liquidity topology: protocol descriptors,
//! liquidity pools, the per-chain token adjacency graph and an index of pools by pair.
//!
//! ## Overview
//!
//! The graph service:
//! - Stores protocols and pools (pools are replaced wholesale on every update)
//! - Maintains the token graph (token → directly tradable tokens) per chain
//! - Ranks tokens per chain to bound the precomputation search space
//! - Resolves the best pool for a hop and quotes paths through live reserves
//! - Tracks token pairs touched by updates so the next cycle recomputes them first
//!
//! ## Thread Safety
//!
//! Every index is a `DashMap`, so an update only locks the shards it touches and
//! concurrent readers are never blocked by a global lock. A pool update or removal holds
//! the pool's own entry while it re-links the indexes, so updates of one pool id apply
//! one at a time. No other guard is held while a map is written, and no guard into
//! another map is held while the pool map is locked.

use crate::amm_math;
use crate::types::{LiquidityPool, PoolPairKey, Protocol, RouteStep};
use anyhow::{anyhow, Context, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use ethers::types::{Address, U256};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Weight of 24h volume in the token ranking.
const VOLUME_WEIGHT: f64 = 0.3;
/// Ranking bonus per distinct protocol touching a token.
const PROTOCOL_DIVERSITY_BONUS: f64 = 50_000.0;
/// Ranking bonus per pool touching a token.
const POOL_COUNT_BONUS: f64 = 10_000.0;

/// Result of applying one pool update.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolUpdate {
    pub pool_id: String,
    pub chain: String,
    pub token0: Address,
    pub token1: Address,
    /// Tokens of the replaced pool when its pair changed
    pub previous_tokens: Option<(Address, Address)>,
    pub replaced: bool,
}

impl PoolUpdate {
    /// Every token whose cached routes may now be stale.
    pub fn affected_tokens(&self) -> Vec<Address> {
        let mut tokens = vec![self.token0, self.token1];
        if let Some((a, b)) = self.previous_tokens {
            for t in [a, b] {
                if !tokens.contains(&t) {
                    tokens.push(t);
                }
            }
        }
        tokens
    }
}

/// Aggregated ranking inputs for one token on one chain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenRanking {
    pub token: Address,
    pub liquidity_usd: f64,
    pub volume_24h_usd: f64,
    pub protocol_count: usize,
    pub pool_count: usize,
    pub score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub protocols: usize,
    pub pools: usize,
    pub chains: usize,
    pub tokens: usize,
    pub edges: usize,
}

/// Maintains protocols, pools and the token graph for route search.
#[derive(Debug, Default)]
pub struct GraphService {
    protocols: DashMap<String, Protocol>,
    pools: DashMap<String, LiquidityPool>,
    /// (chain, token) -> directly tradable tokens
    adjacency: DashMap<(String, Address), HashSet<Address>>,
    /// (chain, token) -> pool ids touching the token
    token_pools: DashMap<(String, Address), HashSet<String>>,
    /// undirected pair -> pool ids
    pair_pools: DashMap<PoolPairKey, HashSet<String>>,
    /// chain -> pairs touched since the last precomputation
    priority_pairs: DashMap<String, HashSet<(Address, Address)>>,
}

impl GraphService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a protocol descriptor. Cached routes are left untouched.
    pub fn upsert_protocol(&self, protocol: Protocol) {
        debug!("Protocol {} registered on {:?}", protocol.id, protocol.chains);
        self.protocols.insert(protocol.id.clone(), protocol);
    }

    pub fn protocol(&self, id: &str) -> Option<Protocol> {
        self.protocols.get(id).map(|p| p.clone())
    }

    pub fn protocols(&self) -> Vec<Protocol> {
        self.protocols.iter().map(|p| p.value().clone()).collect()
    }

    /// Protocols that share at least one chain with `id`.
    pub fn protocols_sharing_chain(&self, id: &str) -> HashSet<String> {
        match self.protocol(id) {
            Some(protocol) => sharing_chain(&protocol, &self.protocols()),
            None => HashSet::new(),
        }
    }

    /// Full protocol graph: protocol id -> protocols sharing a chain.
    ///
    /// Computed over a snapshot so no map guard is held while it is built.
    pub fn protocol_graph(&self) -> HashMap<String, HashSet<String>> {
        let protocols = self.protocols();
        protocols
            .iter()
            .map(|p| (p.id.clone(), sharing_chain(p, &protocols)))
            .collect()
    }

    /// Replaces the pool by id, links its pair into the token graph and marks the pair
    /// for priority recomputation.
    pub fn upsert_pool(&self, pool: LiquidityPool) -> Result<PoolUpdate> {
        if pool.token0 == pool.token1 {
            return Err(anyhow!("pool {} lists the same token twice", pool.id));
        }
        if pool.id.is_empty() || pool.chain.is_empty() {
            return Err(anyhow!("pool id and chain must be non-empty"));
        }
        if !self.protocols.contains_key(&pool.protocol) {
            warn!(
                "⚠️ Pool {} references unknown protocol {}",
                pool.id, pool.protocol
            );
        }

        let mut previous_tokens = None;
        let replaced = match self.pools.entry(pool.id.clone()) {
            Entry::Occupied(mut slot) => {
                let old = slot.insert(pool.clone());
                if old.chain != pool.chain || old.pair_key() != pool.pair_key() {
                    self.unlink_pool(&old);
                    previous_tokens = Some((old.token0, old.token1));
                }
                self.link_pool(&pool);
                true
            }
            Entry::Vacant(slot) => {
                let _linked = slot.insert(pool.clone());
                self.link_pool(&pool);
                false
            }
        };

        self.priority_pairs
            .entry(pool.chain.clone())
            .or_default()
            .extend([(pool.token0, pool.token1), (pool.token1, pool.token0)]);

        Ok(PoolUpdate {
            pool_id: pool.id,
            chain: pool.chain,
            token0: pool.token0,
            token1: pool.token1,
            previous_tokens,
            replaced,
        })
    }

    /// Removes a pool; the token edge disappears once no pool backs the pair.
    pub fn remove_pool(&self, pool_id: &str) -> Option<LiquidityPool> {
        let pool = match self.pools.entry(pool_id.to_string()) {
            Entry::Occupied(slot) => {
                self.unlink_pool(slot.get());
                slot.remove()
            }
            Entry::Vacant(_) => return None,
        };
        info!("Pool {} removed from graph", pool_id);
        Some(pool)
    }

    fn link_pool(&self, pool: &LiquidityPool) {
        self.pair_pools
            .entry(pool.pair_key())
            .or_default()
            .insert(pool.id.clone());
        for (token, other) in [(pool.token0, pool.token1), (pool.token1, pool.token0)] {
            let key = (pool.chain.clone(), token);
            self.adjacency.entry(key.clone()).or_default().insert(other);
            self.token_pools.entry(key).or_default().insert(pool.id.clone());
        }
    }

    fn unlink_pool(&self, pool: &LiquidityPool) {
        let pair = pool.pair_key();
        let pair_empty = match self.pair_pools.get_mut(&pair) {
            Some(mut ids) => {
                ids.remove(&pool.id);
                ids.is_empty()
            }
            None => true,
        };
        if pair_empty {
            self.pair_pools.remove(&pair);
        }

        for (token, other) in [(pool.token0, pool.token1), (pool.token1, pool.token0)] {
            let key = (pool.chain.clone(), token);
            if pair_empty {
                let neighbours_empty = match self.adjacency.get_mut(&key) {
                    Some(mut set) => {
                        set.remove(&other);
                        set.is_empty()
                    }
                    None => false,
                };
                if neighbours_empty {
                    self.adjacency.remove(&key);
                }
            }
            let pools_empty = match self.token_pools.get_mut(&key) {
                Some(mut ids) => {
                    ids.remove(&pool.id);
                    ids.is_empty()
                }
                None => false,
            };
            if pools_empty {
                self.token_pools.remove(&key);
            }
        }
    }

    pub fn pool(&self, id: &str) -> Option<LiquidityPool> {
        self.pools.get(id).map(|p| p.clone())
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Tokens directly tradable against `token` on `chain`, in address order.
    pub fn neighbors(&self, chain: &str, token: Address) -> Vec<Address> {
        let mut out: Vec<Address> = self
            .adjacency
            .get(&(chain.to_string(), token))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    pub fn pools_for_pair(&self, chain: &str, a: Address, b: Address) -> Vec<LiquidityPool> {
        let ids: Vec<String> = self
            .pair_pools
            .get(&PoolPairKey::new(chain, a, b))
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        let mut pools: Vec<LiquidityPool> = ids.iter().filter_map(|id| self.pool(id)).collect();
        pools.sort_by(|x, y| x.id.cmp(&y.id));
        pools
    }

    pub fn has_chain(&self, chain: &str) -> bool {
        self.pools.iter().any(|p| p.chain == chain)
    }

    pub fn chains(&self) -> Vec<String> {
        let mut chains: Vec<String> = self
            .pools
            .iter()
            .map(|p| p.chain.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        chains.sort();
        chains
    }

    /// Per-token ranking inputs for every token with a pool on `chain`, best first.
    ///
    /// score = liquidity + 0.3 * volume + 50000 * protocols + 10000 * pools
    pub fn token_rankings(&self, chain: &str) -> Vec<TokenRanking> {
        let entries: Vec<(Address, Vec<String>)> = self
            .token_pools
            .iter()
            .filter(|e| e.key().0 == chain)
            .map(|e| (e.key().1, e.value().iter().cloned().collect()))
            .collect();

        let mut rankings: Vec<TokenRanking> = entries
            .into_iter()
            .map(|(token, pool_ids)| {
                let mut ranking = TokenRanking {
                    token,
                    ..Default::default()
                };
                let mut protocols = HashSet::new();
                for pool in pool_ids.iter().filter_map(|id| self.pool(id)) {
                    ranking.liquidity_usd += pool.liquidity_usd;
                    ranking.volume_24h_usd += pool.volume_24h_usd;
                    ranking.pool_count += 1;
                    protocols.insert(pool.protocol);
                }
                ranking.protocol_count = protocols.len();
                ranking.score = ranking.liquidity_usd
                    + VOLUME_WEIGHT * ranking.volume_24h_usd
                    + PROTOCOL_DIVERSITY_BONUS * ranking.protocol_count as f64
                    + POOL_COUNT_BONUS * ranking.pool_count as f64;
                ranking
            })
            .collect();

        rankings.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.token.cmp(&b.token))
        });
        rankings
    }

    /// Tokens with at least one pool on `chain`, ordered by composite score.
    pub fn tokens_for_chain(&self, chain: &str) -> Vec<Address> {
        self.token_rankings(chain).into_iter().map(|r| r.token).collect()
    }

    /// Drains the pairs touched by updates on `chain` since the last call.
    pub fn take_priority_pairs(&self, chain: &str) -> Vec<(Address, Address)> {
        let mut pairs: Vec<(Address, Address)> = self
            .priority_pairs
            .remove(chain)
            .map(|(_, set)| set.into_iter().collect())
            .unwrap_or_default();
        pairs.sort();
        pairs
    }

    /// Puts pairs back in the priority set, e.g. after a failed cycle.
    pub fn requeue_priority_pairs(&self, chain: &str, pairs: &[(Address, Address)]) {
        if pairs.is_empty() {
            return;
        }
        self.priority_pairs
            .entry(chain.to_string())
            .or_default()
            .extend(pairs.iter().copied());
    }

    /// Recomputes `steps` for `amount_in` against live reserves, returning the final output.
    pub fn quote_path(&self, steps: &[RouteStep], amount_in: U256) -> Result<U256> {
        let mut amount = amount_in;
        for step in steps {
            let pool = self
                .pool(&step.pool_id)
                .with_context(|| format!("pool {} no longer in graph", step.pool_id))?;
            let (reserve_in, reserve_out) = pool.reserves_for(step.token_in).with_context(|| {
                format!("pool {} does not hold token {:?}", pool.id, step.token_in)
            })?;
            amount = amm_math::calculate_amount_out(amount, reserve_in, reserve_out, pool.fee_bps)
                .with_context(|| format!("quoting through pool {}", pool.id))?;
        }
        Ok(amount)
    }

    pub fn stats(&self) -> GraphStats {
        let chains: HashSet<String> = self.pools.iter().map(|p| p.chain.clone()).collect();
        let edges: usize = self.adjacency.iter().map(|e| e.value().len()).sum();
        GraphStats {
            protocols: self.protocols.len(),
            pools: self.pools.len(),
            chains: chains.len(),
            tokens: self.adjacency.len(),
            edges: edges / 2,
        }
    }

    /// Drops all graph state.
    pub fn clear(&self) {
        self.pools.clear();
        self.adjacency.clear();
        self.token_pools.clear();
        self.pair_pools.clear();
        self.priority_pairs.clear();
        self.protocols.clear();
    }
}

fn sharing_chain(protocol: &Protocol, all: &[Protocol]) -> HashSet<String> {
    all.iter()
        .filter(|other| other.id != protocol.id)
        .filter(|other| other.chains.iter().any(|c| protocol.operates_on(c)))
        .map(|other| other.id.clone())
        .collect()
}
