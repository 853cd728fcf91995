use crate::metrics;
use crate::types::PrecomputedRoute;
use dashmap::DashMap;
use ethers::prelude::Address;
use ethers::types::U256;
use log::debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shape of a route query. Slippage is keyed by its exact bit pattern so the key stays
/// `Eq + Hash` and two ceilings never share an entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub token_in: Address,
    pub token_out: Address,
    pub chain: String,
    pub amount_in: U256,
    pub max_slippage_bits: u64,
}

impl QueryKey {
    pub fn new(
        token_in: Address,
        token_out: Address,
        chain: &str,
        amount_in: U256,
        max_slippage_percent: f64,
    ) -> Self {
        Self {
            token_in,
            token_out,
            chain: chain.to_string(),
            amount_in,
            // +0.0 so that -0.0 shares the entry of 0.0
            max_slippage_bits: (max_slippage_percent + 0.0).to_bits(),
        }
    }

    pub fn references(&self, token: Address) -> bool {
        self.token_in == token || self.token_out == token
    }
}

#[derive(Debug, Clone)]
struct CachedQuery {
    routes: Vec<Arc<PrecomputedRoute>>,
    inserted_at: Instant,
    generation: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryCacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
}

/// Short-TTL cache of filtered, ranked query results.
///
/// ## Features
///
/// - **TTL**: entries older than the TTL are misses and are removed on access
/// - **Exact invalidation**: `invalidate_tokens` evicts every key naming an updated token
/// - **Bounded**: beyond `max_entries` the oldest entries are evicted
///
/// Every invalidation bumps a generation counter. Results are inserted against the
/// generation read before they were computed, and a result that raced an invalidation
/// is never left in the cache.
#[derive(Debug)]
pub struct QueryCache {
    entries: DashMap<QueryKey, CachedQuery>,
    generation: AtomicU64,
    ttl: Duration,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl QueryCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            generation: AtomicU64::new(0),
            ttl,
            max_entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &QueryKey) -> Option<Vec<Arc<PrecomputedRoute>>> {
        let cached = self
            .entries
            .get(key)
            .map(|e| (e.routes.clone(), e.inserted_at.elapsed() < self.ttl));

        match cached {
            Some((routes, true)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                metrics::increment_cache_hit("query");
                Some(routes)
            }
            Some((_, false)) => {
                self.entries
                    .remove_if(key, |_, e| e.inserted_at.elapsed() >= self.ttl);
                self.misses.fetch_add(1, Ordering::Relaxed);
                metrics::increment_cache_miss("query");
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                metrics::increment_cache_miss("query");
                None
            }
        }
    }

    /// Read before computing a result that will be passed to `insert_at`.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn insert(&self, key: QueryKey, routes: Vec<Arc<PrecomputedRoute>>) {
        self.insert_at(key, routes, self.generation());
    }

    /// Caches `routes` computed at `generation`. Returns `false`, leaving nothing behind,
    /// when an invalidation ran since that generation was read.
    pub fn insert_at(&self, key: QueryKey, routes: Vec<Arc<PrecomputedRoute>>, generation: u64) -> bool {
        if self.generation() != generation {
            debug!("Skipping cache insert on {}: invalidated while computing", key.chain);
            return false;
        }
        self.entries.insert(
            key.clone(),
            CachedQuery {
                routes,
                inserted_at: Instant::now(),
                generation,
            },
        );
        // an invalidation that bumped between the check and the insert may have missed us
        if self.generation() != generation {
            self.entries.remove_if(&key, |_, e| e.generation == generation);
            return false;
        }
        self.maybe_evict();
        true
    }

    fn maybe_evict(&self) {
        let len = self.entries.len();
        if len <= self.max_entries {
            return;
        }
        let mut by_age: Vec<(QueryKey, Instant)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.inserted_at))
            .collect();
        by_age.sort_by_key(|(_, at)| *at);
        let to_remove = len - self.max_entries;
        for (key, _) in by_age.into_iter().take(to_remove) {
            self.entries.remove(&key);
        }
        debug!(
            "Evicted {} entries from query cache (size: {})",
            to_remove,
            self.entries.len()
        );
    }

    /// Evicts every entry whose key references one of `tokens`.
    pub fn invalidate_tokens(&self, tokens: &[Address]) -> usize {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let before = self.entries.len();
        self.entries
            .retain(|key, _| !tokens.iter().any(|t| key.references(*t)));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            self.invalidations
                .fetch_add(removed as u64, Ordering::Relaxed);
            debug!("Invalidated {} query cache entries", removed);
        }
        removed
    }

    /// Evicts every entry for `chain`, e.g. once a new routing table is published.
    pub fn invalidate_chain(&self, chain: &str) -> usize {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let before = self.entries.len();
        self.entries.retain(|key, _| key.chain != chain);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            self.invalidations
                .fetch_add(removed as u64, Ordering::Relaxed);
            debug!("Invalidated {} query cache entries for {}", removed, chain);
        }
        removed
    }

    /// Drops expired entries; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, e| e.inserted_at.elapsed() < self.ttl);
        let removed = before.saturating_sub(self.entries.len());
        metrics::set_cache_size("query", self.entries.len() as f64);
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> QueryCacheStats {
        QueryCacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
