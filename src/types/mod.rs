//! # Core Types
//!
//! Protocol descriptors, liquidity pools and the route structures produced by the
//! search and precomputation layers.

pub mod conversions;

use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// DEX integration descriptor. Immutable after load; looked up by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Protocol {
    /// Protocol identifier (e.g. "uniswap_v2")
    pub id: String,
    /// Chains the protocol is deployed on
    pub chains: Vec<String>,
    /// Default fee in basis points (30 = 0.3%)
    pub fee_bps: u32,
    /// Fixed gas paid once per route entering this protocol
    pub base_gas: u64,
    /// Gas per pool traversal
    pub gas_per_hop: u64,
    /// Static reliability score, 0-100
    pub reliability: f64,
    /// Whether swaps are routed through an MEV-protected channel
    pub mev_protection: bool,
}

impl Protocol {
    pub fn operates_on(&self, chain: &str) -> bool {
        self.chains.iter().any(|c| c == chain)
    }
}

/// A trading pair on one protocol and chain. Replaced wholesale on every update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidityPool {
    pub id: String,
    pub protocol: String,
    pub chain: String,
    pub token0: Address,
    pub token1: Address,
    pub reserve0: U256,
    pub reserve1: U256,
    pub fee_bps: u32,
    pub liquidity_usd: f64,
    pub volume_24h_usd: f64,
    /// Feed-provided price impact estimate in percent
    #[serde(default)]
    pub price_impact: f64,
    /// Unix milliseconds of the last on-chain observation
    pub last_updated_ms: u64,
}

impl LiquidityPool {
    /// `(reserve_in, reserve_out)` when swapping `token_in` through this pool.
    pub fn reserves_for(&self, token_in: Address) -> Option<(U256, U256)> {
        if token_in == self.token0 {
            Some((self.reserve0, self.reserve1))
        } else if token_in == self.token1 {
            Some((self.reserve1, self.reserve0))
        } else {
            None
        }
    }

    pub fn other_token(&self, token: Address) -> Option<Address> {
        if token == self.token0 {
            Some(self.token1)
        } else if token == self.token1 {
            Some(self.token0)
        } else {
            None
        }
    }

    pub fn connects(&self, a: Address, b: Address) -> bool {
        (self.token0 == a && self.token1 == b) || (self.token0 == b && self.token1 == a)
    }

    pub fn touches(&self, token: Address) -> bool {
        self.token0 == token || self.token1 == token
    }

    pub fn pair_key(&self) -> PoolPairKey {
        PoolPairKey::new(&self.chain, self.token0, self.token1)
    }
}

/// Undirected (chain, token, token) key used to index pools by pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolPairKey {
    pub chain: String,
    pub low: Address,
    pub high: Address,
}

impl PoolPairKey {
    pub fn new(chain: &str, a: Address, b: Address) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self {
            chain: chain.to_string(),
            low,
            high,
        }
    }
}

/// One hop of a route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteStep {
    pub protocol: String,
    pub pool_id: String,
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: U256,
    pub expected_amount_out: U256,
    /// Price impact of this hop in percent
    pub price_impact: f64,
    pub gas_estimate: u64,
}

/// A scored route from `token_in` to `token_out` on one chain.
///
/// `path` is never empty, starts at `token_in`, ends at `token_out` and never
/// revisits a token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrecomputedRoute {
    pub token_in: Address,
    pub token_out: Address,
    pub chain: String,
    pub path: Vec<RouteStep>,
    /// Input the amounts in `path` were computed for
    pub amount_in: U256,
    pub expected_output: U256,
    /// Sum of per-hop price impact, in percent
    pub total_price_impact: f64,
    pub total_gas_estimate: u64,
    /// 0-100, higher is better
    pub profitability_score: f64,
    /// 0-100, lower is safer
    pub risk_score: f64,
    /// 0-100, decays with pool age
    pub confidence_score: f64,
    /// Update time of the oldest pool snapshot the route was quoted from
    pub last_updated_ms: u64,
}

impl PrecomputedRoute {
    /// Stable identifier built from the pool ids along the path.
    pub fn id(&self) -> String {
        self.path
            .iter()
            .map(|s| s.pool_id.as_str())
            .collect::<Vec<_>>()
            .join("-")
    }

    pub fn hops(&self) -> usize {
        self.path.len()
    }

    /// Distinct protocols in path order.
    pub fn protocols(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.path
            .iter()
            .map(|s| s.protocol.as_str())
            .filter(|p| seen.insert(*p))
            .collect()
    }

    /// Multi-hop route spanning at least two protocols.
    pub fn is_cross_protocol(&self) -> bool {
        self.hops() >= 2 && self.protocols().len() >= 2
    }

    pub fn uses_pool(&self, pool_id: &str) -> bool {
        self.path.iter().any(|s| s.pool_id == pool_id)
    }

    pub fn touches_token(&self, token: Address) -> bool {
        self.path
            .iter()
            .any(|s| s.token_in == token || s.token_out == token)
    }

    /// Token sequence `token_in, hop1.out, hop2.out, ...`.
    pub fn token_sequence(&self) -> Vec<Address> {
        let mut tokens = Vec::with_capacity(self.path.len() + 1);
        tokens.push(self.token_in);
        tokens.extend(self.path.iter().map(|s| s.token_out));
        tokens
    }

    /// Checks path continuity, endpoints and acyclicity.
    pub fn is_well_formed(&self) -> bool {
        let (Some(first), Some(last)) = (self.path.first(), self.path.last()) else {
            return false;
        };
        if first.token_in != self.token_in || last.token_out != self.token_out {
            return false;
        }
        if self
            .path
            .windows(2)
            .any(|w| w[0].token_out != w[1].token_in)
        {
            return false;
        }
        let tokens = self.token_sequence();
        let unique: HashSet<_> = tokens.iter().collect();
        unique.len() == tokens.len()
    }

    /// Profitability per unit of gas; the gas-optimal ranking key.
    pub fn gas_efficiency(&self) -> f64 {
        self.profitability_score / self.total_gas_estimate.max(1) as f64
    }
}

/// Gas price quote for one chain, in wei.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GasPrice {
    pub gas_price: U256,
    pub max_fee_per_gas: U256,
}

impl GasPrice {
    pub fn from_gwei(gwei: u64) -> Self {
        let wei = U256::from(gwei) * U256::exp10(9);
        Self {
            gas_price: wei,
            max_fee_per_gas: wei,
        }
    }
}
