//! # Scoring Engine
//!
//! Profitability, risk and confidence scores for candidate routes, plus the per-protocol
//! efficiency signal that adapts to reported executions.
//!
//! All scores live on a 0-100 scale. Profitability and confidence are better when higher,
//! risk is better when lower.

use crate::graph_service::GraphService;
use crate::settings::Scoring;
use crate::types::conversions::u256_to_f64_lossy;
use crate::types::{LiquidityPool, PrecomputedRoute, Protocol};
use crate::utils::age_millis;
use anyhow::Result;
use dashmap::DashMap;
use ethers::types::U256;
use log::debug;

/// Freshness falls from 100 to 0 over this many milliseconds (100 minutes).
pub const FRESHNESS_DECAY_MS: f64 = 6_000_000.0;
/// USD liquidity that maps to a full liquidity score.
pub const FULL_LIQUIDITY_USD: f64 = 1_000_000.0;

const HOP_RISK: f64 = 5.0;
const NO_MEV_RISK: f64 = 5.0;
const IMPACT_RISK_FACTOR: f64 = 2.0;
const SEED_GAS_CEILING: f64 = 300_000.0;

fn clamp_score(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 100.0)
    }
}

/// Liquidity term for one pool: `min(100, liquidity_usd / 10_000)`.
pub fn liquidity_score(liquidity_usd: f64) -> f64 {
    clamp_score(liquidity_usd / (FULL_LIQUIDITY_USD / 100.0))
}

/// Freshness term: linear decay from 100 at age 0 to 0 at 100 minutes.
pub fn freshness_score(age_ms: u64) -> f64 {
    clamp_score(100.0 * (1.0 - age_ms as f64 / FRESHNESS_DECAY_MS))
}

/// Starting efficiency for a protocol with no execution history.
pub fn seed_efficiency(protocol: &Protocol) -> f64 {
    let gas = (protocol.base_gas as f64).min(SEED_GAS_CEILING);
    let mev = if protocol.mev_protection { 10.0 } else { 0.0 };
    clamp_score(0.7 * protocol.reliability + 20.0 * (1.0 - gas / SEED_GAS_CEILING) + mev)
}

/// Risk: `2 * impact + 5 * (hops - 1) + sum((100 - reliability) / 10 + 5 if no MEV)`.
///
/// A hop on an unknown protocol counts as reliability 0 without MEV protection.
pub fn risk_score(route: &PrecomputedRoute, protocol: impl Fn(&str) -> Option<Protocol>) -> f64 {
    let mut risk = IMPACT_RISK_FACTOR * route.total_price_impact;
    risk += HOP_RISK * route.hops().saturating_sub(1) as f64;
    for step in &route.path {
        let (reliability, mev) = protocol(&step.protocol)
            .map(|p| (p.reliability, p.mev_protection))
            .unwrap_or((0.0, false));
        risk += (100.0 - reliability.clamp(0.0, 100.0)) / 10.0;
        if !mev {
            risk += NO_MEV_RISK;
        }
    }
    clamp_score(risk)
}

/// Confidence: mean of freshness (oldest pool on the path) and average hop liquidity.
pub fn confidence_score(pools: &[LiquidityPool], now_ms: u64) -> f64 {
    if pools.is_empty() {
        return 0.0;
    }
    let oldest = pools.iter().map(|p| p.last_updated_ms).min().unwrap_or(0);
    let freshness = freshness_score(age_millis(oldest, now_ms));
    let liquidity =
        pools.iter().map(|p| liquidity_score(p.liquidity_usd)).sum::<f64>() / pools.len() as f64;
    (freshness + liquidity) / 2.0
}

/// Scoring inputs that stay fixed for one chain during a cycle or query.
#[derive(Debug, Clone, Copy)]
pub struct ScoringContext {
    /// Input the profitability simulation is run with (1 native unit)
    pub reference_amount: U256,
    /// Current gas price in wei
    pub gas_price: U256,
    pub now_ms: u64,
}

/// Scores routes and tracks the adaptive protocol efficiency.
#[derive(Debug)]
pub struct ScoringEngine {
    config: Scoring,
    efficiency: DashMap<String, f64>,
}

impl ScoringEngine {
    pub fn new(config: Scoring) -> Self {
        Self {
            config,
            efficiency: DashMap::new(),
        }
    }

    /// (Re)seeds the efficiency value of a protocol from its static descriptor.
    pub fn seed_protocol(&self, protocol: &Protocol) {
        self.efficiency
            .insert(protocol.id.clone(), seed_efficiency(protocol));
    }

    /// Live efficiency for `protocol`, seeding it on first use.
    pub fn efficiency(&self, protocol: &Protocol) -> f64 {
        *self
            .efficiency
            .entry(protocol.id.clone())
            .or_insert_with(|| seed_efficiency(protocol))
    }

    /// Efficiency by id without seeding; `None` for protocols never seen.
    pub fn efficiency_of(&self, protocol_id: &str) -> Option<f64> {
        self.efficiency.get(protocol_id).map(|e| *e)
    }

    pub fn efficiency_snapshot(&self) -> Vec<(String, f64)> {
        let mut out: Vec<(String, f64)> = self
            .efficiency
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Nudges the protocol's efficiency after an observed execution and returns the new value.
    pub fn record_execution(
        &self,
        protocol: &Protocol,
        success: bool,
        execution_time_ms: u64,
        gas_used: u64,
    ) -> f64 {
        let delta = if !success {
            -self.config.failure_penalty
        } else if execution_time_ms <= self.config.fast_execution_ms
            && gas_used <= self.config.low_gas_threshold
        {
            self.config.fast_low_gas_bonus
        } else {
            self.config.success_bonus
        };

        let seed = seed_efficiency(protocol);
        let mut entry = self.efficiency.entry(protocol.id.clone()).or_insert(seed);
        *entry = clamp_score(*entry + delta);
        debug!(
            "Protocol {} efficiency adjusted by {:+.1} to {:.1}",
            protocol.id, delta, *entry
        );
        *entry
    }

    /// `(efficiency_weight * efficiency + reliability_weight * reliability) / 100`
    fn protocol_multiplier(&self, protocol: &Protocol) -> f64 {
        (self.config.efficiency_weight * self.efficiency(protocol)
            + self.config.reliability_weight * protocol.reliability)
            / 100.0
    }

    /// Composite used to choose one pool among several for the same hop.
    ///
    /// `0.4 * liquidity + 0.3 * volume + 0.2 * efficiency + 0.1 * fee`, each term on 0-100.
    pub fn pool_composite_score(&self, pool: &LiquidityPool, protocol: Option<&Protocol>) -> f64 {
        let volume = clamp_score(pool.volume_24h_usd / (FULL_LIQUIDITY_USD / 100.0));
        let efficiency = protocol.map(|p| self.efficiency(p)).unwrap_or(0.0);
        let fee = clamp_score(100.0 * (1.0 - pool.fee_bps as f64 / 100.0));
        0.4 * liquidity_score(pool.liquidity_usd) + 0.3 * volume + 0.2 * efficiency + 0.1 * fee
    }

    /// Profitability from a simulated reference trade.
    ///
    /// Percent return is `(gross_out - gas_cost - reference) / reference * 100`, multiplied
    /// by ten, by the mean protocol multiplier over hops and by the MEV bonus when every hop
    /// is protected.
    pub fn profitability_score(
        &self,
        route: &PrecomputedRoute,
        reference_output: U256,
        ctx: &ScoringContext,
        protocol: impl Fn(&str) -> Option<Protocol>,
    ) -> f64 {
        if route.path.is_empty() || ctx.reference_amount.is_zero() {
            return 0.0;
        }
        let gas_cost = ctx
            .gas_price
            .saturating_mul(U256::from(route.total_gas_estimate));
        let reference = u256_to_f64_lossy(ctx.reference_amount);
        let net = u256_to_f64_lossy(reference_output) - u256_to_f64_lossy(gas_cost) - reference;
        let return_pct = net / reference * 100.0;

        let mut multiplier = 0.0;
        let mut all_mev = true;
        for step in &route.path {
            match protocol(&step.protocol) {
                Some(p) => {
                    multiplier += self.protocol_multiplier(&p);
                    all_mev &= p.mev_protection;
                }
                None => all_mev = false,
            }
        }
        multiplier /= route.path.len() as f64;
        if all_mev {
            multiplier *= self.config.mev_bonus;
        }

        clamp_score(return_pct * 10.0 * multiplier)
    }

    /// Fills in profitability, risk and confidence for `route` against the live graph.
    pub fn score_route(
        &self,
        graph: &GraphService,
        route: &mut PrecomputedRoute,
        ctx: &ScoringContext,
    ) -> Result<()> {
        let reference_output = if route.amount_in == ctx.reference_amount {
            route.expected_output
        } else {
            graph.quote_path(&route.path, ctx.reference_amount)?
        };
        let lookup = |id: &str| graph.protocol(id);
        let pools: Vec<LiquidityPool> = route
            .path
            .iter()
            .filter_map(|s| graph.pool(&s.pool_id))
            .collect();

        route.profitability_score = self.profitability_score(route, reference_output, ctx, lookup);
        route.risk_score = risk_score(route, lookup);
        route.confidence_score = confidence_score(&pools, ctx.now_ms);
        Ok(())
    }
}
