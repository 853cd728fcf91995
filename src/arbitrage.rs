//! Arbitrage classification over the published opportunity matrix.
//!
//! A route is arbitrage-eligible when it has at least two hops across at least two
//! distinct protocols.

use crate::opportunity_matrix::ChainRoutingTable;
use crate::router::sort_by_profitability;
use crate::types::PrecomputedRoute;
use std::sync::Arc;

pub fn is_arbitrage_candidate(route: &PrecomputedRoute) -> bool {
    route.is_cross_protocol()
}

/// Arbitrage-eligible routes with `profitability >= min_profit_percent * 10` and
/// `risk <= max_risk_score`, best first, at most `limit`.
pub fn find_opportunities(
    table: &ChainRoutingTable,
    min_profit_percent: f64,
    max_risk_score: f64,
    limit: usize,
) -> Vec<Arc<PrecomputedRoute>> {
    let floor = min_profit_percent * 10.0;
    let mut found: Vec<Arc<PrecomputedRoute>> = table
        .routes()
        .filter(|r| is_arbitrage_candidate(r))
        .filter(|r| r.profitability_score >= floor && r.risk_score <= max_risk_score)
        .cloned()
        .collect();
    sort_by_profitability(&mut found);
    found.truncate(limit);
    found
}
