//! Constant-product AMM math.
//!
//! Amounts are `U256`. The swap formula is evaluated in `U512` so no reserve or input
//! size can overflow it; only price impact, a percentage for scoring, is an `f64`.

use crate::types::conversions::ratio_f64;
use ethers::types::{U256, U512};

pub const BPS_DENOMINATOR: u32 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmmError {
    #[error("fee of {0} bps is not below 10000")]
    FeeTooHigh(u32),
    #[error("pool has an empty reserve")]
    EmptyReserve,
}

/// `amount_in * (10000 - fee) * reserve_out / (reserve_in * 10000 + amount_in * (10000 - fee))`
///
/// The result is always strictly below `reserve_out`.
pub fn calculate_amount_out(
    amount_in: U256,
    reserve_in: U256,
    reserve_out: U256,
    fee_bps: u32,
) -> Result<U256, AmmError> {
    if fee_bps >= BPS_DENOMINATOR {
        return Err(AmmError::FeeTooHigh(fee_bps));
    }
    if reserve_in.is_zero() || reserve_out.is_zero() {
        return Err(AmmError::EmptyReserve);
    }
    if amount_in.is_zero() {
        return Ok(U256::zero());
    }

    let amount_in_with_fee = amount_in.full_mul(U256::from(BPS_DENOMINATOR - fee_bps));
    let mut denominator =
        reserve_in.full_mul(U256::from(BPS_DENOMINATOR)) + amount_in_with_fee;
    let mut scaled_in = amount_in_with_fee;

    // keep the product with reserve_out inside 512 bits
    let shift = scaled_in.bits().saturating_sub(256);
    if shift > 0 {
        scaled_in = scaled_in >> shift;
        denominator = denominator >> shift;
    }
    let numerator = scaled_in * U512::from(reserve_out);

    let max_out = reserve_out - U256::one();
    let out = U256::try_from(numerator / denominator).unwrap_or(max_out);
    Ok(out.min(max_out))
}

/// Share of the input reserve consumed by the trade, in percent.
pub fn price_impact_percent(amount_in: U256, reserve_in: U256) -> f64 {
    match reserve_in.checked_add(amount_in) {
        Some(total) => ratio_f64(amount_in, total) * 100.0,
        None => 100.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn e18(v: u64) -> U256 {
        U256::from(v) * U256::exp10(18)
    }

    #[test]
    fn test_reference_swap() {
        let out = calculate_amount_out(e18(1), e18(1_000), e18(2_000), 30).unwrap();
        // 1 token in at 1:2 with 0.3% fee and ~0.1% impact
        assert!(out > U256::from(1_990_000_000_000_000_000u128));
        assert!(out < U256::from(1_994_000_000_000_000_000u128));
    }

    #[test]
    fn test_output_monotonic_and_bounded() {
        let reserve_in = e18(500);
        let reserve_out = e18(750);
        let mut previous = U256::zero();
        for exp in 0..30u32 {
            let amount_in = U256::from(7u64) * U256::from(10u64).pow(U256::from(exp));
            let out = calculate_amount_out(amount_in, reserve_in, reserve_out, 30).unwrap();
            assert!(out >= previous);
            assert!(out < reserve_out);
            previous = out;
        }
    }

    #[test]
    fn test_rejects_invalid_inputs() {
        assert_eq!(
            calculate_amount_out(e18(1), U256::zero(), e18(1), 30),
            Err(AmmError::EmptyReserve)
        );
        assert_eq!(
            calculate_amount_out(e18(1), e18(1), e18(1), 10_000),
            Err(AmmError::FeeTooHigh(10_000))
        );
        assert_eq!(
            calculate_amount_out(U256::zero(), e18(1), e18(1), 30).unwrap(),
            U256::zero()
        );
    }

    #[test]
    fn test_oversized_amounts_stay_below_reserve() {
        let huge = U256::MAX / 2;
        let out = calculate_amount_out(e18(1), e18(1_000), huge, 30).unwrap();
        assert!(out > U256::zero());
        assert!(out < huge);

        let drained = calculate_amount_out(U256::MAX, e18(1), e18(2), 30).unwrap();
        assert_eq!(drained, e18(2) - U256::one());

        let both = calculate_amount_out(U256::MAX, U256::MAX, U256::MAX, 30).unwrap();
        assert!(both < U256::MAX);
        assert!(both > U256::MAX / 3);
    }

    #[test]
    fn test_price_impact() {
        let impact = price_impact_percent(e18(1), e18(999));
        assert!((impact - 0.1).abs() < 1e-9);
        assert_eq!(price_impact_percent(U256::zero(), e18(10)), 0.0);
    }
}
