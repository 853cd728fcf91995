use ethers::types::{Address, U256};
use std::str::FromStr;

/// Lossy `U256 -> f64`, keeping the 18 most significant decimal digits.
pub fn u256_to_f64_lossy(v: U256) -> f64 {
    if v.is_zero() {
        return 0.0;
    }
    let s = v.to_string();
    let len = s.len();
    let take = if len >= 18 { 18 } else { len };
    let (mantissa_str, _rest) = s.split_at(take);
    let mantissa = mantissa_str.parse::<f64>().unwrap_or(0.0);
    let exp10 = (len - take) as i32;
    mantissa * 10f64.powi(exp10)
}

/// `numerator / denominator` as f64; zero when the denominator is zero.
pub fn ratio_f64(numerator: U256, denominator: U256) -> f64 {
    if denominator.is_zero() {
        return 0.0;
    }
    u256_to_f64_lossy(numerator) / u256_to_f64_lossy(denominator)
}

pub fn address_to_string(addr: Address) -> String {
    format!("{:?}", addr).to_lowercase()
}

pub fn string_to_address(s: &str) -> Result<Address, ConversionError> {
    Address::from_str(s.trim()).map_err(|e| ConversionError::InvalidAddress(e.to_string()))
}

pub fn string_to_u256(s: &str) -> Result<U256, ConversionError> {
    let trimmed = s.trim();
    let parsed = match trimmed.strip_prefix("0x") {
        Some(hex) => U256::from_str_radix(hex, 16).ok(),
        None => U256::from_dec_str(trimmed).ok(),
    };
    parsed.ok_or_else(|| ConversionError::InvalidAmount(trimmed.to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lossy_conversion_keeps_magnitude() {
        let v = U256::from(1_994_000_000_000_000_000u128);
        let f = u256_to_f64_lossy(v);
        assert!((f - 1.994e18).abs() < 1e6);
        assert_eq!(u256_to_f64_lossy(U256::zero()), 0.0);
    }

    #[test]
    fn test_ratio_handles_zero_denominator() {
        assert_eq!(ratio_f64(U256::from(5), U256::zero()), 0.0);
        assert!((ratio_f64(U256::from(1), U256::from(4)) - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_amounts() {
        assert_eq!(string_to_u256("1000").unwrap(), U256::from(1000));
        assert_eq!(string_to_u256("0x10").unwrap(), U256::from(16));
        assert!(string_to_u256("abc").is_err());
    }
}
