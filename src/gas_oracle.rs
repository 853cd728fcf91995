//! # Gas Price Oracle
//!
//! Boundary to the external gas-price feed. The precomputation cycle pulls one quote per
//! chain per cycle through [`GasPriceOracle`]; [`StaticGasPriceOracle`] serves hosts that
//! push prices instead.

use crate::types::GasPrice;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use dashmap::DashMap;

/// Source of current gas prices per chain.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; quotes for all chains are requested concurrently
/// at the start of each cycle.
#[async_trait]
pub trait GasPriceOracle: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Current `{gas_price, max_fee_per_gas}` for `chain`, in wei.
    ///
    /// # Errors
    ///
    /// Returns an error when no quote is available. The engine then keeps the last known
    /// price for the chain.
    async fn current_gas_price(&self, chain: &str) -> Result<GasPrice>;
}

/// In-memory oracle whose prices are set by the host.
#[derive(Debug, Default)]
pub struct StaticGasPriceOracle {
    prices: DashMap<String, GasPrice>,
}

impl StaticGasPriceOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(self, chain: &str, price: GasPrice) -> Self {
        self.set_gas_price(chain, price);
        self
    }

    pub fn set_gas_price(&self, chain: &str, price: GasPrice) {
        self.prices.insert(chain.to_string(), price);
    }
}

#[async_trait]
impl GasPriceOracle for StaticGasPriceOracle {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn current_gas_price(&self, chain: &str) -> Result<GasPrice> {
        self.prices
            .get(chain)
            .map(|p| *p)
            .ok_or_else(|| anyhow!("no gas price configured for chain {}", chain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_oracle() {
        let oracle = StaticGasPriceOracle::new().with_price("ethereum", GasPrice::from_gwei(20));
        let quote = oracle.current_gas_price("ethereum").await.unwrap();
        assert_eq!(quote, GasPrice::from_gwei(20));
        assert!(oracle.current_gas_price("polygon").await.is_err());

        oracle.set_gas_price("polygon", GasPrice::from_gwei(50));
        assert!(oracle.current_gas_price("polygon").await.is_ok());
    }
}
