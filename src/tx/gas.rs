//! Gas limit and fee population for outgoing transactions

use crate::chain::{GasPrice, SharedClient};
use crate::config::GasConfig;
use crate::error::{ArbError, ArbResult};
use crate::units::scale;

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::U256;
use tracing::debug;

/// Fills gas fields either from the node's own estimate or from recent block history
pub struct FeeStrategy {
    client: SharedClient,
    /// Applied to gas limit and max fee on the median strategy
    multiplier: f64,
    /// Number of recent confirmed transactions the median is taken over
    median_sample_txs: usize,
    /// Minimum priority fee in wei
    priority_fee_floor: U256,
    /// Replacement bump for underpriced resubmissions
    replacement_bump: f64,
}

impl FeeStrategy {
    pub fn new(client: SharedClient, config: &GasConfig, replacement_bump: f64) -> Self {
        Self {
            client,
            multiplier: config.multiplier,
            median_sample_txs: config.median_sample_txs.max(1),
            priority_fee_floor: U256::from(config.priority_fee_floor_gwei) * U256::exp10(9),
            replacement_bump,
        }
    }

    /// Populate gas limit and fee fields.
    ///
    /// With `auto_gas` the node's fee suggestion is trusted. Otherwise the fee is the
    /// median gas price of recent blocks with a priority floor, then scaled by the
    /// configured multiplier along with the gas limit.
    pub async fn apply(&self, tx: &mut TypedTransaction, auto_gas: bool) -> ArbResult<()> {
        if tx.gas().is_none() {
            let gas = self.client.estimate_gas(tx).await?;
            tx.set_gas(gas);
        }

        if auto_gas {
            let price = self.client.fee_estimate().await?;
            price.apply_to(tx);
        } else {
            let median = self.median_gas_price().await?;
            let max_fee = median.max(self.priority_fee_floor);
            GasPrice::Eip1559 {
                max_fee_per_gas: max_fee,
                max_priority_fee_per_gas: self.priority_fee_floor,
            }
            .apply_to(tx);
            self.apply_multiplier(tx);
        }

        Ok(())
    }

    /// Median gas price over the most recent confirmed transactions
    pub async fn median_gas_price(&self) -> ArbResult<U256> {
        let latest = self.client.block_number().await?;
        let mut prices = Vec::with_capacity(self.median_sample_txs);

        for number in (0..=latest).rev().take(self.median_sample_txs) {
            let block = match self.client.block_with_txs(number).await? {
                Some(block) => block,
                None => continue,
            };
            prices.extend(block.transactions.iter().filter_map(|t| t.gas_price));
            if prices.len() >= self.median_sample_txs {
                break;
            }
        }

        prices.truncate(self.median_sample_txs);
        let median = median(&mut prices).ok_or_else(|| {
            ArbError::GasEstimation("No transactions in recent blocks".to_string())
        })?;
        debug!("Median gas price over {} txs: {}", prices.len(), median);
        Ok(median)
    }

    /// Scale gas limit and max fee by the configured multiplier
    pub fn apply_multiplier(&self, tx: &mut TypedTransaction) {
        if let Some(gas) = tx.gas().copied() {
            tx.set_gas(scale(gas, self.multiplier));
        }
        match tx {
            TypedTransaction::Eip1559(inner) => {
                inner.max_fee_per_gas = inner.max_fee_per_gas.map(|f| scale(f, self.multiplier));
            }
            other => {
                if let Some(price) = other.gas_price() {
                    other.set_gas_price(scale(price, self.multiplier));
                }
            }
        }
    }

    /// Raise gas limit and every fee field by the replacement bump
    pub fn bump(&self, tx: &mut TypedTransaction) {
        let factor = self.replacement_bump;
        if let Some(gas) = tx.gas().copied() {
            tx.set_gas(scale(gas, factor));
        }
        match tx {
            TypedTransaction::Eip1559(inner) => {
                inner.max_fee_per_gas = inner.max_fee_per_gas.map(|f| scale(f, factor));
                inner.max_priority_fee_per_gas =
                    inner.max_priority_fee_per_gas.map(|f| scale(f, factor));
            }
            other => {
                if let Some(price) = other.gas_price() {
                    other.set_gas_price(scale(price, factor));
                }
            }
        }
    }
}

fn median(values: &mut [U256]) -> Option<U256> {
    if values.is_empty() {
        return None;
    }
    values.sort();
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2)
    } else {
        Some(values[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainClient;
    use crate::config::{GasSampling, GasConfig};
    use ethers::types::{Block, Eip1559TransactionRequest, Transaction};
    use std::sync::Arc;

    fn gas_config() -> GasConfig {
        GasConfig {
            sampling: GasSampling::Pool,
            beacon_url: String::new(),
            cache_ttl_secs: 10,
            stale_grace_secs: 60,
            multiplier: 1.5,
            median_sample_txs: 4,
            priority_fee_floor_gwei: 1,
        }
    }

    fn eip1559(gas: u64, max_fee: u64, priority: u64) -> TypedTransaction {
        Eip1559TransactionRequest::new()
            .gas(gas)
            .max_fee_per_gas(max_fee)
            .max_priority_fee_per_gas(priority)
            .into()
    }

    fn fees(tx: &TypedTransaction) -> (U256, U256) {
        match tx {
            TypedTransaction::Eip1559(inner) => (
                inner.max_fee_per_gas.unwrap(),
                inner.max_priority_fee_per_gas.unwrap(),
            ),
            _ => panic!("expected eip1559"),
        }
    }

    #[test]
    fn test_bump_raises_gas_and_all_fees() {
        let strategy = FeeStrategy::new(Arc::new(MockChainClient::new()), &gas_config(), 1.0369);
        let mut tx = eip1559(100_000, 10_000, 1_000);
        strategy.bump(&mut tx);

        assert_eq!(tx.gas().copied(), Some(U256::from(103_690u64)));
        assert_eq!(fees(&tx), (U256::from(10_369u64), U256::from(1_036u64)));
    }

    #[test]
    fn test_multiplier_leaves_priority_fee() {
        let strategy = FeeStrategy::new(Arc::new(MockChainClient::new()), &gas_config(), 1.0369);
        let mut tx = eip1559(21_000, 1_000, 100);
        strategy.apply_multiplier(&mut tx);

        assert_eq!(tx.gas().copied(), Some(U256::from(31_500u64)));
        assert_eq!(fees(&tx), (U256::from(1_500u64), U256::from(100u64)));
    }

    #[tokio::test]
    async fn test_median_over_recent_blocks() {
        let mut client = MockChainClient::new();
        client.expect_block_number().returning(|| Ok(10));
        client.expect_block_with_txs().returning(|number| {
            let prices: &[u64] = if number == 10 { &[5, 1] } else { &[9, 3, 7] };
            Ok(Some(Block {
                transactions: prices
                    .iter()
                    .map(|p| Transaction {
                        gas_price: Some(U256::from(*p)),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            }))
        });

        let strategy = FeeStrategy::new(Arc::new(client), &gas_config(), 1.0369);
        // First four prices seen: 5, 1, 9, 3 -> sorted 1, 3, 5, 9 -> median 4
        assert_eq!(strategy.median_gas_price().await.unwrap(), U256::from(4u64));
    }

    #[tokio::test]
    async fn test_manual_gas_applies_floor_and_multiplier() {
        let mut client = MockChainClient::new();
        client.expect_block_number().returning(|| Ok(1));
        client.expect_block_with_txs().returning(|_| {
            Ok(Some(Block {
                transactions: vec![Transaction {
                    gas_price: Some(U256::from(100u64)),
                    ..Default::default()
                }],
                ..Default::default()
            }))
        });
        client.expect_fee_estimate().never();

        let strategy = FeeStrategy::new(Arc::new(client), &gas_config(), 1.0369);
        let mut tx = eip1559(20_000, 0, 0);
        strategy.apply(&mut tx, false).await.unwrap();

        // Median 100 wei is below the 1 gwei floor
        let floor = U256::exp10(9);
        assert_eq!(tx.gas().copied(), Some(U256::from(30_000u64)));
        assert_eq!(fees(&tx), (floor * 3 / 2, floor));
    }
}
