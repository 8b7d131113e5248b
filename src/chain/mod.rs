//! Chain module - network access behind a mockable client trait
//!
//! This module provides:
//! - The `ChainClient` seam every component talks to
//! - Multi-RPC provider management with automatic failover
//! - ABI encoding for the fixed router, ERC20 and wrapped-native calls

pub mod calls;
pub mod provider;

pub use provider::ChainProvider;

use crate::error::ArbResult;

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Block, Bytes, Transaction, TransactionReceipt, H256, U256};
use std::sync::Arc;

/// Primitive chain operations the keeper needs
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Chain ID stamped on every transaction
    fn chain_id(&self) -> u64;

    async fn block_number(&self) -> ArbResult<u64>;

    /// Block with full transaction bodies
    async fn block_with_txs(&self, number: u64) -> ArbResult<Option<Block<Transaction>>>;

    /// All transactions currently in the node's pending pool
    async fn pending_pool(&self) -> ArbResult<Vec<Transaction>>;

    async fn native_balance(&self, address: Address) -> ArbResult<U256>;

    /// Next nonce for an address, including pending transactions
    async fn transaction_count(&self, address: Address) -> ArbResult<u64>;

    /// Read-only contract call
    async fn call(&self, to: Address, data: Bytes) -> ArbResult<Bytes>;

    async fn estimate_gas(&self, tx: &TypedTransaction) -> ArbResult<U256>;

    /// The node's own fee suggestion
    async fn fee_estimate(&self) -> ArbResult<GasPrice>;

    /// Submit a signed transaction; errors carry the node's message verbatim
    async fn send_raw_transaction(&self, raw: Bytes) -> ArbResult<H256>;

    async fn transaction_receipt(&self, hash: H256) -> ArbResult<Option<TransactionReceipt>>;
}

pub type SharedClient = Arc<dyn ChainClient>;

/// Gas price types
#[derive(Debug, Clone, PartialEq)]
pub enum GasPrice {
    Legacy(U256),
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}

impl GasPrice {
    /// Write the fee fields onto a transaction of either envelope
    pub fn apply_to(&self, tx: &mut TypedTransaction) {
        match (self, tx) {
            (GasPrice::Legacy(price), TypedTransaction::Eip1559(inner)) => {
                inner.max_fee_per_gas = Some(*price);
                inner.max_priority_fee_per_gas = Some(*price);
            }
            (GasPrice::Legacy(price), other) => {
                other.set_gas_price(*price);
            }
            (
                GasPrice::Eip1559 {
                    max_fee_per_gas,
                    max_priority_fee_per_gas,
                },
                TypedTransaction::Eip1559(inner),
            ) => {
                inner.max_fee_per_gas = Some(*max_fee_per_gas);
                inner.max_priority_fee_per_gas = Some(*max_priority_fee_per_gas);
            }
            (GasPrice::Eip1559 { max_fee_per_gas, .. }, other) => {
                other.set_gas_price(*max_fee_per_gas);
            }
        }
    }
}
