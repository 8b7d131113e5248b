//! Chain provider with multi-RPC support and automatic failover

use super::{ChainClient, GasPrice};
use crate::config::NetworkConfig;
use crate::error::{ArbError, ArbResult};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider, RpcError};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    /// Network configuration
    config: NetworkConfig,
    /// HTTP providers in configured order
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
}

impl ChainProvider {
    /// Create a new chain provider
    pub fn new(config: NetworkConfig) -> ArbResult<Self> {
        let mut http_providers = Vec::new();
        let timeout = Duration::from_secs(config.http_timeout_secs);

        for url in &config.rpc_urls {
            let parsed = match reqwest::Url::parse(url) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!("Skipping invalid RPC URL {}: {}", url, e);
                    continue;
                }
            };
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| ArbError::Config(format!("HTTP client for {}: {}", url, e)))?;
            let provider =
                Provider::new(Http::new_with_client(parsed, client)).interval(Duration::from_millis(500));
            http_providers.push(provider);
            debug!("Added HTTP provider for chain {}: {}", config.chain_id, url);
        }

        if http_providers.is_empty() {
            return Err(ArbError::Config("No valid RPC providers".to_string()));
        }

        Ok(Self {
            config,
            http_providers,
            current_provider: AtomicUsize::new(0),
        })
    }

    /// Get the active HTTP provider
    fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.config.chain_id, next);
    }

    /// Run a request against each provider in turn until one answers
    async fn with_failover<T, F, Fut>(&self, operation: &str, op: F) -> ArbResult<T>
    where
        F: Fn(Provider<Http>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        self.with_failover_as(operation, op, ArbError::Rpc).await
    }

    /// Like `with_failover`, wrapping the final error with `wrap`.
    ///
    /// Only transport failures move on to the next provider. A JSON-RPC error
    /// response is the node's verdict on the request and is returned as is.
    async fn with_failover_as<T, F, Fut, W>(&self, operation: &str, op: F, wrap: W) -> ArbResult<T>
    where
        F: Fn(Provider<Http>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
        W: Fn(String) -> ArbError,
    {
        let mut last_error = None;
        for _ in 0..self.http_providers.len() {
            match op(self.http().clone()).await {
                Ok(value) => return Ok(value),
                Err(e) if RpcError::as_error_response(&e).is_some() => return Err(wrap(e.to_string())),
                Err(e) => {
                    warn!(
                        "Failed to {} on chain {}: {}",
                        operation, self.config.chain_id, e
                    );
                    last_error = Some(e.to_string());
                    self.failover();
                }
            }
        }

        Err(wrap(format!(
            "All providers failed to {}: {}",
            operation,
            last_error.unwrap_or_default()
        )))
    }

    /// Health check
    pub async fn health_check(&self) -> bool {
        self.block_number().await.is_ok()
    }
}

#[async_trait]
impl ChainClient for ChainProvider {
    fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    async fn block_number(&self) -> ArbResult<u64> {
        self.with_failover("get block number", |p| async move {
            p.get_block_number().await.map(|n| n.as_u64())
        })
        .await
    }

    async fn block_with_txs(&self, number: u64) -> ArbResult<Option<Block<Transaction>>> {
        self.with_failover("get block", |p| async move { p.get_block_with_txs(number).await })
            .await
    }

    async fn pending_pool(&self) -> ArbResult<Vec<Transaction>> {
        let content = self
            .with_failover("read txpool", |p| async move { p.txpool_content().await })
            .await?;

        Ok(content
            .pending
            .into_values()
            .flat_map(|by_nonce| by_nonce.into_values())
            .collect())
    }

    async fn native_balance(&self, address: Address) -> ArbResult<U256> {
        self.with_failover("get balance", |p| async move { p.get_balance(address, None).await })
            .await
    }

    async fn transaction_count(&self, address: Address) -> ArbResult<u64> {
        self.with_failover("get transaction count", |p| async move {
            p.get_transaction_count(address, Some(BlockNumber::Pending.into()))
                .await
                .map(|n| n.as_u64())
        })
        .await
    }

    async fn call(&self, to: Address, data: Bytes) -> ArbResult<Bytes> {
        let tx: TypedTransaction = TransactionRequest::new().to(to).data(data).into();
        self.with_failover_as(
            "call contract",
            |p| {
                let tx = tx.clone();
                async move { p.call(&tx, None).await }
            },
            |message| ArbError::Contract {
                contract: format!("{:?}", to),
                message,
            },
        )
        .await
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> ArbResult<U256> {
        self.with_failover_as(
            "estimate gas",
            |p| {
                let tx = tx.clone();
                async move { p.estimate_gas(&tx, None).await }
            },
            ArbError::GasEstimation,
        )
        .await
    }

    async fn fee_estimate(&self) -> ArbResult<GasPrice> {
        let eip1559 = self
            .with_failover("estimate fees", |p| async move { p.estimate_eip1559_fees(None).await })
            .await;
        match eip1559 {
            Ok((max_fee_per_gas, max_priority_fee_per_gas)) => Ok(GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            }),
            Err(e) => {
                debug!("EIP-1559 fee estimate failed, using legacy gas price: {}", e);
                let price = self
                    .with_failover_as(
                        "get gas price",
                        |p| async move { p.get_gas_price().await },
                        ArbError::GasEstimation,
                    )
                    .await?;
                Ok(GasPrice::Legacy(price))
            }
        }
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> ArbResult<H256> {
        self.with_failover("send raw transaction", |p| {
            let raw = raw.clone();
            async move { p.send_raw_transaction(raw).await.map(|pending| pending.tx_hash()) }
        })
        .await
    }

    async fn transaction_receipt(&self, hash: H256) -> ArbResult<Option<TransactionReceipt>> {
        self.with_failover("get transaction receipt", |p| async move {
            p.get_transaction_receipt(hash).await
        })
        .await
    }
}
