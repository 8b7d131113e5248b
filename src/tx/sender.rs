//! Transaction broadcaster with retry logic and stuck transaction handling
//!
//! Lifecycle of one broadcast:
//! `Build -> Sign -> Submit -> AwaitReceipt -> {Confirmed | Retry | Fatal}`

use super::classify::{classify, SubmitErrorKind};
use super::gas::FeeStrategy;
use super::nonce::NonceTracker;
use crate::chain::SharedClient;
use crate::clock::SharedClock;
use crate::config::TxConfig;
use crate::error::{ArbError, ArbResult};

use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, TransactionReceipt, H256, U64};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Terminal state of a broadcast
#[derive(Debug, Clone)]
pub enum BroadcastOutcome {
    /// Mined with success status
    Confirmed(TransactionReceipt),
    /// Mined but reverted (e.g. swap deadline passed)
    Reverted(TransactionReceipt),
    /// Attempt budget spent without a confirmation
    Exhausted,
    /// Stopped early because retrying cannot help
    Aborted(SubmitErrorKind),
}

impl BroadcastOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, BroadcastOutcome::Confirmed(_))
    }

    pub fn receipt(&self) -> Option<&TransactionReceipt> {
        match self {
            BroadcastOutcome::Confirmed(r) | BroadcastOutcome::Reverted(r) => Some(r),
            _ => None,
        }
    }
}

/// A transaction owned by one broadcast call, mutated in place across retries
#[derive(Debug)]
struct PendingTransaction {
    tx: TypedTransaction,
    nonce: u64,
    /// Consecutive nonce/fee recoveries since the last counted attempt
    recoveries: u32,
}

impl PendingTransaction {
    fn set_nonce(&mut self, nonce: u64) {
        self.nonce = nonce;
        self.tx.set_nonce(nonce);
    }
}

/// Signs, submits and confirms transactions for one wallet
pub struct TransactionBroadcaster {
    client: SharedClient,
    clock: SharedClock,
    wallet: LocalWallet,
    nonces: NonceTracker,
    fees: FeeStrategy,
    config: TxConfig,
    default_attempts: u32,
}

impl TransactionBroadcaster {
    pub fn new(
        client: SharedClient,
        clock: SharedClock,
        wallet: LocalWallet,
        fees: FeeStrategy,
        config: TxConfig,
        default_attempts: u32,
    ) -> Self {
        let chain_id = client.chain_id();
        let wallet = wallet.with_chain_id(chain_id);
        let nonces = NonceTracker::new(client.clone(), wallet.address());

        info!("Transaction broadcaster initialized with wallet: {:?}", wallet.address());

        Self {
            client,
            clock,
            wallet,
            nonces,
            fees,
            config,
            default_attempts,
        }
    }

    /// Signer address
    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    /// Broadcast with the configured attempt budget
    pub async fn send(&self, template: TypedTransaction, auto_gas: bool) -> ArbResult<BroadcastOutcome> {
        self.broadcast(template, auto_gas, self.default_attempts).await
    }

    /// Sign, submit and wait for a receipt, recovering from stale nonces and
    /// underpriced replacements. Returns `Err` only when the transaction could not
    /// be built (nonce or fee lookup failed).
    pub async fn broadcast(
        &self,
        template: TypedTransaction,
        auto_gas: bool,
        attempts: u32,
    ) -> ArbResult<BroadcastOutcome> {
        let pending = self.build(template, auto_gas).await?;
        let outcome = self.submit_until_terminal(pending, attempts).await;

        match &outcome {
            Ok(BroadcastOutcome::Confirmed(_)) => crate::metrics::record_tx_confirmed(),
            Ok(BroadcastOutcome::Reverted(_)) => crate::metrics::record_tx_failed("reverted"),
            Ok(BroadcastOutcome::Exhausted) => crate::metrics::record_tx_failed("exhausted"),
            Ok(BroadcastOutcome::Aborted(_)) => crate::metrics::record_tx_failed("aborted"),
            Err(_) => crate::metrics::record_tx_failed("error"),
        }

        if !matches!(outcome, Ok(BroadcastOutcome::Confirmed(_))) {
            // Whether the nonce was consumed on-chain is unknown
            self.nonces.invalidate().await;
        }
        outcome
    }

    async fn build(&self, mut tx: TypedTransaction, auto_gas: bool) -> ArbResult<PendingTransaction> {
        tx.set_chain_id(self.client.chain_id());
        tx.set_from(self.wallet.address());

        let nonce = self.nonces.next().await?;
        tx.set_nonce(nonce);

        if let Err(e) = self.fees.apply(&mut tx, auto_gas).await {
            self.nonces.invalidate().await;
            return Err(e);
        }

        Ok(PendingTransaction {
            tx,
            nonce,
            recoveries: 0,
        })
    }

    async fn submit_until_terminal(
        &self,
        mut pending: PendingTransaction,
        attempts: u32,
    ) -> ArbResult<BroadcastOutcome> {
        debug!("Broadcasting TX: {:?}", pending.tx);
        let mut remaining = attempts;

        while remaining > 0 {
            let signature = match self.wallet.sign_transaction(&pending.tx).await {
                Ok(signature) => signature,
                Err(e) => {
                    error!("Failed to sign transaction: {}", e);
                    return Ok(BroadcastOutcome::Aborted(SubmitErrorKind::Fatal));
                }
            };
            let raw = pending.tx.rlp_signed(&signature);
            let local_hash = pending.tx.hash(&signature);

            let tx_hash = match self.client.send_raw_transaction(raw).await {
                Ok(hash) => {
                    crate::metrics::record_tx_submitted();
                    hash
                }
                Err(e) => {
                    let message = e.to_string();
                    debug!("Submission of nonce {} failed: {}", pending.nonce, message);

                    match classify(&message) {
                        SubmitErrorKind::NonceStale => {
                            if !self.note_recovery(&mut pending) {
                                break;
                            }
                            let nonce = self.nonces.resync().await?;
                            debug!("Nonce too low, resubmitting with nonce {}", nonce);
                            pending.set_nonce(nonce);
                            continue;
                        }
                        SubmitErrorKind::Underpriced => {
                            if !self.note_recovery(&mut pending) {
                                break;
                            }
                            self.fees.bump(&mut pending.tx);
                            debug!("Replacement underpriced, bumped fees: {:?}", pending.tx);
                            continue;
                        }
                        SubmitErrorKind::InsufficientFunds => {
                            error!("Not enough gas for this TX: {:?}", pending.tx);
                            return Ok(BroadcastOutcome::Aborted(SubmitErrorKind::InsufficientFunds));
                        }
                        SubmitErrorKind::Fatal => {
                            error!("Transaction rejected permanently: {}", message);
                            return Ok(BroadcastOutcome::Aborted(SubmitErrorKind::Fatal));
                        }
                        SubmitErrorKind::AlreadyKnown => local_hash,
                        SubmitErrorKind::Transient => {
                            remaining -= 1;
                            pending.recoveries = 0;
                            if remaining > 0 {
                                self.clock
                                    .sleep(Duration::from_secs(self.config.retry_delay_secs))
                                    .await;
                                debug!("Rebroadcasting TX ... {}", attempts - remaining);
                            }
                            continue;
                        }
                    }
                }
            };

            match self.await_receipt(tx_hash).await {
                Some(receipt) => {
                    debug!("Confirmed TX: {:?}", receipt);
                    if receipt.status == Some(U64::from(1)) {
                        return Ok(BroadcastOutcome::Confirmed(receipt));
                    }
                    warn!("Transaction {:?} reverted", tx_hash);
                    return Ok(BroadcastOutcome::Reverted(receipt));
                }
                None => {
                    remaining -= 1;
                    pending.recoveries = 0;
                    if remaining > 0 {
                        debug!("Rebroadcasting TX ... {}", attempts - remaining);
                    }
                }
            }
        }

        warn!(
            "Giving up on nonce {} after {} attempts",
            pending.nonce, attempts
        );
        Ok(BroadcastOutcome::Exhausted)
    }

    /// Count a nonce/fee recovery; false once the safety cap is hit
    fn note_recovery(&self, pending: &mut PendingTransaction) -> bool {
        pending.recoveries += 1;
        if pending.recoveries > self.config.max_recoveries {
            warn!(
                "Stopped after {} consecutive nonce/fee recoveries",
                self.config.max_recoveries
            );
            return false;
        }
        true
    }

    /// Poll for a receipt until the per-attempt timeout
    async fn await_receipt(&self, tx_hash: H256) -> Option<TransactionReceipt> {
        let poll = Duration::from_millis(self.config.receipt_poll_ms.max(1));
        let timeout = Duration::from_secs(self.config.receipt_timeout_secs);
        let polls = (timeout.as_millis() / poll.as_millis()).max(1);

        for _ in 0..polls {
            match self.client.transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => return Some(receipt),
                Ok(None) => {}
                Err(e) => debug!("Receipt lookup for {:?} failed: {}", tx_hash, e),
            }
            self.clock.sleep(poll).await;
        }

        debug!(
            "{}",
            ArbError::Timeout {
                operation: format!("receipt of {:?}", tx_hash)
            }
        );
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{GasPrice, MockChainClient};
    use crate::clock::ManualClock;
    use crate::config::{GasConfig, GasSampling};
    use ethers::types::{Bytes, Eip1559TransactionRequest, U256};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    const KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    fn tx_config() -> TxConfig {
        TxConfig {
            retry_delay_secs: 10,
            receipt_timeout_secs: 2,
            receipt_poll_ms: 1000,
            replacement_bump: 1.0369,
            max_recoveries: 64,
            quote_retry_delay_ms: 1000,
        }
    }

    fn gas_config() -> GasConfig {
        GasConfig {
            sampling: GasSampling::Pool,
            beacon_url: String::new(),
            cache_ttl_secs: 10,
            stale_grace_secs: 60,
            multiplier: 1.0,
            median_sample_txs: 10,
            priority_fee_floor_gwei: 1,
        }
    }

    fn template() -> TypedTransaction {
        Eip1559TransactionRequest::new()
            .to(Address::repeat_byte(0x22))
            .value(U256::from(1_000u64))
            .gas(21_000u64)
            .into()
    }

    fn receipt(status: u64) -> TransactionReceipt {
        TransactionReceipt {
            status: Some(U64::from(status)),
            ..Default::default()
        }
    }

    /// Mock with fixed fees; nonce, send and receipt behaviour supplied per test
    fn base_client() -> MockChainClient {
        let mut client = MockChainClient::new();
        client.expect_chain_id().return_const(369u64);
        client.expect_fee_estimate().returning(|| {
            Ok(GasPrice::Eip1559 {
                max_fee_per_gas: U256::from(100u64),
                max_priority_fee_per_gas: U256::from(10u64),
            })
        });
        client
    }

    fn broadcaster(client: MockChainClient, clock: Arc<ManualClock>) -> TransactionBroadcaster {
        let client: SharedClient = Arc::new(client);
        let fees = FeeStrategy::new(client.clone(), &gas_config(), 1.0369);
        TransactionBroadcaster::new(
            client,
            clock,
            KEY.parse::<LocalWallet>().unwrap(),
            fees,
            tx_config(),
            18,
        )
    }

    async fn expected_raw(nonce: u64) -> Bytes {
        let wallet = KEY.parse::<LocalWallet>().unwrap().with_chain_id(369u64);
        let mut tx = template();
        tx.set_chain_id(369u64);
        tx.set_from(wallet.address());
        tx.set_nonce(nonce);
        GasPrice::Eip1559 {
            max_fee_per_gas: U256::from(100u64),
            max_priority_fee_per_gas: U256::from(10u64),
        }
        .apply_to(&mut tx);
        let signature = wallet.sign_transaction(&tx).await.unwrap();
        tx.rlp_signed(&signature)
    }

    #[tokio::test]
    async fn test_nonce_too_low_refreshes_once_and_resubmits_same_payload() {
        let clock = ManualClock::at_unix(1_700_000_000);
        let mut client = base_client();

        let mut nonces = vec![5u64, 9].into_iter();
        client
            .expect_transaction_count()
            .times(2)
            .returning(move |_| Ok(nonces.next().unwrap()));

        let sent = Arc::new(Mutex::new(Vec::<Bytes>::new()));
        let captured = sent.clone();
        client.expect_send_raw_transaction().times(2).returning(move |raw| {
            let mut sent = captured.lock().unwrap();
            sent.push(raw);
            if sent.len() == 1 {
                Err(ArbError::Rpc("(code: -32000, message: nonce too low)".to_string()))
            } else {
                Ok(H256::repeat_byte(0xab))
            }
        });
        client
            .expect_transaction_receipt()
            .returning(|_| Ok(Some(receipt(1))));

        let sender = broadcaster(client, clock.clone());
        let outcome = sender.broadcast(template(), true, 3).await.unwrap();

        assert!(outcome.is_confirmed());
        let sent = sent.lock().unwrap().clone();
        assert_eq!(sent[0], expected_raw(5).await);
        assert_eq!(sent[1], expected_raw(9).await);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_insufficient_funds_aborts_without_spending_attempts() {
        let clock = ManualClock::at_unix(1_700_000_000);
        let mut client = base_client();
        client.expect_transaction_count().returning(|_| Ok(0));
        client
            .expect_send_raw_transaction()
            .times(1)
            .returning(|_| {
                Err(ArbError::Rpc(
                    "insufficient funds for gas * price + value".to_string(),
                ))
            });
        client.expect_transaction_receipt().never();

        let sender = broadcaster(client, clock.clone());
        let outcome = sender.broadcast(template(), true, 5).await.unwrap();

        assert!(matches!(
            outcome,
            BroadcastOutcome::Aborted(SubmitErrorKind::InsufficientFunds)
        ));
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_transient_errors_exhaust_budget() {
        let clock = ManualClock::at_unix(1_700_000_000);
        let mut client = base_client();
        client.expect_transaction_count().returning(|_| Ok(0));
        client
            .expect_send_raw_transaction()
            .times(3)
            .returning(|_| Err(ArbError::Rpc("connection reset by peer".to_string())));

        let sender = broadcaster(client, clock.clone());
        let outcome = sender.broadcast(template(), true, 3).await.unwrap();

        assert!(matches!(outcome, BroadcastOutcome::Exhausted));
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(10); 2]);
    }

    #[tokio::test]
    async fn test_underpriced_bumps_fees_before_resubmitting() {
        let clock = ManualClock::at_unix(1_700_000_000);
        let mut client = base_client();
        client.expect_transaction_count().times(1).returning(|_| Ok(1));

        let sent = Arc::new(Mutex::new(Vec::<Bytes>::new()));
        let captured = sent.clone();
        client.expect_send_raw_transaction().times(2).returning(move |raw| {
            let mut sent = captured.lock().unwrap();
            sent.push(raw);
            if sent.len() == 1 {
                Err(ArbError::Rpc("replacement transaction underpriced".to_string()))
            } else {
                Ok(H256::repeat_byte(0x01))
            }
        });
        client
            .expect_transaction_receipt()
            .returning(|_| Ok(Some(receipt(1))));

        let sender = broadcaster(client, clock);
        let outcome = sender.broadcast(template(), true, 1).await.unwrap();

        assert!(outcome.is_confirmed());
        let sent = sent.lock().unwrap();
        assert_ne!(sent[0], sent[1]);
    }

    #[tokio::test]
    async fn test_receipt_timeout_resubmits() {
        let clock = ManualClock::at_unix(1_700_000_000);
        let mut client = base_client();
        client.expect_transaction_count().returning(|_| Ok(0));
        client
            .expect_send_raw_transaction()
            .times(2)
            .returning(|_| Ok(H256::repeat_byte(0x02)));

        let lookups = Arc::new(AtomicUsize::new(0));
        let counter = lookups.clone();
        client.expect_transaction_receipt().returning(move |_| {
            // Two polls per attempt; the first attempt never sees a receipt
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Ok(None)
            } else {
                Ok(Some(receipt(1)))
            }
        });

        let sender = broadcaster(client, clock);
        let outcome = sender.broadcast(template(), true, 3).await.unwrap();
        assert!(outcome.is_confirmed());
    }

    #[tokio::test]
    async fn test_already_known_waits_for_local_hash() {
        let clock = ManualClock::at_unix(1_700_000_000);
        let mut client = base_client();
        client.expect_transaction_count().returning(|_| Ok(4));
        client
            .expect_send_raw_transaction()
            .times(1)
            .returning(|_| Err(ArbError::Rpc("already known".to_string())));
        client
            .expect_transaction_receipt()
            .times(1)
            .returning(|_| Ok(Some(receipt(1))));

        let sender = broadcaster(client, clock);
        assert!(sender.broadcast(template(), true, 2).await.unwrap().is_confirmed());
    }

    #[tokio::test]
    async fn test_reverted_receipt_is_not_confirmed() {
        let clock = ManualClock::at_unix(1_700_000_000);
        let mut client = base_client();
        client.expect_transaction_count().times(2).returning(|_| Ok(4));
        client
            .expect_send_raw_transaction()
            .returning(|_| Ok(H256::repeat_byte(0x03)));
        client
            .expect_transaction_receipt()
            .returning(|_| Ok(Some(receipt(0))));

        let sender = broadcaster(client, clock);
        let outcome = sender.broadcast(template(), true, 2).await.unwrap();
        assert!(matches!(outcome, BroadcastOutcome::Reverted(_)));

        // The nonce is re-read after a failed broadcast
        sender.broadcast(template(), true, 1).await.unwrap();
    }
}
