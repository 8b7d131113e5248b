//! Multi-call conversions executed in bounded batches behind a live gas gate

use crate::error::ArbResult;
use crate::gas::{FeeTier, GasOracle};
use crate::registry::{ConversionCall, ConversionRoute, RouteTable};
use crate::tx::{call_template, describe, WalletActions};
use crate::units::{fraction_digits, round_to, to_base_units};

use ethers::types::{Address, U256};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Result of one conversion request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionOutcome {
    Completed,
    /// Not enough source tokens, or a batch did not confirm
    Failed,
    /// Fees rose above the ceiling; batches already confirmed stay confirmed
    AbortedFees,
}

/// Split `iterations` into calls of at most `max`; the last call takes the remainder
pub fn plan_batches(iterations: u64, max: u64) -> Vec<u64> {
    if iterations == 0 || max == 0 {
        return Vec::new();
    }
    let loops = (iterations + max - 1) / max;
    (0..loops)
        .map(|i| {
            if i + 1 < loops || iterations % max == 0 {
                max
            } else {
                iterations % max
            }
        })
        .collect()
}

/// Source tokens needed for `iterations`, rounded to the precision of the unit cost
pub fn required_amount(route: &ConversionRoute, iterations: u64) -> f64 {
    let cost = route.cost_per_unit * iterations as f64 * route.mints_per_iteration as f64;
    round_to(cost, fraction_digits(route.cost_per_unit))
}

pub struct ConversionBatcher {
    wallet: Arc<WalletActions>,
    gas: Arc<GasOracle>,
    routes: Arc<RouteTable>,
    rapid_fee_limit: f64,
}

impl ConversionBatcher {
    pub fn new(
        wallet: Arc<WalletActions>,
        gas: Arc<GasOracle>,
        routes: Arc<RouteTable>,
        rapid_fee_limit: f64,
    ) -> Self {
        Self {
            wallet,
            gas,
            routes,
            rapid_fee_limit,
        }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Convert `source` through `contract` for `iterations` units.
    ///
    /// Unknown or disabled routes are returned as errors.
    pub async fn convert(
        &self,
        source: Address,
        contract: Address,
        target: Address,
        iterations: u64,
    ) -> ArbResult<ConversionOutcome> {
        let route = self.routes.route(contract, source, target)?;
        if iterations == 0 {
            return Ok(ConversionOutcome::Completed);
        }

        let tokens = self.wallet.tokens();
        let decimals = tokens.decimals(source).await?;
        let required = to_base_units(required_amount(route, iterations), decimals)?;
        let balance = self.wallet.token_balance(source).await?;
        if balance < required {
            error!(
                "Need {} more tokens to convert using {}",
                required - balance,
                route.label
            );
            return Ok(ConversionOutcome::Failed);
        }

        let supply = tokens.total_supply(source).await?;
        if !self
            .wallet
            .approve_if_needed(source, contract, required, supply)
            .await?
        {
            return Ok(ConversionOutcome::Failed);
        }

        for batch in plan_batches(iterations, route.max_iterations_per_call) {
            let outcome = match &route.call {
                ConversionCall::Batched { .. } => self.call_once(route, batch).await,
                ConversionCall::PerUnit { .. } => {
                    let mut outcome = ConversionOutcome::Completed;
                    for _ in 0..batch {
                        outcome = self.call_once(route, 1).await;
                        if outcome != ConversionOutcome::Completed {
                            break;
                        }
                    }
                    outcome
                }
            };
            if outcome != ConversionOutcome::Completed {
                return Ok(outcome);
            }
            crate::metrics::record_conversion(&route.label, batch);
        }

        Ok(ConversionOutcome::Completed)
    }

    /// Gas gate plus one broadcast of the route's call
    async fn call_once(&self, route: &ConversionRoute, iterations: u64) -> ConversionOutcome {
        if self.gas.exceeds(FeeTier::Rapid, self.rapid_fee_limit).await {
            warn!("Gas fees are too high");
            crate::metrics::record_gas_gate_skip("conversion");
            return ConversionOutcome::AbortedFees;
        }

        let tx = call_template(route.target_contract, route.call.calldata(iterations), U256::zero());
        match self.wallet.broadcaster().send(tx, true).await {
            Ok(outcome) if outcome.is_confirmed() => {
                info!(
                    "Called {} with {} iterations from {}",
                    route.call.signature(),
                    iterations,
                    route.label
                );
                ConversionOutcome::Completed
            }
            Ok(outcome) => {
                warn!(
                    "Failed to call {} with {} iterations from {}: {:?}",
                    route.call.signature(),
                    iterations,
                    route.label,
                    outcome
                );
                ConversionOutcome::Failed
            }
            Err(e) => {
                let message = e.to_string();
                error!("{}. Failed to convert using {}", describe(&message), route.label);
                ConversionOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{calls, MockChainClient};
    use crate::clock::ManualClock;
    use crate::gas::GasSampler;
    use crate::tx::actions::test_support::{actions, expect_broadcast_basics};
    use ethers::abi::{encode, Token};
    use ethers::types::{Bytes, Transaction, TransactionReceipt, H256, U64};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    const MULTI: &str = "0x81fcd03d2100a0fe9767c0cfc68050bdc6a2969d";
    const G5: &str = "0x2fc636e7fdf9f3e8d61033103052079781a6e7d2";
    const MATH: &str = "0xb680f0cc810317933f234f67eb6a9e923407f05d";
    const PI: &str = "0xa2262d7728c689526693ae893d0fd8a352c7073c";

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    fn routes() -> RouteTable {
        RouteTable::parse(&format!(
            r##"{{
                "{MULTI}": {{
                    "label": "Multi AFFECTION",
                    "max_iterations": 100,
                    "mints": 1,
                    "functions": {{
                        "{G5}": "multiMintG5(uint256)",
                        "{PI}": "multiMintPi()",
                        "{MATH}": "#multiMintMath"
                    }},
                    "costs": {{ "{G5}": 0.6, "{PI}": 0.01 }}
                }}
            }}"##
        ))
        .unwrap()
    }

    fn uint(value: U256) -> Bytes {
        encode(&[Token::Uint(value)]).into()
    }

    /// ERC20 reads: 18 decimals, the given balance, full allowance
    fn expect_token_reads(client: &mut MockChainClient, balance: U256) {
        client.expect_call().returning(move |_, data| {
            if data == calls::encode(calls::DECIMALS, &[]) {
                Ok(uint(U256::from(18u64)))
            } else if data[..4] == calls::balance_of(Address::zero())[..4] {
                Ok(uint(balance))
            } else if data == calls::encode(calls::NAME, &[]) || data == calls::encode(calls::SYMBOL, &[]) {
                Ok(encode(&[Token::String("G5".into())]).into())
            } else {
                Ok(uint(U256::MAX))
            }
        });
    }

    fn expect_pool_fee(client: &mut MockChainClient, gwei: u64) {
        client.expect_pending_pool().returning(move || {
            Ok(vec![Transaction {
                gas_price: Some(U256::from(gwei) * U256::exp10(9)),
                ..Default::default()
            }])
        });
    }

    /// Rapid fee per pool read, in order; the last value repeats
    fn expect_pool_fees(client: &mut MockChainClient, gwei: Vec<u64>) -> Arc<AtomicUsize> {
        let reads = Arc::new(AtomicUsize::new(0));
        let counter = reads.clone();
        client.expect_pending_pool().returning(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let fee = gwei[n.min(gwei.len() - 1)];
            Ok(vec![Transaction {
                gas_price: Some(U256::from(fee) * U256::exp10(9)),
                ..Default::default()
            }])
        });
        reads
    }

    /// Confirm every broadcast and keep the raw transactions in order
    fn record_sends(client: &mut MockChainClient) -> Arc<Mutex<Vec<Bytes>>> {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let log = sent.clone();
        client.expect_send_raw_transaction().returning(move |raw: Bytes| {
            log.lock().unwrap().push(raw);
            Ok(H256::zero())
        });
        client.expect_transaction_receipt().returning(|_| {
            Ok(Some(TransactionReceipt {
                status: Some(U64::from(1)),
                ..Default::default()
            }))
        });
        sent
    }

    fn carries(raw: &Bytes, calldata: &Bytes) -> bool {
        raw.windows(calldata.len()).any(|w| w == &calldata[..])
    }

    fn multi_mint_g5(iterations: u64) -> Bytes {
        calls::encode("multiMintG5(uint256)", &[Token::Uint(U256::from(iterations))])
    }

    fn batcher(client: MockChainClient, dir: &std::path::Path) -> ConversionBatcher {
        batcher_with_ttl(client, dir, Duration::from_secs(10))
    }

    /// Gas samples older than `ttl` are re-read from the pool
    fn batcher_with_ttl(client: MockChainClient, dir: &std::path::Path, ttl: Duration) -> ConversionBatcher {
        let clock = ManualClock::at_unix(1_700_000_000);
        let wallet = Arc::new(actions(client, clock.clone(), dir));
        let gas = Arc::new(GasOracle::new(
            GasSampler::Pool {
                client: wallet.client(),
            },
            dir.join("cache"),
            ttl,
            Duration::from_secs(60),
            clock,
        ));
        ConversionBatcher::new(wallet, gas, Arc::new(routes()), 450_000.0)
    }

    #[test]
    fn test_plan_batches() {
        assert_eq!(plan_batches(250, 100), vec![100, 100, 50]);
        assert_eq!(plan_batches(300, 100), vec![100, 100, 100]);
        assert_eq!(plan_batches(40, 100), vec![40]);
        assert!(plan_batches(0, 100).is_empty());
    }

    #[test]
    fn test_required_amount_rounds_to_cost_precision() {
        let table = routes();
        let route = table.route(addr(MULTI), addr(G5), Address::zero()).unwrap();
        // 0.6 * 3 is 1.7999999999999998 in floating point
        assert_eq!(required_amount(route, 3), 1.8);
    }

    #[tokio::test]
    async fn test_disabled_route_is_config_fault() {
        let dir = tempfile::tempdir().unwrap();
        let mut client = MockChainClient::new();
        client.expect_chain_id().return_const(369u64);
        let batcher = batcher(client, dir.path());

        let err = batcher
            .convert(addr(MATH), addr(MULTI), Address::zero(), 10)
            .await
            .unwrap_err();
        assert!(err.is_config_fault());
    }

    #[tokio::test]
    async fn test_insufficient_balance_fails_before_spending() {
        let dir = tempfile::tempdir().unwrap();
        let mut client = MockChainClient::new();
        client.expect_chain_id().return_const(369u64);
        expect_token_reads(&mut client, U256::exp10(18));
        client.expect_send_raw_transaction().never();

        let batcher = batcher(client, dir.path());
        let outcome = batcher
            .convert(addr(G5), addr(MULTI), Address::zero(), 10)
            .await
            .unwrap();
        assert_eq!(outcome, ConversionOutcome::Failed);
    }

    #[tokio::test]
    async fn test_fee_gate_aborts_before_first_batch() {
        let dir = tempfile::tempdir().unwrap();
        let mut client = MockChainClient::new();
        client.expect_chain_id().return_const(369u64);
        expect_token_reads(&mut client, U256::exp10(24));
        expect_pool_fee(&mut client, 900_000);
        client.expect_send_raw_transaction().never();

        let batcher = batcher(client, dir.path());
        let outcome = batcher
            .convert(addr(G5), addr(MULTI), Address::zero(), 250)
            .await
            .unwrap();
        assert_eq!(outcome, ConversionOutcome::AbortedFees);
    }

    #[tokio::test]
    async fn test_batches_broadcast_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut client = MockChainClient::new();
        expect_broadcast_basics(&mut client);
        expect_token_reads(&mut client, U256::exp10(24));
        expect_pool_fee(&mut client, 100);
        let sent = record_sends(&mut client);

        let batcher = batcher(client, dir.path());
        let outcome = batcher
            .convert(addr(G5), addr(MULTI), Address::zero(), 250)
            .await
            .unwrap();
        assert_eq!(outcome, ConversionOutcome::Completed);

        let sent = sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 3);
        assert!(carries(&sent[0], &multi_mint_g5(100)));
        assert!(carries(&sent[1], &multi_mint_g5(100)));
        assert!(carries(&sent[2], &multi_mint_g5(50)));
        assert!(!carries(&sent[2], &multi_mint_g5(100)));
    }

    #[tokio::test]
    async fn test_fee_spike_between_batches_keeps_confirmed_batch() {
        let dir = tempfile::tempdir().unwrap();
        let mut client = MockChainClient::new();
        expect_broadcast_basics(&mut client);
        expect_token_reads(&mut client, U256::exp10(24));
        let reads = expect_pool_fees(&mut client, vec![100, 900_000]);
        let sent = record_sends(&mut client);

        let batcher = batcher_with_ttl(client, dir.path(), Duration::ZERO);
        let outcome = batcher
            .convert(addr(G5), addr(MULTI), Address::zero(), 250)
            .await
            .unwrap();

        assert_eq!(outcome, ConversionOutcome::AbortedFees);
        let sent = sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert!(carries(&sent[0], &multi_mint_g5(100)));
        assert_eq!(reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_per_unit_route_calls_once_per_iteration() {
        let dir = tempfile::tempdir().unwrap();
        let mut client = MockChainClient::new();
        expect_broadcast_basics(&mut client);
        expect_token_reads(&mut client, U256::exp10(24));
        let reads = expect_pool_fees(&mut client, vec![100]);
        let sent = record_sends(&mut client);

        let batcher = batcher_with_ttl(client, dir.path(), Duration::ZERO);
        let outcome = batcher
            .convert(addr(PI), addr(MULTI), Address::zero(), 3)
            .await
            .unwrap();
        assert_eq!(outcome, ConversionOutcome::Completed);

        let call = calls::encode("multiMintPi()", &[]);
        let sent = sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|raw| carries(raw, &call)));
        // Gas gate before every single-unit call
        assert_eq!(reads.load(Ordering::SeqCst), 3);
    }
}
