//! Per-tick control loop for the three wallet roles
//!
//! Each process runs one role. A tick reads balances, rebalances native currency
//! toward dependent wallets, checks the gas gate and then trades. Nothing but the
//! seller's last price sample survives between ticks.

pub mod buyer;
pub mod decision;
pub mod minter;
pub mod seller;

pub use buyer::Buyer;
pub use minter::Minter;
pub use seller::Seller;

use crate::clock::SharedClock;
use crate::config::{RebalanceTarget, Settings, WalletRole};
use crate::error::{ArbError, ArbResult};
use crate::gas::{FeeTier, GasOracle};
use crate::swap::{ConversionBatcher, SwapEstimator};
use crate::tx::{describe, WalletActions};
use crate::units::{from_base_units, one_token, to_base_units};
use decision::{plan_rebalance, Dependent, RebalanceStep, WalletBalanceSnapshot};

use async_trait::async_trait;
use ethers::types::{Address, U256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Shared collaborators, built once at startup
pub struct Context {
    pub settings: Settings,
    pub clock: SharedClock,
    pub gas: Arc<GasOracle>,
    pub wallet: Arc<WalletActions>,
    pub swaps: Arc<SwapEstimator>,
    pub batcher: Arc<ConversionBatcher>,
}

impl Context {
    pub fn attempts(&self) -> u32 {
        self.settings.bot.attempts
    }

    /// Native balances of all three wallets, plus this wallet's balance of each of `tokens`
    pub async fn snapshot(&self, tokens: &[Address]) -> ArbResult<Vec<(WalletRole, WalletBalanceSnapshot)>> {
        let own = self.wallet.address();
        let mut snapshots = Vec::with_capacity(3);
        for role in [WalletRole::Buyer, WalletRole::Minter, WalletRole::Seller] {
            let address = self.settings.wallet_address(role);
            let native_balance = self.wallet.native_balance(address).await?;
            crate::metrics::record_native_balance(&role.to_string(), from_base_units(native_balance, 18));

            let mut token_balances = HashMap::new();
            if address == own {
                for token in tokens {
                    token_balances.insert(*token, self.wallet.token_balance(*token).await?);
                }
            }
            snapshots.push((
                role,
                WalletBalanceSnapshot {
                    address,
                    native_balance,
                    token_balances,
                },
            ));
        }
        Ok(snapshots)
    }

    /// True when trading should be skipped this tick
    pub async fn fees_too_high(&self, ceiling_gwei: f64, operation: &str) -> bool {
        if self.gas.exceeds(FeeTier::Rapid, ceiling_gwei).await {
            warn!("Gas fees are too high");
            crate::metrics::record_gas_gate_skip(operation);
            return true;
        }
        false
    }

    /// Top up dependent wallets below their floor. Returns the source balance left
    /// after confirmed transfers.
    pub async fn rebalance(
        &self,
        snapshots: &[(WalletRole, WalletBalanceSnapshot)],
        own_floor: f64,
        targets: &[RebalanceTarget],
    ) -> ArbResult<U256> {
        let own = self.wallet.address();
        let balance_of = |address: Address| {
            snapshots
                .iter()
                .find(|(_, s)| s.address == address)
                .map(|(_, s)| s.native_balance)
                .unwrap_or_default()
        };

        let mut remaining = balance_of(own);
        let mut dependents = Vec::with_capacity(targets.len());
        for target in targets {
            let address = self.settings.wallet_address(target.wallet);
            dependents.push(Dependent {
                address,
                balance: balance_of(address),
                floor: to_base_units(target.floor, 18)?,
            });
        }

        for step in plan_rebalance(remaining, to_base_units(own_floor, 18)?, &dependents) {
            match step {
                RebalanceStep::Send { to, amount } => {
                    let human = from_base_units(amount, 18);
                    match self.wallet.send_native(to, amount).await {
                        Ok(outcome) if outcome.is_confirmed() => {
                            remaining -= amount;
                            info!("Sent {} native to {:?}", human, to);
                        }
                        Ok(outcome) => warn!("Failed to send {} native to {:?}: {:?}", human, to, outcome),
                        Err(e) => error!("{}. Could not send to {:?}", describe(&e.to_string()), to),
                    }
                }
                RebalanceStep::Skip { to, shortfall } => {
                    info!(
                        "Skipping top-up of {} native to {:?}: would leave this wallet below its floor",
                        from_base_units(shortfall, 18),
                        to
                    );
                }
            }
        }

        Ok(remaining)
    }

    /// Forward this wallet's `token` balance to `to` once it holds more than one token.
    /// With `whole_units` the fractional part stays behind.
    pub async fn forward_token(&self, token: Address, to: Address, whole_units: bool) -> ArbResult<()> {
        let tokens = self.wallet.tokens();
        let decimals = tokens.decimals(token).await?;
        let unit = one_token(decimals);
        let balance = self.wallet.token_balance(token).await?;
        let amount = if whole_units { balance - balance % unit } else { balance };
        let label = tokens.label(token).await;
        info!("{} Balance: {:.15}", label, from_base_units(balance, decimals));
        if amount <= unit {
            return Ok(());
        }

        match self.wallet.send_token(token, to, amount).await {
            Ok(outcome) if outcome.is_confirmed() => {
                info!("Sent {} {} to {:?}", from_base_units(amount, decimals), label, to)
            }
            Ok(outcome) => warn!("Failed to send {} to {:?}: {:?}", label, to, outcome),
            Err(e) => error!("{}. Could not send {} to {:?}", describe(&e.to_string()), label, to),
        }
        Ok(())
    }
}

/// One wallet's behaviour
#[async_trait]
pub trait Role: Send {
    fn role(&self) -> WalletRole;

    /// Delay between ticks
    fn loop_delay(&self) -> Duration;

    async fn tick(&mut self) -> ArbResult<()>;
}

/// Drives a role forever, one tick at a time
pub struct Scheduler {
    role: Box<dyn Role>,
    clock: SharedClock,
    shutdown: Arc<RwLock<bool>>,
}

impl Scheduler {
    pub fn new(role: Box<dyn Role>, clock: SharedClock) -> Self {
        Self {
            role,
            clock,
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    /// Flag that stops the loop before its next tick
    pub fn shutdown_handle(&self) -> Arc<RwLock<bool>> {
        self.shutdown.clone()
    }

    /// Run until shutdown or a configuration fault
    pub async fn run(&mut self) -> ArbResult<()> {
        self.run_ticks(None).await
    }

    /// Run at most `limit` ticks
    pub async fn run_ticks(&mut self, limit: Option<u64>) -> ArbResult<()> {
        let name = self.role.role().to_string();
        let delay = self.role.loop_delay();
        info!("{} loop started", name);

        let mut ticks = 0u64;
        loop {
            if *self.shutdown.read().await {
                break;
            }
            if limit.map_or(false, |limit| ticks >= limit) {
                break;
            }

            match self.role.tick().await {
                Ok(()) => crate::metrics::record_tick(&name),
                Err(e) if e.is_config_fault() => {
                    error!("Configuration fault, stopping {}: {}", name, e);
                    return Err(e);
                }
                Err(e) if e.is_retryable() => warn!("Tick interrupted, retrying next tick: {}", e),
                Err(e) => error!("Tick failed: {}", e),
            }
            ticks += 1;

            if !delay.is_zero() {
                info!("Waiting for {} seconds...", delay.as_secs());
                self.clock.sleep(delay).await;
            }
            info!("{}", "-".repeat(50));
        }

        info!("{} loop stopped", name);
        Ok(())
    }

    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
    }
}

/// Build the role selected in configuration
pub fn build_role(ctx: Arc<Context>) -> ArbResult<Box<dyn Role>> {
    let missing = |section: &str| ArbError::Config(format!("Missing [{}] section", section));
    Ok(match ctx.settings.bot.role {
        WalletRole::Buyer => {
            let config = ctx.settings.buyer.clone().ok_or_else(|| missing("buyer"))?;
            Box::new(Buyer::new(ctx, config))
        }
        WalletRole::Minter => {
            let config = ctx.settings.minter.clone().ok_or_else(|| missing("minter"))?;
            Box::new(Minter::new(ctx, config))
        }
        WalletRole::Seller => {
            let config = ctx.settings.seller.clone().ok_or_else(|| missing("seller"))?;
            Box::new(Seller::new(ctx, config))
        }
    })
}


#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::chain::{calls, MockChainClient};
    use crate::config::SAMPLE_CONFIG;
    use crate::gas::GasSampler;
    use crate::registry::RouteTable;
    use crate::tx::actions::test_support::{actions, TEST_KEY};
    use ethers::abi::{decode, encode, ParamType, Token};
    use ethers::signers::{LocalWallet, Signer};
    use ethers::types::{Bytes, Transaction, TransactionReceipt, H256, U64};
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;

    pub fn units(n: u64) -> U256 {
        U256::from(n) * U256::exp10(18)
    }

    pub fn wpls() -> Address {
        Address::repeat_byte(0xa1)
    }

    pub fn signer_address() -> Address {
        TEST_KEY.parse::<LocalWallet>().unwrap().address()
    }

    /// Sample settings with `role` running on the test signer
    pub fn settings(role: WalletRole) -> Settings {
        let mut settings = Settings::parse(SAMPLE_CONFIG).unwrap();
        settings.bot.role = role;
        match role {
            WalletRole::Buyer => settings.wallets.buyer = signer_address(),
            WalletRole::Minter => settings.wallets.minter = signer_address(),
            WalletRole::Seller => settings.wallets.seller = signer_address(),
        }
        settings
    }

    /// Read-only chain state served by the mock
    #[derive(Debug, Clone, Default)]
    pub struct Market {
        /// Token balances of the signer
        pub balances: HashMap<Address, U256>,
        /// Router output keyed by (token in, token out), independent of the input amount
        pub rates: HashMap<(Address, Address), U256>,
        pub native: HashMap<Address, U256>,
    }

    impl Market {
        fn respond(&self, to: Address, data: &Bytes) -> ArbResult<Bytes> {
            let is = |signature: &str| data.len() >= 4 && data[..4] == ethers::utils::id(signature)[..];
            let uint = |value: U256| -> Bytes { encode(&[Token::Uint(value)]).into() };

            if is(calls::DECIMALS) {
                Ok(uint(U256::from(18u64)))
            } else if is(calls::NAME) || is(calls::SYMBOL) {
                Ok(encode(&[Token::String("TKN".into())]).into())
            } else if is(calls::BALANCE_OF) {
                Ok(uint(self.balances.get(&to).copied().unwrap_or_default()))
            } else if is(calls::ALLOWANCE) {
                Ok(uint(U256::MAX))
            } else if is(calls::TOTAL_SUPPLY) {
                Ok(uint(U256::exp10(30)))
            } else if is(calls::GET_AMOUNTS_OUT) {
                let args = decode(
                    &[ParamType::Uint(256), ParamType::Array(Box::new(ParamType::Address))],
                    &data[4..],
                )
                .map_err(|e| ArbError::Decode(e.to_string()))?;
                let amount_in = args[0].clone().into_uint().unwrap_or_default();
                let path: Vec<Address> = args[1]
                    .clone()
                    .into_array()
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(Token::into_address)
                    .collect();
                let out = self
                    .rates
                    .get(&(path[0], path[path.len() - 1]))
                    .copied()
                    .ok_or_else(|| ArbError::Contract {
                        contract: format!("{:?}", to),
                        message: "execution reverted".to_string(),
                    })?;
                Ok(encode(&[Token::Array(vec![Token::Uint(amount_in), Token::Uint(out)])]).into())
            } else {
                Err(ArbError::Contract {
                    contract: format!("{:?}", to),
                    message: "unexpected call".to_string(),
                })
            }
        }
    }

    /// Serve `market` for reads and the pool fee for the gas gate
    pub fn expect_market(client: &mut MockChainClient, market: Market, fee_gwei: u64) {
        let reads = market.clone();
        client.expect_call().returning(move |to, data| reads.respond(to, &data));
        client
            .expect_native_balance()
            .returning(move |address| Ok(market.native.get(&address).copied().unwrap_or_default()));
        client.expect_pending_pool().returning(move || {
            Ok(vec![Transaction {
                gas_price: Some(U256::from(fee_gwei) * U256::exp10(9)),
                ..Default::default()
            }])
        });
    }

    /// Confirm every broadcast and record the raw transactions
    pub fn record_sends(client: &mut MockChainClient) -> Arc<Mutex<Vec<Bytes>>> {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let log = sent.clone();
        client.expect_send_raw_transaction().returning(move |raw| {
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

    /// Whether a signed transaction carries calldata for `signature`
    pub fn calls_function(raw: &Bytes, signature: &str) -> bool {
        let selector = ethers::utils::id(signature);
        raw.windows(4).any(|window| window == selector)
    }

    pub fn context(
        client: MockChainClient,
        settings: Settings,
        routes: RouteTable,
        dir: &Path,
        clock: SharedClock,
    ) -> Arc<Context> {
        let wallet = Arc::new(actions(client, clock.clone(), dir));
        let client = wallet.client();
        let gas = Arc::new(GasOracle::new(
            GasSampler::Pool { client: client.clone() },
            dir.join("cache"),
            Duration::from_secs(10),
            Duration::from_secs(60),
            clock.clone(),
        ));
        let swaps = Arc::new(SwapEstimator::new(
            client.clone(),
            clock.clone(),
            wallet.clone(),
            settings.routers.clone(),
            Duration::from_secs(1),
        ));
        let batcher = Arc::new(ConversionBatcher::new(
            wallet.clone(),
            gas.clone(),
            Arc::new(routes),
            450_000.0,
        ));
        Arc::new(Context {
            settings,
            clock,
            gas,
            wallet,
            swaps,
            batcher,
        })
    }
}
