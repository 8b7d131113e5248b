//! Wallet C: sells the reference token into price spikes and recycles native surplus

use super::decision::{sell_chunks, sell_eligible, split_surplus, WalletBalanceSnapshot};
use super::{Context, Role};
use crate::config::{SellerConfig, WalletRole};
use crate::error::ArbResult;
use crate::tx::describe;
use crate::units::{from_base_units, one_token, to_base_units};

use async_trait::async_trait;
use ethers::types::{Address, U256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Surplus transfers are rounded to 0.01 native
const SURPLUS_GRANULARITY: u64 = 10_000_000_000_000_000;

pub struct Seller {
    ctx: Arc<Context>,
    config: SellerConfig,
    /// Reference price seen on the previous tick
    last_sample: Option<f64>,
}

impl Seller {
    pub fn new(ctx: Arc<Context>, config: SellerConfig) -> Self {
        Self {
            ctx,
            config,
            last_sample: None,
        }
    }

    async fn sample(&self) -> ArbResult<Option<f64>> {
        let rate = self
            .ctx
            .swaps
            .sample_rate(
                &self.config.router,
                self.config.reference_token,
                self.ctx.wallet.wrapped_native(),
                self.ctx.attempts(),
            )
            .await?;
        Ok(rate.map(|rate| from_base_units(rate, 0)))
    }

    /// Send native above the floor back: a quarter to the minter, the rest to the buyer.
    /// Confirmed transfers are booked into `snapshots` so later decisions this tick see them.
    async fn distribute_surplus(&self, snapshots: &mut [(WalletRole, WalletBalanceSnapshot)]) -> ArbResult<U256> {
        let balance = native_balance(snapshots, WalletRole::Seller).map_or(U256::zero(), |b| *b);
        let floor = to_base_units(self.config.wallet_min_native, 18)?;
        let Some((to_minter, to_buyer)) = split_surplus(balance, floor, U256::from(SURPLUS_GRANULARITY)) else {
            return Ok(balance);
        };

        let mut remaining = balance;
        for (role, amount) in [(WalletRole::Buyer, to_buyer), (WalletRole::Minter, to_minter)] {
            if amount.is_zero() {
                continue;
            }
            let to = self.ctx.settings.wallet_address(role);
            let human = from_base_units(amount, 18);
            match self.ctx.wallet.send_native(to, amount).await {
                Ok(outcome) if outcome.is_confirmed() => {
                    remaining = remaining.saturating_sub(amount);
                    if let Some(received) = native_balance(snapshots, role) {
                        *received += amount;
                    }
                    info!("Sent {} PLS to {:?}", human, to);
                }
                Ok(_) => warn!("Failed to send {} PLS to {:?}", human, to),
                Err(e) => error!("{}. Failed to send {} PLS to {:?}", describe(&e.to_string()), human, to),
            }
        }

        if let Some(own) = native_balance(snapshots, WalletRole::Seller) {
            *own = remaining;
        }
        Ok(remaining)
    }

    /// Sell `balance` in chunks while the price stays above `last`
    async fn sell(&self, balance: U256, decimals: u8, last: f64) -> ArbResult<()> {
        let ctx = &self.ctx;
        let label = &self.config.reference_label;
        let unit = one_token(decimals);
        let chunk = to_base_units(self.config.sell_chunk, decimals)?;
        let chunks = sell_chunks(balance, chunk, unit);
        let path: [Address; 2] = [self.config.reference_token, ctx.wallet.wrapped_native()];

        let total = chunks.iter().fold(U256::zero(), |acc, c| acc + *c);
        info!("Selling {} {}...", from_base_units(total, decimals), label);

        for (i, amount) in chunks.iter().enumerate() {
            let quote = ctx
                .swaps
                .estimate(&self.config.router, &path, *amount, ctx.attempts())
                .await?;
            let Some(quote) = quote else {
                warn!("No estimated swap result from RPC");
                break;
            };

            match ctx
                .swaps
                .swap(&self.config.router, &quote, self.config.slippage_percent, false)
                .await
            {
                Ok(outcome) if outcome.is_confirmed() => {
                    info!("Swapped {} {} to PLS", from_base_units(*amount, decimals), label)
                }
                Ok(_) => warn!("Swap of {} to PLS did not confirm", label),
                Err(e) if e.is_config_fault() => return Err(e),
                Err(e) => warn!("Swap of {} to PLS failed: {}", label, e),
            }

            if i + 1 == chunks.len() {
                break;
            }
            info!("Waiting for {} seconds...", self.config.sell_delay_secs);
            ctx.clock.sleep(Duration::from_secs(self.config.sell_delay_secs)).await;

            if ctx.fees_too_high(self.config.rapid_fee_limit_gwei, "sell").await {
                break;
            }
            match self.sample().await? {
                Some(current) if sell_eligible(current, last, self.config.sell_threshold_percent) => {}
                Some(_) => {
                    info!("{} is no longer within range to sell", label);
                    break;
                }
                None => {
                    warn!("No {} rate from RPC", label);
                    break;
                }
            }
        }
        Ok(())
    }
}

fn native_balance(snapshots: &mut [(WalletRole, WalletBalanceSnapshot)], role: WalletRole) -> Option<&mut U256> {
    snapshots
        .iter_mut()
        .find(|(r, _)| *r == role)
        .map(|(_, s)| &mut s.native_balance)
}

#[async_trait]
impl Role for Seller {
    fn role(&self) -> WalletRole {
        WalletRole::Seller
    }

    fn loop_delay(&self) -> Duration {
        Duration::from_secs(self.config.loop_delay_secs)
    }

    async fn tick(&mut self) -> ArbResult<()> {
        let ctx = self.ctx.clone();
        let reference = self.config.reference_token;
        let mut snapshots = ctx.snapshot(&[reference]).await?;
        let own = snapshots
            .iter()
            .find(|(role, _)| *role == WalletRole::Seller)
            .map(|(_, s)| s.clone())
            .unwrap_or_default();
        info!("PLS Balance: {:.15}", from_base_units(own.native_balance, 18));

        self.distribute_surplus(&mut snapshots).await?;
        ctx.rebalance(&snapshots, self.config.wallet_min_native, &self.config.rebalance)
            .await?;

        if ctx.fees_too_high(self.config.rapid_fee_limit_gwei, "sell").await {
            return Ok(());
        }

        let label = self.config.reference_label.clone();
        let Some(current) = self.sample().await? else {
            warn!("No {} rate from RPC", label);
            return Ok(());
        };
        let last = self.last_sample.unwrap_or(current);
        info!("{} Rate: 1 = {} PLS", label, current / 1e18);

        let decimals = ctx.wallet.tokens().decimals(reference).await?;
        let balance = own.token_balances.get(&reference).copied().unwrap_or_default();
        info!("{} Balance: {:.15}", label, from_base_units(balance, decimals));

        if balance > one_token(decimals) {
            let threshold = self.config.sell_threshold_percent;
            if threshold == 0.0 || current > last {
                if sell_eligible(current, last, threshold) {
                    self.sell(balance, decimals, last).await?;
                } else {
                    info!("{} is not within range to sell yet ({}%)", label, threshold);
                }
            } else {
                info!("{} price hasn't increased yet", label);
            }
        }

        self.last_sample = Some(current);
        Ok(())
    }
}
