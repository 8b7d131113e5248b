//! Wallet A: buys monitored tokens trading below the reference token

use super::decision::{buy_eligible, can_afford, percent_diff};
use super::{Context, Role};
use crate::config::{BuyerConfig, WalletRole};
use crate::error::ArbResult;
use crate::units::{from_base_units, to_base_units};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct Buyer {
    ctx: Arc<Context>,
    config: BuyerConfig,
}

impl Buyer {
    pub fn new(ctx: Arc<Context>, config: BuyerConfig) -> Self {
        Self { ctx, config }
    }

    async fn sample(&self, token: ethers::types::Address, label: &str) -> ArbResult<Option<f64>> {
        let rate = self
            .ctx
            .swaps
            .sample_rate(
                &self.config.router,
                token,
                self.ctx.wallet.wrapped_native(),
                self.ctx.attempts(),
            )
            .await?;
        match rate {
            Some(rate) => {
                let rate = from_base_units(rate, 0);
                info!("{} Rate: 1 = {} PLS", label, rate / 1e18);
                Ok(Some(rate))
            }
            None => {
                warn!("No {} rate from RPC", label);
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl Role for Buyer {
    fn role(&self) -> WalletRole {
        WalletRole::Buyer
    }

    fn loop_delay(&self) -> Duration {
        Duration::from_secs(self.config.loop_delay_secs)
    }

    async fn tick(&mut self) -> ArbResult<()> {
        let ctx = self.ctx.clone();
        let snapshots = ctx.snapshot(&[]).await?;
        let minter = ctx.settings.wallet_address(WalletRole::Minter);

        for target in &self.config.targets {
            ctx.forward_token(target.token, minter, false).await?;
        }

        let balance = ctx
            .rebalance(&snapshots, self.config.wallet_min_native, &self.config.rebalance)
            .await?;
        info!("PLS Balance: {:.15}", from_base_units(balance, 18));

        if ctx.fees_too_high(self.config.rapid_fee_limit_gwei, "buy").await {
            return Ok(());
        }

        let Some(reference) = self
            .sample(self.config.reference_token, &self.config.reference_label)
            .await?
        else {
            return Ok(());
        };
        let mut samples = Vec::with_capacity(self.config.targets.len());
        for target in &self.config.targets {
            samples.push(self.sample(target.token, &target.label).await?);
        }

        let floor = to_base_units(self.config.wallet_min_native, 18)?;
        let amount = to_base_units(self.config.buy_amount_native, 18)?;
        if balance < floor {
            warn!("PLS balance is below minimum");
            return Ok(());
        }
        if !can_afford(balance, amount, floor) {
            warn!("Buying would put the PLS balance below minimum");
            return Ok(());
        }

        let wpls = ctx.wallet.wrapped_native();
        for (target, sampled) in self.config.targets.iter().zip(samples) {
            let Some(sampled) = sampled else { continue };
            let diff = percent_diff(sampled, reference);
            if !buy_eligible(diff, target.threshold_percent) {
                continue;
            }

            info!("Buying {} ({:.2}% below {})...", target.label, diff.abs(), self.config.reference_label);
            let quote = ctx
                .swaps
                .estimate(&self.config.router, &[wpls, target.token], amount, ctx.attempts())
                .await?;
            let Some(quote) = quote else {
                warn!("No estimated swap result from RPC");
                continue;
            };

            match ctx
                .swaps
                .swap(&self.config.router, &quote, self.config.slippage_percent, false)
                .await
            {
                Ok(outcome) if outcome.is_confirmed() => {
                    info!("Swapped {} PLS to {}", self.config.buy_amount_native, target.label)
                }
                Ok(_) => warn!("Swap of PLS to {} did not confirm", target.label),
                Err(e) if e.is_config_fault() => return Err(e),
                Err(e) => warn!("Swap of PLS to {} failed: {}", target.label, e),
            }
        }

        Ok(())
    }
}
