//! Wallet B: converts bought tokens into the reference token and hands it to the seller

use super::{Context, Role};
use crate::config::{ConversionJob, MinterConfig, WalletRole};
use crate::error::ArbResult;
use crate::swap::ConversionOutcome;
use crate::units::{from_base_units, to_base_units};

use async_trait::async_trait;
use ethers::types::U256;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct Minter {
    ctx: Arc<Context>,
    config: MinterConfig,
}

impl Minter {
    pub fn new(ctx: Arc<Context>, config: MinterConfig) -> Self {
        Self { ctx, config }
    }

    async fn forward_reference(&self) -> ArbResult<()> {
        let seller = self.ctx.settings.wallet_address(WalletRole::Seller);
        self.ctx
            .forward_token(self.config.reference_token, seller, true)
            .await
    }

    /// Whole units of `job.source` this wallet can convert right now
    async fn iterations(&self, job: &ConversionJob) -> ArbResult<u64> {
        let route = self.ctx.batcher.routes().route(job.multi, job.source, job.target)?;
        let tokens = self.ctx.wallet.tokens();
        let decimals = tokens.decimals(job.source).await?;
        let unit = to_base_units(route.unit_cost(), decimals)?;
        if unit.is_zero() {
            return Ok(0);
        }
        let balance = self.ctx.wallet.token_balance(job.source).await?;
        info!("{} Balance: {:.15}", tokens.label(job.source).await, from_base_units(balance, decimals));
        Ok((balance / unit).min(U256::from(u64::MAX)).as_u64())
    }
}

#[async_trait]
impl Role for Minter {
    fn role(&self) -> WalletRole {
        WalletRole::Minter
    }

    fn loop_delay(&self) -> Duration {
        Duration::from_secs(self.config.loop_delay_secs)
    }

    async fn tick(&mut self) -> ArbResult<()> {
        let ctx = self.ctx.clone();
        let snapshots = ctx.snapshot(&[]).await?;
        self.forward_reference().await?;

        let balance = ctx
            .rebalance(&snapshots, self.config.wallet_min_native, &self.config.rebalance)
            .await?;
        info!("PLS Balance: {:.15}", from_base_units(balance, 18));

        if ctx.fees_too_high(self.config.rapid_fee_limit_gwei, "conversion").await {
            return Ok(());
        }
        if balance < to_base_units(self.config.wallet_min_native, 18)? {
            info!("PLS balance is below minimum threshold");
            return Ok(());
        }

        for job in &self.config.jobs {
            let iterations = self.iterations(job).await?;
            if iterations == 0 {
                continue;
            }

            info!("Converting {} iterations to {}...", iterations, job.label);
            match ctx.batcher.convert(job.source, job.multi, job.target, iterations).await? {
                ConversionOutcome::Completed => info!("Converted {} iterations to {}", iterations, job.label),
                ConversionOutcome::Failed => warn!("Conversion to {} failed", job.label),
                ConversionOutcome::AbortedFees => {
                    warn!("Conversion to {} stopped by gas fees", job.label);
                    break;
                }
            }

            if job.target == self.config.reference_token {
                self.forward_reference().await?;
            }
        }

        Ok(())
    }
}
