//! Router quotes and slippage-bounded swaps against a Uniswap-v2 style router

use crate::chain::{calls, SharedClient};
use crate::clock::SharedClock;
use crate::error::{ArbError, ArbResult};
use crate::retry::retry_fixed;
use crate::tx::{BroadcastOutcome, WalletActions};
use crate::units::one_token;

use chrono::{DateTime, Utc};
use ethers::abi::Token;
use ethers::types::{Address, Bytes, Eip1559TransactionRequest, I256, U256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Seconds a swap stays valid after it is built
pub const SWAP_DEADLINE_SECS: u64 = 180;

/// A router quote; only meaningful for the tick it was taken in
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub path: Vec<Address>,
    pub amount_in: U256,
    pub amount_out: U256,
    pub sampled_at: DateTime<Utc>,
}

impl Quote {
    pub fn token_in(&self) -> Address {
        self.path[0]
    }

    pub fn token_out(&self) -> Address {
        self.path[self.path.len() - 1]
    }
}

/// Router entry point chosen from where the wrapped native token sits in the path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapShape {
    /// Path ends in wrapped native: `swapExactTokensForETH`
    SellForNative,
    /// Path starts with wrapped native: `swapExactETHForTokens`, paid with value
    BuyWithNative,
    /// Anything else: `swapExactTokensForTokens`
    TokenToToken,
}

impl SwapShape {
    pub fn select(path: &[Address], wrapped_native: Address) -> Self {
        if path.last() == Some(&wrapped_native) {
            SwapShape::SellForNative
        } else if path.first() == Some(&wrapped_native) {
            SwapShape::BuyWithNative
        } else {
            SwapShape::TokenToToken
        }
    }

    fn label(self) -> &'static str {
        match self {
            SwapShape::SellForNative => "sell",
            SwapShape::BuyWithNative => "buy",
            SwapShape::TokenToToken => "token",
        }
    }
}

/// Minimum acceptable output for a quote.
///
/// Selling for native subtracts `slippage_percent` percent of the output, rounded.
/// Buying with native accepts any output. Token-to-token subtracts the output multiplied
/// by `slippage_percent` itself, so any slippage above 1 yields a negative bound.
pub fn min_amount_out(shape: SwapShape, amount_out: U256, slippage_percent: f64) -> I256 {
    let bps = U256::from((slippage_percent * 100.0).round().max(0.0) as u64);
    let out = I256::from_raw(amount_out);
    match shape {
        SwapShape::SellForNative => {
            let slip = (amount_out * bps + U256::from(5_000u64)) / U256::from(10_000u64);
            out - I256::from_raw(slip)
        }
        SwapShape::BuyWithNative => I256::zero(),
        SwapShape::TokenToToken => out - I256::from_raw(amount_out * bps / U256::from(100u64)),
    }
}

/// `uint256` bound for the wire; negative bounds become 0
pub fn wire_min_out(min_out: I256) -> U256 {
    if min_out.is_negative() {
        warn!("Minimum output {} is negative, submitting 0", min_out);
        U256::zero()
    } else {
        min_out.into_raw()
    }
}

/// Router calldata for one swap
pub fn swap_calldata(
    shape: SwapShape,
    quote: &Quote,
    min_out: U256,
    recipient: Address,
    deadline: u64,
    taxed: bool,
) -> Bytes {
    let path = calls::path_token(&quote.path);
    let tail = [path, Token::Address(recipient), Token::Uint(U256::from(deadline))];

    match shape {
        SwapShape::SellForNative => {
            let mut args = vec![Token::Uint(quote.amount_in), Token::Uint(min_out)];
            args.extend(tail);
            calls::encode(calls::SWAP_EXACT_TOKENS_FOR_ETH, &args)
        }
        SwapShape::BuyWithNative => {
            let signature = if taxed {
                calls::SWAP_EXACT_ETH_FOR_TOKENS_TAXED
            } else {
                calls::SWAP_EXACT_ETH_FOR_TOKENS
            };
            let mut args = vec![Token::Uint(min_out)];
            args.extend(tail);
            calls::encode(signature, &args)
        }
        SwapShape::TokenToToken => {
            let signature = if taxed {
                calls::SWAP_EXACT_TOKENS_FOR_TOKENS_TAXED
            } else {
                calls::SWAP_EXACT_TOKENS_FOR_TOKENS
            };
            let mut args = vec![Token::Uint(quote.amount_in), Token::Uint(min_out)];
            args.extend(tail);
            calls::encode(signature, &args)
        }
    }
}

pub struct SwapEstimator {
    client: SharedClient,
    clock: SharedClock,
    wallet: Arc<WalletActions>,
    routers: HashMap<String, Address>,
    retry_delay: Duration,
}

impl SwapEstimator {
    pub fn new(
        client: SharedClient,
        clock: SharedClock,
        wallet: Arc<WalletActions>,
        routers: HashMap<String, Address>,
        retry_delay: Duration,
    ) -> Self {
        Self {
            client,
            clock,
            wallet,
            routers,
            retry_delay,
        }
    }

    pub fn router(&self, name: &str) -> ArbResult<Address> {
        self.routers
            .get(name)
            .copied()
            .ok_or_else(|| ArbError::UnknownRouter(name.to_string()))
    }

    /// Quote `amount_in` along `path`; `None` once every attempt failed
    pub async fn estimate(
        &self,
        router: &str,
        path: &[Address],
        amount_in: U256,
        attempts: u32,
    ) -> ArbResult<Option<Quote>> {
        let router = self.router(router)?;
        if path.len() < 2 {
            return Err(ArbError::InvalidRoute(format!("path of {} hops", path.len())));
        }

        let result = retry_fixed(self.clock.as_ref(), attempts, self.retry_delay, |attempt| async move {
            let data = self
                .client
                .call(router, calls::get_amounts_out(amount_in, path))
                .await?;
            let amounts = calls::decode_uint_array(&data)?;
            if amounts.len() != path.len() {
                return Err(ArbError::Decode(format!(
                    "getAmountsOut returned {} amounts for {} hops (attempt {})",
                    amounts.len(),
                    path.len(),
                    attempt
                )));
            }
            Ok(amounts[amounts.len() - 1])
        })
        .await;

        match result {
            Ok(amount_out) => Ok(Some(Quote {
                path: path.to_vec(),
                amount_in,
                amount_out,
                sampled_at: self.clock.now(),
            })),
            Err(e) => {
                debug!("No quote for {:?} after {} attempts: {}", path, attempts, e);
                Ok(None)
            }
        }
    }

    /// Output for exactly one whole `token` in `quote_token` base units
    pub async fn sample_rate(
        &self,
        router: &str,
        token: Address,
        quote_token: Address,
        attempts: u32,
    ) -> ArbResult<Option<U256>> {
        let decimals = self.wallet.tokens().decimals(token).await?;
        let quote = self
            .estimate(router, &[token, quote_token], one_token(decimals), attempts)
            .await?;
        Ok(quote.map(|q| q.amount_out))
    }

    /// Execute a quoted swap to the signer's own address
    pub async fn swap(
        &self,
        router: &str,
        quote: &Quote,
        slippage_percent: f64,
        taxed: bool,
    ) -> ArbResult<BroadcastOutcome> {
        let router_address = self.router(router)?;
        if quote.path.len() < 2 {
            return Err(ArbError::InvalidRoute(format!("path of {} hops", quote.path.len())));
        }

        let shape = SwapShape::select(&quote.path, self.wallet.wrapped_native());
        if shape != SwapShape::BuyWithNative {
            let approved = self
                .wallet
                .approve_if_needed(quote.token_in(), router_address, quote.amount_in, quote.amount_in)
                .await?;
            if !approved {
                warn!("Router allowance for {:?} unavailable, skipping swap", quote.token_in());
                crate::metrics::record_swap(shape.label(), false);
                return Ok(BroadcastOutcome::Exhausted);
            }
        }

        let min_out = wire_min_out(min_amount_out(shape, quote.amount_out, slippage_percent));
        let deadline = self.clock.unix_time() + SWAP_DEADLINE_SECS;
        let data = swap_calldata(shape, quote, min_out, self.wallet.address(), deadline, taxed);
        let value = match shape {
            SwapShape::BuyWithNative => quote.amount_in,
            _ => U256::zero(),
        };

        debug!(
            "Swap {:?}: in {} quoted out {} min out {} deadline {}",
            shape, quote.amount_in, quote.amount_out, min_out, deadline
        );
        let tx = Eip1559TransactionRequest::new()
            .to(router_address)
            .data(data)
            .value(value)
            .into();
        let outcome = self.wallet.broadcaster().send(tx, true).await?;

        crate::metrics::record_swap(shape.label(), outcome.is_confirmed());
        if outcome.is_confirmed() {
            info!("Swapped {} of {:?} on {}", quote.amount_in, quote.token_in(), router);
        } else {
            warn!("Swap on {} did not confirm: {:?}", router, outcome);
        }
        Ok(outcome)
    }
}
