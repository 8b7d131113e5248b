//! Simple wallet operations built on the broadcaster

use super::sender::{BroadcastOutcome, TransactionBroadcaster};
use crate::chain::{calls, SharedClient};
use crate::error::ArbResult;
use crate::registry::TokenRegistry;

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Eip1559TransactionRequest, U256};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Transfers, approvals and native wrapping for one signer
pub struct WalletActions {
    client: SharedClient,
    broadcaster: Arc<TransactionBroadcaster>,
    tokens: Arc<TokenRegistry>,
    wrapped_native: Address,
}

pub fn call_template(to: Address, data: Bytes, value: U256) -> TypedTransaction {
    Eip1559TransactionRequest::new()
        .to(to)
        .data(data)
        .value(value)
        .into()
}

impl WalletActions {
    pub fn new(
        client: SharedClient,
        broadcaster: Arc<TransactionBroadcaster>,
        tokens: Arc<TokenRegistry>,
        wrapped_native: Address,
    ) -> Self {
        Self {
            client,
            broadcaster,
            tokens,
            wrapped_native,
        }
    }

    pub fn address(&self) -> Address {
        self.broadcaster.address()
    }

    pub fn client(&self) -> SharedClient {
        self.client.clone()
    }

    pub fn broadcaster(&self) -> &TransactionBroadcaster {
        &self.broadcaster
    }

    pub fn tokens(&self) -> &TokenRegistry {
        &self.tokens
    }

    pub fn wrapped_native(&self) -> Address {
        self.wrapped_native
    }

    pub async fn native_balance(&self, address: Address) -> ArbResult<U256> {
        self.client.native_balance(address).await
    }

    pub async fn token_balance(&self, token: Address) -> ArbResult<U256> {
        self.tokens.balance_of(token, self.address()).await
    }

    /// Plain value transfer, priced with the median fee strategy
    pub async fn send_native(&self, to: Address, amount: U256) -> ArbResult<BroadcastOutcome> {
        let tx: TypedTransaction = Eip1559TransactionRequest::new()
            .to(to)
            .value(amount)
            .into();
        let outcome = self.broadcaster.send(tx, false).await?;
        debug!("Native transfer of {} to {:?}: {:?}", amount, to, outcome.is_confirmed());
        Ok(outcome)
    }

    pub async fn send_token(&self, token: Address, to: Address, amount: U256) -> ArbResult<BroadcastOutcome> {
        let tx = call_template(token, calls::transfer(to, amount), U256::zero());
        self.broadcaster.send(tx, false).await
    }

    /// Approve `spender` for `approve_amount` unless the allowance already covers `required`.
    /// Returns whether the allowance is sufficient afterwards.
    pub async fn approve_if_needed(
        &self,
        token: Address,
        spender: Address,
        required: U256,
        approve_amount: U256,
    ) -> ArbResult<bool> {
        let allowance = self.tokens.allowance(token, self.address(), spender).await?;
        if allowance >= required {
            return Ok(true);
        }

        info!("Approving {:?} to spend {:?}", spender, token);
        let tx = call_template(token, calls::approve(spender, approve_amount), U256::zero());
        let outcome = self.broadcaster.send(tx, true).await?;
        if !outcome.is_confirmed() {
            warn!("Approval of {:?} for {:?} did not confirm", spender, token);
        }
        Ok(outcome.is_confirmed())
    }
}
