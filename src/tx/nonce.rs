//! Nonce tracking for reliable transaction submission
//!
//! Handles:
//! - Local nonce tracking between submissions
//! - Re-synchronisation when the network reports a stale nonce
//! - Invalidation after a transaction's fate is unknown

use crate::chain::SharedClient;
use crate::error::{ArbError, ArbResult};

use ethers::types::Address;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Local nonce state for one address
#[derive(Debug, Default)]
struct NonceState {
    /// Next nonce to hand out; `None` means re-read from the network
    next: Option<u64>,
    /// Last value the network reported
    last_synced: Option<u64>,
}

/// Supplies the next transaction sequence number for an address
pub struct NonceTracker {
    client: SharedClient,
    address: Address,
    state: Mutex<NonceState>,
}

impl NonceTracker {
    pub fn new(client: SharedClient, address: Address) -> Self {
        Self {
            client,
            address,
            state: Mutex::new(NonceState::default()),
        }
    }

    /// Allocate the next nonce, reading the network on first use
    pub async fn next(&self) -> ArbResult<u64> {
        let mut state = self.state.lock().await;
        let nonce = match state.next {
            Some(nonce) => nonce,
            None => {
                let on_chain = self.fetch().await?;
                state.last_synced = Some(on_chain);
                on_chain
            }
        };
        state.next = Some(nonce + 1);

        debug!("Allocated nonce {} for {:?}", nonce, self.address);
        Ok(nonce)
    }

    /// Re-read the network nonce and allocate it
    pub async fn resync(&self) -> ArbResult<u64> {
        let on_chain = self.fetch().await?;
        let mut state = self.state.lock().await;

        if let Some(previous) = state.last_synced {
            if on_chain > previous + 1 {
                warn!(
                    "Nonce for {:?} jumped from {} to {}; another sender shares this key",
                    self.address, previous, on_chain
                );
            }
        }

        state.last_synced = Some(on_chain);
        state.next = Some(on_chain + 1);
        debug!("Nonce resynced for {:?}: {}", self.address, on_chain);
        Ok(on_chain)
    }

    /// Forget the local nonce; the next allocation reads the network
    pub async fn invalidate(&self) {
        self.state.lock().await.next = None;
    }

    async fn fetch(&self) -> ArbResult<u64> {
        self.client
            .transaction_count(self.address)
            .await
            .map_err(|e| ArbError::Nonce {
                address: format!("{:?}", self.address),
                message: e.to_string(),
            })
    }
}
