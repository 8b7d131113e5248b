//! ERC20 token metadata and balance reads
//!
//! Metadata is read through a per-token JSON cache under `<data_dir>/tokens`.

use super::cache::JsonDir;
use crate::chain::{calls, SharedClient};
use crate::error::{ArbError, ArbResult};

use dashmap::DashMap;
use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Cached token metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub decimals: Option<u8>,
}

impl TokenInfo {
    fn is_complete(&self) -> bool {
        self.decimals.is_some()
    }
}

pub struct TokenRegistry {
    client: SharedClient,
    cache: JsonDir,
    loaded: DashMap<Address, TokenInfo>,
    attempts: u32,
}

impl TokenRegistry {
    pub fn new(client: SharedClient, data_dir: &Path, attempts: u32) -> Self {
        Self {
            client,
            cache: JsonDir::new(data_dir.join("tokens")),
            loaded: DashMap::new(),
            attempts: attempts.max(1),
        }
    }

    /// Metadata for a token, from memory, then disk, then the chain
    pub async fn info(&self, token: Address) -> ArbResult<TokenInfo> {
        if let Some(info) = self.loaded.get(&token) {
            return Ok(info.clone());
        }

        if let Some(info) = self.cache.read::<TokenInfo>(token) {
            if info.is_complete() {
                self.loaded.insert(token, info.clone());
                return Ok(info);
            }
        }

        let name = self.read_string(token, calls::NAME).await;
        let symbol = self.read_string(token, calls::SYMBOL).await;
        let decimals = self
            .read_uint(token, calls::DECIMALS)
            .await
            .map(|d| d.low_u32().min(u8::MAX as u32) as u8);

        let info = TokenInfo {
            name,
            symbol,
            decimals,
        };
        // Partial metadata is persisted too, and refetched next time
        if let Err(e) = self.cache.write(token, &info) {
            debug!("Failed to cache token info for {:?}: {}", token, e);
        }

        if info.is_complete() {
            self.loaded.insert(token, info.clone());
        }
        Ok(info)
    }

    pub async fn decimals(&self, token: Address) -> ArbResult<u8> {
        self.info(token).await?.decimals.ok_or_else(|| ArbError::Contract {
            contract: format!("{:?}", token),
            message: "decimals() unavailable".to_string(),
        })
    }

    /// Symbol for log lines, falling back to the address
    pub async fn label(&self, token: Address) -> String {
        match self.info(token).await {
            Ok(TokenInfo {
                symbol: Some(symbol),
                ..
            }) => symbol,
            _ => format!("{:?}", token),
        }
    }

    pub async fn balance_of(&self, token: Address, owner: Address) -> ArbResult<U256> {
        let data = self.client.call(token, calls::balance_of(owner)).await?;
        calls::decode_uint(&data)
    }

    pub async fn allowance(&self, token: Address, owner: Address, spender: Address) -> ArbResult<U256> {
        let data = self.client.call(token, calls::allowance(owner, spender)).await?;
        calls::decode_uint(&data)
    }

    pub async fn total_supply(&self, token: Address) -> ArbResult<U256> {
        let data = self.client.call(token, calls::encode(calls::TOTAL_SUPPLY, &[])).await?;
        calls::decode_uint(&data)
    }

    async fn read_string(&self, token: Address, signature: &str) -> Option<String> {
        for _ in 0..self.attempts {
            match self.client.call(token, calls::encode(signature, &[])).await {
                Ok(data) => match calls::decode_string(&data) {
                    Ok(value) => return Some(value),
                    Err(e) => {
                        debug!("{} on {:?} is not a string: {}", signature, token, e);
                        return None;
                    }
                },
                Err(e) => debug!("{} on {:?} failed: {}", signature, token, e),
            }
        }
        None
    }

    async fn read_uint(&self, token: Address, signature: &str) -> Option<U256> {
        for _ in 0..self.attempts {
            match self.client.call(token, calls::encode(signature, &[])).await {
                Ok(data) => return calls::decode_uint(&data).ok(),
                Err(e) => debug!("{} on {:?} failed: {}", signature, token, e),
            }
        }
        None
    }
}
