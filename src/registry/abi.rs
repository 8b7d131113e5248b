//! Contract ABIs, read through `<data_dir>/abi/<address>.json` and downloaded
//! from the block explorer on a miss.

use super::cache::JsonDir;
use crate::clock::SharedClock;
use crate::error::{ArbError, ArbResult};
use crate::retry::retry_fixed;

use dashmap::DashMap;
use ethers::abi::Abi;
use ethers::types::Address;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

const DOWNLOAD_BACKOFF: Duration = Duration::from_secs(1);

pub struct AbiStore {
    http: reqwest::Client,
    explorer_url: String,
    cache: JsonDir,
    loaded: DashMap<Address, Abi>,
    clock: SharedClock,
    attempts: u32,
}

impl AbiStore {
    pub fn new(
        explorer_url: &str,
        data_dir: &Path,
        http_timeout: Duration,
        clock: SharedClock,
        attempts: u32,
    ) -> ArbResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(http_timeout)
            .build()
            .map_err(|e| ArbError::Config(format!("Explorer client: {}", e)))?;

        Ok(Self {
            http,
            explorer_url: explorer_url.trim_end_matches('/').to_string(),
            cache: JsonDir::new(data_dir.join("abi")),
            loaded: DashMap::new(),
            clock,
            attempts,
        })
    }

    /// ABI for a contract; `AbiUnavailable` when neither the cache nor the explorer has one
    pub async fn abi(&self, address: Address) -> ArbResult<Abi> {
        if let Some(abi) = self.loaded.get(&address) {
            return Ok(abi.clone());
        }

        let document = match self.cache.read::<Value>(address) {
            Some(document) => document,
            None => {
                let document = self.download(address).await?;
                self.cache.write(address, &document)?;
                info!("Saved ABI for {:?}", address);
                document
            }
        };

        let abi: Abi = serde_json::from_value(document)
            .map_err(|e| ArbError::Decode(format!("ABI for {:?}: {}", address, e)))?;
        self.loaded.insert(address, abi.clone());
        Ok(abi)
    }

    async fn download(&self, address: Address) -> ArbResult<Value> {
        let url = format!("{}/api/v2/smart-contracts/{:?}", self.explorer_url, address);

        let response: Value = retry_fixed(
            self.clock.as_ref(),
            self.attempts,
            DOWNLOAD_BACKOFF,
            |attempt| {
                let url = url.clone();
                async move {
                    debug!("Fetching ABI from {} (attempt {})", url, attempt);
                    self.http
                        .get(&url)
                        .send()
                        .await
                        .and_then(|r| r.error_for_status())?
                        .json::<Value>()
                        .await
                }
            },
        )
        .await
        .map_err(|e| {
            debug!("ABI download for {:?} failed: {}", address, e);
            ArbError::AbiUnavailable(format!(
                "{:?} (explorer unreachable; place a copy in the abi cache)",
                address
            ))
        })?;

        match response.get("abi") {
            Some(abi) if abi.as_array().map_or(false, |items| !items.is_empty()) => Ok(abi.clone()),
            _ => Err(ArbError::AbiUnavailable(format!("{:?}", address))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const MULTI_ABI: &str = r#"[
        {"type":"function","name":"multiMint","stateMutability":"nonpayable",
         "inputs":[{"name":"iterations","type":"uint256"}],"outputs":[]}
    ]"#;

    #[tokio::test]
    async fn test_reads_cached_abi() {
        let dir = tempfile::tempdir().unwrap();
        let address = Address::repeat_byte(0x81);
        std::fs::create_dir_all(dir.path().join("abi")).unwrap();
        std::fs::write(
            dir.path().join("abi").join(format!("{:?}.json", address)),
            MULTI_ABI,
        )
        .unwrap();

        let store = AbiStore::new(
            "http://127.0.0.1:9",
            dir.path(),
            Duration::from_secs(1),
            ManualClock::at_unix(0),
            1,
        )
        .unwrap();

        let abi = store.abi(address).await.unwrap();
        assert!(abi.function("multiMint").is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_explorer_is_abi_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::at_unix(0);
        let store = AbiStore::new(
            "http://127.0.0.1:9",
            dir.path(),
            Duration::from_secs(1),
            clock.clone(),
            2,
        )
        .unwrap();

        let err = store.abi(Address::repeat_byte(0x01)).await.unwrap_err();
        assert!(matches!(err, ArbError::AbiUnavailable(_)));
        assert!(err.is_config_fault());
        assert_eq!(clock.sleeps(), vec![DOWNLOAD_BACKOFF]);
    }
}
