//! Signer lookup: a raw key from the environment, or an encrypted keystore
//! at `<keystore_dir>/<address>/keystore`.

use crate::config::WalletsConfig;
use crate::error::{ArbError, ArbResult};

use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address;
use ethers::utils::to_checksum;
use std::env;
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment variable holding a hex private key, used in place of a keystore
pub const PRIVATE_KEY_ENV: &str = "ARB_PRIVATE_KEY";

pub struct SignerSource {
    keystore_dir: PathBuf,
    secret_env: String,
}

impl SignerSource {
    pub fn new(config: &WalletsConfig) -> Self {
        Self {
            keystore_dir: config.keystore_dir.clone(),
            secret_env: config.secret_env.clone(),
        }
    }

    /// Signer for `address`
    pub fn signer(&self, address: Address) -> ArbResult<LocalWallet> {
        self.resolve(
            address,
            env::var(PRIVATE_KEY_ENV).ok(),
            env::var(&self.secret_env).ok(),
        )
    }

    fn resolve(
        &self,
        address: Address,
        private_key: Option<String>,
        secret: Option<String>,
    ) -> ArbResult<LocalWallet> {
        let wallet = match private_key {
            Some(key) => key
                .trim()
                .parse::<LocalWallet>()
                .map_err(|e| ArbError::Wallet(format!("{} is not a valid key: {}", PRIVATE_KEY_ENV, e)))?,
            None => {
                let secret = secret.ok_or_else(|| {
                    ArbError::Config(format!("Keystore secret {} is not set", self.secret_env))
                })?;
                let path = self.keystore_path(address);
                decrypt(&path, &secret)?
            }
        };

        if wallet.address() != address {
            return Err(ArbError::Wallet(format!(
                "Signer address {:?} does not match configured wallet {:?}",
                wallet.address(),
                address
            )));
        }

        info!("Loaded signer for {:?}", address);
        Ok(wallet)
    }

    fn keystore_path(&self, address: Address) -> PathBuf {
        let checksummed = self.keystore_dir.join(to_checksum(&address, None)).join("keystore");
        if checksummed.exists() {
            return checksummed;
        }
        self.keystore_dir.join(format!("{:?}", address)).join("keystore")
    }
}

fn decrypt(path: &Path, secret: &str) -> ArbResult<LocalWallet> {
    if !path.exists() {
        return Err(ArbError::Wallet(format!("No keystore at {:?}", path)));
    }
    LocalWallet::decrypt_keystore(path, secret)
        .map_err(|e| ArbError::Wallet(format!("Failed to decrypt {:?}: {}", path, e)))
}
