//! Key-by-address JSON documents on disk

use crate::error::{ArbError, ArbResult};

use ethers::types::Address;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A directory of `<address>.json` files
#[derive(Debug, Clone)]
pub struct JsonDir {
    dir: PathBuf,
}

impl JsonDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, address: Address) -> PathBuf {
        self.dir.join(format!("{:?}.json", address))
    }

    /// Read a document; missing or unreadable files are a miss
    pub fn read<T: DeserializeOwned>(&self, address: Address) -> Option<T> {
        let path = self.path(address);
        let contents = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&contents) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!("Ignoring unreadable cache file {:?}: {}", path, e);
                None
            }
        }
    }

    /// Write through a temp file so readers never see a partial document
    pub fn write<T: Serialize>(&self, address: Address, value: &T) -> ArbResult<()> {
        let path = self.path(address);
        write_atomic(&path, value)
    }
}

pub fn write_atomic<T: Serialize>(path: &Path, value: &T) -> ArbResult<()> {
    let cache_err = |e: std::io::Error| ArbError::Cache {
        path: path.display().to_string(),
        message: e.to_string(),
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(cache_err)?;
    }
    let body = serde_json::to_string_pretty(value).map_err(|e| ArbError::Internal(e.to_string()))?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, body).map_err(cache_err)?;
    std::fs::rename(&tmp, path).map_err(cache_err)
}
