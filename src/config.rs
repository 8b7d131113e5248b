//! Configuration management for the arbitrage keeper
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use ethers::types::Address;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub bot: BotConfig,
    pub network: NetworkConfig,
    pub gas: GasConfig,
    pub tx: TxConfig,
    pub wallets: WalletsConfig,
    pub routers: HashMap<String, Address>,
    pub routes: RoutesConfig,
    pub metrics: MetricsConfig,
    pub buyer: Option<BuyerConfig>,
    pub minter: Option<MinterConfig>,
    pub seller: Option<SellerConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    pub role: WalletRole,
    pub data_dir: PathBuf,
    #[serde(default)]
    pub log_json: bool,
    #[serde(default = "default_attempts")]
    pub attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    pub chain_id: u64,
    pub rpc_urls: Vec<String>,
    pub wrapped_native: Address,
    pub explorer_url: String,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum GasSampling {
    Beacon,
    Pool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GasConfig {
    pub sampling: GasSampling,
    pub beacon_url: String,
    pub cache_ttl_secs: u64,
    pub stale_grace_secs: u64,
    pub multiplier: f64,
    pub median_sample_txs: usize,
    pub priority_fee_floor_gwei: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TxConfig {
    pub retry_delay_secs: u64,
    pub receipt_timeout_secs: u64,
    pub receipt_poll_ms: u64,
    pub replacement_bump: f64,
    pub max_recoveries: u32,
    pub quote_retry_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletsConfig {
    pub buyer: Address,
    pub minter: Address,
    pub seller: Address,
    pub keystore_dir: PathBuf,
    pub secret_env: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoutesConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

/// The three cooperating wallet processes
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum WalletRole {
    Buyer,
    Minter,
    Seller,
}

impl fmt::Display for WalletRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalletRole::Buyer => write!(f, "buyer"),
            WalletRole::Minter => write!(f, "minter"),
            WalletRole::Seller => write!(f, "seller"),
        }
    }
}

impl FromStr for WalletRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buyer" | "a" => Ok(WalletRole::Buyer),
            "minter" | "b" => Ok(WalletRole::Minter),
            "seller" | "c" => Ok(WalletRole::Seller),
            other => anyhow::bail!("Unknown wallet role: {}", other),
        }
    }
}

/// A dependent wallet this process keeps topped up with native currency
#[derive(Debug, Clone, Deserialize)]
pub struct RebalanceTarget {
    pub wallet: WalletRole,
    pub floor: f64,
}

/// A monitored token the buyer defends the reference price with
#[derive(Debug, Clone, Deserialize)]
pub struct BuyTarget {
    pub token: Address,
    pub label: String,
    pub threshold_percent: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuyerConfig {
    pub router: String,
    pub reference_token: Address,
    pub reference_label: String,
    pub buy_amount_native: f64,
    pub slippage_percent: f64,
    pub wallet_min_native: f64,
    pub loop_delay_secs: u64,
    pub rapid_fee_limit_gwei: f64,
    pub targets: Vec<BuyTarget>,
    #[serde(default)]
    pub rebalance: Vec<RebalanceTarget>,
}

/// One conversion the minter runs each tick, in configured order
#[derive(Debug, Clone, Deserialize)]
pub struct ConversionJob {
    pub source: Address,
    pub multi: Address,
    pub target: Address,
    pub label: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MinterConfig {
    pub reference_token: Address,
    pub reference_label: String,
    pub wallet_min_native: f64,
    pub loop_delay_secs: u64,
    pub rapid_fee_limit_gwei: f64,
    pub jobs: Vec<ConversionJob>,
    #[serde(default)]
    pub rebalance: Vec<RebalanceTarget>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SellerConfig {
    pub router: String,
    pub reference_token: Address,
    pub reference_label: String,
    pub sell_threshold_percent: f64,
    pub sell_chunk: f64,
    pub slippage_percent: f64,
    pub wallet_min_native: f64,
    pub loop_delay_secs: u64,
    pub sell_delay_secs: u64,
    pub rapid_fee_limit_gwei: f64,
    #[serde(default)]
    pub rebalance: Vec<RebalanceTarget>,
}

fn default_attempts() -> u32 {
    18
}

fn default_http_timeout() -> u64 {
    10
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("ARB_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        let mut settings = Self::parse(&config_str)?;

        // The same file is shared by all three processes; the role comes from the environment
        if let Ok(role) = env::var("ARB_ROLE") {
            settings.bot.role = role.parse()?;
        }

        settings.validate()?;

        Ok(settings)
    }

    /// Parse settings from a TOML string after environment substitution
    pub fn parse(input: &str) -> Result<Self> {
        let config_str = substitute_env_vars(input);
        toml::from_str(&config_str).with_context(|| "Failed to parse configuration")
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.network.rpc_urls.is_empty() {
            anyhow::bail!("No RPC URLs configured");
        }
        if self.gas.multiplier <= 0.0 {
            anyhow::bail!("Gas multiplier must be positive");
        }
        if self.tx.replacement_bump <= 1.0 {
            anyhow::bail!("Replacement bump must be greater than 1.0");
        }
        if self.bot.attempts == 0 {
            anyhow::bail!("Attempt budget must be at least 1");
        }

        match self.bot.role {
            WalletRole::Buyer => {
                let buyer = self
                    .buyer
                    .as_ref()
                    .context("Role buyer requires a [buyer] section")?;
                self.require_router(&buyer.router)?;
                if buyer.slippage_percent < 0.0 {
                    anyhow::bail!("Buyer slippage must not be negative");
                }
                if buyer.targets.is_empty() {
                    tracing::warn!("Buyer has no targets configured - will only rebalance");
                }
                for target in &buyer.targets {
                    if target.threshold_percent < 0.0 {
                        anyhow::bail!("Threshold for {} must not be negative", target.label);
                    }
                }
            }
            WalletRole::Minter => {
                self.minter
                    .as_ref()
                    .context("Role minter requires a [minter] section")?;
            }
            WalletRole::Seller => {
                let seller = self
                    .seller
                    .as_ref()
                    .context("Role seller requires a [seller] section")?;
                self.require_router(&seller.router)?;
                if seller.sell_chunk <= 0.0 {
                    anyhow::bail!("Sell chunk must be positive");
                }
                if seller.sell_threshold_percent < 0.0 || seller.slippage_percent < 0.0 {
                    anyhow::bail!("Seller threshold and slippage must not be negative");
                }
            }
        }

        Ok(())
    }

    fn require_router(&self, name: &str) -> Result<()> {
        if !self.routers.contains_key(name) {
            anyhow::bail!("Router {} is not in the router registry", name);
        }
        Ok(())
    }

    /// Get the address of a cooperating wallet
    pub fn wallet_address(&self, role: WalletRole) -> Address {
        match role {
            WalletRole::Buyer => self.wallets.buyer,
            WalletRole::Minter => self.wallets.minter,
            WalletRole::Seller => self.wallets.seller,
        }
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    lazy_static::lazy_static! {
        static ref ENV_VAR: regex::Regex =
            regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid env var pattern");
    }

    let mut result = input.to_string();
    for cap in ENV_VAR.captures_iter(input) {
        let var_value = env::var(&cap[1]).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
pub(crate) const SAMPLE_CONFIG: &str = r#"
[bot]
role = "buyer"
data_dir = "./data"

[network]
chain_id = 369
rpc_urls = ["https://rpc.pulsechain.com"]
wrapped_native = "0xA1077a294dDE1B09bB078844df40758a5D0f9a27"
explorer_url = "https://api.scan.pulsechain.com"

[gas]
sampling = "beacon"
beacon_url = "https://beacon.pulsechain.com/api/v1/execution/gasnow"
cache_ttl_secs = 10
stale_grace_secs = 60
multiplier = 1.5
median_sample_txs = 100
priority_fee_floor_gwei = 500

[tx]
retry_delay_secs = 10
receipt_timeout_secs = 10
receipt_poll_ms = 1000
replacement_bump = 1.0369
max_recoveries = 64
quote_retry_delay_ms = 1000

[wallets]
buyer = "0x1111111111111111111111111111111111111111"
minter = "0x2222222222222222222222222222222222222222"
seller = "0x3333333333333333333333333333333333333333"
keystore_dir = "./data/wallets"
secret_env = "SECRET"

[routers]
PulseX_v2 = "0x165C3410fC91EF562C50559f7d2289fEbed552d9"

[routes]
path = "./data/routes.json"

[metrics]
enabled = false
port = 9464

[buyer]
router = "PulseX_v2"
reference_token = "0x24F0154C1dCe548AdF15da2098Fdd8B8A3B8151D"
reference_label = "AFFECTION"
buy_amount_native = 10000.0
slippage_percent = 5.0
wallet_min_native = 20000.0
loop_delay_secs = 3
rapid_fee_limit_gwei = 650000.0

[[buyer.targets]]
token = "0x6B175474E89094C44Da98b954EedeAC495271d0F"
label = "pDAI"
threshold_percent = 20.0

[[buyer.rebalance]]
wallet = "minter"
floor = 5000.0
"#;
