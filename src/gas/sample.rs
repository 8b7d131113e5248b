//! Fee tier samples and the statistics they are built from

use crate::error::{ArbError, ArbResult};

use chrono::{DateTime, Utc};
use ethers::types::{Transaction, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Fee reported for every tier when no sample of any kind exists.
/// Larger than any configurable ceiling, so the gas gate always closes.
pub const FAIL_CLOSED_FEE: f64 = f64::MAX;

const WEI_PER_GWEI: f64 = 1e9;

/// Named fee aggressiveness bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeTier {
    VerySlow,
    Slow,
    Standard,
    Fast,
    Rapid,
    Instant,
}

impl FeeTier {
    pub const ALL: [FeeTier; 6] = [
        FeeTier::VerySlow,
        FeeTier::Slow,
        FeeTier::Standard,
        FeeTier::Fast,
        FeeTier::Rapid,
        FeeTier::Instant,
    ];

    /// Percentile of the pending pool each tier is read from
    pub fn percentile(self) -> f64 {
        match self {
            FeeTier::VerySlow => 10.0,
            FeeTier::Slow => 25.0,
            FeeTier::Standard => 50.0,
            FeeTier::Fast => 70.0,
            FeeTier::Rapid => 80.0,
            FeeTier::Instant => 90.0,
        }
    }
}

impl fmt::Display for FeeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FeeTier::VerySlow => "very_slow",
            FeeTier::Slow => "slow",
            FeeTier::Standard => "standard",
            FeeTier::Fast => "fast",
            FeeTier::Rapid => "rapid",
            FeeTier::Instant => "instant",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleSource {
    Live,
    Cached,
    Fallback,
}

/// Diagnostics over the sampled pending pool, in gwei
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolStats {
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

/// Fee per tier in gwei, with when and how it was obtained
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GasSample {
    pub fees: BTreeMap<FeeTier, f64>,
    pub sampled_at: DateTime<Utc>,
    pub source: SampleSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<PoolStats>,
}

impl GasSample {
    /// The sentinel used when neither a live nor a cached sample is available
    pub fn fail_closed(now: DateTime<Utc>) -> Self {
        Self {
            fees: FeeTier::ALL.iter().map(|t| (*t, FAIL_CLOSED_FEE)).collect(),
            sampled_at: now,
            source: SampleSource::Fallback,
            stats: None,
        }
    }

    pub fn fee(&self, tier: FeeTier) -> ArbResult<f64> {
        self.fees.get(&tier).copied().ok_or(ArbError::NoGasData {
            tier: tier.to_string(),
        })
    }

    /// Age relative to `now`; `None` for samples dated in the future
    pub fn age(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        (now - self.sampled_at).to_std().ok()
    }

    /// Younger than `max_age`. A future-dated sample is never fresh.
    pub fn is_fresh(&self, now: DateTime<Utc>, max_age: std::time::Duration) -> bool {
        self.age(now).is_some_and(|age| age < max_age)
    }

    pub fn with_source(mut self, source: SampleSource) -> Self {
        self.source = source;
        self
    }
}

/// Effective fee bid of a pending transaction in wei
pub fn effective_bid(tx: &Transaction) -> Option<U256> {
    tx.max_fee_per_gas.or(tx.gas_price)
}

/// Build a sample from pending-pool bids (wei) using nearest-rank percentiles
pub fn from_pool_bids(mut bids: Vec<f64>, now: DateTime<Utc>) -> ArbResult<GasSample> {
    if bids.is_empty() {
        return Err(ArbError::NoGasData {
            tier: "pending pool is empty".to_string(),
        });
    }

    bids.sort_by(|a, b| a.total_cmp(b));
    let gwei: Vec<f64> = bids.iter().map(|w| w / WEI_PER_GWEI).collect();

    let fees = FeeTier::ALL
        .iter()
        .map(|tier| (*tier, percentile(&gwei, tier.percentile())))
        .collect();

    let count = gwei.len();
    let mean = gwei.iter().sum::<f64>() / count as f64;
    let median = if count % 2 == 0 {
        (gwei[count / 2 - 1] + gwei[count / 2]) / 2.0
    } else {
        gwei[count / 2]
    };

    Ok(GasSample {
        fees,
        sampled_at: now,
        source: SampleSource::Live,
        stats: Some(PoolStats {
            mean,
            median,
            min: gwei[0],
            max: gwei[count - 1],
            count,
        }),
    })
}

/// Nearest-rank percentile of an ascending slice
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    let rank = (pct * sorted.len() as f64 / 100.0).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Gasnow-style beacon response: `{"data": {"rapid": wei, ..., "timestamp": ms}}`.
/// The sample is dated by the beacon's own timestamp when it sends one.
#[derive(Debug, Deserialize)]
pub struct BeaconResponse {
    pub data: Option<BTreeMap<String, serde_json::Value>>,
}

impl BeaconResponse {
    pub fn into_sample(self, now: DateTime<Utc>) -> ArbResult<GasSample> {
        let data = self.data.ok_or(ArbError::NoGasData {
            tier: "beacon returned no data".to_string(),
        })?;

        let fees: BTreeMap<FeeTier, f64> = FeeTier::ALL
            .iter()
            .filter_map(|tier| {
                data.get(&tier.to_string())
                    .and_then(|v| v.as_f64())
                    .map(|wei| (*tier, wei / WEI_PER_GWEI))
            })
            .collect();

        if fees.is_empty() {
            return Err(ArbError::NoGasData {
                tier: "beacon returned no known tiers".to_string(),
            });
        }

        let sampled_at = data
            .get("timestamp")
            .and_then(|v| v.as_f64())
            .and_then(|ms| DateTime::<Utc>::from_timestamp_millis(ms as i64))
            .unwrap_or(now);

        Ok(GasSample {
            fees,
            sampled_at,
            source: SampleSource::Live,
            stats: None,
        })
    }
}
