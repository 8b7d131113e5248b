//! Fee-tier oracle with a durable cache and fail-closed fallback

use super::sample::{effective_bid, from_pool_bids, BeaconResponse, FeeTier, GasSample, SampleSource};
use crate::chain::SharedClient;
use crate::clock::SharedClock;
use crate::config::{GasConfig, GasSampling};
use crate::error::{ArbError, ArbResult};
use crate::registry::cache::write_atomic;
use crate::units::from_base_units;

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Where live samples come from
pub enum GasSampler {
    /// Pre-aggregated tier table from a remote estimator
    Beacon { http: reqwest::Client, url: String },
    /// Percentiles over the node's pending transaction pool
    Pool { client: SharedClient },
}

impl GasSampler {
    fn cache_key(&self) -> &'static str {
        match self {
            GasSampler::Beacon { .. } => "beacon",
            GasSampler::Pool { .. } => "pool",
        }
    }

    async fn sample(&self, now: DateTime<Utc>) -> ArbResult<GasSample> {
        match self {
            GasSampler::Beacon { http, url } => {
                let http_err = |e: reqwest::Error| ArbError::Http {
                    endpoint: url.clone(),
                    message: e.to_string(),
                };
                let response: BeaconResponse = http
                    .get(url)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(http_err)?
                    .json()
                    .await
                    .map_err(http_err)?;
                response.into_sample(now)
            }
            GasSampler::Pool { client } => {
                let pending = client.pending_pool().await?;
                let bids = pending
                    .iter()
                    .filter_map(effective_bid)
                    .map(|wei| from_base_units(wei, 0))
                    .collect();
                from_pool_bids(bids, now)
            }
        }
    }
}

/// Samples and caches network fee-tier estimates
pub struct GasOracle {
    sampler: GasSampler,
    cache_path: PathBuf,
    ttl: Duration,
    grace: Duration,
    clock: SharedClock,
}

impl GasOracle {
    /// Build the oracle selected by configuration
    pub fn from_config(
        config: &GasConfig,
        data_dir: &Path,
        http_timeout: Duration,
        client: SharedClient,
        clock: SharedClock,
    ) -> ArbResult<Self> {
        let sampler = match config.sampling {
            GasSampling::Beacon => GasSampler::Beacon {
                http: reqwest::Client::builder()
                    .timeout(http_timeout)
                    .build()
                    .map_err(|e| ArbError::Config(format!("Gas beacon client: {}", e)))?,
                url: config.beacon_url.clone(),
            },
            GasSampling::Pool => GasSampler::Pool { client },
        };

        Ok(Self::new(
            sampler,
            data_dir.join("cache"),
            Duration::from_secs(config.cache_ttl_secs),
            Duration::from_secs(config.stale_grace_secs),
            clock,
        ))
    }

    pub fn new(
        sampler: GasSampler,
        cache_dir: PathBuf,
        ttl: Duration,
        grace: Duration,
        clock: SharedClock,
    ) -> Self {
        let cache_path = cache_dir.join(format!("gas-{}.json", sampler.cache_key()));
        Self {
            sampler,
            cache_path,
            ttl,
            grace,
            clock,
        }
    }

    /// Current fee table; never fails, falls back to cache and then to the fail-closed sentinel
    pub async fn fees(&self) -> GasSample {
        let now = self.clock.now();
        let cached = self.read_cache();

        if let Some(sample) = &cached {
            if sample.is_fresh(now, self.ttl) {
                return sample.clone().with_source(SampleSource::Cached);
            }
        }

        match self.sampler.sample(now).await {
            Ok(sample) => {
                if let Err(e) = self.write_cache(&sample) {
                    warn!("Failed to persist gas sample: {}", e);
                }
                if let Ok(rapid) = sample.fee(FeeTier::Rapid) {
                    crate::metrics::record_rapid_fee(rapid);
                }
                debug!("Live gas sample ({}): {:?}", self.sampler.cache_key(), sample.fees);
                sample
            }
            Err(e) => {
                debug!("Live gas sampling failed: {}", e);
                match cached {
                    Some(sample) if sample.is_fresh(now, self.ttl + self.grace) => {
                        warn!(
                            "Using cached gas sample from {} after live sampling failed",
                            sample.sampled_at
                        );
                        sample.with_source(SampleSource::Cached)
                    }
                    _ => {
                        warn!("No usable gas data, failing closed");
                        GasSample::fail_closed(now)
                    }
                }
            }
        }
    }

    /// Fee for one tier in gwei
    pub async fn fee(&self, tier: FeeTier) -> ArbResult<f64> {
        self.fees().await.fee(tier)
    }

    /// True when the tier's fee is above the ceiling or unknown
    pub async fn exceeds(&self, tier: FeeTier, ceiling_gwei: f64) -> bool {
        match self.fee(tier).await {
            Ok(fee) => fee > ceiling_gwei,
            Err(e) => {
                warn!("{}; treating fees as too high", e);
                true
            }
        }
    }

    fn read_cache(&self) -> Option<GasSample> {
        let contents = std::fs::read_to_string(&self.cache_path).ok()?;
        match serde_json::from_str(&contents) {
            Ok(sample) => Some(sample),
            Err(e) => {
                debug!("Ignoring unreadable gas cache {:?}: {}", self.cache_path, e);
                None
            }
        }
    }

    fn write_cache(&self, sample: &GasSample) -> ArbResult<()> {
        write_atomic(&self.cache_path, sample)
    }
}
