//! Configuration loading
//!
//! Reads `config.toml` from the data directory. A commented default file
//! is written by `storage::init` when none exists.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::taxonomy::NoDataPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub estimator: EstimatorConfig,
    pub aggregation: AggregationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Scoring-service endpoint for recalculation.
    pub url: String,
    /// Maximum time to wait for one estimator call.
    pub timeout_ms: u64,
    /// Bounded retries for transient estimator failures.
    pub retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Module fallback when a snapshot has no matching topics:
    /// "zero", "omit" or "placeholder".
    pub no_data_policy: String,
    /// Percent reported when no_data_policy = "placeholder".
    pub placeholder_percent: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            estimator: EstimatorConfig::default(),
            aggregation: AggregationConfig::default(),
        }
    }
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8090/estimate".to_string(),
            timeout_ms: 10_000,
            retries: 1,
        }
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            no_data_policy: "zero".to_string(),
            placeholder_percent: 1,
        }
    }
}

impl Config {
    /// Load configuration, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read config at {:?}", path))?;
        toml::from_str(&text).with_context(|| format!("Invalid config at {:?}", path))
    }

    pub fn estimator_timeout(&self) -> Duration {
        Duration::from_millis(self.estimator.timeout_ms)
    }

    /// Resolve the configured fallback into the aggregation policy.
    /// Unknown values fall back to `Zero` rather than failing startup.
    pub fn no_data_policy(&self) -> NoDataPolicy {
        match self.aggregation.no_data_policy.as_str() {
            "omit" => NoDataPolicy::Omit,
            "placeholder" => NoDataPolicy::Placeholder(self.aggregation.placeholder_percent.min(100)),
            _ => NoDataPolicy::Zero,
        }
    }
}
