//! Settings file
//!
//! Loaded from `~/.routestat/config.json`. Every field has a default, so a
//! missing file or a partial one is fine.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Duration;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::services::{ProviderCatalog, ProviderRanker, ScoringWeights};
use crate::types::{Result, RoutestatError};

/// Upper bound for any configured TTL (one year)
const MAX_TTL_SECS: u64 = 365 * 24 * 3600;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Directory read by the JSON record source
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// ISO 4217 code reports are shown in
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Rates endpoint; the base currency is appended as a path segment
    #[serde(default = "default_exchange_rate_url")]
    pub exchange_rate_url: String,

    #[serde(default = "default_exchange_rate_ttl_secs")]
    pub exchange_rate_ttl_secs: u64,

    #[serde(default = "default_snapshot_ttl_secs")]
    pub snapshot_ttl_secs: u64,

    #[serde(default)]
    pub weights: ScoringWeights,

    /// Providers treated as open-source in addition to the built-in list
    #[serde(default)]
    pub open_source_providers: Vec<String>,
}

fn routestat_home() -> PathBuf {
    BaseDirs::new()
        .map(|d| d.home_dir().join(".routestat"))
        .unwrap_or_else(|| PathBuf::from(".routestat"))
}

fn default_data_dir() -> PathBuf {
    routestat_home().join("data")
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_exchange_rate_url() -> String {
    "https://open.er-api.com/v6/latest".to_string()
}

fn default_exchange_rate_ttl_secs() -> u64 {
    3600
}

fn default_snapshot_ttl_secs() -> u64 {
    300
}

fn ttl(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_TTL_SECS) as i64)
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            currency: default_currency(),
            exchange_rate_url: default_exchange_rate_url(),
            exchange_rate_ttl_secs: default_exchange_rate_ttl_secs(),
            snapshot_ttl_secs: default_snapshot_ttl_secs(),
            weights: ScoringWeights::default(),
            open_source_providers: Vec::new(),
        }
    }
}

impl Settings {
    pub fn default_path() -> PathBuf {
        routestat_home().join("config.json")
    }

    /// Load from the default location
    pub fn load() -> Result<Self> {
        Self::from_path(&Self::default_path())
    }

    /// Load and validate; a missing file yields defaults
    pub fn from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| {
            RoutestatError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let settings: Settings = serde_json::from_str(&content).map_err(|e| {
            RoutestatError::Config(format!("invalid {}: {}", path.display(), e))
        })?;
        settings.validate()?;

        debug!(path = %path.display(), "loaded config");
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        self.weights.validate()?;
        let currency_ok =
            self.currency.len() == 3 && self.currency.chars().all(|c| c.is_ascii_alphabetic());
        if !currency_ok {
            return Err(RoutestatError::Config(format!(
                "currency must be a 3-letter code, got '{}'",
                self.currency
            )));
        }
        if self.exchange_rate_ttl_secs > MAX_TTL_SECS || self.snapshot_ttl_secs > MAX_TTL_SECS {
            return Err(RoutestatError::Config(format!(
                "TTLs are capped at {} seconds",
                MAX_TTL_SECS
            )));
        }
        Ok(())
    }

    pub fn exchange_rate_ttl(&self) -> Duration {
        ttl(self.exchange_rate_ttl_secs)
    }

    pub fn snapshot_ttl(&self) -> Duration {
        ttl(self.snapshot_ttl_secs)
    }

    /// Ranker using the configured weights and category additions
    pub fn ranker(&self) -> ProviderRanker {
        ProviderRanker::new(
            self.weights,
            ProviderCatalog::with_open_source(&self.open_source_providers),
        )
    }
}
