//! Engine configuration
//!
//! Deployment-level knobs for the emission pipeline, loaded from a TOML
//! file with environment variable overrides on top:
//!
//! ```toml
//! [authority]
//! timeout_secs = 60
//! poll_attempts = 3
//! poll_interval_ms = 1000
//!
//! [contingency]
//! max_sync_attempts = 3
//! batch_size = 50
//!
//! [tax]
//! rate_bps = 825
//! ```
//!
//! Override any value with `FISCO_*` environment variables (for example
//! `FISCO_AUTHORITY_TIMEOUT_SECS=30`). A missing file yields the defaults,
//! so a fresh install works with no configuration at all.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};

/// Default configuration file consulted when no explicit path is given.
pub const DEFAULT_CONFIG_PATH: &str = "fisco.toml";

// =============================================================================
// Settings Sections
// =============================================================================

/// Webservice client behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthoritySettings {
    /// Hard deadline for any single webservice call, in seconds.
    pub timeout_secs: u64,
    /// How many times a batch receipt is polled before the emission is
    /// persisted as inconclusive.
    pub poll_attempts: u32,
    /// Delay between receipt polls, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for AuthoritySettings {
    fn default() -> Self {
        AuthoritySettings {
            timeout_secs: 60,
            poll_attempts: 3,
            poll_interval_ms: 1000,
        }
    }
}

impl AuthoritySettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Offline queue and reconciliation behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContingencySettings {
    /// Sync attempts granted to each offline record before it is parked
    /// for operator review.
    pub max_sync_attempts: i64,
    /// Upper bound of records replayed per reconciliation pass.
    pub batch_size: i64,
}

impl Default for ContingencySettings {
    fn default() -> Self {
        ContingencySettings {
            max_sync_attempts: 3,
            batch_size: 50,
        }
    }
}

/// Tax estimation for the consumer-visible total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaxSettings {
    /// Flat approximate tax burden in basis points of each line total.
    pub rate_bps: i64,
}

impl Default for TaxSettings {
    fn default() -> Self {
        TaxSettings { rate_bps: 825 }
    }
}

// =============================================================================
// EngineConfig
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub authority: AuthoritySettings,
    pub contingency: ContingencySettings,
    pub tax: TaxSettings,
}

impl EngineConfig {
    /// Loads configuration from `path` (default [`DEFAULT_CONFIG_PATH`]),
    /// applies environment overrides, and validates the result.
    ///
    /// A missing file is not an error; the defaults are used.
    pub fn load(path: Option<&Path>) -> EngineResult<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));

        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| EngineError::ConfigLoad(format!("{}: {}", path.display(), e)))?;
            Self::from_toml_str(&contents)?
        } else {
            debug!(path = %path.display(), "No configuration file, using defaults");
            EngineConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parses configuration from TOML without touching the environment.
    pub fn from_toml_str(contents: &str) -> EngineResult<Self> {
        toml::from_str(contents).map_err(|e| EngineError::ConfigLoad(e.to_string()))
    }

    /// Writes the configuration back out as TOML.
    pub fn save(&self, path: &Path) -> EngineResult<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| EngineError::ConfigSave(e.to_string()))?;
        std::fs::write(path, contents)
            .map_err(|e| EngineError::ConfigSave(format!("{}: {}", path.display(), e)))?;
        Ok(())
    }

    /// Applies `FISCO_*` environment variable overrides in place.
    pub fn apply_env_overrides(&mut self) {
        apply_var("FISCO_AUTHORITY_TIMEOUT_SECS", &mut self.authority.timeout_secs);
        apply_var("FISCO_AUTHORITY_POLL_ATTEMPTS", &mut self.authority.poll_attempts);
        apply_var(
            "FISCO_AUTHORITY_POLL_INTERVAL_MS",
            &mut self.authority.poll_interval_ms,
        );
        apply_var(
            "FISCO_CONTINGENCY_MAX_ATTEMPTS",
            &mut self.contingency.max_sync_attempts,
        );
        apply_var("FISCO_CONTINGENCY_BATCH_SIZE", &mut self.contingency.batch_size);
        apply_var("FISCO_TAX_RATE_BPS", &mut self.tax.rate_bps);
    }

    /// Rejects values that would make the pipeline misbehave.
    pub fn validate(&self) -> EngineResult<()> {
        if self.authority.timeout_secs == 0 || self.authority.timeout_secs > 300 {
            return Err(EngineError::InvalidConfig(format!(
                "authority.timeout_secs must be 1-300, got {}",
                self.authority.timeout_secs
            )));
        }
        if self.authority.poll_attempts == 0 || self.authority.poll_attempts > 10 {
            return Err(EngineError::InvalidConfig(format!(
                "authority.poll_attempts must be 1-10, got {}",
                self.authority.poll_attempts
            )));
        }
        if self.authority.poll_interval_ms > 60_000 {
            return Err(EngineError::InvalidConfig(format!(
                "authority.poll_interval_ms must be at most 60000, got {}",
                self.authority.poll_interval_ms
            )));
        }
        if !(1..=10).contains(&self.contingency.max_sync_attempts) {
            return Err(EngineError::InvalidConfig(format!(
                "contingency.max_sync_attempts must be 1-10, got {}",
                self.contingency.max_sync_attempts
            )));
        }
        if !(1..=500).contains(&self.contingency.batch_size) {
            return Err(EngineError::InvalidConfig(format!(
                "contingency.batch_size must be 1-500, got {}",
                self.contingency.batch_size
            )));
        }
        if !(0..=10_000).contains(&self.tax.rate_bps) {
            return Err(EngineError::InvalidConfig(format!(
                "tax.rate_bps must be 0-10000, got {}",
                self.tax.rate_bps
            )));
        }
        Ok(())
    }
}

fn apply_var<T: std::str::FromStr>(name: &str, target: &mut T) {
    if let Ok(raw) = std::env::var(name) {
        match raw.parse() {
            Ok(value) => *target = value,
            Err(_) => warn!(var = name, value = %raw, "Ignoring unparseable override"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
