// SPDX-License-Identifier: MIT OR Apache-2.0
//! Runtime configuration for a courier node.
//!
//! One record, constructed once at startup and passed down into every
//! component — no service carries its own implicit defaults. Loads from
//! TOML, validates, and reports advisory [`ConfigWarning`]s.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default storage budget: 2 GiB.
pub const DEFAULT_STORAGE_BUDGET_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Errors from configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

/// Advisory issues that do not prevent operation but deserve attention.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigWarning {
    /// The storage budget is small enough that eviction will churn.
    SmallBudget {
        /// Configured budget in bytes.
        bytes: u64,
    },
    /// The TTL sweep interval is long enough that expiry will lag.
    SlowTtlSweep {
        /// Configured interval in seconds.
        secs: u64,
    },
    /// Warn and evict thresholds are unusually far apart.
    ThresholdGap {
        /// Warn threshold fraction.
        warn: f64,
        /// Evict threshold fraction.
        evict: f64,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::SmallBudget { bytes } => {
                write!(f, "storage budget is small ({bytes} bytes); eviction will be frequent")
            }
            ConfigWarning::SlowTtlSweep { secs } => {
                write!(f, "TTL sweep interval is long ({secs}s); expiry will lag")
            }
            ConfigWarning::ThresholdGap { warn, evict } => {
                write!(f, "warn ({warn}) and evict ({evict}) thresholds differ")
            }
        }
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CourierConfig {
    /// Root directory for node state (database, keys, trust store).
    pub data_dir: PathBuf,

    /// Bundle database path. Defaults to `<data_dir>/bundles.db`.
    pub db_path: Option<PathBuf>,

    /// Directory holding the node key PEMs. Defaults to `<data_dir>/keys`.
    pub keys_dir: Option<PathBuf>,

    /// Trust store JSON document. Defaults to `<data_dir>/trust_store.json`.
    pub trust_store_path: Option<PathBuf>,

    /// Cache budget in bytes.
    pub storage_budget_bytes: u64,

    /// Fraction of the budget at which a warning is logged.
    pub warn_threshold: f64,

    /// Fraction of the budget at which eviction starts.
    pub evict_threshold: f64,

    /// Fraction of the budget eviction drives usage down to.
    pub evict_target: f64,

    /// TTL sweep period in seconds.
    pub ttl_check_interval_seconds: u64,

    /// Days an expired bundle is retained for audit before deletion.
    pub expired_retention_days: i64,

    /// Days a quarantined bundle is retained for audit before deletion.
    pub quarantine_retention_days: i64,

    /// Hop limit applied to bundles that do not specify one.
    pub default_hop_limit: u32,

    /// Log level filter (e.g. `"info"`, `"courier_sync=debug"`).
    pub log_level: Option<String>,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            db_path: None,
            keys_dir: None,
            trust_store_path: None,
            storage_budget_bytes: DEFAULT_STORAGE_BUDGET_BYTES,
            warn_threshold: 0.95,
            evict_threshold: 0.95,
            evict_target: 0.90,
            ttl_check_interval_seconds: 60,
            expired_retention_days: 7,
            quarantine_retention_days: 7,
            default_hop_limit: 20,
            log_level: Some("info".into()),
        }
    }
}

impl CourierConfig {
    /// Load from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file is missing, unreadable, or
    /// invalid TOML, or if validation fails.
    pub fn from_toml_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.display().to_string(),
            });
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Parse from a TOML string and validate.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ParseError`] on invalid TOML and
    /// [`ConfigError::ValidationError`] on semantic problems.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: CourierConfig =
            toml::from_str(raw).map_err(|e| ConfigError::ParseError {
                reason: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Semantic validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] listing every problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut reasons = Vec::new();
        if self.storage_budget_bytes == 0 {
            reasons.push("storage_budget_bytes must be positive".to_string());
        }
        if self.ttl_check_interval_seconds == 0 {
            reasons.push("ttl_check_interval_seconds must be positive".to_string());
        }
        for (name, value) in [
            ("warn_threshold", self.warn_threshold),
            ("evict_threshold", self.evict_threshold),
            ("evict_target", self.evict_target),
        ] {
            if !(0.0..=1.0).contains(&value) {
                reasons.push(format!("{name} must be within [0, 1], got {value}"));
            }
        }
        if self.evict_target > self.evict_threshold {
            reasons.push(format!(
                "evict_target ({}) must not exceed evict_threshold ({})",
                self.evict_target, self.evict_threshold
            ));
        }
        if self.expired_retention_days < 0 || self.quarantine_retention_days < 0 {
            reasons.push("retention windows must be non-negative".to_string());
        }
        if self.default_hop_limit == 0 {
            reasons.push("default_hop_limit must be positive".to_string());
        }
        if reasons.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationError { reasons })
        }
    }

    /// Advisory warnings for odd-but-legal settings.
    #[must_use]
    pub fn warnings(&self) -> Vec<ConfigWarning> {
        let mut out = Vec::new();
        if self.storage_budget_bytes < 10 * 1024 * 1024 {
            out.push(ConfigWarning::SmallBudget {
                bytes: self.storage_budget_bytes,
            });
        }
        if self.ttl_check_interval_seconds > 600 {
            out.push(ConfigWarning::SlowTtlSweep {
                secs: self.ttl_check_interval_seconds,
            });
        }
        if (self.warn_threshold - self.evict_threshold).abs() > f64::EPSILON {
            out.push(ConfigWarning::ThresholdGap {
                warn: self.warn_threshold,
                evict: self.evict_threshold,
            });
        }
        out
    }

    /// Resolved bundle database path.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("bundles.db"))
    }

    /// Resolved key directory.
    #[must_use]
    pub fn keys_dir(&self) -> PathBuf {
        self.keys_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("keys"))
    }

    /// Resolved trust store path.
    #[must_use]
    pub fn trust_store_path(&self) -> PathBuf {
        self.trust_store_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("trust_store.json"))
    }
}
