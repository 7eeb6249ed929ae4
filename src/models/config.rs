//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// HTTP probing and dispatch settings
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Write lease settings
    #[serde(default)]
    pub lease: LeaseConfig,

    /// History record settings
    #[serde(default)]
    pub history: HistoryConfig,

    /// Feed catalog location
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.monitor.user_agent.trim().is_empty() {
            return Err(AppError::validation("monitor.user_agent is empty"));
        }
        if self.monitor.timeout_secs == 0 {
            return Err(AppError::validation("monitor.timeout_secs must be > 0"));
        }
        if self.monitor.max_concurrent == 0 {
            return Err(AppError::validation("monitor.max_concurrent must be > 0"));
        }
        if self.lease.ttl_secs == 0 {
            return Err(AppError::validation("lease.ttl_secs must be > 0"));
        }
        if let Some(minutes) = self.history.local_offset_minutes {
            if self.history.local_offset().is_none() {
                return Err(AppError::validation(format!(
                    "history.local_offset_minutes out of range: {minutes}"
                )));
            }
        }
        if self.catalog.path.trim().is_empty() {
            return Err(AppError::validation("catalog.path is empty"));
        }
        Ok(())
    }

    /// Resolve the catalog path against a base directory.
    pub fn catalog_path(&self, base_path: &Path) -> PathBuf {
        let path = Path::new(&self.catalog.path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_path.join(path)
        }
    }
}

/// HTTP probe and dispatch behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// User-Agent header for probe requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Probe timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Maximum feeds processed concurrently
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,

    /// Maximum redirects followed per probe
    #[serde(default = "defaults::max_redirects")]
    pub max_redirects: usize,
}

impl MonitorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            max_concurrent: defaults::max_concurrent(),
            max_redirects: defaults::max_redirects(),
        }
    }
}

/// Write lease settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseConfig {
    /// Seconds after which an unreleased lease is purged
    #[serde(default = "defaults::lease_ttl")]
    pub ttl_secs: u64,
}

impl LeaseConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ttl_secs as i64)
    }
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            ttl_secs: defaults::lease_ttl(),
        }
    }
}

/// History record settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HistoryConfig {
    /// Display offset from UTC in minutes (e.g. 330 for IST).
    /// When set, records also carry local renderings of each timestamp.
    #[serde(default)]
    pub local_offset_minutes: Option<i32>,
}

impl HistoryConfig {
    /// The configured display offset, if any and in range.
    pub fn local_offset(&self) -> Option<FixedOffset> {
        self.local_offset_minutes
            .and_then(|minutes| minutes.checked_mul(60))
            .and_then(FixedOffset::east_opt)
    }
}

/// Feed catalog location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Catalog file, relative to the storage directory unless absolute
    #[serde(default = "defaults::catalog_path")]
    pub path: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: defaults::catalog_path(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log level when RUST_LOG is unset
    #[serde(default = "defaults::log_level")]
    pub level: String,

    /// Log per-feed detail lines in the run summary
    #[serde(default)]
    pub show_progress: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
            show_progress: false,
        }
    }
}

mod defaults {
    // Monitor defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; feedwatch/0.1)".into()
    }
    pub fn timeout() -> u64 {
        10
    }
    pub fn max_concurrent() -> usize {
        12
    }
    pub fn max_redirects() -> usize {
        10
    }

    // Lease defaults
    pub fn lease_ttl() -> u64 {
        600
    }

    // Catalog defaults
    pub fn catalog_path() -> String {
        "feeds.toml".into()
    }

    // Logging defaults
    pub fn log_level() -> String {
        "info".into()
    }
}
