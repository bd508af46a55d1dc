//! Service configuration
//!
//! Resolution order: compiled defaults, then an optional TOML file named
//! by `TRACKD_CONFIG`, then individual `TRACKD_*` environment variable
//! overrides (highest priority). There is deliberately no CLI layer.

use crate::{Error, Result};
use serde::Deserialize;

/// Tunable parameters for the trackd server
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackdConfig {
    /// Listen address for the HTTP server
    pub bind_addr: String,

    /// Path of the SQLite database file
    pub database_path: String,

    /// Age of `last_update` after which an in_progress task is flagged
    /// stalled by the watchdog sweep
    pub staleness_threshold_secs: u64,

    /// Period of the watchdog sweep
    pub watchdog_interval_secs: u64,

    /// Out-of-order correction threshold: an accepted event more than this
    /// many iterations below the task counter triggers a recompute of the
    /// counter from stored events. Policy constant with no canonical
    /// value; always configured, never hardcoded at call sites.
    pub skew_tolerance: i64,

    /// Default downsample cap `C` for aggregate series
    pub downsample_cap: usize,

    /// Page size for lazy event scans
    pub scan_page_size: i64,

    /// Per-call timeout for storage operations
    pub storage_timeout_ms: u64,

    /// Retry attempts for transient storage failures
    pub storage_retry_attempts: u32,

    /// Initial backoff delay between storage retries (doubles per attempt)
    pub storage_retry_base_ms: u64,
}

impl Default for TrackdConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:5840".to_string(),
            database_path: "trackd.db".to_string(),
            staleness_threshold_secs: 600,
            watchdog_interval_secs: 60,
            skew_tolerance: 1000,
            downsample_cap: 6000,
            scan_page_size: 500,
            storage_timeout_ms: 5000,
            storage_retry_attempts: 3,
            storage_retry_base_ms: 100,
        }
    }
}

impl TrackdConfig {
    /// Load configuration: defaults, optional TOML file, env overrides
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("TRACKD_CONFIG") {
            Ok(path) => {
                let text = std::fs::read_to_string(&path)
                    .map_err(|e| Error::Config(format!("cannot read {path}: {e}")))?;
                toml::from_str(&text)
                    .map_err(|e| Error::Config(format!("cannot parse {path}: {e}")))?
            }
            Err(_) => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        env_override("TRACKD_BIND_ADDR", &mut self.bind_addr);
        env_override("TRACKD_DATABASE_PATH", &mut self.database_path);
        env_override(
            "TRACKD_STALENESS_THRESHOLD_SECS",
            &mut self.staleness_threshold_secs,
        );
        env_override(
            "TRACKD_WATCHDOG_INTERVAL_SECS",
            &mut self.watchdog_interval_secs,
        );
        env_override("TRACKD_SKEW_TOLERANCE", &mut self.skew_tolerance);
        env_override("TRACKD_DOWNSAMPLE_CAP", &mut self.downsample_cap);
        env_override("TRACKD_SCAN_PAGE_SIZE", &mut self.scan_page_size);
        env_override("TRACKD_STORAGE_TIMEOUT_MS", &mut self.storage_timeout_ms);
        env_override(
            "TRACKD_STORAGE_RETRY_ATTEMPTS",
            &mut self.storage_retry_attempts,
        );
        env_override(
            "TRACKD_STORAGE_RETRY_BASE_MS",
            &mut self.storage_retry_base_ms,
        );
    }

    fn validate(&self) -> Result<()> {
        if self.downsample_cap == 0 {
            return Err(Error::Config("downsample_cap must be >= 1".to_string()));
        }
        if self.scan_page_size < 1 {
            return Err(Error::Config("scan_page_size must be >= 1".to_string()));
        }
        if self.storage_retry_attempts == 0 {
            return Err(Error::Config(
                "storage_retry_attempts must be >= 1".to_string(),
            ));
        }
        if self.skew_tolerance < 0 {
            return Err(Error::Config("skew_tolerance must be >= 0".to_string()));
        }
        Ok(())
    }
}

fn env_override<T: std::str::FromStr>(key: &str, slot: &mut T) {
    if let Ok(value) = std::env::var(key) {
        if let Ok(parsed) = value.parse() {
            *slot = parsed;
        } else {
            tracing::warn!("ignoring unparseable {key}={value}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TrackdConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.downsample_cap, 6000);
        assert_eq!(config.skew_tolerance, 1000);
    }

    #[test]
    fn test_toml_partial_override() {
        let config: TrackdConfig = toml::from_str(
            r#"
            staleness_threshold_secs = 120
            downsample_cap = 100
            "#,
        )
        .expect("valid toml");
        assert_eq!(config.staleness_threshold_secs, 120);
        assert_eq!(config.downsample_cap, 100);
        // untouched fields keep defaults
        assert_eq!(config.scan_page_size, 500);
    }

    #[test]
    fn test_zero_cap_rejected() {
        let config = TrackdConfig {
            downsample_cap: 0,
            ..TrackdConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
