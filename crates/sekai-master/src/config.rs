//! Configuration for the master data cache.
//!
//! `MasterDataDefaults` holds the compile-time defaults and on-disk names;
//! `MasterCacheConfig` is the runtime configuration, loadable from a JSON file.

use crate::error::{MasterDataError, Result};
use crate::store::atomic_read_json;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default timings and file names.
pub struct MasterDataDefaults;

impl MasterDataDefaults {
    pub const TTL: Duration = Duration::from_secs(86_400);
    pub const CHECK_INTERVAL: Duration = Duration::from_secs(3_600);
    pub const RETRY_DELAY: Duration = Duration::from_secs(5);
    pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(300);
    /// Largest retry delay a config may ask for.
    pub const RETRY_DELAY_LIMIT: Duration = Duration::from_secs(7 * 86_400);
    pub const VERSION_PROBE_TTL: Duration = Duration::from_secs(60);
    pub const MEMORY_CACHE_CAPACITY: u64 = 4_096;
    pub const MEMORY_CACHE_TTL: Duration = Duration::from_secs(600);

    pub const MARKER_FILENAME: &'static str = "marker.json";
    pub const CURRENT_FILENAME: &'static str = "current";
    pub const INDEX_FILENAME: &'static str = "index.json";
    pub const GENERATION_PREFIX: &'static str = "gen-";
    pub const RECORD_EXTENSION: &'static str = "json";
}

/// Retry behavior of the background refresh loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before the first retry, in seconds.
    pub delay_secs: f64,
    /// Attempts per refresh including the first one (`None` = retry until success).
    pub max_attempts: Option<u32>,
    /// Multiplier applied to the delay after each failed attempt (1.0 = fixed delay).
    pub backoff_factor: f64,
    /// Upper bound for the delay, in seconds.
    pub max_delay_secs: f64,
    /// Whether to randomize delays.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay_secs: MasterDataDefaults::RETRY_DELAY.as_secs_f64(),
            max_attempts: None,
            backoff_factor: 1.0,
            max_delay_secs: MasterDataDefaults::RETRY_MAX_DELAY.as_secs_f64(),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Fixed delay between attempts.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay_secs: delay.as_secs_f64(),
            ..Self::default()
        }
    }

    /// Set the maximum number of attempts.
    pub fn with_max_attempts(mut self, attempts: Option<u32>) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the exponential backoff factor.
    pub fn with_backoff(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn delay(&self) -> Duration {
        clamped_secs(self.delay_secs)
    }

    pub fn max_delay(&self) -> Duration {
        clamped_secs(self.max_delay_secs)
    }

    fn validate(&self) -> Result<()> {
        let limit = MasterDataDefaults::RETRY_DELAY_LIMIT.as_secs_f64();
        for (name, secs) in [
            ("retry.delay_secs", self.delay_secs),
            ("retry.max_delay_secs", self.max_delay_secs),
        ] {
            if !secs.is_finite() || !(0.0..=limit).contains(&secs) {
                return Err(MasterDataError::Config {
                    message: format!("{} must be between 0 and {} seconds, got {}", name, limit, secs),
                });
            }
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(MasterDataError::Config {
                message: "retry.backoff_factor must be a finite number of at least 1.0".to_string(),
            });
        }
        if self.max_attempts == Some(0) {
            return Err(MasterDataError::Config {
                message: "retry.max_attempts must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Seconds as a duration, clamped to `0..=RETRY_DELAY_LIMIT`. NaN maps to the limit.
pub(crate) fn clamped_secs(secs: f64) -> Duration {
    let limit = MasterDataDefaults::RETRY_DELAY_LIMIT;
    Duration::try_from_secs_f64(secs.clamp(0.0, limit.as_secs_f64())).unwrap_or(limit)
}

/// Runtime configuration of the cache engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterCacheConfig {
    /// Age after which a synced collection is stale (`None` = never by age).
    pub ttl_secs: Option<u64>,
    /// Interval of the background freshness check.
    pub check_interval_secs: u64,
    /// Retry behavior for failed background syncs.
    pub retry: RetryPolicy,
    /// Compare the upstream version token against the synced one.
    pub version_check: bool,
    /// How long a probed upstream version token is reused.
    pub version_probe_ttl_secs: u64,
    /// Maximum number of decoded records kept in memory.
    pub memory_cache_capacity: u64,
    /// Idle lifetime of records in the memory tier.
    pub memory_cache_ttl_secs: u64,
}

impl Default for MasterCacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: Some(MasterDataDefaults::TTL.as_secs()),
            check_interval_secs: MasterDataDefaults::CHECK_INTERVAL.as_secs(),
            retry: RetryPolicy::default(),
            version_check: false,
            version_probe_ttl_secs: MasterDataDefaults::VERSION_PROBE_TTL.as_secs(),
            memory_cache_capacity: MasterDataDefaults::MEMORY_CACHE_CAPACITY,
            memory_cache_ttl_secs: MasterDataDefaults::MEMORY_CACHE_TTL.as_secs(),
        }
    }
}

impl MasterCacheConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a config file, falling back to defaults when it does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let config = atomic_read_json::<Self>(path.as_ref())?.unwrap_or_default();
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.check_interval_secs == 0 {
            return Err(MasterDataError::Config {
                message: "check_interval_secs must be greater than zero".to_string(),
            });
        }
        self.retry.validate()
    }

    /// Set the staleness TTL (`None` = only version changes cause a resync).
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl_secs = ttl.map(|d| d.as_secs());
        self
    }

    /// Set the background check interval.
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval_secs = interval.as_secs().max(1);
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Enable or disable upstream version comparison.
    pub fn with_version_check(mut self, enable: bool) -> Self {
        self.version_check = enable;
        self
    }

    /// Set how long a probed version token is reused.
    pub fn with_version_probe_ttl(mut self, ttl: Duration) -> Self {
        self.version_probe_ttl_secs = ttl.as_secs();
        self
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn version_probe_ttl(&self) -> Duration {
        Duration::from_secs(self.version_probe_ttl_secs)
    }

    pub fn memory_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.memory_cache_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = MasterCacheConfig::default();
        assert_eq!(config.ttl(), Some(Duration::from_secs(86_400)));
        assert_eq!(config.check_interval(), Duration::from_secs(3_600));
        assert_eq!(config.retry.delay(), Duration::from_secs(5));
        assert_eq!(config.retry.max_attempts, None);
        assert!(!config.version_check);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = MasterCacheConfig::load(temp_dir.path().join("cache.json")).unwrap();
        assert_eq!(config, MasterCacheConfig::default());
    }

    #[test]
    fn test_load_partial_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("cache.json");
        std::fs::write(
            &path,
            r#"{"ttl_secs": null, "version_check": true, "retry": {"max_attempts": 3}}"#,
        )
        .unwrap();

        let config = MasterCacheConfig::load(&path).unwrap();
        assert_eq!(config.ttl(), None);
        assert!(config.version_check);
        assert_eq!(config.retry.max_attempts, Some(3));
        assert_eq!(config.retry.delay(), Duration::from_secs(5));
        assert_eq!(config.check_interval_secs, 3_600);
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config = MasterCacheConfig::default();
        config.check_interval_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(MasterDataError::Config { .. })
        ));
    }

    #[test]
    fn test_load_rejects_out_of_range_retry_delays() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("cache.json");
        std::fs::write(&path, r#"{"retry": {"delay_secs": 1e20, "max_delay_secs": 1e20}}"#)
            .unwrap();
        assert!(matches!(
            MasterCacheConfig::load(&path),
            Err(MasterDataError::Config { .. })
        ));

        let mut config = MasterCacheConfig::default();
        config.retry.max_delay_secs = -1.0;
        assert!(config.validate().is_err());
        config.retry.max_delay_secs = 60.0;
        config.retry.backoff_factor = f64::INFINITY;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder_methods() {
        let config = MasterCacheConfig::new()
            .with_ttl(Some(Duration::from_secs(30)))
            .with_check_interval(Duration::from_millis(10))
            .with_version_check(true)
            .with_retry(RetryPolicy::fixed(Duration::from_millis(250)).with_max_attempts(Some(2)));

        assert_eq!(config.ttl(), Some(Duration::from_secs(30)));
        assert_eq!(config.check_interval_secs, 1);
        assert!(config.version_check);
        assert_eq!(config.retry.delay(), Duration::from_millis(250));
        assert_eq!(config.retry.max_attempts, Some(2));
    }
}
