/*!
 * Configuration types for Quill
 */

use quill_core_resilience::{
    BackoffPolicy, CacheConfig, PoolConfig, RetryConfig, TimeoutPolicy, TimeoutTier,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{QuillError, Result};

/// Main configuration for the analysis service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct QuillConfig {
    /// Result cache
    #[serde(default)]
    pub cache: CacheSettings,

    /// Persistence resource pool
    #[serde(default)]
    pub pool: PoolSettings,

    /// Retries around the external analysis call
    #[serde(default)]
    pub retry: RetrySettings,

    /// Input handling and fallback behaviour
    #[serde(default)]
    pub analysis: AnalysisSettings,

    /// Request coordination
    #[serde(default)]
    pub service: ServiceSettings,

    /// Diagnostic output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Cache section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Entry capacity before LRU eviction
    #[serde(default = "default_cache_max_size")]
    pub max_size: usize,

    /// Entry lifetime in seconds
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,

    /// When false every lookup misses and nothing is stored
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Run a background expiry sweep at this interval (None = lazy expiry only)
    #[serde(default)]
    pub sweep_interval_secs: Option<u64>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_size: default_cache_max_size(),
            ttl_secs: default_cache_ttl(),
            enabled: true,
            sweep_interval_secs: None,
        }
    }
}

impl CacheSettings {
    pub fn to_cache_config(&self) -> CacheConfig {
        CacheConfig {
            max_size: self.max_size,
            ttl: Duration::from_secs(self.ttl_secs),
            enabled: self.enabled,
        }
    }
}

/// Pool section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Persist results through a pooled store
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Baseline warm resources
    #[serde(default = "default_pool_size")]
    pub size: usize,

    /// Extra resources allowed under burst load
    #[serde(default = "default_pool_overflow")]
    pub max_overflow: usize,

    /// Maximum blocking wait for a resource, in seconds
    #[serde(default = "default_pool_timeout")]
    pub acquire_timeout_secs: u64,

    /// Maximum resource age in seconds (0 = never recycle)
    #[serde(default = "default_pool_recycle")]
    pub recycle_secs: u64,

    /// Create `size` resources when the pool is built
    #[serde(default = "default_true")]
    pub prewarm: bool,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            size: default_pool_size(),
            max_overflow: default_pool_overflow(),
            acquire_timeout_secs: default_pool_timeout(),
            recycle_secs: default_pool_recycle(),
            prewarm: true,
        }
    }
}

impl PoolSettings {
    pub fn to_pool_config(&self) -> PoolConfig {
        PoolConfig {
            size: self.size,
            max_overflow: self.max_overflow,
            acquire_timeout: Duration::from_secs(self.acquire_timeout_secs),
            recycle_after: (self.recycle_secs > 0).then(|| Duration::from_secs(self.recycle_secs)),
        }
    }
}

/// A size tier in the retry section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutTierSettings {
    /// Inputs of at least this many characters use `timeout_secs`
    pub min_chars: usize,
    pub timeout_secs: u64,
}

/// Retry section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Attempts before falling back (including the first)
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,

    /// Backoff base in seconds
    #[serde(default = "default_retry_delay")]
    pub base_delay_secs: f64,

    /// Upper bound for a single backoff sleep, in seconds
    #[serde(default = "default_retry_max_delay")]
    pub max_delay_secs: f64,

    /// Per-attempt timeout for small inputs, in seconds
    #[serde(default = "default_base_timeout")]
    pub base_timeout_secs: u64,

    /// Added to the per-attempt timeout on every retry, in seconds
    #[serde(default = "default_timeout_increment")]
    pub timeout_increment_secs: u64,

    /// Random extra backoff as a fraction of the delay, in [0, 1)
    #[serde(default)]
    pub jitter: f64,

    /// Size-tiered per-attempt timeouts
    #[serde(default = "default_timeout_tiers")]
    pub timeout_tiers: Vec<TimeoutTierSettings>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            base_delay_secs: default_retry_delay(),
            max_delay_secs: default_retry_max_delay(),
            base_timeout_secs: default_base_timeout(),
            timeout_increment_secs: default_timeout_increment(),
            timeout_tiers: default_timeout_tiers(),
            jitter: 0.0,
        }
    }
}

impl RetrySettings {
    /// Convert to the orchestrator's configuration
    ///
    /// Negative or non-finite delays are rejected here since `Duration`
    /// cannot represent them.
    pub fn to_retry_config(&self) -> Result<RetryConfig> {
        Ok(RetryConfig {
            max_attempts: self.max_attempts,
            backoff: BackoffPolicy {
                base_delay: secs_f64("retry.base_delay_secs", self.base_delay_secs)?,
                max_delay: secs_f64("retry.max_delay_secs", self.max_delay_secs)?,
                jitter: self.jitter,
            },
            timeouts: TimeoutPolicy {
                base: Duration::from_secs(self.base_timeout_secs),
                tiers: self
                    .timeout_tiers
                    .iter()
                    .map(|tier| TimeoutTier {
                        min_size: tier.min_chars,
                        timeout: Duration::from_secs(tier.timeout_secs),
                    })
                    .collect(),
                per_retry_increment: Duration::from_secs(self.timeout_increment_secs),
            },
        })
    }
}

/// Analysis section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSettings {
    /// Inputs longer than this many characters are truncated before the call
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,

    /// Produce heuristic scores when the call fails (neutral scores otherwise)
    #[serde(default = "default_true")]
    pub fallback_enabled: bool,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            max_input_chars: default_max_input_chars(),
            fallback_enabled: true,
        }
    }
}

/// Service section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// Let concurrent identical requests share one external call
    #[serde(default = "default_true")]
    pub coalesce_in_flight: bool,

    /// Default overall budget for a single analysis, in seconds
    #[serde(default)]
    pub operation_deadline_secs: Option<u64>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            coalesce_in_flight: true,
            operation_deadline_secs: None,
        }
    }
}

/// Logging section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level for diagnostic output
    #[serde(default)]
    pub level: LogLevel,

    /// Write JSON logs to this file (None = stderr)
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_cache_max_size() -> usize {
    1000
}

fn default_cache_ttl() -> u64 {
    3600 // 1 hour
}

fn default_pool_size() -> usize {
    10
}

fn default_pool_overflow() -> usize {
    20
}

fn default_pool_timeout() -> u64 {
    30
}

fn default_pool_recycle() -> u64 {
    3600
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay() -> f64 {
    2.0
}

fn default_retry_max_delay() -> f64 {
    300.0
}

fn default_base_timeout() -> u64 {
    60
}

fn default_timeout_increment() -> u64 {
    30
}

fn default_timeout_tiers() -> Vec<TimeoutTierSettings> {
    vec![
        TimeoutTierSettings {
            min_chars: 3001,
            timeout_secs: 180,
        },
        TimeoutTierSettings {
            min_chars: 2001,
            timeout_secs: 120,
        },
        TimeoutTierSettings {
            min_chars: 1001,
            timeout_secs: 90,
        },
    ]
}

fn default_max_input_chars() -> usize {
    8000
}

fn secs_f64(field: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|e| QuillError::Config(format!("{} must be a non-negative number: {}", field, e)))
}

impl QuillConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: QuillConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Reject values the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.pool.enabled {
            self.pool.to_pool_config().validate()?;
        }
        self.retry.to_retry_config()?.validate()?;
        if self.analysis.max_input_chars == 0 {
            return Err(QuillError::Config(
                "analysis.max_input_chars must be greater than zero".to_string(),
            ));
        }
        if self.cache.sweep_interval_secs == Some(0) {
            return Err(QuillError::Config(
                "cache.sweep_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.service.operation_deadline_secs == Some(0) {
            return Err(QuillError::Config(
                "service.operation_deadline_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Create a configuration for local development: short TTL, tiny pool, no backoff
    pub fn development_preset() -> Self {
        Self {
            cache: CacheSettings {
                max_size: 100,
                ttl_secs: 60,
                ..Default::default()
            },
            pool: PoolSettings {
                size: 1,
                max_overflow: 1,
                acquire_timeout_secs: 5,
                prewarm: false,
                ..Default::default()
            },
            retry: RetrySettings {
                max_attempts: 2,
                base_delay_secs: 0.0,
                ..Default::default()
            },
            logging: LoggingConfig {
                level: LogLevel::Debug,
                log_file: None,
            },
            ..Default::default()
        }
    }

    /// Create a configuration for production traffic
    pub fn production_preset() -> Self {
        Self {
            cache: CacheSettings {
                max_size: 5000,
                sweep_interval_secs: Some(300),
                ..Default::default()
            },
            retry: RetrySettings {
                jitter: 0.25,
                ..Default::default()
            },
            service: ServiceSettings {
                coalesce_in_flight: true,
                operation_deadline_secs: Some(600),
            },
            logging: LoggingConfig {
                level: LogLevel::Warn,
                log_file: None,
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = QuillConfig::default();
        assert_eq!(config.cache.max_size, 1000);
        assert_eq!(config.cache.ttl_secs, 3600);
        assert!(config.cache.enabled);
        assert_eq!(config.pool.size, 10);
        assert_eq!(config.pool.max_overflow, 20);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.analysis.max_input_chars, 8000);
        assert!(config.service.coalesce_in_flight);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets_are_valid() {
        let dev = QuillConfig::development_preset();
        assert!(dev.validate().is_ok());
        assert_eq!(dev.retry.base_delay_secs, 0.0);
        assert!(!dev.pool.prewarm);

        let prod = QuillConfig::production_preset();
        assert!(prod.validate().is_ok());
        assert_eq!(prod.cache.sweep_interval_secs, Some(300));
        assert!(prod.retry.jitter > 0.0);
    }

    #[test]
    fn test_conversions() {
        let config = QuillConfig::default();

        let cache = config.cache.to_cache_config();
        assert_eq!(cache.ttl, Duration::from_secs(3600));

        let pool = config.pool.to_pool_config();
        assert_eq!(pool.acquire_timeout, Duration::from_secs(30));
        assert_eq!(pool.recycle_after, Some(Duration::from_secs(3600)));

        let retry = config.retry.to_retry_config().unwrap();
        assert_eq!(retry.backoff.base_delay, Duration::from_secs(2));
        assert_eq!(retry.timeouts.base_for(2500), Duration::from_secs(120));
    }

    #[test]
    fn test_zero_recycle_disables_recycling() {
        let pool = PoolSettings {
            recycle_secs: 0,
            ..Default::default()
        };
        assert_eq!(pool.to_pool_config().recycle_after, None);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = QuillConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = QuillConfig::default();
        config.retry.base_delay_secs = -1.0;
        assert!(matches!(config.validate(), Err(QuillError::Config(_))));

        let mut config = QuillConfig::default();
        config.pool.size = 0;
        config.pool.max_overflow = 0;
        assert!(matches!(config.validate(), Err(QuillError::Resilience(_))));

        // A disabled pool is never built, so its sizing is irrelevant
        config.pool.enabled = false;
        assert!(config.validate().is_ok());

        let mut config = QuillConfig::default();
        config.cache.sweep_interval_secs = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("quill.toml");

        let config = QuillConfig::production_preset();
        config.to_file(&path).unwrap();
        let loaded = QuillConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let toml_str = r#"
[cache]
ttl_secs = 120

[retry]
max_attempts = 5
timeout_tiers = [{ min_chars = 500, timeout_secs = 75 }]

[logging]
level = "debug"
"#;

        let config: QuillConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.cache.ttl_secs, 120);
        assert_eq!(config.cache.max_size, 1000);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_secs, 2.0);
        assert_eq!(config.retry.timeout_tiers.len(), 1);
        assert_eq!(config.pool.size, 10);
        assert_eq!(config.logging.level, LogLevel::Debug);
    }

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(LogLevel::Error.to_tracing_level(), tracing::Level::ERROR);
        assert_eq!(LogLevel::Trace.to_tracing_level(), tracing::Level::TRACE);
    }
}
