//! Engine configuration
//!
//! `EngineConfig` is loaded with layered precedence:
//!
//! 1. Hardcoded defaults (lowest priority)
//! 2. YAML config file (`--config`, or `<config dir>/leadmetrics.yml`)
//! 3. Environment variables (`LEADMETRICS_*` prefix) (highest priority)
//!
//! Durations are written in humantime form (`30s`, `5m`, `1h`).
//!
//! ```yaml
//! aggregation_interval: 1m
//! persist_interval: 30s
//! max_buffer_size: 1000
//! enable_debug_logging: true
//! ```

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{AnalyticsError, ErrorCode, Result};

/// Largest delay a single timer is trusted with: 2^31 - 1 milliseconds (~24.8 days)
pub const MAX_TIMER_DELAY: Duration = Duration::from_millis(2_147_483_647);

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "LEADMETRICS_";

/// Runtime options for the analytics engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Period of the realtime report cadence
    #[serde(with = "humantime_serde")]
    pub aggregation_interval: Duration,

    /// Period of the buffered event flush
    #[serde(with = "humantime_serde")]
    pub persist_interval: Duration,

    /// Buffer length that triggers an early flush. Twice this is the hard cap.
    pub max_buffer_size: usize,

    /// Events per repository write
    pub batch_size: usize,

    /// Log every ingested event at debug level
    pub enable_debug_logging: bool,

    /// Longest single timer the scheduler arms before re-checking the clock
    #[serde(with = "humantime_serde")]
    pub max_timer_delay: Duration,

    /// Trailing span covered by realtime snapshots
    #[serde(with = "humantime_serde")]
    pub realtime_window: Duration,

    /// Offset from UTC used for midnight alignment, in minutes
    pub utc_offset_minutes: i32,

    /// Standard deviations from the mean before a day is anomalous
    pub anomaly_threshold: f64,

    /// Days of history the daily anomaly pass looks at
    pub anomaly_trailing_days: u32,

    /// Anomalies retained in memory
    pub max_anomalies: usize,

    /// Optional bound on a single repository write
    #[serde(with = "humantime_serde")]
    pub write_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            aggregation_interval: Duration::from_secs(60),
            persist_interval: Duration::from_secs(30),
            max_buffer_size: 1000,
            batch_size: 50,
            enable_debug_logging: false,
            max_timer_delay: MAX_TIMER_DELAY,
            realtime_window: Duration::from_secs(3600),
            utc_offset_minutes: 0,
            anomaly_threshold: 2.0,
            anomaly_trailing_days: 30,
            max_anomalies: 20,
            write_timeout: None,
        }
    }
}

impl EngineConfig {
    /// Parse a YAML document, filling unspecified fields with defaults
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Load from an explicit file, the default location, or defaults, then
    /// apply environment overrides and validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.apply_env_with(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AnalyticsError::config_with_code(
                ErrorCode::CONFIG_NOT_FOUND,
                format!("cannot read {}", path.display()),
                None,
            )
            .with_source(e)
        })?;
        debug!("Loaded configuration from {}", path.display());
        Self::from_yaml(&content).map_err(|e| e.with_context(path.display()))
    }

    /// Apply `LEADMETRICS_*` overrides using `lookup` to read variables
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(v) = var("AGGREGATION_INTERVAL") {
            self.aggregation_interval = parse_duration("aggregation_interval", &v)?;
        }
        if let Some(v) = var("PERSIST_INTERVAL") {
            self.persist_interval = parse_duration("persist_interval", &v)?;
        }
        if let Some(v) = var("MAX_BUFFER_SIZE") {
            self.max_buffer_size = parse_value("max_buffer_size", &v)?;
        }
        if let Some(v) = var("BATCH_SIZE") {
            self.batch_size = parse_value("batch_size", &v)?;
        }
        if let Some(v) = var("ENABLE_DEBUG_LOGGING") {
            self.enable_debug_logging = parse_value("enable_debug_logging", &v)?;
        }
        if let Some(v) = var("UTC_OFFSET_MINUTES") {
            self.utc_offset_minutes = parse_value("utc_offset_minutes", &v)?;
        }
        if let Some(v) = var("WRITE_TIMEOUT") {
            self.write_timeout = Some(parse_duration("write_timeout", &v)?);
        }
        Ok(())
    }

    /// Check every field, reporting all problems at once
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.aggregation_interval.is_zero() {
            errors.push("aggregation_interval must be greater than 0");
        }
        if self.persist_interval.is_zero() {
            errors.push("persist_interval must be greater than 0");
        }
        if self.max_buffer_size == 0 {
            errors.push("max_buffer_size must be greater than 0");
        }
        if self.batch_size == 0 {
            errors.push("batch_size must be greater than 0");
        }
        if self.max_timer_delay.is_zero() {
            errors.push("max_timer_delay must be greater than 0");
        }
        if self.utc_offset().is_none() {
            errors.push("utc_offset_minutes must be within +/- 24 hours");
        }
        if !(self.anomaly_threshold.is_finite() && self.anomaly_threshold > 0.0) {
            errors.push("anomaly_threshold must be a positive number");
        }
        if self.anomaly_trailing_days < 2 {
            errors.push("anomaly_trailing_days must be at least 2");
        }
        if self.write_timeout.is_some_and(|t| t.is_zero()) {
            errors.push("write_timeout must be greater than 0 when set");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(AnalyticsError::config_with_code(
                ErrorCode::CONFIG_VALIDATION_FAILED,
                errors.join("; "),
                None,
            ))
        }
    }

    /// The configured UTC offset, if it is representable
    pub fn utc_offset(&self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes.checked_mul(60)?)
    }

    /// Buffer length beyond which the oldest events are dropped
    pub fn buffer_hard_cap(&self) -> usize {
        self.max_buffer_size.saturating_mul(2)
    }
}

/// Default config file location for this platform
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "leadmetrics")
        .map(|dirs| dirs.config_dir().join("leadmetrics.yml"))
}

/// Default data directory for the file repository
pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "leadmetrics")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".leadmetrics"))
}

fn parse_duration(field: &str, value: &str) -> Result<Duration> {
    humantime_serde::re::humantime::parse_duration(value.trim())
        .map_err(|e| invalid_value(field, value, e))
}

fn parse_value<T>(field: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| invalid_value(field, value, e))
}

fn invalid_value(field: &str, value: &str, err: impl std::fmt::Display) -> AnalyticsError {
    AnalyticsError::config_with_code(
        ErrorCode::CONFIG_INVALID_VALUE,
        format!("invalid value '{}' for {}: {}", value, field, err),
        Some(field.to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.buffer_hard_cap(), 2000);
        assert_eq!(config.max_timer_delay.as_millis(), 2_147_483_647);
    }

    #[test]
    fn test_yaml_with_humantime_durations() {
        let config = EngineConfig::from_yaml(
            r#"
aggregation_interval: 5m
persist_interval: 10s
max_buffer_size: 5
enable_debug_logging: true
"#,
        )
        .unwrap();

        assert_eq!(config.aggregation_interval, Duration::from_secs(300));
        assert_eq!(config.persist_interval, Duration::from_secs(10));
        assert_eq!(config.max_buffer_size, 5);
        assert!(config.enable_debug_logging);
        // Untouched fields keep defaults
        assert_eq!(config.batch_size, 50);
    }

    #[test]
    fn test_env_overrides_take_precedence() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("LEADMETRICS_MAX_BUFFER_SIZE", "250"),
            ("LEADMETRICS_PERSIST_INTERVAL", "2m"),
            ("LEADMETRICS_WRITE_TIMEOUT", "15s"),
        ]);
        let mut config = EngineConfig::default();
        config
            .apply_env_with(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.max_buffer_size, 250);
        assert_eq!(config.persist_interval, Duration::from_secs(120));
        assert_eq!(config.write_timeout, Some(Duration::from_secs(15)));
    }

    #[test]
    fn test_bad_env_value_names_field() {
        let mut config = EngineConfig::default();
        let err = config
            .apply_env_with(|key| (key == "LEADMETRICS_BATCH_SIZE").then(|| "lots".to_string()))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::CONFIG_INVALID_VALUE);
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn test_validation_accumulates_errors() {
        let config = EngineConfig {
            max_buffer_size: 0,
            batch_size: 0,
            utc_offset_minutes: 100_000,
            ..Default::default()
        };
        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("max_buffer_size"));
        assert!(message.contains("batch_size"));
        assert!(message.contains("utc_offset_minutes"));
    }
}
