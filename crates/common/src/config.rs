//! Ambient configuration: file + environment overlay, no CLI surface

use std::path::Path;
use std::time::Duration;

use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::types::GlobalResourceLimits;

/// Top-level configuration for the orchestrator core.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub observability: ObservabilityConfig,
}

/// Scheduling and execution defaults. `global_resource_limits` covers the
/// resource manager's admission ceiling; per-job overrides still win.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    pub global_resource_limits: GlobalResourceLimits,
    #[serde(with = "humantime_millis")]
    pub default_job_timeout: Duration,
    pub default_retry_attempts: u32,
    #[serde(with = "humantime_millis")]
    pub default_retry_initial_delay: Duration,
    #[serde(with = "humantime_millis")]
    pub default_retry_max_delay: Duration,
    pub default_retry_backoff_multiplier: f64,
    #[serde(with = "humantime_millis")]
    pub cancellation_grace_period: Duration,
}

/// Log format selector, kept independent of any particular exporter.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

/// Observability configuration. Deliberately limited to the logging
/// subsystem: metric export backends and log shipping are out of scope.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration from `config.toml` (if present) overlaid with
    /// `TASKFLOW__`-prefixed environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder()
            .set_default("scheduler.global_resource_limits.max_concurrent_jobs", 4)?
            .set_default("scheduler.default_job_timeout", 3_600_000_i64)?
            .set_default("scheduler.default_retry_attempts", 3)?
            .set_default("scheduler.default_retry_initial_delay", 1_000_i64)?
            .set_default("scheduler.default_retry_max_delay", 60_000_i64)?
            .set_default("scheduler.default_retry_backoff_multiplier", 2.0)?
            .set_default("scheduler.cancellation_grace_period", 2_000_i64)?
            .set_default("observability.log_level", "info")?;

        if Path::new("config.toml").exists() {
            builder = builder.add_source(File::with_name("config"));
        }

        builder = builder.add_source(
            Environment::with_prefix("TASKFLOW")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration, returning every violation found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.scheduler.global_resource_limits.max_concurrent_jobs == 0 {
            errors.push("scheduler.global_resource_limits.max_concurrent_jobs must be > 0".to_string());
        }
        if self.scheduler.default_retry_attempts == 0 {
            errors.push("scheduler.default_retry_attempts must be >= 1".to_string());
        }
        if self.scheduler.default_retry_backoff_multiplier < 1.0 {
            errors.push("scheduler.default_retry_backoff_multiplier must be >= 1.0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig {
                global_resource_limits: GlobalResourceLimits::default(),
                default_job_timeout: Duration::from_secs(3600),
                default_retry_attempts: 3,
                default_retry_initial_delay: Duration::from_secs(1),
                default_retry_max_delay: Duration::from_secs(60),
                default_retry_backoff_multiplier: 2.0,
                cancellation_grace_period: Duration::from_secs(2),
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                log_format: LogFormat::Json,
            },
        }
    }
}

/// Serializes `Duration` as a plain integer count of milliseconds, so
/// config files and `TASKFLOW__`-prefixed environment overrides set these
/// fields with a bare number rather than a duration string.
mod humantime_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}
