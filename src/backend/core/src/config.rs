//! Configuration management.
//!
//! Every field has a default, so an empty environment yields a working
//! configuration. Environment variables use the `CAUSAL` prefix and `__` as
//! separator, e.g. `CAUSAL__LOG__REPLICATION_FILTER=strictly_before`.

use serde::Deserialize;
use std::path::Path;

use crate::error::{CausalError, ErrorCode, Result};
use crate::events::CreatorOrder;
use crate::telemetry::TelemetryConfig;
use crate::tracker::ReplicationFilter;

/// Main configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Event log configuration
    #[serde(default)]
    pub log: LogConfig,

    /// Aggregate version configuration
    #[serde(default)]
    pub versions: VersionsConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Requests buffered per log before writers wait
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// When a replicated event counts as already observed
    #[serde(default)]
    pub replication_filter: ReplicationFilter,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            replication_filter: ReplicationFilter::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VersionsConfig {
    /// Resolve conflicts as soon as they appear
    #[serde(default)]
    pub automatic_resolution: bool,

    /// Creator order selecting the winner of an automatic resolution
    #[serde(default)]
    pub creator_order: CreatorOrder,
}

fn default_channel_capacity() -> usize { 256 }

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(environment())
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a file, with environment variables taking precedence.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(environment())
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values the rest of the crate cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.log.channel_capacity == 0 {
            return Err(CausalError::new(
                ErrorCode::InvalidConfiguration,
                "log.channel_capacity must be at least 1",
            ));
        }
        if self.telemetry.metrics.duration_buckets.is_empty() {
            return Err(CausalError::new(
                ErrorCode::InvalidConfiguration,
                "telemetry.metrics.duration_buckets must not be empty",
            ));
        }
        Ok(())
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix("CAUSAL")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::LogFormat;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.log.channel_capacity, 256);
        assert_eq!(config.log.replication_filter, ReplicationFilter::Observed);
        assert!(!config.versions.automatic_resolution);
        assert_eq!(config.versions.creator_order, CreatorOrder::Ascending);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[log]
channel_capacity = 16
replication_filter = "strictly_before"

[versions]
automatic_resolution = true
creator_order = "descending"

[telemetry.logging]
format = "compact"
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.log.channel_capacity, 16);
        assert_eq!(config.log.replication_filter, ReplicationFilter::StrictlyBefore);
        assert!(config.versions.automatic_resolution);
        assert_eq!(config.versions.creator_order, CreatorOrder::Descending);
        assert_eq!(config.telemetry.logging.format, LogFormat::Compact);
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[log]\nchannel_capacity = 0").unwrap();

        let err = Config::from_file(file.path()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidConfiguration);
    }

    #[test]
    fn test_missing_file_is_a_configuration_error() {
        let err = Config::from_file("/definitely/not/here.toml").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidConfiguration);
    }
}
