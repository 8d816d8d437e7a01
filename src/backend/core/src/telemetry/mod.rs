//! Telemetry: structured logging and Prometheus metrics.
//!
//! - **Logging**: `tracing-subscriber` with JSON, pretty or compact output
//! - **Metrics**: `metrics` facade with a Prometheus recorder
//!
//! # Example
//!
//! ```rust,no_run
//! use causal_log_core::telemetry::{init_telemetry, TelemetryConfig};
//!
//! let telemetry = init_telemetry(&TelemetryConfig::default()).expect("Failed to initialize telemetry");
//! println!("{}", telemetry.metrics.render());
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat, LoggingConfig};
pub use metrics::{init_metrics, LogMetrics, MetricsConfig, MetricsRegistry};

use serde::Deserialize;

/// Unified telemetry configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    /// Service name reported in logs
    #[serde(default = "default_service_name")]
    pub service_name: String,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

fn default_service_name() -> String {
    "causal-log".to_string()
}

/// Initialize metrics, then logging. Call once at startup.
///
/// # Errors
///
/// Returns an error if any component fails to initialize.
pub fn init_telemetry(config: &TelemetryConfig) -> anyhow::Result<TelemetryHandle> {
    let metrics = init_metrics(&config.metrics, &config.service_name)?;
    init_logging(&config.logging)?;

    ::tracing::info!(service_name = %config.service_name, "Telemetry initialized");
    Ok(TelemetryHandle { metrics })
}

/// Handle returned by [`init_telemetry`].
#[derive(Debug)]
pub struct TelemetryHandle {
    pub metrics: MetricsRegistry,
}
