//! Prometheus metrics for event logs and versioned state.
//!
//! Metrics are recorded through the `metrics` facade everywhere in the crate.
//! [`init_metrics`] installs a Prometheus recorder and returns a
//! [`MetricsRegistry`] that renders the text exposition format; serving it is
//! left to the embedding application.
//!
//! # Example
//!
//! ```rust,no_run
//! use causal_log_core::telemetry::metrics::{init_metrics, MetricsConfig};
//!
//! let registry = init_metrics(&MetricsConfig::default(), "causal-log").unwrap();
//! println!("{}", registry.render());
//! ```

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Whether to install the Prometheus recorder
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Histogram buckets for persist latency (in seconds)
    #[serde(default = "default_duration_buckets")]
    pub duration_buckets: Vec<f64>,

    /// Labels added to every metric
    #[serde(default)]
    pub global_labels: BTreeMap<String, String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            duration_buckets: default_duration_buckets(),
            global_labels: BTreeMap::new(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_duration_buckets() -> Vec<f64> {
    vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
}

/// Handle to the installed recorder.
pub struct MetricsRegistry {
    prometheus_handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("prometheus_handle", &self.prometheus_handle.is_some())
            .finish()
    }
}

impl MetricsRegistry {
    /// Registry that renders nothing, used when metrics are disabled.
    pub fn disabled() -> Self {
        Self {
            prometheus_handle: None,
        }
    }

    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.prometheus_handle
            .as_ref()
            .map(|h| h.render())
            .unwrap_or_default()
    }
}

/// Build the Prometheus builder described by `config`.
pub fn prometheus_builder(config: &MetricsConfig) -> anyhow::Result<PrometheusBuilder> {
    let mut builder = PrometheusBuilder::new();
    for (key, value) in &config.global_labels {
        builder = builder.add_global_label(key, value);
    }
    Ok(builder.set_buckets(&config.duration_buckets)?)
}

/// Install the global Prometheus recorder.
///
/// # Errors
///
/// Returns an error if the buckets are empty or a recorder is already installed.
pub fn init_metrics(config: &MetricsConfig, service_name: &str) -> anyhow::Result<MetricsRegistry> {
    if !config.enabled {
        return Ok(MetricsRegistry::disabled());
    }

    let handle = prometheus_builder(config)?.install_recorder()?;
    register_metric_descriptions();

    tracing::info!(service_name = %service_name, "Metrics initialized");

    Ok(MetricsRegistry {
        prometheus_handle: Some(handle),
    })
}

/// Register all metric descriptions.
pub fn register_metric_descriptions() {
    describe_counter!(
        "causal_write_events_total",
        "Events persisted to a log, by origin (local or replicated)"
    );
    describe_counter!(
        "causal_replication_events_total",
        "Replicated events by outcome (received, admitted, excluded)"
    );
    describe_histogram!(
        "causal_persist_duration_seconds",
        "Time spent persisting one batch"
    );
    describe_gauge!("causal_log_sequence_nr", "Last committed sequence number per log");

    describe_counter!("causal_conflicts_total", "Aggregate updates that left a conflict");
    describe_counter!("causal_resolutions_total", "Conflicts resolved, by mode");

    describe_counter!("causal_errors_total", "Errors by code, category and severity");
}

/// Event log metrics.
pub struct LogMetrics;

impl LogMetrics {
    /// Record events committed to `log_id`.
    pub fn record_written(log_id: &str, origin: &'static str, count: usize, sequence_nr: u64) {
        counter!(
            "causal_write_events_total",
            "log" => log_id.to_string(),
            "origin" => origin,
        )
        .increment(count as u64);
        gauge!("causal_log_sequence_nr", "log" => log_id.to_string()).set(sequence_nr as f64);
    }

    /// Record how long a persist call took, successful or not.
    pub fn record_persist(log_id: &str, elapsed: Duration, success: bool) {
        histogram!(
            "causal_persist_duration_seconds",
            "log" => log_id.to_string(),
            "status" => if success { "ok" } else { "error" },
        )
        .record(elapsed.as_secs_f64());
    }
}
