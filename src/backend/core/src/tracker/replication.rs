//! Replication inputs and the filtering report.

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::events::DurableEvent;
use crate::time::{LogId, VectorTime};

// =============================================================================
// Replication Filter
// =============================================================================

/// When a replicated event counts as already observed by the target log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationFilter {
    /// Drop events before or equal to the causal horizon. Replaying the same
    /// batch twice admits nothing the second time.
    #[default]
    Observed,
    /// Drop only events strictly before the horizon. An event equal to the
    /// horizon is admitted, also when it is replicated again.
    StrictlyBefore,
}

impl ReplicationFilter {
    /// Whether an event stamped `event_time` is dropped at `horizon`.
    pub fn excludes(self, event_time: &VectorTime, horizon: &VectorTime) -> bool {
        match self {
            ReplicationFilter::Observed => event_time.dominated_by(horizon),
            ReplicationFilter::StrictlyBefore => event_time.before(horizon),
        }
    }
}

// =============================================================================
// Replication Writes
// =============================================================================

/// A batch read from one source log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationWrite<P> {
    pub source_log_id: LogId,
    pub events: Vec<DurableEvent<P>>,
    /// Last source sequence number read for this batch.
    pub replication_progress: u64,
}

impl<P> ReplicationWrite<P> {
    pub fn new(
        source_log_id: impl Into<LogId>,
        events: Vec<DurableEvent<P>>,
        replication_progress: u64,
    ) -> Self {
        Self {
            source_log_id: source_log_id.into(),
            events,
            replication_progress,
        }
    }
}

/// Last read source sequence number per source log.
///
/// Persisted together with the events it accompanies so a restarted
/// replicator resumes where the durable log left off.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplicationProgress(BTreeMap<LogId, u64>);

impl ReplicationProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, source: &LogId) -> u64 {
        self.0.get(source).copied().unwrap_or(0)
    }

    /// Record progress for `source`, keeping the maximum.
    pub fn update(&mut self, source: &LogId, progress: u64) {
        let entry = self.0.entry(source.clone()).or_insert(0);
        *entry = (*entry).max(progress);
    }

    /// Fold another progress map in, keeping the maximum per source.
    pub fn merge(&mut self, other: &ReplicationProgress) {
        for (source, &progress) in &other.0 {
            self.update(source, progress);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LogId, u64)> {
        self.0.iter().map(|(l, &p)| (l, p))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// =============================================================================
// Filter Statistics
// =============================================================================

/// Outcome of filtering one replicated batch. Diagnostic only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterStats {
    pub source_log_id: Option<LogId>,
    pub target_log_id: LogId,
    /// Events received.
    pub before: usize,
    /// Events admitted.
    pub after: usize,
    pub excluded: usize,
    pub excluded_percentage: f64,
}

impl FilterStats {
    pub fn new(source_log_id: Option<LogId>, target_log_id: LogId, before: usize, after: usize) -> Self {
        let excluded = before.saturating_sub(after);
        let excluded_percentage = if before == 0 {
            0.0
        } else {
            excluded as f64 * 100.0 / before as f64
        };
        Self {
            source_log_id,
            target_log_id,
            before,
            after,
            excluded,
            excluded_percentage,
        }
    }
}

/// Receiver of [`FilterStats`].
pub trait ReplicationStatsSink: Send + Sync {
    fn record(&self, stats: &FilterStats);
}

/// Discards all statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStatsSink;

impl ReplicationStatsSink for NoopStatsSink {
    fn record(&self, _stats: &FilterStats) {}
}

impl<F> ReplicationStatsSink for F
where
    F: Fn(&FilterStats) + Send + Sync,
{
    fn record(&self, stats: &FilterStats) {
        self(stats)
    }
}

impl<A, B> ReplicationStatsSink for (A, B)
where
    A: ReplicationStatsSink,
    B: ReplicationStatsSink,
{
    fn record(&self, stats: &FilterStats) {
        self.0.record(stats);
        self.1.record(stats);
    }
}

/// Emits one `debug` event per filtered batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingStatsSink;

impl ReplicationStatsSink for TracingStatsSink {
    fn record(&self, stats: &FilterStats) {
        debug!(
            source_log_id = ?stats.source_log_id.as_ref().map(|l| l.as_str()),
            target_log_id = %stats.target_log_id,
            before = stats.before,
            after = stats.after,
            excluded_percentage = stats.excluded_percentage,
            "Filtered replicated events"
        );
    }
}

/// Counts received, admitted and excluded events via the `metrics` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsStatsSink;

impl ReplicationStatsSink for MetricsStatsSink {
    fn record(&self, stats: &FilterStats) {
        let log = stats.target_log_id.to_string();
        counter!("causal_replication_events_total", "log" => log.clone(), "outcome" => "received")
            .increment(stats.before as u64);
        counter!("causal_replication_events_total", "log" => log.clone(), "outcome" => "admitted")
            .increment(stats.after as u64);
        counter!("causal_replication_events_total", "log" => log, "outcome" => "excluded")
            .increment(stats.excluded as u64);
    }
}
