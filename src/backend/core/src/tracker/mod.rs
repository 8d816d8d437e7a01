//! Stamping and replication filtering for one event log.

pub mod replication;
pub mod time_tracker;

pub use replication::{
    FilterStats, MetricsStatsSink, NoopStatsSink, ReplicationFilter, ReplicationProgress,
    ReplicationStatsSink, ReplicationWrite, TracingStatsSink,
};
pub use time_tracker::TimeTracker;
