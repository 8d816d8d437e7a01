#![allow(clippy::result_large_err)]
//! # Causal Log Core
//!
//! Causality tracking and conflict resolution for replicated event logs.
//!
//! ## Architecture
//!
//! - **Time**: Vector times and per-writer vector clocks
//! - **Events**: Durable event envelopes, aggregates and their concurrent versions
//! - **Tracker**: Stamping local writes and filtering replicated ones per log
//! - **Event Log**: Single-writer task per log with pluggable persistence
//! - **Telemetry**: Structured logging and Prometheus metrics

pub mod config;
pub mod error;
pub mod eventlog;
pub mod events;
pub mod telemetry;
pub mod time;
pub mod tracker;

pub use error::{CausalError, ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, LogConfig, VersionsConfig};
    pub use crate::error::{CausalError, ErrorCode, ErrorContext, Result};
    pub use crate::eventlog::{EventLog, InMemoryLogStore, LogRegistry, LogStore, Replicated};
    pub use crate::events::{
        Aggregate, AggregateId, ConcurrentVersions, CreatorOrder, DurableEvent, EmitterId,
        ResolutionPolicy, UpdateKind, VersionStore, Versioned,
    };
    pub use crate::time::{CausalOrdering, LogId, ProcessId, VectorClock, VectorTime};
    pub use crate::tracker::{
        FilterStats, ReplicationFilter, ReplicationProgress, ReplicationStatsSink,
        ReplicationWrite, TimeTracker,
    };
}
