//! Durable events: the stamped unit of change in a replicated log.
//!
//! A writer creates a [`DurableEvent`] carrying its payload and the vector
//! timestamp from its own clock. Each log the event is written to restamps it
//! via `prepare`, assigning the log id and the next local sequence number while
//! keeping the causal metadata untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::time::{LogId, VectorTime};

// =============================================================================
// Identifiers
// =============================================================================

/// Identifier of the writer that emitted an event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmitterId(pub String);

impl EmitterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A random id for writers without a stable name.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EmitterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EmitterId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for EmitterId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identifier of the aggregate an event belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateId(pub String);

impl AggregateId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AggregateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AggregateId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for AggregateId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// =============================================================================
// Durable Event
// =============================================================================

/// An immutable event envelope.
///
/// Fields are only set through construction and `prepare`, which consumes the
/// envelope and returns a restamped one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurableEvent<P> {
    payload: P,
    emitter_id: EmitterId,
    emitter_aggregate_id: Option<AggregateId>,
    vector_timestamp: VectorTime,
    system_timestamp: Option<DateTime<Utc>>,
    source_log_id: Option<LogId>,
    local_log_id: Option<LogId>,
    local_sequence_nr: u64,
}

impl<P> DurableEvent<P> {
    /// Create an unstamped event with the writer's vector timestamp.
    pub fn new(payload: P, emitter_id: impl Into<EmitterId>, vector_timestamp: VectorTime) -> Self {
        Self {
            payload,
            emitter_id: emitter_id.into(),
            emitter_aggregate_id: None,
            vector_timestamp,
            system_timestamp: None,
            source_log_id: None,
            local_log_id: None,
            local_sequence_nr: 0,
        }
    }

    /// Address the event to an aggregate.
    pub fn with_aggregate_id(mut self, aggregate_id: impl Into<AggregateId>) -> Self {
        self.emitter_aggregate_id = Some(aggregate_id.into());
        self
    }

    /// Reconstruct an envelope that was already stamped by a log, e.g. when
    /// decoding a replicated batch or replaying storage.
    pub fn stamped(
        self,
        source_log_id: LogId,
        local_log_id: LogId,
        local_sequence_nr: u64,
        system_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            source_log_id: Some(source_log_id),
            local_log_id: Some(local_log_id),
            local_sequence_nr,
            system_timestamp: Some(system_timestamp),
            ..self
        }
    }

    /// Stamp for a log write: target log id, sequence number and wall clock.
    ///
    /// The source log id is set on first stamping and kept afterwards.
    pub fn prepare(self, log_id: &LogId, sequence_nr: u64, system_timestamp: DateTime<Utc>) -> Self {
        Self {
            source_log_id: self.source_log_id.or_else(|| Some(log_id.clone())),
            local_log_id: Some(log_id.clone()),
            local_sequence_nr: sequence_nr,
            system_timestamp: Some(system_timestamp),
            ..self
        }
    }

    /// Stamp for a replicated write, preserving the original wall clock.
    pub fn prepare_replicated(self, log_id: &LogId, sequence_nr: u64) -> Self {
        Self {
            source_log_id: self.source_log_id.or_else(|| Some(log_id.clone())),
            local_log_id: Some(log_id.clone()),
            local_sequence_nr: sequence_nr,
            ..self
        }
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn into_payload(self) -> P {
        self.payload
    }

    pub fn emitter_id(&self) -> &EmitterId {
        &self.emitter_id
    }

    pub fn emitter_aggregate_id(&self) -> Option<&AggregateId> {
        self.emitter_aggregate_id.as_ref()
    }

    pub fn vector_timestamp(&self) -> &VectorTime {
        &self.vector_timestamp
    }

    pub fn system_timestamp(&self) -> Option<DateTime<Utc>> {
        self.system_timestamp
    }

    /// The log where the event was first written.
    pub fn source_log_id(&self) -> Option<&LogId> {
        self.source_log_id.as_ref()
    }

    /// The log that assigned `local_sequence_nr`.
    pub fn local_log_id(&self) -> Option<&LogId> {
        self.local_log_id.as_ref()
    }

    /// Sequence number in the local log, 0 while unstamped.
    pub fn local_sequence_nr(&self) -> u64 {
        self.local_sequence_nr
    }

    pub fn is_stamped(&self) -> bool {
        self.local_log_id.is_some()
    }

    /// Whether the causal horizon `time` has already observed this event.
    pub fn observed_by(&self, time: &VectorTime) -> bool {
        self.vector_timestamp.dominated_by(time)
    }
}
