//! Per-log sequence and causal horizon tracking.
//!
//! A [`TimeTracker`] is the state a log needs to stamp events: the last
//! assigned sequence number and the merge of every admitted event's vector
//! timestamp. All operations are pure. They return the stamped events
//! together with a new tracker and leave the receiver untouched, so the owner
//! can commit the new state only after the events are durable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CausalError, Result};
use crate::events::DurableEvent;
use crate::time::{LogId, VectorTime};

use super::replication::{
    FilterStats, ReplicationFilter, ReplicationProgress, ReplicationStatsSink, ReplicationWrite,
};

/// Sequence number, update count and causal horizon of one log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeTracker {
    update_count: u64,
    sequence_nr: u64,
    vector_time: VectorTime,
}

impl TimeTracker {
    /// Tracker of an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events recorded since the log was created.
    pub fn update_count(&self) -> u64 {
        self.update_count
    }

    /// Last assigned local sequence number, 0 for an empty log.
    pub fn sequence_nr(&self) -> u64 {
        self.sequence_nr
    }

    /// The causal horizon.
    pub fn vector_time(&self) -> &VectorTime {
        &self.vector_time
    }

    // =========================================================================
    // Local writes
    // =========================================================================

    /// Stamp locally emitted events with consecutive sequence numbers.
    ///
    /// Events are never dropped or reordered.
    pub fn prepare_write<P>(
        &self,
        log_id: &LogId,
        events: Vec<DurableEvent<P>>,
        system_timestamp: DateTime<Utc>,
    ) -> Result<(Vec<DurableEvent<P>>, TimeTracker)> {
        let mut next = self.clone();
        let stamped = next.write_in_place(log_id, events, system_timestamp)?;
        Ok((stamped, next))
    }

    /// [`TimeTracker::prepare_write`] over several writes, threading the
    /// tracker so sequence numbers are contiguous across the batch.
    pub fn prepare_write_batch<P>(
        &self,
        log_id: &LogId,
        writes: Vec<Vec<DurableEvent<P>>>,
        system_timestamp: DateTime<Utc>,
    ) -> Result<(Vec<Vec<DurableEvent<P>>>, TimeTracker)> {
        let mut next = self.clone();
        let stamped = writes
            .into_iter()
            .map(|events| next.write_in_place(log_id, events, system_timestamp))
            .collect::<Result<Vec<_>>>()?;
        Ok((stamped, next))
    }

    // =========================================================================
    // Replicated writes
    // =========================================================================

    /// Drop replicated events the log has already observed and stamp the
    /// rest, preserving their original system timestamps.
    ///
    /// The filter is evaluated against the horizon as it advances, so a
    /// duplicate inside the same batch is dropped too.
    pub fn prepare_replicate<P>(
        &self,
        log_id: &LogId,
        events: Vec<DurableEvent<P>>,
        filter: ReplicationFilter,
        stats: &dyn ReplicationStatsSink,
    ) -> Result<(Vec<DurableEvent<P>>, TimeTracker)> {
        let mut next = self.clone();
        let admitted = next.replicate_in_place(log_id, events, filter, stats)?;
        Ok((admitted, next))
    }

    /// [`TimeTracker::prepare_replicate`] over writes from several sources.
    ///
    /// Returns the filtered writes, the replication progress per source
    /// (maximum over the batch, including writes whose events were all
    /// dropped) and the new tracker.
    pub fn prepare_replicate_batch<P>(
        &self,
        log_id: &LogId,
        writes: Vec<ReplicationWrite<P>>,
        filter: ReplicationFilter,
        stats: &dyn ReplicationStatsSink,
    ) -> Result<(Vec<ReplicationWrite<P>>, ReplicationProgress, TimeTracker)> {
        let mut next = self.clone();
        let mut progress = ReplicationProgress::new();
        let mut filtered = Vec::with_capacity(writes.len());

        for write in writes {
            progress.update(&write.source_log_id, write.replication_progress);
            let events = next.replicate_in_place(log_id, write.events, filter, stats)?;
            filtered.push(ReplicationWrite {
                source_log_id: write.source_log_id,
                events,
                replication_progress: write.replication_progress,
            });
        }
        Ok((filtered, progress, next))
    }

    // =========================================================================
    // Sequence and recovery
    // =========================================================================

    /// Reserve `delta` sequence numbers without recording events.
    pub fn advance_sequence_nr(&self, delta: u64) -> Result<TimeTracker> {
        let sequence_nr = self
            .sequence_nr
            .checked_add(delta)
            .ok_or_else(|| CausalError::sequence_nr_overflow(self.sequence_nr, delta))?;
        Ok(TimeTracker {
            sequence_nr,
            ..self.clone()
        })
    }

    /// Record an event that was stamped elsewhere, e.g. replayed from storage.
    ///
    /// The event's local sequence number must be greater than the current one.
    pub fn update<P>(&self, event: &DurableEvent<P>) -> Result<TimeTracker> {
        let mut next = self.clone();
        next.update_in_place(event)?;
        Ok(next)
    }

    /// Rebuild a tracker from events in log order.
    pub fn recover<'a, P: 'a>(events: impl IntoIterator<Item = &'a DurableEvent<P>>) -> Result<TimeTracker> {
        let mut tracker = TimeTracker::new();
        for event in events {
            tracker.update_in_place(event)?;
        }
        Ok(tracker)
    }

    // =========================================================================
    // In-place steps, only ever applied to a private clone
    // =========================================================================

    fn next_sequence_nr(&mut self) -> Result<u64> {
        self.sequence_nr = self
            .sequence_nr
            .checked_add(1)
            .ok_or_else(|| CausalError::sequence_nr_overflow(self.sequence_nr, 1))?;
        self.update_count = self.update_count.saturating_add(1);
        Ok(self.sequence_nr)
    }

    fn write_in_place<P>(
        &mut self,
        log_id: &LogId,
        events: Vec<DurableEvent<P>>,
        system_timestamp: DateTime<Utc>,
    ) -> Result<Vec<DurableEvent<P>>> {
        let mut stamped = Vec::with_capacity(events.len());
        for event in events {
            let sequence_nr = self
                .next_sequence_nr()
                .map_err(|e| e.with_context("log_id", log_id.as_str()))?;
            self.vector_time = self.vector_time.merge(event.vector_timestamp());
            stamped.push(event.prepare(log_id, sequence_nr, system_timestamp));
        }
        Ok(stamped)
    }

    fn replicate_in_place<P>(
        &mut self,
        log_id: &LogId,
        events: Vec<DurableEvent<P>>,
        filter: ReplicationFilter,
        stats: &dyn ReplicationStatsSink,
    ) -> Result<Vec<DurableEvent<P>>> {
        let received = events.len();
        let source_log_id = events.first().and_then(|e| e.source_log_id().cloned());

        let mut admitted = Vec::with_capacity(received);
        for event in events {
            if filter.excludes(event.vector_timestamp(), &self.vector_time) {
                continue;
            }
            let sequence_nr = self
                .next_sequence_nr()
                .map_err(|e| e.with_context("log_id", log_id.as_str()))?;
            self.vector_time = self.vector_time.merge(event.vector_timestamp());
            admitted.push(event.prepare_replicated(log_id, sequence_nr));
        }

        stats.record(&FilterStats::new(
            source_log_id,
            log_id.clone(),
            received,
            admitted.len(),
        ));
        Ok(admitted)
    }

    fn update_in_place<P>(&mut self, event: &DurableEvent<P>) -> Result<()> {
        let event_sequence_nr = event.local_sequence_nr();
        if event_sequence_nr <= self.sequence_nr {
            return Err(CausalError::non_monotonic_sequence_nr(
                self.sequence_nr,
                event_sequence_nr,
            ));
        }
        self.sequence_nr = event_sequence_nr;
        self.update_count = self.update_count.saturating_add(1);
        self.vector_time = self.vector_time.merge(event.vector_timestamp());
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
