//! Process-local vector clock used by writers to timestamp their events.

use serde::{Deserialize, Serialize};

use super::vector_time::{ProcessId, VectorTime};

/// The vector clock of a single process.
///
/// A writer ticks its clock before emitting an event and updates it with the
/// timestamp of every event it handles, so that each emitted event causally
/// follows everything the writer has observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorClock {
    process_id: ProcessId,
    current_time: VectorTime,
}

impl VectorClock {
    /// Create a clock at zero for `process_id`.
    pub fn new(process_id: impl Into<ProcessId>) -> Self {
        Self {
            process_id: process_id.into(),
            current_time: VectorTime::zero(),
        }
    }

    /// Create a clock resuming from a recovered vector time.
    pub fn with_time(process_id: impl Into<ProcessId>, current_time: VectorTime) -> Self {
        Self {
            process_id: process_id.into(),
            current_time,
        }
    }

    pub fn process_id(&self) -> &ProcessId {
        &self.process_id
    }

    pub fn current_time(&self) -> &VectorTime {
        &self.current_time
    }

    /// This process's own counter.
    pub fn local_time(&self) -> u64 {
        self.current_time.local_time(&self.process_id)
    }

    /// Advance the local counter for a new local event and return its timestamp.
    pub fn tick(&mut self) -> VectorTime {
        self.current_time = self.current_time.increment(&self.process_id);
        self.current_time.clone()
    }

    /// Merge a received timestamp without ticking.
    pub fn merge(&mut self, time: &VectorTime) {
        self.current_time = self.current_time.merge(time);
    }

    /// Merge a received timestamp, then tick.
    pub fn update(&mut self, time: &VectorTime) -> VectorTime {
        self.merge(time);
        self.tick()
    }

    /// Whether this clock has causally observed `time`.
    pub fn covers(&self, time: &VectorTime) -> bool {
        time.dominated_by(&self.current_time)
    }
}
