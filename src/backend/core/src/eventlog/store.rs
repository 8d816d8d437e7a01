//! Persistence boundary of an event log.
//!
//! The coordinator needs the following from storage: append stamped events
//! together with the replication progress that accompanied them, replay a
//! log's events in sequence order, load the last persisted progress, and keep
//! sequence number reservations that no event has used yet. File formats,
//! indexes and compaction live behind this trait.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::error::Result;
use crate::events::DurableEvent;
use crate::time::LogId;
use crate::tracker::ReplicationProgress;

/// Durable storage for one or more event logs.
#[async_trait]
pub trait LogStore<P>: Send + Sync {
    /// Append `events` to `log_id` and record `progress` atomically.
    ///
    /// The coordinator does not accept its next request before this returns.
    async fn persist(
        &self,
        log_id: &LogId,
        events: &[DurableEvent<P>],
        progress: &ReplicationProgress,
    ) -> Result<()>;

    /// All events of `log_id` in local sequence order.
    async fn replay(&self, log_id: &LogId) -> Result<Vec<DurableEvent<P>>>;

    /// Last persisted replication progress of `log_id`.
    async fn load_progress(&self, log_id: &LogId) -> Result<ReplicationProgress>;

    /// Record that sequence numbers up to `sequence_nr` are reserved.
    ///
    /// A reservation below an already stored one is ignored.
    async fn persist_sequence_nr(&self, log_id: &LogId, sequence_nr: u64) -> Result<()>;

    /// Highest reserved sequence number of `log_id`, 0 if none.
    async fn load_sequence_nr(&self, log_id: &LogId) -> Result<u64>;
}

#[derive(Debug)]
struct StoredLog<P> {
    events: Vec<DurableEvent<P>>,
    progress: ReplicationProgress,
    reserved_sequence_nr: u64,
}

impl<P> Default for StoredLog<P> {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            progress: ReplicationProgress::default(),
            reserved_sequence_nr: 0,
        }
    }
}

/// In-memory [`LogStore`] for tests and embedding.
#[derive(Debug)]
pub struct InMemoryLogStore<P> {
    logs: RwLock<HashMap<LogId, StoredLog<P>>>,
}

impl<P> Default for InMemoryLogStore<P> {
    fn default() -> Self {
        Self {
            logs: RwLock::new(HashMap::new()),
        }
    }
}

impl<P: Clone> InMemoryLogStore<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events stored for `log_id`.
    pub fn events(&self, log_id: &LogId) -> Vec<DurableEvent<P>> {
        self.logs
            .read()
            .get(log_id)
            .map(|log| log.events.clone())
            .unwrap_or_default()
    }

    /// Number of events stored for `log_id`.
    pub fn len(&self, log_id: &LogId) -> usize {
        self.logs.read().get(log_id).map_or(0, |log| log.events.len())
    }
}

#[async_trait]
impl<P> LogStore<P> for InMemoryLogStore<P>
where
    P: Clone + Send + Sync,
{
    async fn persist(
        &self,
        log_id: &LogId,
        events: &[DurableEvent<P>],
        progress: &ReplicationProgress,
    ) -> Result<()> {
        let mut logs = self.logs.write();
        let log = logs.entry(log_id.clone()).or_default();
        log.events.extend_from_slice(events);
        log.progress.merge(progress);
        Ok(())
    }

    async fn replay(&self, log_id: &LogId) -> Result<Vec<DurableEvent<P>>> {
        Ok(self.events(log_id))
    }

    async fn load_progress(&self, log_id: &LogId) -> Result<ReplicationProgress> {
        Ok(self
            .logs
            .read()
            .get(log_id)
            .map(|log| log.progress.clone())
            .unwrap_or_default())
    }

    async fn persist_sequence_nr(&self, log_id: &LogId, sequence_nr: u64) -> Result<()> {
        let mut logs = self.logs.write();
        let log = logs.entry(log_id.clone()).or_default();
        log.reserved_sequence_nr = log.reserved_sequence_nr.max(sequence_nr);
        Ok(())
    }

    async fn load_sequence_nr(&self, log_id: &LogId) -> Result<u64> {
        Ok(self
            .logs
            .read()
            .get(log_id)
            .map_or(0, |log| log.reserved_sequence_nr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::VectorTime;
    use chrono::Utc;

    #[tokio::test]
    async fn test_in_memory_store_keeps_logs_apart() {
        let store = InMemoryLogStore::<u32>::new();
        let a: LogId = "A".into();
        let b: LogId = "B".into();

        let event = DurableEvent::new(1, "w", VectorTime::from_entries([("A", 1)]))
            .prepare(&a, 1, Utc::now());
        let mut progress = ReplicationProgress::new();
        progress.update(&"C".into(), 4);

        store.persist(&a, &[event.clone()], &progress).await.unwrap();

        assert_eq!(store.replay(&a).await.unwrap(), vec![event]);
        assert!(store.replay(&b).await.unwrap().is_empty());
        assert_eq!(store.load_progress(&a).await.unwrap().get(&"C".into()), 4);
        assert!(store.load_progress(&b).await.unwrap().is_empty());
        assert_eq!(store.len(&a), 1);
    }

    #[test]
    fn test_progress_only_moves_forward() {
        let store = InMemoryLogStore::<u32>::new();
        let log: LogId = "A".into();
        let progress = |seq| {
            let mut p = ReplicationProgress::new();
            p.update(&"B".into(), seq);
            p
        };

        tokio_test::block_on(async {
            store.persist(&log, &[], &progress(9)).await.unwrap();
            store.persist(&log, &[], &progress(3)).await.unwrap();
            assert_eq!(store.load_progress(&log).await.unwrap().get(&"B".into()), 9);
        });
    }

    #[test]
    fn test_sequence_reservation_only_moves_forward() {
        let store = InMemoryLogStore::<u32>::new();
        let log: LogId = "A".into();

        tokio_test::block_on(async {
            assert_eq!(store.load_sequence_nr(&log).await.unwrap(), 0);
            store.persist_sequence_nr(&log, 12).await.unwrap();
            store.persist_sequence_nr(&log, 4).await.unwrap();
            assert_eq!(store.load_sequence_nr(&log).await.unwrap(), 12);
            assert!(store.load_sequence_nr(&"B".into()).await.unwrap() == 0);
        });
    }
}
