//! Integration tests for event log coordinators.
//!
//! Tests cover:
//! - Concurrent writers receiving contiguous sequence numbers
//! - Failed persistence leaving the clock untouched
//! - Sequence number reservations surviving a restart
//! - Recovery of clock and replication progress from the store
//! - Idempotent replication between two logs
//! - Registry lifecycle

use async_trait::async_trait;
use causal_log_core::config::LogConfig;
use causal_log_core::eventlog::{EventLog, InMemoryLogStore, LogRegistry, LogStore};
use causal_log_core::events::DurableEvent;
use causal_log_core::time::{LogId, VectorClock, VectorTime};
use causal_log_core::tracker::{
    FilterStats, ReplicationProgress, ReplicationStatsSink, ReplicationWrite,
};
use causal_log_core::{CausalError, ErrorCode, Result};
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn event(writer: &str, entries: &[(&str, u64)]) -> DurableEvent<String> {
    DurableEvent::new(
        format!("{}-event", writer),
        writer,
        VectorTime::from_entries(entries.iter().copied()),
    )
}

/// In-memory store whose writes can be switched off.
#[derive(Default)]
struct FlakyStore {
    inner: InMemoryLogStore<String>,
    failing: AtomicBool,
}

impl FlakyStore {
    fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl LogStore<String> for FlakyStore {
    async fn persist(
        &self,
        log_id: &LogId,
        events: &[DurableEvent<String>],
        progress: &ReplicationProgress,
    ) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CausalError::persistence_failed("disk full"));
        }
        self.inner.persist(log_id, events, progress).await
    }

    async fn replay(&self, log_id: &LogId) -> Result<Vec<DurableEvent<String>>> {
        self.inner.replay(log_id).await
    }

    async fn load_progress(&self, log_id: &LogId) -> Result<ReplicationProgress> {
        self.inner.load_progress(log_id).await
    }

    async fn persist_sequence_nr(&self, log_id: &LogId, sequence_nr: u64) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CausalError::persistence_failed("disk full"));
        }
        self.inner.persist_sequence_nr(log_id, sequence_nr).await
    }

    async fn load_sequence_nr(&self, log_id: &LogId) -> Result<u64> {
        self.inner.load_sequence_nr(log_id).await
    }
}

// ============================================================================
// Local Writes
// ============================================================================

#[tokio::test]
async fn test_concurrent_writers_get_contiguous_sequence_numbers() {
    let store = Arc::new(InMemoryLogStore::<String>::new());
    let log = EventLog::<String>::spawn("A", store.clone(), &LogConfig::default())
        .await
        .unwrap();

    let writes = (0..10).map(|i| {
        let log = log.clone();
        async move {
            let writer = format!("w{}", i);
            let mut clock = VectorClock::new(writer.as_str());
            let ts = clock.tick();
            let payload = DurableEvent::new(writer.clone(), writer.as_str(), ts);
            log.write(vec![payload]).await
        }
    });
    let results = join_all(writes).await;

    let mut seqs: Vec<u64> = results
        .into_iter()
        .flat_map(|r| r.unwrap())
        .map(|e| e.local_sequence_nr())
        .collect();
    seqs.sort_unstable();
    assert_eq!(seqs, (1..=10).collect::<Vec<_>>());

    let clock = log.clock().await.unwrap();
    assert_eq!(clock.sequence_nr(), 10);
    assert_eq!(clock.vector_time().iter().count(), 10);

    // The store holds events in the order they were stamped.
    let stored: Vec<u64> = store
        .events(&"A".into())
        .iter()
        .map(|e| e.local_sequence_nr())
        .collect();
    assert_eq!(stored, (1..=10).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_failed_persist_keeps_clock() {
    let store = Arc::new(FlakyStore::default());
    let log = EventLog::<String>::spawn("A", store.clone(), &LogConfig::default())
        .await
        .unwrap();

    log.write(vec![event("w", &[("w", 1)])]).await.unwrap();
    let before = log.clock().await.unwrap();

    store.fail(true);
    let err = log.write(vec![event("w", &[("w", 2)])]).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::PersistenceFailed);
    assert_eq!(log.clock().await.unwrap(), before);

    // The next successful write continues without a gap.
    store.fail(false);
    let stamped = log.write(vec![event("w", &[("w", 2)])]).await.unwrap();
    assert_eq!(stamped[0].local_sequence_nr(), 2);
    assert_eq!(store.inner.len(&"A".into()), 2);
}

#[tokio::test]
async fn test_advance_sequence_nr_reserves_numbers() {
    let store = Arc::new(InMemoryLogStore::<String>::new());
    let log = EventLog::<String>::spawn("A", store, &LogConfig::default())
        .await
        .unwrap();

    let tracker = log.advance_sequence_nr(5).await.unwrap();
    assert_eq!(tracker.sequence_nr(), 5);

    let stamped = log.write(vec![event("w", &[("w", 1)])]).await.unwrap();
    assert_eq!(stamped[0].local_sequence_nr(), 6);

    let err = log.advance_sequence_nr(u64::MAX).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::SequenceNrOverflow);
    assert_eq!(log.clock().await.unwrap().sequence_nr(), 6);
}

#[tokio::test]
async fn test_reserved_sequence_nrs_survive_restart() {
    let store = Arc::new(FlakyStore::default());
    let config = LogConfig::default();

    let log = EventLog::<String>::spawn("A", store.clone(), &config).await.unwrap();
    log.advance_sequence_nr(5).await.unwrap();

    // A reservation that cannot be stored is not handed out.
    store.fail(true);
    let err = log.advance_sequence_nr(3).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::PersistenceFailed);
    assert_eq!(log.clock().await.unwrap().sequence_nr(), 5);
    store.fail(false);
    log.shutdown().await.unwrap();

    let restarted = EventLog::<String>::spawn("A", store.clone(), &config).await.unwrap();
    assert_eq!(restarted.clock().await.unwrap().sequence_nr(), 5);

    let stamped = restarted.write(vec![event("w", &[("w", 1)])]).await.unwrap();
    assert_eq!(stamped[0].local_sequence_nr(), 6);
    restarted.shutdown().await.unwrap();

    // Written events past the reservation take precedence on the next restart.
    let again = EventLog::<String>::spawn("A", store, &config).await.unwrap();
    assert_eq!(again.clock().await.unwrap().sequence_nr(), 6);
}

// ============================================================================
// Replication
// ============================================================================

#[tokio::test]
async fn test_replication_between_logs_is_idempotent() {
    let store = Arc::new(InMemoryLogStore::<String>::new());
    let config = LogConfig::default();
    let a = EventLog::<String>::spawn("A", store.clone(), &config).await.unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink: Arc<dyn ReplicationStatsSink> = {
        let seen = seen.clone();
        Arc::new(move |stats: &FilterStats| seen.lock().push(stats.clone()))
    };
    let b = EventLog::<String>::spawn_with_sink("B", store.clone(), &config, sink)
        .await
        .unwrap();

    let written = a
        .write(vec![
            event("wa", &[("wa", 1)]),
            event("wa", &[("wa", 2)]),
            event("wa", &[("wa", 3)]),
        ])
        .await
        .unwrap();

    let first = b
        .replicate(vec![ReplicationWrite::new("A", written.clone(), 3)])
        .await
        .unwrap();
    assert_eq!(first.events.len(), 3);
    assert_eq!(first.progress.get(&"A".into()), 3);
    for copy in &first.events {
        assert_eq!(copy.source_log_id(), Some(&LogId::new("A")));
        assert_eq!(copy.local_log_id(), Some(&LogId::new("B")));
    }

    let again = b
        .replicate(vec![ReplicationWrite::new("A", written, 3)])
        .await
        .unwrap();
    assert!(again.events.is_empty());
    assert_eq!(b.clock().await.unwrap().sequence_nr(), 3);

    assert_eq!(store.load_progress(&"B".into()).await.unwrap().get(&"A".into()), 3);
    assert_eq!(b.replication_progress().await.unwrap().get(&"A".into()), 3);

    let stats = seen.lock();
    assert_eq!(stats.len(), 2);
    assert_eq!(stats[0].excluded, 0);
    assert_eq!(stats[1].excluded, 3);
}

#[tokio::test]
async fn test_respawn_recovers_clock_and_progress() {
    let store = Arc::new(InMemoryLogStore::<String>::new());
    let config = LogConfig::default();

    let log = EventLog::<String>::spawn("B", store.clone(), &config).await.unwrap();
    log.write(vec![event("wb", &[("wb", 1)])]).await.unwrap();
    let remote = event("wa", &[("wa", 4)]).prepare(&"A".into(), 7, chrono::Utc::now());
    log.replicate(vec![ReplicationWrite::new("A", vec![remote], 7)])
        .await
        .unwrap();

    let clock = log.clock().await.unwrap();
    let progress = log.replication_progress().await.unwrap();
    log.shutdown().await.unwrap();

    let restarted = EventLog::<String>::spawn("B", store, &config).await.unwrap();
    assert_eq!(restarted.clock().await.unwrap(), clock);
    assert_eq!(restarted.replication_progress().await.unwrap(), progress);
    assert_eq!(progress.get(&"A".into()), 7);
}

// ============================================================================
// Registry
// ============================================================================

#[tokio::test]
async fn test_registry_lifecycle() {
    let store: Arc<dyn LogStore<String>> = Arc::new(InMemoryLogStore::<String>::new());
    let registry = LogRegistry::new(store, LogConfig::default());

    let a = registry.create("A").await.unwrap();
    let err = registry.create("A").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::LogAlreadyExists);

    let same = registry.get_or_create("A").await.unwrap();
    same.write(vec![event("w", &[("w", 1)])]).await.unwrap();
    assert_eq!(a.clock().await.unwrap().sequence_nr(), 1);

    registry.get_or_create("B").await.unwrap();
    assert_eq!(registry.log_ids(), vec![LogId::new("A"), LogId::new("B")]);

    registry.shutdown_all().await.unwrap();
    assert!(!a.is_running());
}
