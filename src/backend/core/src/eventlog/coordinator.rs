//! Single-writer owner of one event log.
//!
//! [`EventLog::spawn`] recovers the log's [`TimeTracker`] from storage and
//! starts a task that owns it. Handles send requests over a bounded channel
//! and receive the outcome on a oneshot channel. The task handles one request
//! at a time: it computes the new tracker, persists the stamped events, and
//! only then commits the tracker and replies. A failed persist leaves the
//! tracker where it was. Sequence number reservations are persisted the same
//! way and folded back in on recovery, so a restarted log never hands out a
//! reserved number again.

use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument};

use crate::config::LogConfig;
use crate::error::{CausalError, Result};
use crate::events::DurableEvent;
use crate::telemetry::metrics::LogMetrics;
use crate::time::LogId;
use crate::tracker::{
    MetricsStatsSink, ReplicationFilter, ReplicationProgress, ReplicationStatsSink,
    ReplicationWrite, TimeTracker, TracingStatsSink,
};

use super::store::LogStore;

// =============================================================================
// Requests
// =============================================================================

enum Request<P> {
    Write {
        events: Vec<DurableEvent<P>>,
        reply: oneshot::Sender<Result<Vec<DurableEvent<P>>>>,
    },
    Replicate {
        writes: Vec<ReplicationWrite<P>>,
        reply: oneshot::Sender<Result<Replicated<P>>>,
    },
    AdvanceSequenceNr {
        delta: u64,
        reply: oneshot::Sender<Result<TimeTracker>>,
    },
    Clock {
        reply: oneshot::Sender<TimeTracker>,
    },
    Progress {
        reply: oneshot::Sender<ReplicationProgress>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Outcome of a replicated write.
#[derive(Debug, Clone, PartialEq)]
pub struct Replicated<P> {
    /// Admitted events in local sequence order.
    pub events: Vec<DurableEvent<P>>,
    /// Replication progress after the write, as persisted.
    pub progress: ReplicationProgress,
}

// =============================================================================
// Handle
// =============================================================================

/// Handle to a running event log. Cheap to clone.
pub struct EventLog<P> {
    log_id: LogId,
    sender: mpsc::Sender<Request<P>>,
}

impl<P> Clone for EventLog<P> {
    fn clone(&self) -> Self {
        Self {
            log_id: self.log_id.clone(),
            sender: self.sender.clone(),
        }
    }
}

impl<P> std::fmt::Debug for EventLog<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("log_id", &self.log_id)
            .field("running", &!self.sender.is_closed())
            .finish()
    }
}

impl<P> EventLog<P>
where
    P: Clone + Send + Sync + 'static,
{
    /// Recover `log_id` from `store` and start its owning task.
    ///
    /// Filtering statistics go to `tracing` and the `metrics` facade.
    pub async fn spawn(
        log_id: impl Into<LogId>,
        store: Arc<dyn LogStore<P>>,
        config: &LogConfig,
    ) -> Result<Self> {
        Self::spawn_with_sink(
            log_id,
            store,
            config,
            Arc::new((TracingStatsSink, MetricsStatsSink)),
        )
        .await
    }

    /// [`EventLog::spawn`] with a custom statistics sink.
    pub async fn spawn_with_sink(
        log_id: impl Into<LogId>,
        store: Arc<dyn LogStore<P>>,
        config: &LogConfig,
        stats: Arc<dyn ReplicationStatsSink>,
    ) -> Result<Self> {
        let log_id = log_id.into();

        let events = store.replay(&log_id).await?;
        let recovered = TimeTracker::recover(&events)?;
        let reserved = store.load_sequence_nr(&log_id).await?;
        let tracker = match reserved.checked_sub(recovered.sequence_nr()) {
            Some(gap) if gap > 0 => recovered.advance_sequence_nr(gap)?,
            _ => recovered,
        };
        let progress = store.load_progress(&log_id).await?;
        info!(
            log_id = %log_id,
            sequence_nr = tracker.sequence_nr(),
            vector_time = %tracker.vector_time(),
            "Event log recovered"
        );

        let (sender, receiver) = mpsc::channel(config.channel_capacity.max(1));
        let task = LogTask {
            log_id: log_id.clone(),
            tracker,
            progress,
            store,
            filter: config.replication_filter,
            stats,
        };
        tokio::spawn(task.run(receiver));

        Ok(Self { log_id, sender })
    }

    pub fn log_id(&self) -> &LogId {
        &self.log_id
    }

    /// Whether the owning task is still accepting requests.
    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Stamp and persist locally emitted events.
    #[instrument(skip(self, events), fields(log_id = %self.log_id, count = events.len()))]
    pub async fn write(&self, events: Vec<DurableEvent<P>>) -> Result<Vec<DurableEvent<P>>> {
        self.request(|reply| Request::Write { events, reply }).await?
    }

    /// Filter, stamp and persist events replicated from other logs.
    #[instrument(skip(self, writes), fields(log_id = %self.log_id, writes = writes.len()))]
    pub async fn replicate(&self, writes: Vec<ReplicationWrite<P>>) -> Result<Replicated<P>> {
        self.request(|reply| Request::Replicate { writes, reply }).await?
    }

    /// Reserve `delta` sequence numbers.
    #[instrument(skip(self), fields(log_id = %self.log_id))]
    pub async fn advance_sequence_nr(&self, delta: u64) -> Result<TimeTracker> {
        self.request(|reply| Request::AdvanceSequenceNr { delta, reply })
            .await?
    }

    /// Snapshot of the committed tracker.
    pub async fn clock(&self) -> Result<TimeTracker> {
        self.request(|reply| Request::Clock { reply }).await
    }

    /// Snapshot of the committed replication progress.
    pub async fn replication_progress(&self) -> Result<ReplicationProgress> {
        self.request(|reply| Request::Progress { reply }).await
    }

    /// Stop the owning task after the requests already queued.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| Request::Shutdown { reply }).await
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Request<P>) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(build(reply))
            .await
            .map_err(|_| CausalError::log_unavailable(&self.log_id))?;
        Ok(response.await?)
    }
}

// =============================================================================
// Owning Task
// =============================================================================

struct LogTask<P> {
    log_id: LogId,
    tracker: TimeTracker,
    progress: ReplicationProgress,
    store: Arc<dyn LogStore<P>>,
    filter: ReplicationFilter,
    stats: Arc<dyn ReplicationStatsSink>,
}

impl<P> LogTask<P>
where
    P: Clone + Send + Sync + 'static,
{
    async fn run(mut self, mut receiver: mpsc::Receiver<Request<P>>) {
        while let Some(request) = receiver.recv().await {
            match request {
                Request::Write { events, reply } => {
                    let _ = reply.send(self.write(events).await);
                }
                Request::Replicate { writes, reply } => {
                    let _ = reply.send(self.replicate(writes).await);
                }
                Request::AdvanceSequenceNr { delta, reply } => {
                    let _ = reply.send(self.advance_sequence_nr(delta).await);
                }
                Request::Clock { reply } => {
                    let _ = reply.send(self.tracker.clone());
                }
                Request::Progress { reply } => {
                    let _ = reply.send(self.progress.clone());
                }
                Request::Shutdown { reply } => {
                    receiver.close();
                    let _ = reply.send(());
                    break;
                }
            }
        }
        info!(log_id = %self.log_id, sequence_nr = self.tracker.sequence_nr(), "Event log stopped");
    }

    async fn write(&mut self, events: Vec<DurableEvent<P>>) -> Result<Vec<DurableEvent<P>>> {
        let (stamped, tracker) = self
            .tracker
            .prepare_write(&self.log_id, events, Utc::now())
            .map_err(|e| self.reject(e))?;

        self.persist(&stamped, &self.progress).await?;
        self.tracker = tracker;

        LogMetrics::record_written(self.log_id.as_str(), "local", stamped.len(), self.tracker.sequence_nr());
        debug!(
            log_id = %self.log_id,
            count = stamped.len(),
            sequence_nr = self.tracker.sequence_nr(),
            "Events written"
        );
        Ok(stamped)
    }

    async fn replicate(&mut self, writes: Vec<ReplicationWrite<P>>) -> Result<Replicated<P>> {
        let (filtered, progress, tracker) = self
            .tracker
            .prepare_replicate_batch(&self.log_id, writes, self.filter, self.stats.as_ref())
            .map_err(|e| self.reject(e))?;

        let mut merged = self.progress.clone();
        merged.merge(&progress);
        let events: Vec<_> = filtered.into_iter().flat_map(|w| w.events).collect();

        self.persist(&events, &merged).await?;
        self.tracker = tracker;
        self.progress = merged.clone();

        LogMetrics::record_written(self.log_id.as_str(), "replicated", events.len(), self.tracker.sequence_nr());
        debug!(
            log_id = %self.log_id,
            count = events.len(),
            sequence_nr = self.tracker.sequence_nr(),
            "Replicated events written"
        );
        Ok(Replicated {
            events,
            progress: merged,
        })
    }

    async fn advance_sequence_nr(&mut self, delta: u64) -> Result<TimeTracker> {
        let tracker = self
            .tracker
            .advance_sequence_nr(delta)
            .map_err(|e| self.reject(e))?;

        let started = Instant::now();
        let result = self
            .store
            .persist_sequence_nr(&self.log_id, tracker.sequence_nr())
            .await;
        LogMetrics::record_persist(self.log_id.as_str(), started.elapsed(), result.is_ok());
        result.map_err(|e| self.reject(e))?;
        self.tracker = tracker;

        debug!(
            log_id = %self.log_id,
            sequence_nr = self.tracker.sequence_nr(),
            "Sequence numbers reserved"
        );
        Ok(self.tracker.clone())
    }

    async fn persist(&self, events: &[DurableEvent<P>], progress: &ReplicationProgress) -> Result<()> {
        let started = Instant::now();
        let result = self.store.persist(&self.log_id, events, progress).await;
        LogMetrics::record_persist(self.log_id.as_str(), started.elapsed(), result.is_ok());
        result.map_err(|e| self.reject(e))
    }

    fn reject(&self, error: CausalError) -> CausalError {
        let error = error.with_context("log_id", self.log_id.as_str());
        error.log();
        error
    }
}
