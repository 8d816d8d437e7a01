//! Running event logs by id.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

use crate::config::LogConfig;
use crate::error::{CausalError, Result};
use crate::time::LogId;

use super::coordinator::EventLog;
use super::store::LogStore;

/// Independent event logs sharing one store and configuration.
///
/// Each log keeps its own owning task; the registry only hands out handles.
pub struct LogRegistry<P> {
    logs: DashMap<LogId, EventLog<P>>,
    store: Arc<dyn LogStore<P>>,
    config: LogConfig,
}

impl<P> LogRegistry<P>
where
    P: Clone + Send + Sync + 'static,
{
    pub fn new(store: Arc<dyn LogStore<P>>, config: LogConfig) -> Self {
        Self {
            logs: DashMap::new(),
            store,
            config,
        }
    }

    /// Recover and start `log_id`. Fails if it is already running.
    pub async fn create(&self, log_id: impl Into<LogId>) -> Result<EventLog<P>> {
        let log_id = log_id.into();
        if self.logs.contains_key(&log_id) {
            return Err(CausalError::log_already_exists(&log_id));
        }

        let log = EventLog::spawn(log_id.clone(), self.store.clone(), &self.config).await?;
        let inserted = match self.logs.entry(log_id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(log.clone());
                true
            }
        };

        if !inserted {
            // Lost a race with a concurrent create.
            log.shutdown().await?;
            return Err(CausalError::log_already_exists(&log_id));
        }
        info!(log_id = %log_id, "Event log registered");
        Ok(log)
    }

    /// Handle of a running log.
    pub fn get(&self, log_id: &LogId) -> Result<EventLog<P>> {
        self.logs
            .get(log_id)
            .map(|log| log.clone())
            .ok_or_else(|| CausalError::log_not_found(log_id))
    }

    /// Handle of `log_id`, starting it if needed.
    pub async fn get_or_create(&self, log_id: impl Into<LogId>) -> Result<EventLog<P>> {
        let log_id = log_id.into();
        if let Some(log) = self.logs.get(&log_id).map(|log| log.clone()) {
            return Ok(log);
        }
        match self.create(log_id.clone()).await {
            Err(e) if e.code() == crate::error::ErrorCode::LogAlreadyExists => self.get(&log_id),
            other => other,
        }
    }

    /// Sorted ids of registered logs.
    pub fn log_ids(&self) -> Vec<LogId> {
        let mut ids: Vec<_> = self.logs.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Stop `log_id` and forget it.
    pub async fn remove(&self, log_id: &LogId) -> Result<()> {
        let (_, log) = self
            .logs
            .remove(log_id)
            .ok_or_else(|| CausalError::log_not_found(log_id))?;
        log.shutdown().await
    }

    /// Stop every registered log.
    pub async fn shutdown_all(&self) -> Result<()> {
        let logs: Vec<_> = self.logs.iter().map(|entry| entry.value().clone()).collect();
        self.logs.clear();
        for log in logs {
            log.shutdown().await?;
        }
        Ok(())
    }
}
