//! Versioned state for many aggregates.
//!
//! Routes each delivered event to the [`ConcurrentVersions`] of its emitter
//! aggregate, creating it on first use. Different aggregates live in
//! different map shards and can be updated concurrently; events for one
//! aggregate must be applied in log order.

use dashmap::DashMap;
use metrics::counter;
use tracing::{debug, warn};

use crate::config::VersionsConfig;
use crate::error::{CausalError, Result};
use crate::time::VectorTime;

use super::aggregate::Aggregate;
use super::durable::{AggregateId, DurableEvent};
use super::versions::{ConcurrentVersions, ResolutionPolicy, UpdateKind};

/// Per-aggregate concurrent versions keyed by aggregate id.
pub struct VersionStore<A> {
    aggregates: DashMap<AggregateId, ConcurrentVersions<A>>,
    auto_resolution: Option<Box<dyn ResolutionPolicy>>,
}

impl<A: Aggregate> Default for VersionStore<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Aggregate> VersionStore<A> {
    /// Store that keeps conflicts until they are resolved explicitly.
    pub fn new() -> Self {
        Self {
            aggregates: DashMap::new(),
            auto_resolution: None,
        }
    }

    /// Store that resolves every conflict as soon as it appears.
    pub fn with_auto_resolution(policy: impl ResolutionPolicy + 'static) -> Self {
        Self {
            aggregates: DashMap::new(),
            auto_resolution: Some(Box::new(policy)),
        }
    }

    pub fn from_config(config: &VersionsConfig) -> Self {
        if config.automatic_resolution {
            Self::with_auto_resolution(config.creator_order)
        } else {
            Self::new()
        }
    }

    /// Apply a delivered event to its aggregate.
    ///
    /// Events without an emitter aggregate id return `Ok(None)`.
    pub fn apply(&self, event: &DurableEvent<A::Event>) -> Result<Option<UpdateKind>> {
        let Some(aggregate_id) = event.emitter_aggregate_id() else {
            return Ok(None);
        };

        let mut versions = self.aggregates.entry(aggregate_id.clone()).or_default();
        let kind = versions.apply_event(event).map_err(|e| {
            warn!(
                aggregate_id = %aggregate_id,
                vector_timestamp = %event.vector_timestamp(),
                error = %e,
                "Rejected aggregate update"
            );
            e.with_context("aggregate_id", aggregate_id.as_str())
        })?;

        if kind == UpdateKind::Conflicting {
            counter!("causal_conflicts_total").increment(1);
            debug!(
                aggregate_id = %aggregate_id,
                branches = versions.len(),
                "Aggregate in conflict"
            );
            if let Some(policy) = &self.auto_resolution {
                if let Some(winner) = versions.apply_automatic_resolution(policy.as_ref())? {
                    counter!("causal_resolutions_total", "mode" => "automatic").increment(1);
                    debug!(aggregate_id = %aggregate_id, winner = %winner, "Conflict resolved automatically");
                    return Ok(Some(UpdateKind::Linear));
                }
            }
        }
        Ok(Some(kind))
    }

    /// Snapshot of an aggregate's versions.
    pub fn versions(&self, aggregate_id: &AggregateId) -> Option<ConcurrentVersions<A>> {
        self.aggregates.get(aggregate_id).map(|v| v.clone())
    }

    /// Ids of aggregates currently in conflict, sorted.
    pub fn conflicts(&self) -> Vec<AggregateId> {
        let mut ids: Vec<_> = self
            .aggregates
            .iter()
            .filter(|entry| entry.value().conflict())
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.aggregates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aggregates.is_empty()
    }

    /// Interactive resolution; see [`ConcurrentVersions::resolve`].
    pub fn resolve(&self, aggregate_id: &AggregateId, winner: &VectorTime) -> Result<()> {
        self.resolve_inner(aggregate_id, winner, None)
    }

    /// Resolution recorded as an event; see [`ConcurrentVersions::resolve_with`].
    pub fn resolve_with(
        &self,
        aggregate_id: &AggregateId,
        winner: &VectorTime,
        resolution_timestamp: &VectorTime,
    ) -> Result<()> {
        self.resolve_inner(aggregate_id, winner, Some(resolution_timestamp))
    }

    /// Resolve one aggregate with `policy`. Returns whether anything changed.
    pub fn resolve_automatically(
        &self,
        aggregate_id: &AggregateId,
        policy: &dyn ResolutionPolicy,
    ) -> Result<bool> {
        let mut versions = self
            .aggregates
            .get_mut(aggregate_id)
            .ok_or_else(|| CausalError::aggregate_not_found(aggregate_id))?;
        let resolved = versions.apply_automatic_resolution(policy)?.is_some();
        if resolved {
            counter!("causal_resolutions_total", "mode" => "automatic").increment(1);
        }
        Ok(resolved)
    }

    /// Drop version history covered by `stable` in every aggregate.
    ///
    /// Returns the number of versions removed.
    pub fn prune(&self, stable: &VectorTime) -> usize {
        let removed = self
            .aggregates
            .iter_mut()
            .map(|mut entry| entry.value_mut().prune(stable))
            .sum();
        if removed > 0 {
            debug!(stable = %stable, removed, "Pruned version history");
        }
        removed
    }

    fn resolve_inner(
        &self,
        aggregate_id: &AggregateId,
        winner: &VectorTime,
        resolution_timestamp: Option<&VectorTime>,
    ) -> Result<()> {
        let mut versions = self
            .aggregates
            .get_mut(aggregate_id)
            .ok_or_else(|| CausalError::aggregate_not_found(aggregate_id))?;
        versions.apply_resolution(winner, resolution_timestamp)?;
        counter!("causal_resolutions_total", "mode" => "interactive").increment(1);
        debug!(aggregate_id = %aggregate_id, winner = %winner, "Conflict resolved");
        Ok(())
    }
}
