//! Concurrent versions of a single aggregate.
//!
//! Every event addressed to an aggregate carries a vector timestamp. Applying
//! it either linearizes the aggregate (the event causally follows all current
//! versions) or forks a new branch (the event is concurrent with at least one
//! version). Branches stay until they are resolved, either interactively by
//! selecting a winner timestamp or automatically through a
//! [`ResolutionPolicy`].
//!
//! Versions are kept in an arena-backed tree. A new version is attached below
//! its causal predecessor, the deepest of the latest versions strictly before
//! it, and its value is the predecessor's value with the event applied. The current
//! branches are the live leaves of the tree and always form an antichain.
//! Replicas that deliver the same events in different causal orders end up
//! with the same branches and the same values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::error::{CausalError, Result};
use crate::time::{CausalOrdering, VectorTime};

use super::aggregate::Aggregate;
use super::durable::{DurableEvent, EmitterId};

// =============================================================================
// Versioned
// =============================================================================

/// One version of an aggregate: a value and the timestamp of its last update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Versioned<A> {
    pub value: A,
    pub vector_timestamp: VectorTime,
    pub creator: EmitterId,
    pub system_timestamp: Option<DateTime<Utc>>,
}

/// What an update did to the set of branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    /// The first version of the aggregate was created.
    Created,
    /// A single branch remains.
    Linear,
    /// Two or more branches exist after the update.
    Conflicting,
}

// =============================================================================
// Resolution Policy
// =============================================================================

/// A total order over creator identity used for automated resolution.
///
/// Every replica observes the same creators for a given conflict, so applying
/// the same policy everywhere picks the same winner without coordination.
pub trait ResolutionPolicy: Send + Sync {
    /// Order two creators; the smallest wins.
    fn compare(&self, a: &EmitterId, b: &EmitterId) -> Ordering;
}

/// Built-in creator orders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreatorOrder {
    /// Lexicographically smallest creator wins.
    #[default]
    Ascending,
    /// Lexicographically largest creator wins.
    Descending,
}

impl ResolutionPolicy for CreatorOrder {
    fn compare(&self, a: &EmitterId, b: &EmitterId) -> Ordering {
        match self {
            CreatorOrder::Ascending => a.cmp(b),
            CreatorOrder::Descending => b.cmp(a),
        }
    }
}

impl<F> ResolutionPolicy for F
where
    F: Fn(&EmitterId, &EmitterId) -> Ordering + Send + Sync,
{
    fn compare(&self, a: &EmitterId, b: &EmitterId) -> Ordering {
        self(a, b)
    }
}

// =============================================================================
// Concurrent Versions
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Node<A> {
    version: Versioned<A>,
    parent: Option<usize>,
    children: Vec<usize>,
    depth: usize,
}

impl<A> Node<A> {
    fn new(version: Versioned<A>, parent: Option<usize>, depth: usize) -> Self {
        Self {
            version,
            parent,
            children: Vec::new(),
            depth,
        }
    }
}

/// Version store for one aggregate.
///
/// The `&self` operations are pure and return a new store; the `apply_*`
/// operations mutate in place and are used by long-lived owners such as
/// [`VersionStore`](super::version_store::VersionStore). Both validate before
/// touching any state, so a failed call leaves the store unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcurrentVersions<A> {
    /// `nodes[0]` is the root: the initial value at zero time, or the stable
    /// version the tree was pruned to.
    nodes: Vec<Node<A>>,
    /// Live branches in ascending index order. Superseded versions and
    /// resolution losers leave this list but stay in `nodes` as possible
    /// predecessors.
    leaves: Vec<usize>,
    root_is_version: bool,
}

impl<A: Aggregate> Default for ConcurrentVersions<A> {
    fn default() -> Self {
        let initial = Versioned {
            value: A::default(),
            vector_timestamp: VectorTime::zero(),
            creator: EmitterId::new(""),
            system_timestamp: None,
        };
        Self {
            nodes: vec![Node::new(initial, None, 0)],
            leaves: Vec::new(),
            root_is_version: false,
        }
    }
}

impl<A: Aggregate> ConcurrentVersions<A> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// Whether two or more branches exist.
    pub fn conflict(&self) -> bool {
        self.leaves.len() > 1
    }

    /// All branches in insertion order.
    pub fn all(&self) -> Vec<&Versioned<A>> {
        self.leaves().map(|i| &self.nodes[i].version).collect()
    }

    /// The only branch, if the aggregate is not in conflict.
    pub fn current(&self) -> Option<&Versioned<A>> {
        match self.leaves.as_slice() {
            [only] => Some(&self.nodes[*only].version),
            _ => None,
        }
    }

    /// Number of branches.
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Number of versions kept, history included.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Branches sorted by `policy`, winner first.
    pub fn sorted(&self, policy: &dyn ResolutionPolicy) -> Vec<&Versioned<A>> {
        let mut sorted = self.all();
        sorted.sort_by(|a, b| rank(policy, a, b));
        sorted
    }

    /// The branch `policy` would select.
    pub fn winner(&self, policy: &dyn ResolutionPolicy) -> Option<&Versioned<A>> {
        self.all().into_iter().min_by(|a, b| rank(policy, a, b))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pure operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Apply an event with its update timestamp and creator.
    pub fn update(
        &self,
        event: &A::Event,
        update_timestamp: VectorTime,
        creator: impl Into<EmitterId>,
    ) -> Result<Self> {
        let mut next = self.clone();
        next.apply_update(event, &update_timestamp, &creator.into(), None)?;
        Ok(next)
    }

    /// Apply a stamped event, taking timestamp and creator from its envelope.
    pub fn update_from(&self, event: &DurableEvent<A::Event>) -> Result<Self> {
        let mut next = self.clone();
        next.apply_event(event)?;
        Ok(next)
    }

    /// Keep the branch stamped `winner`; its timestamp becomes the merge of all
    /// branch timestamps.
    pub fn resolve(&self, winner: &VectorTime) -> Result<Self> {
        let mut next = self.clone();
        next.apply_resolution(winner, None)?;
        Ok(next)
    }

    /// Keep the branch stamped `winner` under the timestamp of a recorded
    /// resolution event.
    ///
    /// Branches the resolver had not observed (concurrent to
    /// `resolution_timestamp`) are kept.
    pub fn resolve_with(&self, winner: &VectorTime, resolution_timestamp: &VectorTime) -> Result<Self> {
        let mut next = self.clone();
        next.apply_resolution(winner, Some(resolution_timestamp))?;
        Ok(next)
    }

    /// Resolve to the branch selected by `policy`. No-op without a conflict.
    pub fn resolve_automatically(&self, policy: &dyn ResolutionPolicy) -> Result<Self> {
        let mut next = self.clone();
        next.apply_automatic_resolution(policy)?;
        Ok(next)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // In-place operations
    // ─────────────────────────────────────────────────────────────────────────

    /// In-place form of [`ConcurrentVersions::update_from`].
    pub fn apply_event(&mut self, event: &DurableEvent<A::Event>) -> Result<UpdateKind> {
        self.apply_update(
            event.payload(),
            event.vector_timestamp(),
            event.emitter_id(),
            event.system_timestamp(),
        )
    }

    /// In-place form of [`ConcurrentVersions::update`].
    pub fn apply_update(
        &mut self,
        event: &A::Event,
        update_timestamp: &VectorTime,
        creator: &EmitterId,
        system_timestamp: Option<DateTime<Utc>>,
    ) -> Result<UpdateKind> {
        let mut superseded = Vec::new();
        for leaf in self.leaves() {
            let branch = &self.nodes[leaf].version;
            match branch.vector_timestamp.compare(update_timestamp) {
                CausalOrdering::Before => superseded.push(leaf),
                CausalOrdering::Concurrent => {}
                CausalOrdering::After | CausalOrdering::Equal => {
                    return Err(CausalError::causality_violation(format!(
                        "Update {} from {} is not newer than version {} from {}",
                        update_timestamp, creator, branch.vector_timestamp, branch.creator
                    )));
                }
            }
        }
        let created = self.is_empty();

        let parent = self.predecessor(update_timestamp);
        let mut value = self.nodes[parent].version.value.clone();
        value.apply(event);

        let index = self.nodes.len();
        let depth = self.nodes[parent].depth + 1;
        self.nodes.push(Node::new(
            Versioned {
                value,
                vector_timestamp: update_timestamp.clone(),
                creator: creator.clone(),
                system_timestamp,
            },
            Some(parent),
            depth,
        ));
        self.nodes[parent].children.push(index);
        self.leaves.retain(|leaf| !superseded.contains(leaf));
        self.leaves.push(index);

        Ok(if created {
            UpdateKind::Created
        } else if self.conflict() {
            UpdateKind::Conflicting
        } else {
            UpdateKind::Linear
        })
    }

    /// In-place form of [`ConcurrentVersions::resolve`] and
    /// [`ConcurrentVersions::resolve_with`].
    pub fn apply_resolution(
        &mut self,
        winner: &VectorTime,
        resolution_timestamp: Option<&VectorTime>,
    ) -> Result<()> {
        let winner_index = self
            .leaves()
            .find(|&i| &self.nodes[i].version.vector_timestamp == winner)
            .ok_or_else(|| CausalError::unknown_winner(winner))?;

        let resolved_timestamp = match resolution_timestamp {
            Some(resolution) => {
                if !winner.dominated_by(resolution) {
                    return Err(CausalError::causality_violation(format!(
                        "Resolution {} does not follow winner {}",
                        resolution, winner
                    )));
                }
                resolution.clone()
            }
            None => self.leaves().fold(VectorTime::zero(), |acc, i| {
                acc.merge(&self.nodes[i].version.vector_timestamp)
            }),
        };

        let losers: Vec<usize> = self
            .leaves()
            .filter(|&i| {
                i != winner_index
                    && self.nodes[i]
                        .version
                        .vector_timestamp
                        .dominated_by(&resolved_timestamp)
            })
            .collect();
        self.leaves.retain(|leaf| !losers.contains(leaf));
        self.nodes[winner_index].version.vector_timestamp = resolved_timestamp;
        Ok(())
    }

    /// In-place form of [`ConcurrentVersions::resolve_automatically`].
    ///
    /// Returns the winning timestamp (before it is replaced by the merge), or
    /// `None` when there was nothing to resolve.
    pub fn apply_automatic_resolution(
        &mut self,
        policy: &dyn ResolutionPolicy,
    ) -> Result<Option<VectorTime>> {
        if !self.conflict() {
            return Ok(None);
        }
        let winner = match self.winner(policy) {
            Some(w) => w.vector_timestamp.clone(),
            None => return Ok(None),
        };
        self.apply_resolution(&winner, None)?;
        Ok(Some(winner))
    }

    /// Drop history every replica has observed.
    ///
    /// Every update searches the whole history for its predecessor, so
    /// long-lived owners should prune whenever their stable time advances.
    /// `stable` must be causally before every future update. The deepest
    /// version that is an ancestor of all branches and covered by `stable`
    /// becomes the new root. Returns the number of versions removed.
    pub fn prune(&mut self, stable: &VectorTime) -> usize {
        let leaves = self.leaves.clone();
        let Some((&first, rest)) = leaves.split_first() else {
            return 0;
        };

        // Walk down the first branch's ancestry until a version is either not
        // shared by every branch or not yet stable.
        let mut path = self.ancestry(first);
        path.reverse();
        let mut new_root = None;
        for &candidate in &path {
            let shared = rest.iter().all(|&leaf| self.is_ancestor_or_self(candidate, leaf));
            let covered = self.nodes[candidate]
                .version
                .vector_timestamp
                .dominated_by(stable);
            if !shared || !covered {
                break;
            }
            if candidate != 0 || self.root_is_version {
                new_root = Some(candidate);
            }
        }

        match new_root {
            Some(root) if root != 0 => {
                let before = self.nodes.len();
                self.reroot(root);
                before - self.nodes.len()
            }
            _ => 0,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Tree internals
    // ─────────────────────────────────────────────────────────────────────────

    /// Indices of live branches in insertion order.
    fn leaves(&self) -> impl Iterator<Item = usize> + '_ {
        self.leaves.iter().copied()
    }

    /// The version an update stamped `timestamp` continues, or the root.
    ///
    /// Only the latest versions before `timestamp` qualify: a version some
    /// other candidate causally follows is history, even when it sits deeper
    /// in the tree (a resolution loser, for example). Among the rest the
    /// deepest wins, then the smallest creator, then timestamp sort order, so
    /// the choice does not depend on delivery order.
    fn predecessor(&self, timestamp: &VectorTime) -> usize {
        let candidates: Vec<usize> = (1..self.nodes.len())
            .filter(|&i| self.nodes[i].version.vector_timestamp.before(timestamp))
            .collect();
        candidates
            .iter()
            .filter(|&&i| {
                let time = &self.nodes[i].version.vector_timestamp;
                !candidates
                    .iter()
                    .any(|&j| time.before(&self.nodes[j].version.vector_timestamp))
            })
            .map(|&i| (i, &self.nodes[i]))
            .min_by(|(_, x), (_, y)| {
                y.depth
                    .cmp(&x.depth)
                    .then_with(|| x.version.creator.cmp(&y.version.creator))
                    .then_with(|| x.version.vector_timestamp.sort_cmp(&y.version.vector_timestamp))
            })
            .map_or(0, |(i, _)| i)
    }

    /// `index` followed by its ancestors.
    fn ancestry(&self, index: usize) -> Vec<usize> {
        let mut path = vec![index];
        let mut current = index;
        while let Some(parent) = self.nodes[current].parent {
            path.push(parent);
            current = parent;
        }
        path
    }

    fn is_ancestor_or_self(&self, ancestor: usize, index: usize) -> bool {
        let mut current = Some(index);
        while let Some(i) = current {
            if i == ancestor {
                return true;
            }
            current = self.nodes[i].parent;
        }
        false
    }

    /// Keep only `root` and its subtree.
    fn reroot(&mut self, root: usize) {
        let old = std::mem::take(&mut self.nodes);
        let base_depth = old[root].depth;

        // Children are pushed after their parent, so one ascending pass sees
        // every parent first.
        let mut keep = vec![false; old.len()];
        keep[root] = true;
        for i in root + 1..old.len() {
            if let Some(parent) = old[i].parent {
                keep[i] = keep[parent];
            }
        }

        let mut remap = vec![usize::MAX; old.len()];
        let mut nodes = Vec::with_capacity(keep.iter().filter(|k| **k).count());
        for (i, mut node) in old.into_iter().enumerate() {
            if !keep[i] {
                continue;
            }
            remap[i] = nodes.len();
            if i == root {
                node.parent = None;
            } else {
                node.parent = node.parent.map(|p| remap[p]);
            }
            node.depth -= base_depth;
            node.children.clear();
            nodes.push(node);
        }
        for i in 1..nodes.len() {
            if let Some(parent) = nodes[i].parent {
                nodes[parent].children.push(i);
            }
        }

        self.nodes = nodes;
        self.leaves = self.leaves.iter().map(|&leaf| remap[leaf]).collect();
        self.root_is_version = true;
    }
}

fn rank<A>(policy: &dyn ResolutionPolicy, a: &Versioned<A>, b: &Versioned<A>) -> Ordering {
    policy
        .compare(&a.creator, &b.creator)
        .then_with(|| a.vector_timestamp.sort_cmp(&b.vector_timestamp))
}

// =============================================================================
// Tests
// =============================================================================
