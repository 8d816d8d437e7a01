//! Vector time: the partial-order algebra behind causal event ordering.
//!
//! A [`VectorTime`] maps process identifiers to monotonically increasing
//! counters. Two vector times are compared pointwise: one happened *before*
//! the other when none of its entries is greater and at least one is smaller.
//! When neither dominates the other they are *concurrent*.
//!
//! Merge takes the max per process, which makes it commutative, associative
//! and idempotent. The empty vector time is both the identity of merge and
//! the infimum of the order.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// Process IDs
// =============================================================================

/// Identifier of a process (an event log or a writer) owning a vector entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(pub String);

impl ProcessId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProcessId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ProcessId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Event logs are identified the same way as any other vector-time process.
pub type LogId = ProcessId;

// =============================================================================
// Causal Ordering
// =============================================================================

/// Result of comparing two vector times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CausalOrdering {
    /// Left happened strictly before right.
    Before,
    /// Left happened strictly after right.
    After,
    /// Both are identical.
    Equal,
    /// Neither dominates the other.
    Concurrent,
}

impl CausalOrdering {
    /// Convert to `std::cmp::Ordering` where the relation is total.
    pub fn to_ordering(self) -> Option<Ordering> {
        match self {
            Self::Before => Some(Ordering::Less),
            Self::After => Some(Ordering::Greater),
            Self::Equal => Some(Ordering::Equal),
            Self::Concurrent => None,
        }
    }
}

// =============================================================================
// Vector Time
// =============================================================================

/// An immutable vector timestamp.
///
/// Zero counters are never stored, so two vector times are structurally equal
/// exactly when they are causally equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<ProcessId, u64>",
    into = "BTreeMap<ProcessId, u64>"
)]
pub struct VectorTime {
    entries: BTreeMap<ProcessId, u64>,
}

impl VectorTime {
    /// The zero vector time.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Build a vector time from `(process, counter)` pairs.
    ///
    /// Duplicate processes keep their maximum counter.
    pub fn from_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, u64)>,
        K: Into<ProcessId>,
    {
        let mut map = BTreeMap::new();
        for (process, time) in entries {
            if time == 0 {
                continue;
            }
            let entry = map.entry(process.into()).or_insert(0);
            *entry = time.max(*entry);
        }
        Self { entries: map }
    }

    /// Counter for `process`, or 0 when absent.
    pub fn local_time(&self, process: &ProcessId) -> u64 {
        self.entries.get(process).copied().unwrap_or(0)
    }

    /// Return a copy with `process` incremented by one.
    pub fn increment(&self, process: &ProcessId) -> Self {
        self.set_local_time(process, self.local_time(process).saturating_add(1))
    }

    /// Return a copy with `process` set to `time`.
    pub fn set_local_time(&self, process: &ProcessId, time: u64) -> Self {
        let mut entries = self.entries.clone();
        if time == 0 {
            entries.remove(process);
        } else {
            entries.insert(process.clone(), time);
        }
        Self { entries }
    }

    /// Pointwise maximum of both vector times.
    pub fn merge(&self, other: &VectorTime) -> Self {
        let mut entries = self.entries.clone();
        for (process, &time) in &other.entries {
            let entry = entries.entry(process.clone()).or_insert(0);
            *entry = (*entry).max(time);
        }
        Self { entries }
    }

    /// Compare with another vector time under the causal partial order.
    pub fn compare(&self, other: &VectorTime) -> CausalOrdering {
        let mut less = false;
        let mut greater = false;

        for (process, &time) in &self.entries {
            match time.cmp(&other.local_time(process)) {
                Ordering::Less => less = true,
                Ordering::Greater => greater = true,
                Ordering::Equal => {}
            }
        }
        if other.entries.keys().any(|p| !self.entries.contains_key(p)) {
            less = true;
        }

        match (less, greater) {
            (false, false) => CausalOrdering::Equal,
            (true, false) => CausalOrdering::Before,
            (false, true) => CausalOrdering::After,
            (true, true) => CausalOrdering::Concurrent,
        }
    }

    /// Strict happened-before. Irreflexive.
    pub fn before(&self, other: &VectorTime) -> bool {
        self.compare(other) == CausalOrdering::Before
    }

    /// Strict happened-after.
    pub fn after(&self, other: &VectorTime) -> bool {
        self.compare(other) == CausalOrdering::After
    }

    /// Neither before, after nor equal.
    pub fn concurrent(&self, other: &VectorTime) -> bool {
        self.compare(other) == CausalOrdering::Concurrent
    }

    /// Before or equal: `other` has causally observed `self`.
    pub fn dominated_by(&self, other: &VectorTime) -> bool {
        matches!(
            self.compare(other),
            CausalOrdering::Before | CausalOrdering::Equal
        )
    }

    /// A total order consistent across replicas, used only for tie-breaking.
    ///
    /// Entries are compared lexicographically in process order. Unlike
    /// [`VectorTime::compare`] this says nothing about causality.
    pub fn sort_cmp(&self, other: &VectorTime) -> Ordering {
        self.entries.iter().cmp(other.entries.iter())
    }

    pub fn is_zero(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of processes with a non-zero counter.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over non-zero entries in process order.
    pub fn iter(&self) -> impl Iterator<Item = (&ProcessId, u64)> {
        self.entries.iter().map(|(p, &t)| (p, t))
    }
}

impl PartialOrd for VectorTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.compare(other).to_ordering()
    }
}

impl fmt::Display for VectorTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (process, time)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}:{}", process, time)?;
        }
        write!(f, "}}")
    }
}

impl From<BTreeMap<ProcessId, u64>> for VectorTime {
    fn from(entries: BTreeMap<ProcessId, u64>) -> Self {
        Self::from_entries(entries)
    }
}

impl From<VectorTime> for BTreeMap<ProcessId, u64> {
    fn from(time: VectorTime) -> Self {
        time.entries
    }
}

impl<K: Into<ProcessId>> FromIterator<(K, u64)> for VectorTime {
    fn from_iter<I: IntoIterator<Item = (K, u64)>>(iter: I) -> Self {
        Self::from_entries(iter)
    }
}

// =============================================================================
// Tests
// =============================================================================
