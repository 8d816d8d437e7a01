//! Property tests for the vector time algebra and the time tracker.
//!
//! Tests cover:
//! - Merge laws (associative, commutative, idempotent, zero identity)
//! - Exactly one causal relation between any two vector times
//! - Contiguous sequence numbers from prepare_write
//! - Idempotent replication filtering

use causal_log_core::events::DurableEvent;
use causal_log_core::time::{CausalOrdering, LogId, VectorTime};
use causal_log_core::tracker::{NoopStatsSink, ReplicationFilter, TimeTracker};
use chrono::Utc;
use proptest::prelude::*;

fn vector_time() -> impl Strategy<Value = VectorTime> {
    prop::collection::btree_map(prop::sample::select(vec!["A", "B", "C", "D"]), 0u64..6, 0..4)
        .prop_map(|entries| VectorTime::from_entries(entries))
}

fn events() -> impl Strategy<Value = Vec<DurableEvent<u32>>> {
    prop::collection::vec((any::<u32>(), vector_time()), 0..12).prop_map(|items| {
        items
            .into_iter()
            .map(|(payload, time)| DurableEvent::new(payload, "writer", time))
            .collect()
    })
}

// ============================================================================
// Vector Time Laws
// ============================================================================

proptest! {
    #[test]
    fn merge_is_commutative(a in vector_time(), b in vector_time()) {
        prop_assert_eq!(a.merge(&b), b.merge(&a));
    }

    #[test]
    fn merge_is_associative(a in vector_time(), b in vector_time(), c in vector_time()) {
        prop_assert_eq!(a.merge(&b).merge(&c), a.merge(&b.merge(&c)));
    }

    #[test]
    fn merge_is_idempotent_with_zero_identity(a in vector_time()) {
        prop_assert_eq!(a.merge(&a), a.clone());
        prop_assert_eq!(a.merge(&VectorTime::zero()), a);
    }

    #[test]
    fn merge_dominates_both_inputs(a in vector_time(), b in vector_time()) {
        let merged = a.merge(&b);
        prop_assert!(a.dominated_by(&merged));
        prop_assert!(b.dominated_by(&merged));
    }

    #[test]
    fn exactly_one_relation_holds(a in vector_time(), b in vector_time()) {
        let relations = [a.before(&b), b.before(&a), a == b, a.concurrent(&b)];
        prop_assert_eq!(relations.iter().filter(|r| **r).count(), 1);
    }

    #[test]
    fn compare_is_antisymmetric(a in vector_time(), b in vector_time()) {
        let expected = match a.compare(&b) {
            CausalOrdering::Before => CausalOrdering::After,
            CausalOrdering::After => CausalOrdering::Before,
            other => other,
        };
        prop_assert_eq!(b.compare(&a), expected);
    }
}

// ============================================================================
// Tracker Properties
// ============================================================================

proptest! {
    #[test]
    fn prepare_write_assigns_contiguous_numbers(start in 0u64..1000, batch in events()) {
        let log: LogId = "L".into();
        let tracker = TimeTracker::new().advance_sequence_nr(start).unwrap();
        let count = batch.len() as u64;

        let (stamped, next) = tracker.prepare_write(&log, batch, Utc::now()).unwrap();

        let seqs: Vec<u64> = stamped.iter().map(|e| e.local_sequence_nr()).collect();
        let expected: Vec<u64> = (start + 1..=start + count).collect();
        prop_assert_eq!(seqs, expected);
        prop_assert_eq!(next.sequence_nr(), start + count);
        for event in &stamped {
            prop_assert!(event.vector_timestamp().dominated_by(next.vector_time()));
        }
    }

    #[test]
    fn prepare_replicate_twice_admits_nothing(batch in events()) {
        let log: LogId = "L".into();
        let (_, tracker) = TimeTracker::new()
            .prepare_replicate(&log, batch.clone(), ReplicationFilter::Observed, &NoopStatsSink)
            .unwrap();
        let (again, unchanged) = tracker
            .prepare_replicate(&log, batch, ReplicationFilter::Observed, &NoopStatsSink)
            .unwrap();

        prop_assert!(again.is_empty());
        prop_assert_eq!(unchanged, tracker);
    }

    #[test]
    fn recovery_reproduces_tracker(batch in events()) {
        let log: LogId = "L".into();
        let (stamped, tracker) = TimeTracker::new().prepare_write(&log, batch, Utc::now()).unwrap();
        prop_assert_eq!(TimeTracker::recover(&stamped).unwrap(), tracker);
    }
}
