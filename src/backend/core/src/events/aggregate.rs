//! Aggregate trait: the application-supplied projection for versioned state.
//!
//! Aggregates are domain objects rebuilt from a stream of events. Each
//! aggregate implements `Default` (empty state) and `apply` (fold an event).
//! [`ConcurrentVersions`](super::versions::ConcurrentVersions) uses `apply` as
//! its merge function when linearizing or forking versions.

/// Trait for aggregates that can be reconstructed from a sequence of events.
///
/// Given the same event stream the resulting state is deterministic, which is
/// what lets every replica compute identical branches for the same conflict.
pub trait Aggregate: Clone + Default {
    /// The event payload this aggregate consumes.
    type Event;

    /// Apply a single event to mutate state.
    ///
    /// Implementations must be pure functions of `(self, event) -> self'`.
    /// They must not perform I/O or fail: every persisted event is valid by
    /// definition.
    fn apply(&mut self, event: &Self::Event);

    /// Return a new state with `event` applied, leaving `self` untouched.
    fn project(&self, event: &Self::Event) -> Self {
        let mut next = self.clone();
        next.apply(event);
        next
    }
}
