//! Causal time primitives.
//!
//! - **`vector_time`**: the immutable [`VectorTime`] value and its partial order.
//! - **`clock`**: [`VectorClock`], a writer's own clock built on vector time.

pub mod clock;
pub mod vector_time;

pub use clock::VectorClock;
pub use vector_time::{CausalOrdering, LogId, ProcessId, VectorTime};
