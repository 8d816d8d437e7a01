//! Event logs: the single-writer owners of a [`TimeTracker`](crate::tracker::TimeTracker).
//!
//! - **`coordinator`**: [`EventLog`], a handle to the task that stamps,
//!   filters and persists one log's events.
//! - **`store`**: The [`LogStore`] persistence boundary and an in-memory
//!   implementation.
//! - **`registry`**: [`LogRegistry`], many independent logs by id.

pub mod coordinator;
pub mod registry;
pub mod store;

pub use coordinator::{EventLog, Replicated};
pub use registry::LogRegistry;
pub use store::{InMemoryLogStore, LogStore};
