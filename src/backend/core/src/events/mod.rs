//! Events and versioned aggregate state.
//!
//! - **`durable`**: The [`DurableEvent`] envelope and its identifiers.
//! - **`aggregate`**: The [`Aggregate`] trait, the projection applied to events.
//! - **`versions`**: [`ConcurrentVersions`], linearizing or forking one
//!   aggregate's state, plus resolution policies.
//! - **`version_store`**: [`VersionStore`], versioned state for many aggregates.

pub mod aggregate;
pub mod durable;
pub mod version_store;
pub mod versions;

pub use aggregate::Aggregate;
pub use durable::{AggregateId, DurableEvent, EmitterId};
pub use version_store::VersionStore;
pub use versions::{ConcurrentVersions, CreatorOrder, ResolutionPolicy, UpdateKind, Versioned};
