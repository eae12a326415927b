//! Append-only fact store: the write model.
//!
//! Facts are indexed by identifier for point lookup and grouped by subject
//! into ordered streams. Each append is written through to a durable
//! [`FactBacking`] before it becomes visible to readers.

pub mod backing;
pub mod store;
pub mod types;

pub use backing::{FactBacking, MemoryBacking};
pub use store::{EventHandle, EventStore};
pub use types::{EventStream, StoredFact};
