//! Snapshot repository abstraction
//!
//! The engine persists raw events and periodic snapshots through the
//! [`SnapshotRepository`] trait. Two backends ship with the crate: an
//! in-memory store and an append-only JSON lines store.

pub mod backends;
pub mod error;
pub mod query;
pub mod traits;
pub mod types;

pub use backends::{FileRepository, MemoryRepository};
pub use error::{RepositoryError, RepositoryResult};
pub use traits::SnapshotRepository;
pub use types::{
    conversion_rate, CountMap, DailyPoint, MetricsSnapshot, TimeWindow, WindowRollup,
};
