//! Test fixtures

pub mod builders;

pub use builders::{EventBuilder, SnapshotBuilder};
