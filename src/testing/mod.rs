//! Testing utilities and fixtures
//!
//! Builders for events and snapshots, plus mock implementations of the
//! repository and cadence handler seams. Used by unit tests, the integration
//! tests and the benchmarks.

pub mod fixtures;
pub mod mocks;

pub use fixtures::{EventBuilder, SnapshotBuilder};
pub use mocks::{FlakyRepository, RecordingHandler};
