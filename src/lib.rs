//! # leadmetrics
//!
//! Real-time aggregation and scheduled reporting for lead-generation sites.
//!
//! Form lifecycle events (submitted, processed, errored, converted) and page
//! visits arrive on an event bus. The aggregator keeps live counters and
//! buffers every event; the flusher persists the buffer in batches; the
//! scheduler fires realtime, daily, weekly and monthly reports; daily
//! reports are followed by an anomaly pass over recent traffic.
//!
//! ## Modules
//!
//! - `aggregator` - Live counters and the event buffer
//! - `anomaly` - Outlier detection over the daily series
//! - `cadence` - Reporting cadences and calendar alignment
//! - `clock` - Wall-clock abstraction
//! - `config` - Engine configuration
//! - `engine` - Wiring of the whole pipeline
//! - `error` - Error types and codes
//! - `events` - Event model and bus
//! - `flusher` - Batched persistence of buffered events
//! - `report` - Snapshot generation
//! - `scheduler` - Per-cadence timers with long-delay chunking
//! - `storage` - Repository trait and backends
//! - `testing` - Builders and mocks for tests
pub mod aggregator;
pub mod anomaly;
pub mod cadence;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod flusher;
pub mod report;
pub mod scheduler;
pub mod storage;

pub mod testing;

pub use engine::AnalyticsEngine;
pub use error::{AnalyticsError, Result};
