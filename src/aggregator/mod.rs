//! Real-time aggregation of lifecycle events
//!
//! [`Aggregator::handle`] is synchronous: it updates the live counters and
//! appends the event to the shared buffer without ever awaiting. When the
//! buffer reaches `max_buffer_size` it signals the flusher to drain early.
//! The signal fires on the push that reaches the threshold, not on every push
//! above it, so a buffer held full by a repository outage does not turn each
//! new event into another write attempt.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub mod buffer;
pub mod stats;

pub use buffer::{EventBuffer, SharedBuffer};
pub use stats::{RealTimeStats, StatsSnapshot, TimingStats};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::events::{Event, EventBus};

#[derive(Debug, Default)]
struct AggregatorState {
    stats: RealTimeStats,
    last_updated: Option<DateTime<Utc>>,
}

/// Owns the live stats and the write side of the event buffer
pub struct Aggregator {
    state: Mutex<AggregatorState>,
    buffer: SharedBuffer,
    flush_signal: Arc<Notify>,
    clock: Arc<dyn Clock>,
    max_buffer_size: usize,
    hard_cap: usize,
    debug_logging: bool,
}

impl Aggregator {
    pub fn new(config: &EngineConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(AggregatorState::default()),
            buffer: SharedBuffer::new(),
            flush_signal: Arc::new(Notify::new()),
            clock,
            max_buffer_size: config.max_buffer_size,
            hard_cap: config.buffer_hard_cap(),
            debug_logging: config.enable_debug_logging,
        }
    }

    fn state(&self) -> MutexGuard<'_, AggregatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record one event. Malformed events are logged and dropped.
    pub fn handle(&self, event: Event) {
        if let Err(e) = event.validate() {
            warn!("Dropping malformed event: {}", e);
            return;
        }

        if self.debug_logging {
            debug!(
                event = %event.event_type,
                form_type = event.form_type.as_deref().unwrap_or("-"),
                session = %event.session_id,
                "Aggregating event"
            );
        }

        {
            let mut state = self.state();
            state.stats.apply(&event);
            state.last_updated = Some(self.clock.now());
        }

        let (buffered, dropped) = {
            let mut buffer = self.buffer.lock();
            let len = buffer.push(event);
            let dropped = buffer.enforce_cap(self.hard_cap);
            (len - dropped, dropped)
        };
        if dropped > 0 {
            warn!(
                "Event buffer over capacity ({}), dropped {} oldest events",
                self.hard_cap, dropped
            );
        }
        if buffered == self.max_buffer_size {
            debug!(
                "Event buffer reached {} of {}, requesting early flush",
                buffered, self.max_buffer_size
            );
            self.flush_signal.notify_one();
        }
    }

    /// Deep copy of the current counters
    pub fn get_stats(&self) -> StatsSnapshot {
        let state = self.state();
        StatsSnapshot {
            stats: state.stats.clone(),
            last_updated: state.last_updated,
            buffer_size: self.buffer.len(),
        }
    }

    /// Zero all counters. Buffered events are kept.
    pub fn reset_stats(&self) {
        let mut state = self.state();
        state.stats.reset();
        state.last_updated = Some(self.clock.now());
        debug!("Real-time stats reset");
    }

    /// Buffer handle for the flusher
    pub fn buffer(&self) -> SharedBuffer {
        self.buffer.clone()
    }

    /// Notified when the buffer reaches `max_buffer_size`
    pub fn flush_signal(&self) -> Arc<Notify> {
        self.flush_signal.clone()
    }

    /// Feed every event published on `bus` into [`Aggregator::handle`]
    pub fn subscribe(self: &Arc<Self>, bus: &dyn EventBus) -> BusSubscription {
        let mut rx = bus.subscribe();
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let aggregator = Arc::clone(self);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = rx.recv() => match received {
                        Ok(event) => aggregator.handle(event),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Aggregator fell behind the event bus, {} events skipped", skipped);
                        }
                        Err(RecvError::Closed) => {
                            debug!("Event bus closed, aggregator subscription ending");
                            return;
                        }
                    },
                    _ = shutdown_rx.changed() => break,
                }
            }

            // Take whatever was already published before closing
            loop {
                match rx.try_recv() {
                    Ok(event) => aggregator.handle(event),
                    Err(TryRecvError::Lagged(skipped)) => {
                        warn!("Aggregator fell behind the event bus, {} events skipped", skipped);
                    }
                    Err(_) => break,
                }
            }
        });

        BusSubscription { handle, shutdown }
    }
}

/// Running bus consumer created by [`Aggregator::subscribe`]
pub struct BusSubscription {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl BusSubscription {
    /// Stop consuming after draining events already on the bus
    pub async fn close(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            warn!("Aggregator subscription ended abnormally: {}", e);
        }
    }
}
