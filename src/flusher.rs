//! Buffered persistence of raw events
//!
//! The flusher drains the aggregator's buffer on a fixed interval, whenever
//! the aggregator signals backpressure, and once more on shutdown. Failed
//! writes put the whole captured set back in front of newer arrivals so the
//! next periodic cycle retries it in arrival order. Backpressure signals are
//! ignored until then.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::aggregator::SharedBuffer;
use crate::config::EngineConfig;
use crate::events::Event;
use crate::storage::{RepositoryError, RepositoryResult, SnapshotRepository};

/// Outcome of a single flush cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Events taken from the buffer
    pub captured: usize,
    /// Events the repository accepted
    pub persisted: usize,
    /// Events put back in the buffer after a failed batch
    pub requeued: usize,
    /// Oldest events discarded to respect the buffer cap
    pub dropped: usize,
}

impl FlushReport {
    pub fn is_clean(&self) -> bool {
        self.requeued == 0 && self.dropped == 0
    }
}

struct FlushCore {
    repository: Arc<dyn SnapshotRepository>,
    buffer: SharedBuffer,
    batch_size: usize,
    hard_cap: usize,
    write_timeout: Option<Duration>,
    // One flush at a time, so a requeue never interleaves with another capture
    in_flight: tokio::sync::Mutex<()>,
}

impl FlushCore {
    async fn flush(&self) -> FlushReport {
        let _guard = self.in_flight.lock().await;

        let captured = self.buffer.lock().take_all();
        if captured.is_empty() {
            return FlushReport::default();
        }

        let mut report = FlushReport {
            captured: captured.len(),
            ..Default::default()
        };

        let mut failure = None;
        for batch in captured.chunks(self.batch_size.max(1)) {
            match self.write_batch(batch).await {
                Ok(()) => report.persisted += batch.len(),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        match failure {
            None => {
                debug!("Persisted {} buffered events", report.persisted);
            }
            Some(e) => {
                report.requeued = captured.len();
                report.dropped = {
                    let mut buffer = self.buffer.lock();
                    buffer.requeue_front(captured);
                    buffer.enforce_cap(self.hard_cap)
                };
                warn!(
                    "Event flush failed after {} of {} events, requeued for next cycle: {}",
                    report.persisted, report.captured, e
                );
                if report.dropped > 0 {
                    warn!(
                        "Event buffer over capacity ({}), dropped {} oldest events",
                        self.hard_cap, report.dropped
                    );
                }
            }
        }
        report
    }

    async fn write_batch(&self, batch: &[Event]) -> RepositoryResult<()> {
        match self.write_timeout {
            Some(limit) => tokio::time::timeout(limit, self.repository.save_events(batch))
                .await
                .map_err(|_| RepositoryError::Timeout(limit))?,
            None => self.repository.save_events(batch).await,
        }
    }
}

struct FlushTask {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

/// Periodic writer of buffered events
pub struct PersistenceFlusher {
    core: Arc<FlushCore>,
    signal: Arc<Notify>,
    persist_interval: Duration,
    task: Mutex<Option<FlushTask>>,
}

impl PersistenceFlusher {
    pub fn new(
        config: &EngineConfig,
        repository: Arc<dyn SnapshotRepository>,
        buffer: SharedBuffer,
        signal: Arc<Notify>,
    ) -> Self {
        Self {
            core: Arc::new(FlushCore {
                repository,
                buffer,
                batch_size: config.batch_size,
                hard_cap: config.buffer_hard_cap(),
                write_timeout: config.write_timeout,
                in_flight: tokio::sync::Mutex::new(()),
            }),
            signal,
            persist_interval: config.persist_interval,
            task: Mutex::new(None),
        }
    }

    /// Drain the buffer now
    pub async fn flush(&self) -> FlushReport {
        self.core.flush().await
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    /// Begin periodic flushing. Calling this while running does nothing.
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return;
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let core = Arc::clone(&self.core);
        let signal = Arc::clone(&self.signal);
        let period = self.persist_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            // After a failed cycle only the next tick retries
            let mut holding_off = false;
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {}
                    _ = signal.notified(), if !holding_off => debug!("Buffer full, flushing early"),
                }
                // Not raced against shutdown: an in-flight write always completes
                let report = core.flush().await;
                holding_off = report.requeued > 0;
            }
        });

        info!("Persistence flusher started (every {:?})", period);
        *task = Some(FlushTask { handle, shutdown });
    }

    /// Stop the periodic task, wait for any in-flight flush, then drain what
    /// is left. Returns `None` when the flusher was not running.
    pub async fn stop(&self) -> Option<FlushReport> {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;

        let _ = task.shutdown.send(true);
        if let Err(e) = task.handle.await {
            warn!("Persistence flusher task ended abnormally: {}", e);
        }

        let report = self.core.flush().await;
        info!(
            "Persistence flusher stopped, final flush persisted {} events",
            report.persisted
        );
        Some(report)
    }
}

impl Drop for PersistenceFlusher {
    fn drop(&mut self) {
        // Signal rather than abort so a pending write is not cut short
        if let Some(task) = self.task.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
            let _ = task.shutdown.send(true);
        }
    }
}
