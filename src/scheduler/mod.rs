//! Multi-cadence report scheduling
//!
//! Each cadence runs its own timer task:
//!
//! ```text
//! Idle -> Armed{target} -> Firing -> Armed{next} -> ... -> Stopped
//! ```
//!
//! Waits longer than `max_timer_delay` are split into chunks (see
//! [`chunking`]). A failing or panicking handler is logged and counted, and
//! the cadence is re-armed as usual.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub mod chunking;

pub use chunking::{next_chunk, sleep_until};

use crate::cadence::Cadence;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{AnalyticsError, ErrorCode, Result};

/// Work performed when a cadence fires
#[async_trait]
pub trait CadenceHandler: Send + Sync {
    async fn run(&self, cadence: Cadence, fired_at: DateTime<Utc>) -> Result<()>;
}

/// Lifecycle of one cadence timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ScheduleState {
    Idle,
    Armed { target: DateTime<Utc> },
    Firing,
    Stopped,
}

/// Counters for one cadence
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScheduleStats {
    pub chunks_armed: u64,
    pub fires: u64,
    pub failures: u64,
    pub last_fired: Option<DateTime<Utc>>,
    /// `[E####]` code of the most recent failed fire
    pub last_error_code: Option<u16>,
}

#[derive(Debug)]
struct Slot {
    state: ScheduleState,
    stats: ScheduleStats,
}

type SharedSlot = Arc<Mutex<Slot>>;

fn lock(slot: &SharedSlot) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Running {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// Arms one timer task per cadence and dispatches to a [`CadenceHandler`]
pub struct CadenceScheduler {
    clock: Arc<dyn Clock>,
    handler: Arc<dyn CadenceHandler>,
    offset: FixedOffset,
    aggregation_interval: Duration,
    max_timer_delay: Duration,
    slots: BTreeMap<Cadence, SharedSlot>,
    running: Mutex<Option<Running>>,
}

impl CadenceScheduler {
    /// Scheduler for every cadence
    pub fn new(config: &EngineConfig, clock: Arc<dyn Clock>, handler: Arc<dyn CadenceHandler>) -> Self {
        Self::with_cadences(config, clock, handler, &Cadence::ALL)
    }

    /// Scheduler for a subset of cadences
    pub fn with_cadences(
        config: &EngineConfig,
        clock: Arc<dyn Clock>,
        handler: Arc<dyn CadenceHandler>,
        cadences: &[Cadence],
    ) -> Self {
        let slots = cadences
            .iter()
            .map(|cadence| {
                let slot = Slot {
                    state: ScheduleState::Idle,
                    stats: ScheduleStats::default(),
                };
                (*cadence, Arc::new(Mutex::new(slot)))
            })
            .collect();

        Self {
            clock,
            handler,
            offset: config.utc_offset().unwrap_or_else(|| {
                warn!(
                    "utc_offset_minutes {} is out of range, aligning to UTC",
                    config.utc_offset_minutes
                );
                Utc.fix()
            }),
            aggregation_interval: config.aggregation_interval,
            max_timer_delay: config.max_timer_delay,
            slots,
            running: Mutex::new(None),
        }
    }

    fn running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.running().is_some()
    }

    /// Arm every cadence. Calling this while running does nothing.
    pub fn start(&self) {
        let mut running = self.running();
        if running.is_some() {
            return;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handles = self
            .slots
            .iter()
            .map(|(cadence, slot)| {
                let timer = CadenceTimer {
                    cadence: *cadence,
                    slot: Arc::clone(slot),
                    clock: Arc::clone(&self.clock),
                    handler: Arc::clone(&self.handler),
                    offset: self.offset,
                    aggregation_interval: self.aggregation_interval,
                    max_timer_delay: self.max_timer_delay,
                };
                tokio::spawn(timer.run(shutdown_rx.clone()))
            })
            .collect();

        info!("Report scheduler started for {} cadences", self.slots.len());
        *running = Some(Running { shutdown, handles });
    }

    /// Disarm every cadence. A handler that is already firing runs to
    /// completion before this returns.
    pub async fn stop(&self) {
        let Some(running) = self.running().take() else {
            return;
        };

        let _ = running.shutdown.send(true);
        for handle in running.handles {
            if let Err(e) = handle.await {
                warn!("Scheduler task ended abnormally: {}", e);
            }
        }
        info!("Report scheduler stopped");
    }

    pub fn state(&self, cadence: Cadence) -> Option<ScheduleState> {
        self.slots.get(&cadence).map(|slot| lock(slot).state)
    }

    pub fn stats(&self, cadence: Cadence) -> Option<ScheduleStats> {
        self.slots.get(&cadence).map(|slot| lock(slot).stats.clone())
    }
}

impl Drop for CadenceScheduler {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
            let _ = running.shutdown.send(true);
        }
    }
}

struct CadenceTimer {
    cadence: Cadence,
    slot: SharedSlot,
    clock: Arc<dyn Clock>,
    handler: Arc<dyn CadenceHandler>,
    offset: FixedOffset,
    aggregation_interval: Duration,
    max_timer_delay: Duration,
}

impl CadenceTimer {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let target = self
                .cadence
                .next_fire(self.clock.now(), self.offset, self.aggregation_interval);
            lock(&self.slot).state = ScheduleState::Armed { target };
            debug!("{} report armed for {}", self.cadence, target);

            let wait = sleep_until(self.clock.as_ref(), target, self.max_timer_delay, |chunk| {
                lock(&self.slot).stats.chunks_armed += 1;
                if chunk == self.max_timer_delay {
                    debug!(
                        "{} report is beyond the timer limit, arming a {:?} chunk",
                        self.cadence, chunk
                    );
                }
            });

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = wait => {}
            }

            self.fire().await;

            if *shutdown.borrow() {
                break;
            }
        }

        lock(&self.slot).state = ScheduleState::Stopped;
    }

    async fn fire(&self) {
        let fired_at = self.clock.now();
        lock(&self.slot).state = ScheduleState::Firing;
        info!("Running {} report", self.cadence);

        // Own task so a panic surfaces as a JoinError instead of killing the timer
        let handler = Arc::clone(&self.handler);
        let cadence = self.cadence;
        let outcome = tokio::spawn(async move { handler.run(cadence, fired_at).await }).await;

        let mut slot = lock(&self.slot);
        slot.stats.last_fired = Some(fired_at);
        match outcome {
            Ok(Ok(())) => slot.stats.fires += 1,
            Ok(Err(e)) => {
                let err = AnalyticsError::scheduler(
                    ErrorCode::SCHEDULER_HANDLER_FAILED,
                    format!("{} report failed", self.cadence),
                    self.cadence.as_str(),
                )
                .with_context(&e)
                .with_source(e);
                slot.stats.failures += 1;
                slot.stats.last_error_code = Some(err.code());
                error!("{}", err);
            }
            Err(e) if e.is_panic() => {
                let err = AnalyticsError::scheduler(
                    ErrorCode::SCHEDULER_HANDLER_PANICKED,
                    "report handler panicked",
                    self.cadence.as_str(),
                );
                slot.stats.failures += 1;
                slot.stats.last_error_code = Some(err.code());
                error!("{}", err);
            }
            Err(e) => {
                slot.stats.failures += 1;
                warn!("{} report handler was cancelled: {}", self.cadence, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use crate::testing::RecordingHandler;
    use chrono::TimeZone;

    fn anchor() -> DateTime<Utc> {
        // A Wednesday afternoon
        Utc.with_ymd_and_hms(2026, 3, 4, 15, 0, 0).unwrap()
    }

    fn config() -> EngineConfig {
        EngineConfig {
            aggregation_interval: Duration::from_secs(60),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_realtime_fires_on_interval() {
        let clock = Arc::new(TokioClock::starting_at(anchor()));
        let handler = Arc::new(RecordingHandler::new());
        let scheduler =
            CadenceScheduler::with_cadences(&config(), clock.clone(), handler.clone(), &[Cadence::Realtime]);

        scheduler.start();
        tokio::time::sleep(Duration::from_secs(185)).await;
        scheduler.stop().await;

        let fires = handler.fired_at(Cadence::Realtime);
        assert_eq!(fires.len(), 3);
        assert_eq!(scheduler.state(Cadence::Realtime), Some(ScheduleState::Stopped));
        assert_eq!(scheduler.stats(Cadence::Realtime).unwrap().fires, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monthly_beyond_timer_limit_is_chunked() {
        let clock = Arc::new(TokioClock::starting_at(anchor()));
        let handler = Arc::new(RecordingHandler::new());
        let config = EngineConfig {
            max_timer_delay: Duration::from_secs(5 * 24 * 3600),
            ..config()
        };
        let scheduler =
            CadenceScheduler::with_cadences(&config, clock.clone(), handler.clone(), &[Cadence::Monthly]);
        let target = Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap();

        scheduler.start();
        tokio::time::sleep(Duration::from_secs(28 * 24 * 3600)).await;

        let fires = handler.fired_at(Cadence::Monthly);
        assert_eq!(fires.len(), 1);
        assert!((fires[0] - target).num_milliseconds() <= 1);

        // Six chunks to cover 27 days and 9 hours, then the first one toward May
        let stats = scheduler.stats(Cadence::Monthly).unwrap();
        assert_eq!(stats.chunks_armed, 7);
        assert_eq!(
            scheduler.state(Cadence::Monthly),
            Some(ScheduleState::Armed {
                target: Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap()
            })
        );
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_failures_do_not_stop_rearming() {
        let clock = Arc::new(TokioClock::starting_at(anchor()));
        let handler = Arc::new(RecordingHandler::new());
        handler.fail_next(1);
        handler.panic_next(1);
        let scheduler =
            CadenceScheduler::with_cadences(&config(), clock.clone(), handler.clone(), &[Cadence::Realtime]);

        scheduler.start();
        tokio::time::sleep(Duration::from_secs(245)).await;
        scheduler.stop().await;

        let stats = scheduler.stats(Cadence::Realtime).unwrap();
        assert_eq!(stats.failures, 2);
        assert_eq!(stats.fires, 2);
        assert_eq!(handler.fired_at(Cadence::Realtime).len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fire_records_handler_error_code() {
        let clock = Arc::new(TokioClock::starting_at(anchor()));
        let handler = Arc::new(RecordingHandler::new());
        handler.fail_next(1);
        let scheduler =
            CadenceScheduler::with_cadences(&config(), clock.clone(), handler.clone(), &[Cadence::Realtime]);

        scheduler.start();
        tokio::time::sleep(Duration::from_secs(65)).await;
        let stats = scheduler.stats(Cadence::Realtime).unwrap();
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.last_error_code, Some(ErrorCode::SCHEDULER_HANDLER_FAILED));

        handler.panic_next(1);
        tokio::time::sleep(Duration::from_secs(60)).await;
        scheduler.stop().await;
        let stats = scheduler.stats(Cadence::Realtime).unwrap();
        assert_eq!(stats.failures, 2);
        assert_eq!(stats.last_error_code, Some(ErrorCode::SCHEDULER_HANDLER_PANICKED));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent_and_restartable() {
        let clock = Arc::new(TokioClock::starting_at(anchor()));
        let handler = Arc::new(RecordingHandler::new());
        let scheduler =
            CadenceScheduler::with_cadences(&config(), clock.clone(), handler.clone(), &[Cadence::Realtime]);

        assert_eq!(scheduler.state(Cadence::Realtime), Some(ScheduleState::Idle));
        scheduler.start();
        scheduler.start();
        tokio::time::sleep(Duration::from_secs(65)).await;
        scheduler.stop().await;
        scheduler.stop().await;
        assert_eq!(handler.fired_at(Cadence::Realtime).len(), 1);

        scheduler.start();
        tokio::time::sleep(Duration::from_secs(65)).await;
        scheduler.stop().await;
        assert_eq!(handler.fired_at(Cadence::Realtime).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_disarms_pending_timers() {
        let clock = Arc::new(TokioClock::starting_at(anchor()));
        let handler = Arc::new(RecordingHandler::new());
        let scheduler = CadenceScheduler::new(&config(), clock.clone(), handler.clone());

        scheduler.start();
        tokio::time::sleep(Duration::from_secs(30)).await;
        scheduler.stop().await;
        tokio::time::sleep(Duration::from_secs(40 * 24 * 3600)).await;

        assert_eq!(handler.total_fires(), 0);
        for cadence in Cadence::ALL {
            assert_eq!(scheduler.state(cadence), Some(ScheduleState::Stopped));
        }
    }
}
