//! Cadence handler that records every firing

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Mutex, PoisonError};

use crate::cadence::Cadence;
use crate::error::{AnalyticsError, ErrorCode, Result};
use crate::scheduler::CadenceHandler;

#[derive(Default)]
struct Recorded {
    fired: Vec<(Cadence, DateTime<Utc>)>,
    fail_pending: usize,
    panic_pending: usize,
}

/// Records `(cadence, fired_at)` for each run. Can be primed to fail or
/// panic on upcoming runs; a panic takes precedence over a failure.
#[derive(Default)]
pub struct RecordingHandler {
    recorded: Mutex<Recorded>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, count: usize) {
        self.recorded.lock().unwrap_or_else(PoisonError::into_inner).fail_pending = count;
    }

    pub fn panic_next(&self, count: usize) {
        self.recorded.lock().unwrap_or_else(PoisonError::into_inner).panic_pending = count;
    }

    /// Fire times recorded for one cadence, in order
    pub fn fired_at(&self, cadence: Cadence) -> Vec<DateTime<Utc>> {
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fired
            .iter()
            .filter(|(c, _)| *c == cadence)
            .map(|(_, at)| *at)
            .collect()
    }

    pub fn total_fires(&self) -> usize {
        self.recorded.lock().unwrap_or_else(PoisonError::into_inner).fired.len()
    }
}

enum Outcome {
    Succeed,
    Fail,
    Panic,
}

#[async_trait]
impl CadenceHandler for RecordingHandler {
    async fn run(&self, cadence: Cadence, fired_at: DateTime<Utc>) -> Result<()> {
        // Decide under the lock, act after releasing it so a panic never poisons it
        let outcome = {
            let mut recorded = self.recorded.lock().unwrap_or_else(PoisonError::into_inner);
            recorded.fired.push((cadence, fired_at));
            if recorded.panic_pending > 0 {
                recorded.panic_pending -= 1;
                Outcome::Panic
            } else if recorded.fail_pending > 0 {
                recorded.fail_pending -= 1;
                Outcome::Fail
            } else {
                Outcome::Succeed
            }
        };

        match outcome {
            Outcome::Succeed => Ok(()),
            Outcome::Fail => Err(AnalyticsError::scheduler(
                ErrorCode::SCHEDULER_HANDLER_FAILED,
                "injected handler failure",
                cadence.as_str(),
            )),
            Outcome::Panic => panic!("injected handler panic for {}", cadence),
        }
    }
}
