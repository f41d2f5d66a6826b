//! Waiting on far-off wall-clock targets
//!
//! A single timer is never armed for longer than `max_delay`. After each
//! chunk the remaining time is recomputed from the clock, so drift or clock
//! adjustments during a multi-week wait are absorbed at the next wake.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::clock::Clock;

/// Delay to arm next for `target`, or `None` once it has been reached
pub fn next_chunk(now: DateTime<Utc>, target: DateTime<Utc>, max_delay: Duration) -> Option<Duration> {
    let remaining = (target - now).to_std().ok()?;
    if remaining.is_zero() {
        return None;
    }
    Some(remaining.min(max_delay))
}

/// Sleep until `clock` reports `target`, in chunks of at most `max_delay`.
///
/// `on_chunk` is called with each delay just before it is armed.
pub async fn sleep_until<F>(clock: &dyn Clock, target: DateTime<Utc>, max_delay: Duration, mut on_chunk: F)
where
    F: FnMut(Duration),
{
    while let Some(chunk) = next_chunk(clock.now(), target, max_delay) {
        on_chunk(chunk);
        tokio::time::sleep(chunk).await;
    }
}
