//! Repository wrapper with injectable failures

use async_trait::async_trait;
use chrono::FixedOffset;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::cadence::Cadence;
use crate::events::Event;
use crate::storage::{
    CountMap, DailyPoint, MemoryRepository, MetricsSnapshot, RepositoryError, RepositoryResult,
    SnapshotRepository, TimeWindow,
};

/// In-memory repository that can be told to fail.
///
/// `fail_next_writes(n)` rejects the next `n` event writes.
/// `set_unavailable(true)` rejects every call until cleared.
#[derive(Clone, Default)]
pub struct FlakyRepository {
    inner: MemoryRepository,
    failures_pending: Arc<AtomicUsize>,
    unavailable: Arc<AtomicBool>,
    write_attempts: Arc<AtomicUsize>,
    write_delay_ms: Arc<AtomicU64>,
}

impl FlakyRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// The wrapped store, for inspecting what was persisted
    pub fn inner(&self) -> &MemoryRepository {
        &self.inner
    }

    pub fn fail_next_writes(&self, count: usize) {
        self.failures_pending.store(count, Ordering::SeqCst);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every event write, to exercise write timeouts
    pub fn set_write_delay(&self, delay: Duration) {
        self.write_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of `save_events` calls, successful or not
    pub fn write_attempts(&self) -> usize {
        self.write_attempts.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> RepositoryResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::unavailable("repository is down"));
        }
        Ok(())
    }
}

#[async_trait]
impl SnapshotRepository for FlakyRepository {
    async fn save_events(&self, events: &[Event]) -> RepositoryResult<()> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);

        let delay = self.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.check_available()?;

        let injected = self
            .failures_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(RepositoryError::database("injected write failure"));
        }

        self.inner.save_events(events).await
    }

    async fn count_page_visits(&self, window: &TimeWindow) -> RepositoryResult<u64> {
        self.check_available()?;
        self.inner.count_page_visits(window).await
    }

    async fn count_conversions(&self, window: &TimeWindow) -> RepositoryResult<u64> {
        self.check_available()?;
        self.inner.count_conversions(window).await
    }

    async fn referral_counts(&self, window: &TimeWindow) -> RepositoryResult<CountMap> {
        self.check_available()?;
        self.inner.referral_counts(window).await
    }

    async fn device_counts(&self, window: &TimeWindow) -> RepositoryResult<CountMap> {
        self.check_available()?;
        self.inner.device_counts(window).await
    }

    async fn geography_counts(&self, window: &TimeWindow) -> RepositoryResult<CountMap> {
        self.check_available()?;
        self.inner.geography_counts(window).await
    }

    async fn average_time_on_page(&self, window: &TimeWindow) -> RepositoryResult<f64> {
        self.check_available()?;
        self.inner.average_time_on_page(window).await
    }

    async fn daily_series(
        &self,
        window: &TimeWindow,
        offset: FixedOffset,
    ) -> RepositoryResult<Vec<DailyPoint>> {
        self.check_available()?;
        self.inner.daily_series(window, offset).await
    }

    async fn save_snapshot(&self, snapshot: &MetricsSnapshot) -> RepositoryResult<()> {
        self.check_available()?;
        self.inner.save_snapshot(snapshot).await
    }

    async fn get_snapshots_by_type(
        &self,
        report_type: Cadence,
        limit: usize,
    ) -> RepositoryResult<Vec<MetricsSnapshot>> {
        self.check_available()?;
        self.inner.get_snapshots_by_type(report_type, limit).await
    }
}
