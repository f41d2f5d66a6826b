//! Repository seam between the engine and durable storage

use async_trait::async_trait;
use chrono::FixedOffset;

use super::error::RepositoryResult;
use super::types::{CountMap, DailyPoint, MetricsSnapshot, TimeWindow, WindowRollup};
use crate::cadence::Cadence;
use crate::events::Event;

/// Durable store for raw events and periodic snapshots.
///
/// Range queries take half-open windows. Breakdowns are computed over page
/// visits in the window.
#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    /// Persist a batch of events, all or nothing
    async fn save_events(&self, events: &[Event]) -> RepositoryResult<()>;

    /// Landing page visits in the window
    async fn count_page_visits(&self, window: &TimeWindow) -> RepositoryResult<u64>;

    /// Conversion events in the window
    async fn count_conversions(&self, window: &TimeWindow) -> RepositoryResult<u64>;

    /// Visits grouped by UTM source, unset sources counted as "Direct"
    async fn referral_counts(&self, window: &TimeWindow) -> RepositoryResult<CountMap>;

    /// Visits grouped by device class
    async fn device_counts(&self, window: &TimeWindow) -> RepositoryResult<CountMap>;

    /// Visits grouped by country, unset countries counted as "Unknown"
    async fn geography_counts(&self, window: &TimeWindow) -> RepositoryResult<CountMap>;

    /// Mean time on page in seconds, excluding bot traffic
    async fn average_time_on_page(&self, window: &TimeWindow) -> RepositoryResult<f64>;

    /// Every report figure for the window. Backends that scan stored events
    /// should override this to read them once.
    async fn rollup(&self, window: &TimeWindow) -> RepositoryResult<WindowRollup> {
        Ok(WindowRollup {
            landing_page_visits: self.count_page_visits(window).await?,
            conversions: self.count_conversions(window).await?,
            referral_counts: self.referral_counts(window).await?,
            devices: self.device_counts(window).await?,
            geography: self.geography_counts(window).await?,
            average_time_per_user: self.average_time_on_page(window).await?,
        })
    }

    /// Per-day visits and conversions for days with traffic, oldest first.
    /// Days are calendar days at `offset`.
    async fn daily_series(
        &self,
        window: &TimeWindow,
        offset: FixedOffset,
    ) -> RepositoryResult<Vec<DailyPoint>>;

    /// Store a snapshot
    async fn save_snapshot(&self, snapshot: &MetricsSnapshot) -> RepositoryResult<()>;

    /// Snapshots of a cadence, newest first
    async fn get_snapshots_by_type(
        &self,
        report_type: Cadence,
        limit: usize,
    ) -> RepositoryResult<Vec<MetricsSnapshot>>;

    /// Most recent snapshot of a cadence
    async fn get_latest_snapshot(
        &self,
        report_type: Cadence,
    ) -> RepositoryResult<Option<MetricsSnapshot>> {
        Ok(self
            .get_snapshots_by_type(report_type, 1)
            .await?
            .into_iter()
            .next())
    }
}
