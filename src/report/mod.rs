//! Snapshot generation
//!
//! A report is a rollup of repository data over one window, persisted as a
//! [`MetricsSnapshot`]. Generation is idempotent per window apart from the
//! fresh id and `snapshot_time`.

use chrono::{DateTime, FixedOffset, Offset, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::aggregator::RealTimeStats;
use crate::cadence::Cadence;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::storage::{conversion_rate, MetricsSnapshot, SnapshotRepository, TimeWindow};

impl MetricsSnapshot {
    /// Realtime snapshot built from live counters rather than the repository.
    ///
    /// Live counters carry no time-on-page data, so `average_time_per_user`
    /// is zero.
    pub fn from_stats(stats: &RealTimeStats, window: TimeWindow, snapshot_time: DateTime<Utc>) -> Self {
        let visits = &stats.page_visits;
        Self {
            id: Uuid::new_v4(),
            report_type: Cadence::Realtime,
            landing_page_visits: visits.total,
            conversions: stats.conversions.total,
            conversion_rate: conversion_rate(stats.conversions.total, visits.total),
            referral_counts: visits.by_source.clone(),
            devices: visits.by_device.to_count_map(),
            geography: visits.by_country.clone(),
            average_time_per_user: 0.0,
            window_start: window.start,
            window_end: window.end,
            snapshot_time,
        }
    }
}

/// Builds and stores snapshots for each cadence
pub struct ReportGenerator {
    repository: Arc<dyn SnapshotRepository>,
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
    realtime_window: Duration,
}

impl ReportGenerator {
    pub fn new(config: &EngineConfig, repository: Arc<dyn SnapshotRepository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            repository,
            clock,
            offset: config.utc_offset().unwrap_or_else(|| Utc.fix()),
            realtime_window: config.realtime_window,
        }
    }

    /// Window a report fired at `fired_at` covers
    pub fn window_for(&self, cadence: Cadence, fired_at: DateTime<Utc>) -> TimeWindow {
        cadence.window_ending(fired_at, self.offset, self.realtime_window)
    }

    /// Roll up `window` and persist the result
    pub async fn generate(&self, cadence: Cadence, window: TimeWindow) -> Result<MetricsSnapshot> {
        let rollup = self.repository.rollup(&window).await?;

        let snapshot = MetricsSnapshot {
            id: Uuid::new_v4(),
            report_type: cadence,
            landing_page_visits: rollup.landing_page_visits,
            conversions: rollup.conversions,
            conversion_rate: conversion_rate(rollup.conversions, rollup.landing_page_visits),
            referral_counts: rollup.referral_counts,
            devices: rollup.devices,
            geography: rollup.geography,
            average_time_per_user: rollup.average_time_per_user,
            window_start: window.start,
            window_end: window.end,
            snapshot_time: self.clock.now(),
        };

        self.repository.save_snapshot(&snapshot).await?;
        info!(
            "Generated {} report: {} visits, {} conversions ({:.1}%)",
            cadence, snapshot.landing_page_visits, snapshot.conversions, snapshot.conversion_rate
        );
        Ok(snapshot)
    }

    /// Generate the report for a cadence that fired at `fired_at`
    pub async fn generate_for(&self, cadence: Cadence, fired_at: DateTime<Utc>) -> Result<MetricsSnapshot> {
        self.generate(cadence, self.window_for(cadence, fired_at)).await
    }

    /// Generate one snapshot for every cadence that has none stored yet.
    ///
    /// A failure for one cadence is logged and the rest still run. Returns
    /// the cadences that were generated.
    pub async fn ensure_initial_snapshots(&self) -> Vec<Cadence> {
        let now = self.clock.now();
        let mut generated = Vec::new();

        for cadence in Cadence::ALL {
            match self.repository.get_latest_snapshot(cadence).await {
                Ok(Some(_)) => debug!("{} snapshot already present", cadence),
                Ok(None) => match self.generate_for(cadence, now).await {
                    Ok(_) => generated.push(cadence),
                    Err(e) => warn!("Initial {} report failed: {}", cadence, e),
                },
                Err(e) => warn!("Could not check for existing {} snapshot: {}", cadence, e),
            }
        }
        generated
    }

    /// Snapshots of a cadence, newest first
    pub async fn get_snapshots_by_type(&self, cadence: Cadence, limit: usize) -> Result<Vec<MetricsSnapshot>> {
        Ok(self.repository.get_snapshots_by_type(cadence, limit).await?)
    }

    pub async fn get_latest_snapshot(&self, cadence: Cadence) -> Result<Option<MetricsSnapshot>> {
        Ok(self.repository.get_latest_snapshot(cadence).await?)
    }

    /// Latest stored snapshot, falling back to live counters for realtime
    pub async fn latest_or_fallback(
        &self,
        cadence: Cadence,
        live: &RealTimeStats,
    ) -> Result<Option<MetricsSnapshot>> {
        if let Some(snapshot) = self.get_latest_snapshot(cadence).await? {
            return Ok(Some(snapshot));
        }
        if cadence != Cadence::Realtime {
            return Ok(None);
        }
        let now = self.clock.now();
        debug!("No realtime snapshot stored, deriving one from live stats");
        Ok(Some(MetricsSnapshot::from_stats(live, self.window_for(cadence, now), now)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use crate::events::Event;
    use crate::storage::{
        CountMap, DailyPoint, MemoryRepository, RepositoryError, RepositoryResult, WindowRollup,
    };
    use crate::testing::{EventBuilder, FlakyRepository};
    use async_trait::async_trait;
    use chrono::TimeZone;

    /// Answers only whole-window rollups; every single-figure query fails
    struct RollupOnly(MemoryRepository);

    fn single_query<T>() -> RepositoryResult<T> {
        Err(RepositoryError::database("single-figure query used"))
    }

    #[async_trait]
    impl SnapshotRepository for RollupOnly {
        async fn save_events(&self, events: &[Event]) -> RepositoryResult<()> {
            self.0.save_events(events).await
        }
        async fn count_page_visits(&self, _: &TimeWindow) -> RepositoryResult<u64> {
            single_query()
        }
        async fn count_conversions(&self, _: &TimeWindow) -> RepositoryResult<u64> {
            single_query()
        }
        async fn referral_counts(&self, _: &TimeWindow) -> RepositoryResult<CountMap> {
            single_query()
        }
        async fn device_counts(&self, _: &TimeWindow) -> RepositoryResult<CountMap> {
            single_query()
        }
        async fn geography_counts(&self, _: &TimeWindow) -> RepositoryResult<CountMap> {
            single_query()
        }
        async fn average_time_on_page(&self, _: &TimeWindow) -> RepositoryResult<f64> {
            single_query()
        }
        async fn rollup(&self, window: &TimeWindow) -> RepositoryResult<WindowRollup> {
            self.0.rollup(window).await
        }
        async fn daily_series(&self, window: &TimeWindow, offset: FixedOffset) -> RepositoryResult<Vec<DailyPoint>> {
            self.0.daily_series(window, offset).await
        }
        async fn save_snapshot(&self, snapshot: &MetricsSnapshot) -> RepositoryResult<()> {
            self.0.save_snapshot(snapshot).await
        }
        async fn get_snapshots_by_type(&self, report_type: Cadence, limit: usize) -> RepositoryResult<Vec<MetricsSnapshot>> {
            self.0.get_snapshots_by_type(report_type, limit).await
        }
    }

    fn utc(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, d, h, 0, 0).unwrap()
    }

    fn generator(repo: Arc<dyn SnapshotRepository>, now: DateTime<Utc>) -> ReportGenerator {
        ReportGenerator::new(&EngineConfig::default(), repo, Arc::new(TokioClock::starting_at(now)))
    }

    #[tokio::test]
    async fn test_daily_report_rolls_up_previous_day() {
        let repo = MemoryRepository::with_events(vec![
            EventBuilder::page_visit().at(utc(9, 10)).utm_source("google").country("US").time_on_page(30.0).build(),
            EventBuilder::page_visit().at(utc(9, 11)).country("DE").device("mobile").time_on_page(90.0).build(),
            EventBuilder::page_visit().at(utc(9, 12)).time_on_page(500.0).bot().build(),
            EventBuilder::page_visit().at(utc(9, 13)).build(),
            EventBuilder::converted("contact").at(utc(9, 14)).build(),
            // Outside the window
            EventBuilder::page_visit().at(utc(10, 1)).build(),
        ])
        .await;
        let generator = generator(Arc::new(repo.clone()), utc(10, 0));

        let snapshot = generator.generate_for(Cadence::Daily, utc(10, 0)).await.unwrap();

        assert_eq!(snapshot.report_type, Cadence::Daily);
        assert_eq!(snapshot.landing_page_visits, 4);
        assert_eq!(snapshot.conversions, 1);
        assert_eq!(snapshot.conversion_rate, 25.0);
        assert_eq!(snapshot.referral_counts.get("google"), Some(&1));
        assert_eq!(snapshot.referral_counts.get("Direct"), Some(&3));
        assert_eq!(snapshot.geography.get("Unknown"), Some(&2));
        assert_eq!(snapshot.devices.get("mobile"), Some(&1));
        assert_eq!(snapshot.average_time_per_user, 60.0);
        assert_eq!((snapshot.window_start, snapshot.window_end), (utc(9, 0), utc(10, 0)));
        assert_eq!(repo.snapshot_count().await, 1);
    }

    #[tokio::test]
    async fn test_empty_window_has_zero_rate() {
        let generator = generator(Arc::new(MemoryRepository::new()), utc(10, 0));
        let snapshot = generator.generate_for(Cadence::Weekly, utc(10, 0)).await.unwrap();
        assert_eq!(snapshot.landing_page_visits, 0);
        assert_eq!(snapshot.conversion_rate, 0.0);
    }

    #[tokio::test]
    async fn test_initial_snapshots_only_for_missing_cadences() {
        let repo = MemoryRepository::new();
        let generator = generator(Arc::new(repo.clone()), utc(10, 0));
        generator.generate_for(Cadence::Weekly, utc(10, 0)).await.unwrap();

        let generated = generator.ensure_initial_snapshots().await;

        assert_eq!(generated, vec![Cadence::Realtime, Cadence::Daily, Cadence::Monthly]);
        assert_eq!(repo.snapshot_count().await, 4);
        assert!(generator.ensure_initial_snapshots().await.is_empty());
    }

    #[tokio::test]
    async fn test_realtime_falls_back_to_live_stats() {
        let generator = generator(Arc::new(MemoryRepository::new()), utc(10, 0));
        let mut live = RealTimeStats::default();
        for _ in 0..4 {
            live.apply(&EventBuilder::page_visit().utm_source("news").build());
        }
        live.apply(&EventBuilder::converted("contact").build());

        let snapshot = generator
            .latest_or_fallback(Cadence::Realtime, &live)
            .await
            .unwrap()
            .expect("realtime fallback");
        assert_eq!(snapshot.landing_page_visits, 4);
        assert_eq!(snapshot.conversion_rate, 25.0);
        assert_eq!(snapshot.referral_counts.get("news"), Some(&4));

        let daily = generator.latest_or_fallback(Cadence::Daily, &live).await.unwrap();
        assert!(daily.is_none());
    }

    #[tokio::test]
    async fn test_generate_uses_one_rollup_query() {
        let memory = MemoryRepository::with_events(vec![
            EventBuilder::page_visit().at(utc(9, 10)).build(),
            EventBuilder::page_visit().at(utc(9, 11)).build(),
            EventBuilder::converted("contact").at(utc(9, 12)).build(),
        ])
        .await;
        let generator = generator(Arc::new(RollupOnly(memory.clone())), utc(10, 0));

        let snapshot = generator.generate_for(Cadence::Daily, utc(10, 0)).await.unwrap();

        assert_eq!(snapshot.landing_page_visits, 2);
        assert_eq!(snapshot.conversion_rate, 50.0);
        assert_eq!(memory.snapshot_count().await, 1);
    }

    #[tokio::test]
    async fn test_repository_failure_is_surfaced() {
        let repo = FlakyRepository::new();
        repo.set_unavailable(true);
        let generator = generator(Arc::new(repo), utc(10, 0));

        let err = generator.generate_for(Cadence::Daily, utc(10, 0)).await.unwrap_err();
        assert!(err.is_transient());
    }
}
