//! Wiring of the aggregation and reporting pipeline
//!
//! ```text
//! bus -> Aggregator -> buffer -> PersistenceFlusher -> repository
//!                                 CadenceScheduler -> ReportingJob -> ReportGenerator -> repository
//!                                                                  -> AnomalyDetector (daily)
//! ```
//!
//! Every collaborator is injected; the engine holds no global state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

use crate::aggregator::{Aggregator, BusSubscription, StatsSnapshot};
use crate::anomaly::{Anomaly, AnomalyDetector};
use crate::cadence::Cadence;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::events::{Event, EventBus};
use crate::flusher::{FlushReport, PersistenceFlusher};
use crate::report::ReportGenerator;
use crate::scheduler::{CadenceHandler, CadenceScheduler, ScheduleStats};
use crate::storage::{MetricsSnapshot, SnapshotRepository};

/// What the scheduler runs on each firing: the cadence's report, and for
/// the daily cadence an anomaly pass over the trailing history.
pub struct ReportingJob {
    reports: Arc<ReportGenerator>,
    anomalies: Arc<AnomalyDetector>,
    trailing_days: u32,
}

impl ReportingJob {
    pub fn new(reports: Arc<ReportGenerator>, anomalies: Arc<AnomalyDetector>, trailing_days: u32) -> Self {
        Self {
            reports,
            anomalies,
            trailing_days,
        }
    }
}

#[async_trait]
impl CadenceHandler for ReportingJob {
    async fn run(&self, cadence: Cadence, fired_at: DateTime<Utc>) -> Result<()> {
        self.reports.generate_for(cadence, fired_at).await?;
        if cadence == Cadence::Daily {
            let found = self.anomalies.detect_ending(fired_at, self.trailing_days).await?;
            debug!("Daily anomaly pass found {} anomalies", found.len());
        }
        Ok(())
    }
}

/// The analytics engine
pub struct AnalyticsEngine {
    bus: Arc<dyn EventBus>,
    aggregator: Arc<Aggregator>,
    flusher: PersistenceFlusher,
    reports: Arc<ReportGenerator>,
    anomalies: Arc<AnomalyDetector>,
    scheduler: CadenceScheduler,
    subscription: Mutex<Option<BusSubscription>>,
    trailing_days: u32,
}

impl AnalyticsEngine {
    pub fn new(
        config: EngineConfig,
        repository: Arc<dyn SnapshotRepository>,
        clock: Arc<dyn Clock>,
        bus: Arc<dyn EventBus>,
    ) -> Result<Self> {
        config.validate()?;

        let aggregator = Arc::new(Aggregator::new(&config, clock.clone()));
        let flusher = PersistenceFlusher::new(
            &config,
            repository.clone(),
            aggregator.buffer(),
            aggregator.flush_signal(),
        );
        let reports = Arc::new(ReportGenerator::new(&config, repository.clone(), clock.clone()));
        let anomalies = Arc::new(AnomalyDetector::new(&config, repository, clock.clone()));
        let job = Arc::new(ReportingJob::new(
            reports.clone(),
            anomalies.clone(),
            config.anomaly_trailing_days,
        ));
        let scheduler = CadenceScheduler::new(&config, clock, job);

        Ok(Self {
            bus,
            aggregator,
            flusher,
            reports,
            anomalies,
            scheduler,
            subscription: Mutex::new(None),
            trailing_days: config.anomaly_trailing_days,
        })
    }

    /// Subscribe to the bus, start flushing and scheduling, and generate any
    /// missing snapshots. Calling this while running does nothing.
    pub async fn start(&self) {
        {
            let mut subscription = self.subscription.lock().unwrap_or_else(PoisonError::into_inner);
            if subscription.is_some() {
                return;
            }
            *subscription = Some(self.aggregator.subscribe(self.bus.as_ref()));
        }

        self.flusher.start();
        self.scheduler.start();

        let generated = self.reports.ensure_initial_snapshots().await;
        if !generated.is_empty() {
            info!("Generated initial snapshots for {:?}", generated);
        }
        info!("Analytics engine started");
    }

    /// Stop consuming events, disarm the scheduler and flush what remains
    pub async fn stop(&self) -> FlushReport {
        let subscription = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(subscription) = subscription {
            subscription.close().await;
        }

        self.scheduler.stop().await;
        let report = match self.flusher.stop().await {
            Some(report) => report,
            None => self.flusher.flush().await,
        };
        info!("Analytics engine stopped");
        report
    }

    /// Record an event without going through the bus
    pub fn ingest(&self, event: Event) {
        self.aggregator.handle(event);
    }

    pub fn get_stats(&self) -> StatsSnapshot {
        self.aggregator.get_stats()
    }

    pub fn reset_stats(&self) {
        self.aggregator.reset_stats();
    }

    /// Persist buffered events now
    pub async fn flush(&self) -> FlushReport {
        self.flusher.flush().await
    }

    /// Generate a report for `cadence` as if it fired now
    pub async fn generate_report(&self, cadence: Cadence, now: DateTime<Utc>) -> Result<MetricsSnapshot> {
        self.reports.generate_for(cadence, now).await
    }

    pub async fn get_snapshots_by_type(&self, cadence: Cadence, limit: usize) -> Result<Vec<MetricsSnapshot>> {
        self.reports.get_snapshots_by_type(cadence, limit).await
    }

    /// Latest snapshot; realtime falls back to live stats when none is stored
    pub async fn get_latest_snapshot(&self, cadence: Cadence) -> Result<Option<MetricsSnapshot>> {
        let live = self.aggregator.get_stats().stats;
        self.reports.latest_or_fallback(cadence, &live).await
    }

    /// Run anomaly detection now, over `trailing_days` or the configured span
    pub async fn detect_anomalies(&self, trailing_days: Option<u32>) -> Result<Vec<Anomaly>> {
        self.anomalies
            .detect(trailing_days.unwrap_or(self.trailing_days))
            .await
    }

    pub fn recent_anomalies(&self) -> Vec<Anomaly> {
        self.anomalies.recent_anomalies()
    }

    pub fn schedule_stats(&self, cadence: Cadence) -> Option<ScheduleStats> {
        self.scheduler.stats(cadence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use crate::events::BroadcastEventBus;
    use crate::storage::MemoryRepository;
    use crate::testing::EventBuilder;
    use chrono::TimeZone;
    use std::time::Duration;

    fn engine(repo: &MemoryRepository, bus: &Arc<BroadcastEventBus>) -> AnalyticsEngine {
        let clock = Arc::new(TokioClock::starting_at(
            Utc.with_ymd_and_hms(2026, 6, 10, 12, 0, 0).unwrap(),
        ));
        AnalyticsEngine::new(
            EngineConfig::default(),
            Arc::new(repo.clone()),
            clock,
            bus.clone(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let config = EngineConfig {
            batch_size: 0,
            ..Default::default()
        };
        let result = AnalyticsEngine::new(
            config,
            Arc::new(MemoryRepository::new()),
            Arc::new(crate::clock::SystemClock),
            Arc::new(BroadcastEventBus::default()),
        );
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_creates_initial_snapshots_and_stop_flushes() {
        let repo = MemoryRepository::new();
        let bus = Arc::new(BroadcastEventBus::default());
        let engine = engine(&repo, &bus);

        engine.start().await;
        assert_eq!(repo.snapshot_count().await, 4);

        bus.publish(EventBuilder::submitted("contact").build());
        bus.publish(EventBuilder::converted("contact").build());
        let report = engine.stop().await;

        assert_eq!(report.persisted, 2);
        assert_eq!(repo.event_count().await, 2);
        assert_eq!(engine.get_stats().stats.conversions.conversion_rate, 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_realtime_report_runs_on_schedule() {
        let repo = MemoryRepository::new();
        let bus = Arc::new(BroadcastEventBus::default());
        let engine = engine(&repo, &bus);

        engine.start().await;
        tokio::time::sleep(Duration::from_secs(61)).await;

        let stats = engine.schedule_stats(Cadence::Realtime).unwrap();
        assert_eq!(stats.fires, 1);
        assert_eq!(engine.get_snapshots_by_type(Cadence::Realtime, 10).await.unwrap().len(), 2);
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_latest_realtime_falls_back_before_any_report() {
        let repo = MemoryRepository::new();
        let bus = Arc::new(BroadcastEventBus::default());
        let engine = engine(&repo, &bus);

        engine.ingest(EventBuilder::page_visit().build());
        let snapshot = engine
            .get_latest_snapshot(Cadence::Realtime)
            .await
            .unwrap()
            .expect("derived from live stats");
        assert_eq!(snapshot.landing_page_visits, 1);
        assert!(engine.get_latest_snapshot(Cadence::Monthly).await.unwrap().is_none());
    }
}
