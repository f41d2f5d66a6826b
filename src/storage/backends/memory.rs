//! In-memory repository backend for tests and short-lived processes

use async_trait::async_trait;
use chrono::FixedOffset;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::cadence::Cadence;
use crate::events::Event;
use crate::storage::{
    error::RepositoryResult,
    query,
    traits::SnapshotRepository,
    types::{CountMap, DailyPoint, MetricsSnapshot, TimeWindow, WindowRollup},
};

/// Repository that keeps events and snapshots in process memory
#[derive(Clone, Default)]
pub struct MemoryRepository {
    events: Arc<RwLock<Vec<Event>>>,
    snapshots: Arc<RwLock<Vec<MetricsSnapshot>>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with events, bypassing the flusher
    pub async fn with_events(events: Vec<Event>) -> Self {
        let repo = Self::new();
        repo.events.write().await.extend(events);
        repo
    }

    /// All persisted events in write order
    pub async fn events(&self) -> Vec<Event> {
        self.events.read().await.clone()
    }

    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn snapshot_count(&self) -> usize {
        self.snapshots.read().await.len()
    }
}

#[async_trait]
impl SnapshotRepository for MemoryRepository {
    async fn save_events(&self, events: &[Event]) -> RepositoryResult<()> {
        self.events.write().await.extend_from_slice(events);
        Ok(())
    }

    async fn count_page_visits(&self, window: &TimeWindow) -> RepositoryResult<u64> {
        Ok(query::count_page_visits(&self.events.read().await, window))
    }

    async fn count_conversions(&self, window: &TimeWindow) -> RepositoryResult<u64> {
        Ok(query::count_conversions(&self.events.read().await, window))
    }

    async fn referral_counts(&self, window: &TimeWindow) -> RepositoryResult<CountMap> {
        Ok(query::referral_counts(&self.events.read().await, window))
    }

    async fn device_counts(&self, window: &TimeWindow) -> RepositoryResult<CountMap> {
        Ok(query::device_counts(&self.events.read().await, window))
    }

    async fn geography_counts(&self, window: &TimeWindow) -> RepositoryResult<CountMap> {
        Ok(query::geography_counts(&self.events.read().await, window))
    }

    async fn average_time_on_page(&self, window: &TimeWindow) -> RepositoryResult<f64> {
        Ok(query::average_time_on_page(&self.events.read().await, window))
    }

    async fn rollup(&self, window: &TimeWindow) -> RepositoryResult<WindowRollup> {
        Ok(query::rollup(&self.events.read().await, window))
    }

    async fn daily_series(
        &self,
        window: &TimeWindow,
        offset: FixedOffset,
    ) -> RepositoryResult<Vec<DailyPoint>> {
        Ok(query::daily_series(&self.events.read().await, window, offset))
    }

    async fn save_snapshot(&self, snapshot: &MetricsSnapshot) -> RepositoryResult<()> {
        self.snapshots.write().await.push(snapshot.clone());
        Ok(())
    }

    async fn get_snapshots_by_type(
        &self,
        report_type: Cadence,
        limit: usize,
    ) -> RepositoryResult<Vec<MetricsSnapshot>> {
        Ok(query::snapshots_by_type(
            &self.snapshots.read().await,
            report_type,
            limit,
        ))
    }
}
