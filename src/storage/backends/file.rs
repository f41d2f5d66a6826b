//! File-based repository backend
//!
//! Events and snapshots are appended as JSON lines under a data directory:
//!
//! ```text
//! <data_dir>/events.jsonl
//! <data_dir>/snapshots.jsonl
//! ```

use async_trait::async_trait;
use chrono::FixedOffset;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::cadence::Cadence;
use crate::events::Event;
use crate::storage::{
    error::{RepositoryError, RepositoryResult},
    query,
    traits::SnapshotRepository,
    types::{CountMap, DailyPoint, MetricsSnapshot, TimeWindow, WindowRollup},
};

const EVENTS_FILE: &str = "events.jsonl";
const SNAPSHOTS_FILE: &str = "snapshots.jsonl";

/// Append-only JSON lines repository
pub struct FileRepository {
    base_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileRepository {
    /// Open (and create if needed) a repository rooted at `base_dir`
    pub async fn open(base_dir: impl Into<PathBuf>) -> RepositoryResult<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).await?;
        debug!("Opened file repository at {}", base_dir.display());
        Ok(Self {
            base_dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    async fn append_lines<T: Serialize>(&self, file: &str, items: &[T]) -> RepositoryResult<()> {
        if items.is_empty() {
            return Ok(());
        }

        // Serialize everything first so a bad record never leaves a partial batch
        let mut buf = String::new();
        for item in items {
            buf.push_str(&serde_json::to_string(item)?);
            buf.push('\n');
        }

        let _guard = self.write_lock.lock().await;
        let mut handle = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.base_dir.join(file))
            .await?;
        handle.write_all(buf.as_bytes()).await?;
        handle.flush().await?;
        Ok(())
    }

    async fn read_lines<T: DeserializeOwned>(&self, file: &str) -> RepositoryResult<Vec<T>> {
        let path = self.base_dir.join(file);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(RepositoryError::Io(e)),
        };

        let mut items = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(item) => items.push(item),
                Err(e) => warn!(
                    "Skipping corrupt record at {}:{}: {}",
                    path.display(),
                    line_no + 1,
                    e
                ),
            }
        }
        Ok(items)
    }

    async fn events(&self) -> RepositoryResult<Vec<Event>> {
        self.read_lines(EVENTS_FILE).await
    }
}

#[async_trait]
impl SnapshotRepository for FileRepository {
    async fn save_events(&self, events: &[Event]) -> RepositoryResult<()> {
        self.append_lines(EVENTS_FILE, events).await
    }

    async fn count_page_visits(&self, window: &TimeWindow) -> RepositoryResult<u64> {
        Ok(query::count_page_visits(&self.events().await?, window))
    }

    async fn count_conversions(&self, window: &TimeWindow) -> RepositoryResult<u64> {
        Ok(query::count_conversions(&self.events().await?, window))
    }

    async fn referral_counts(&self, window: &TimeWindow) -> RepositoryResult<CountMap> {
        Ok(query::referral_counts(&self.events().await?, window))
    }

    async fn device_counts(&self, window: &TimeWindow) -> RepositoryResult<CountMap> {
        Ok(query::device_counts(&self.events().await?, window))
    }

    async fn geography_counts(&self, window: &TimeWindow) -> RepositoryResult<CountMap> {
        Ok(query::geography_counts(&self.events().await?, window))
    }

    async fn average_time_on_page(&self, window: &TimeWindow) -> RepositoryResult<f64> {
        Ok(query::average_time_on_page(&self.events().await?, window))
    }

    async fn rollup(&self, window: &TimeWindow) -> RepositoryResult<WindowRollup> {
        Ok(query::rollup(&self.events().await?, window))
    }

    async fn daily_series(
        &self,
        window: &TimeWindow,
        offset: FixedOffset,
    ) -> RepositoryResult<Vec<DailyPoint>> {
        Ok(query::daily_series(&self.events().await?, window, offset))
    }

    async fn save_snapshot(&self, snapshot: &MetricsSnapshot) -> RepositoryResult<()> {
        self.append_lines(SNAPSHOTS_FILE, std::slice::from_ref(snapshot))
            .await
    }

    async fn get_snapshots_by_type(
        &self,
        report_type: Cadence,
        limit: usize,
    ) -> RepositoryResult<Vec<MetricsSnapshot>> {
        let snapshots: Vec<MetricsSnapshot> = self.read_lines(SNAPSHOTS_FILE).await?;
        Ok(query::snapshots_by_type(&snapshots, report_type, limit))
    }
}
