//! Statistical anomaly detection over the daily traffic series
//!
//! A day is anomalous when a metric sits more than `threshold` population
//! standard deviations from the series mean. A flat series (zero deviation)
//! never produces anomalies. Days are calendar days at the configured UTC
//! offset, the same days the daily reports cover.

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::storage::{DailyPoint, SnapshotRepository, TimeWindow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyType {
    Traffic,
    Conversion,
}

impl AnomalyType {
    fn metric(&self) -> &'static str {
        match self {
            Self::Traffic => "visits",
            Self::Conversion => "conversion_rate",
        }
    }
}

impl fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Traffic => f.write_str("traffic"),
            Self::Conversion => f.write_str("conversion"),
        }
    }
}

/// A day whose traffic or conversion rate deviated from the norm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anomaly {
    pub date: NaiveDate,
    #[serde(rename = "type")]
    pub anomaly_type: AnomalyType,
    pub metric: String,
    pub value: f64,
    pub average: f64,
    pub percent_change: f64,
    pub message: String,
}

impl Anomaly {
    fn new(date: NaiveDate, anomaly_type: AnomalyType, value: f64, average: f64) -> Self {
        let percent_change = if average == 0.0 {
            0.0
        } else {
            (value - average) / average * 100.0
        };
        let direction = if value >= average { "above" } else { "below" };
        let message = match anomaly_type {
            AnomalyType::Traffic => format!(
                "Unusual traffic on {}: {:.0} visits, {:.1}% {} the average of {:.1}",
                date,
                value,
                percent_change.abs(),
                direction,
                average
            ),
            AnomalyType::Conversion => format!(
                "Unusual conversion rate on {}: {:.2}%, {:.1}% {} the average of {:.2}%",
                date,
                value,
                percent_change.abs(),
                direction,
                average
            ),
        };

        Self {
            date,
            anomaly_type,
            metric: anomaly_type.metric().to_string(),
            value,
            average,
            percent_change,
            message,
        }
    }
}

/// Population mean and standard deviation
fn mean_stdev(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some((mean, variance.sqrt()))
}

fn outliers(
    series: &[DailyPoint],
    anomaly_type: AnomalyType,
    threshold: f64,
    value: impl Fn(&DailyPoint) -> f64,
) -> Vec<Anomaly> {
    let values: Vec<f64> = series.iter().map(&value).collect();
    let Some((mean, stdev)) = mean_stdev(&values) else {
        return Vec::new();
    };
    if stdev == 0.0 {
        return Vec::new();
    }

    series
        .iter()
        .zip(values)
        .filter(|(_, v)| (v - mean).abs() > threshold * stdev)
        .map(|(point, v)| Anomaly::new(point.date, anomaly_type, v, mean))
        .collect()
}

/// Flag outlying days in `series`, ordered by date with traffic before
/// conversion on the same day
pub fn find_anomalies(series: &[DailyPoint], threshold: f64) -> Vec<Anomaly> {
    let mut found = outliers(series, AnomalyType::Traffic, threshold, |p| p.visits as f64);
    found.extend(outliers(series, AnomalyType::Conversion, threshold, |p| p.conversion_rate));
    found.sort_by_key(|a| (a.date, a.anomaly_type == AnomalyType::Conversion));
    found
}

/// Runs detection against the repository and keeps the most recent results
pub struct AnomalyDetector {
    repository: Arc<dyn SnapshotRepository>,
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
    threshold: f64,
    capacity: usize,
    recent: Mutex<VecDeque<Anomaly>>,
}

impl AnomalyDetector {
    pub fn new(config: &EngineConfig, repository: Arc<dyn SnapshotRepository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            repository,
            clock,
            offset: config.utc_offset().unwrap_or_else(|| Utc.fix()),
            threshold: config.anomaly_threshold,
            capacity: config.max_anomalies,
            recent: Mutex::new(VecDeque::new()),
        }
    }

    /// Detect over the `trailing_days` ending now
    pub async fn detect(&self, trailing_days: u32) -> Result<Vec<Anomaly>> {
        self.detect_ending(self.clock.now(), trailing_days).await
    }

    /// Detect over the `trailing_days` ending at `end`
    pub async fn detect_ending(&self, end: DateTime<Utc>, trailing_days: u32) -> Result<Vec<Anomaly>> {
        let window = TimeWindow::trailing_days(end, trailing_days);
        let series = self.repository.daily_series(&window, self.offset).await?;
        let found = find_anomalies(&series, self.threshold);

        if found.is_empty() {
            debug!("No anomalies across {} days of traffic", series.len());
        } else {
            for anomaly in &found {
                warn!("{}", anomaly.message);
            }
            self.remember(&found);
        }
        Ok(found)
    }

    /// Overlapping passes flag the same day again, so one entry is kept per
    /// day and type, refreshed with the latest figures
    fn remember(&self, found: &[Anomaly]) {
        let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
        for anomaly in found {
            let existing = recent
                .iter_mut()
                .find(|r| r.date == anomaly.date && r.anomaly_type == anomaly.anomaly_type);
            match existing {
                Some(entry) => *entry = anomaly.clone(),
                None => recent.push_back(anomaly.clone()),
            }
        }
        while recent.len() > self.capacity {
            recent.pop_front();
        }
    }

    /// Retained anomalies, oldest first
    pub fn recent_anomalies(&self) -> Vec<Anomaly> {
        self.recent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}
