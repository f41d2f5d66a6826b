//! Data types exchanged with the snapshot repository

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::cadence::Cadence;

/// Breakdown of counts keyed by dimension value
pub type CountMap = BTreeMap<String, u64>;

/// Half-open time range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Window covering the `days` days before `end`
    pub fn trailing_days(end: DateTime<Utc>, days: u32) -> Self {
        Self {
            start: end - chrono::Duration::days(i64::from(days)),
            end,
        }
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.start && timestamp < self.end
    }
}

/// Persisted rollup of metrics for one cadence and window.
///
/// Field names match the snapshot table columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub id: Uuid,
    pub report_type: Cadence,
    pub landing_page_visits: u64,
    pub conversions: u64,
    pub conversion_rate: f64,
    pub referral_counts: CountMap,
    pub devices: CountMap,
    pub geography: CountMap,
    pub average_time_per_user: f64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub snapshot_time: DateTime<Utc>,
}

/// Window-scoped figures behind one report, computed in a single pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowRollup {
    pub landing_page_visits: u64,
    pub conversions: u64,
    pub referral_counts: CountMap,
    pub devices: CountMap,
    pub geography: CountMap,
    pub average_time_per_user: f64,
}

/// One day of the traffic series used for anomaly detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPoint {
    pub date: NaiveDate,
    pub visits: u64,
    pub conversions: u64,
    pub conversion_rate: f64,
}

impl DailyPoint {
    pub fn new(date: NaiveDate, visits: u64, conversions: u64) -> Self {
        Self {
            date,
            visits,
            conversions,
            conversion_rate: conversion_rate(conversions, visits),
        }
    }
}

/// Percentage of `conversions` over `base`; zero when `base` is zero
pub fn conversion_rate(conversions: u64, base: u64) -> f64 {
    if base == 0 {
        0.0
    } else {
        conversions as f64 / base as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_conversion_rate_zero_base() {
        assert_eq!(conversion_rate(0, 0), 0.0);
        assert_eq!(conversion_rate(3, 0), 0.0);
        assert_eq!(conversion_rate(2, 10), 20.0);
    }

    #[test]
    fn test_window_is_half_open() {
        let start = Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 5, 2, 0, 0, 0).unwrap();
        let window = TimeWindow::new(start, end);
        assert!(window.contains(start));
        assert!(!window.contains(end));
        assert_eq!(TimeWindow::trailing_days(end, 1), window);
    }
}
