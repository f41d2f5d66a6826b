//! Rollup queries evaluated over stored events
//!
//! Both bundled backends keep raw events and answer range queries by scanning
//! them with these functions.

use chrono::{FixedOffset, NaiveDate};
use std::collections::BTreeMap;

use super::types::{CountMap, DailyPoint, MetricsSnapshot, TimeWindow, WindowRollup};
use crate::cadence::Cadence;
use crate::events::{Event, EventType};

pub const DIRECT_SOURCE: &str = "Direct";
pub const UNKNOWN_COUNTRY: &str = "Unknown";

fn visits_in<'a>(events: &'a [Event], window: &'a TimeWindow) -> impl Iterator<Item = &'a Event> {
    events
        .iter()
        .filter(move |e| e.event_type == EventType::PageVisit && window.contains(e.timestamp))
}

fn count_by<'a, F>(events: impl Iterator<Item = &'a Event>, key: F) -> CountMap
where
    F: Fn(&'a Event) -> &'a str,
{
    let mut counts = CountMap::new();
    for event in events {
        *counts.entry(key(event).to_string()).or_insert(0) += 1;
    }
    counts
}

pub fn count_page_visits(events: &[Event], window: &TimeWindow) -> u64 {
    visits_in(events, window).count() as u64
}

pub fn count_conversions(events: &[Event], window: &TimeWindow) -> u64 {
    events
        .iter()
        .filter(|e| e.event_type == EventType::Converted && window.contains(e.timestamp))
        .count() as u64
}

pub fn referral_counts(events: &[Event], window: &TimeWindow) -> CountMap {
    count_by(visits_in(events, window), |e| {
        e.utm_source().unwrap_or(DIRECT_SOURCE)
    })
}

pub fn device_counts(events: &[Event], window: &TimeWindow) -> CountMap {
    count_by(visits_in(events, window), |e| e.device().as_str())
}

pub fn geography_counts(events: &[Event], window: &TimeWindow) -> CountMap {
    count_by(visits_in(events, window), |e| {
        e.country().unwrap_or(UNKNOWN_COUNTRY)
    })
}

pub fn average_time_on_page(events: &[Event], window: &TimeWindow) -> f64 {
    let (total, count) = visits_in(events, window)
        .filter(|e| !e.is_bot())
        .filter_map(|e| e.time_on_page())
        .fold((0.0, 0u64), |(total, count), t| (total + t, count + 1));
    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}

/// Every report figure for `window`
pub fn rollup(events: &[Event], window: &TimeWindow) -> WindowRollup {
    WindowRollup {
        landing_page_visits: count_page_visits(events, window),
        conversions: count_conversions(events, window),
        referral_counts: referral_counts(events, window),
        devices: device_counts(events, window),
        geography: geography_counts(events, window),
        average_time_per_user: average_time_on_page(events, window),
    }
}

/// Visits and conversions per calendar day, days taken in `offset` local time
pub fn daily_series(events: &[Event], window: &TimeWindow, offset: FixedOffset) -> Vec<DailyPoint> {
    let mut days: BTreeMap<NaiveDate, (u64, u64)> = BTreeMap::new();
    for event in events.iter().filter(|e| window.contains(e.timestamp)) {
        let local_day = event.timestamp.with_timezone(&offset).date_naive();
        let day = days.entry(local_day).or_default();
        match event.event_type {
            EventType::PageVisit => day.0 += 1,
            EventType::Converted => day.1 += 1,
            _ => {}
        }
    }
    days.into_iter()
        .filter(|(_, (visits, _))| *visits > 0)
        .map(|(date, (visits, conversions))| DailyPoint::new(date, visits, conversions))
        .collect()
}

/// Newest-first snapshots of one cadence
pub fn snapshots_by_type(
    snapshots: &[MetricsSnapshot],
    report_type: Cadence,
    limit: usize,
) -> Vec<MetricsSnapshot> {
    let mut matching: Vec<MetricsSnapshot> = snapshots
        .iter()
        .filter(|s| s.report_type == report_type)
        .cloned()
        .collect();
    matching.sort_by(|a, b| b.snapshot_time.cmp(&a.snapshot_time));
    matching.truncate(limit);
    matching
}
