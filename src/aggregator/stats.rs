//! Live counters maintained by the aggregator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::events::{DeviceType, Event, EventType};
use crate::storage::query::{DIRECT_SOURCE, UNKNOWN_COUNTRY};
use crate::storage::{conversion_rate, CountMap};

/// Streaming summary of a duration metric
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingStats {
    pub average: f64,
    pub min: f64,
    pub max: f64,
    pub total: f64,
    pub count: u64,
}

impl TimingStats {
    /// Fold one observation in O(1)
    pub fn record(&mut self, value: f64) {
        self.count += 1;
        self.total += value;
        if self.count == 1 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.average += (value - self.average) / self.count as f64;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub submitted: u64,
    pub processed: u64,
    pub error: u64,
    pub converted: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCounts {
    pub desktop: u64,
    pub mobile: u64,
    pub tablet: u64,
    pub unknown: u64,
}

impl DeviceCounts {
    pub fn increment(&mut self, device: DeviceType) {
        match device {
            DeviceType::Desktop => self.desktop += 1,
            DeviceType::Mobile => self.mobile += 1,
            DeviceType::Tablet => self.tablet += 1,
            DeviceType::Unknown => self.unknown += 1,
        }
    }

    /// Non-zero buckets keyed by device label
    pub fn to_count_map(&self) -> CountMap {
        [
            (DeviceType::Desktop, self.desktop),
            (DeviceType::Mobile, self.mobile),
            (DeviceType::Tablet, self.tablet),
            (DeviceType::Unknown, self.unknown),
        ]
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .map(|(device, count)| (device.as_str().to_string(), count))
        .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormSubmissionStats {
    pub total: u64,
    pub by_type: CountMap,
    pub by_status: StatusCounts,
    pub by_device: DeviceCounts,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionStats {
    pub total: u64,
    pub by_type: CountMap,
    /// Conversions per hundred submissions. Not clamped.
    pub conversion_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorStats {
    pub total: u64,
    pub by_type: CountMap,
    pub by_form_type: BTreeMap<String, CountMap>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageVisitStats {
    pub total: u64,
    pub by_device: DeviceCounts,
    pub by_source: CountMap,
    pub by_country: CountMap,
}

/// All live counters. Every counter only grows until [`RealTimeStats::reset`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealTimeStats {
    pub form_submissions: FormSubmissionStats,
    pub conversions: ConversionStats,
    pub errors: ErrorStats,
    pub processing_time: TimingStats,
    pub time_to_conversion: TimingStats,
    pub page_visits: PageVisitStats,
}

fn bump(map: &mut CountMap, key: &str) {
    *map.entry(key.to_string()).or_insert(0) += 1;
}

impl RealTimeStats {
    /// Apply one validated event to the counters
    pub fn apply(&mut self, event: &Event) {
        let form_type = event.form_type.as_deref().unwrap_or("unknown");

        match event.event_type {
            EventType::Submitted => {
                let submissions = &mut self.form_submissions;
                submissions.total += 1;
                bump(&mut submissions.by_type, form_type);
                submissions.by_status.submitted += 1;
                submissions.by_device.increment(event.device());
            }
            EventType::Processed => {
                self.form_submissions.by_status.processed += 1;
                if let Some(ms) = event.processing_time_ms() {
                    self.processing_time.record(ms);
                }
            }
            EventType::Error => {
                self.form_submissions.by_status.error += 1;
                let error_type = event.error_type();
                self.errors.total += 1;
                bump(&mut self.errors.by_type, error_type);
                bump(
                    self.errors
                        .by_form_type
                        .entry(form_type.to_string())
                        .or_default(),
                    error_type,
                );
            }
            EventType::Converted => {
                self.form_submissions.by_status.converted += 1;
                self.conversions.total += 1;
                bump(&mut self.conversions.by_type, event.conversion_type());
                self.conversions.conversion_rate =
                    conversion_rate(self.conversions.total, self.form_submissions.total);
                if let Some(ms) = event.time_to_conversion_ms() {
                    self.time_to_conversion.record(ms);
                }
            }
            EventType::PageVisit => {
                let visits = &mut self.page_visits;
                visits.total += 1;
                visits.by_device.increment(event.device());
                bump(&mut visits.by_source, event.utm_source().unwrap_or(DIRECT_SOURCE));
                bump(&mut visits.by_country, event.country().unwrap_or(UNKNOWN_COUNTRY));
            }
        }
    }

    /// Zero every counter
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Point-in-time copy of the stats handed to readers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    #[serde(flatten)]
    pub stats: RealTimeStats,
    pub last_updated: Option<DateTime<Utc>>,
    pub buffer_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::EventBuilder;

    #[test]
    fn test_streaming_average() {
        let mut timing = TimingStats::default();
        for value in [10.0, 20.0, 30.0] {
            timing.record(value);
        }
        assert_eq!(timing.average, 20.0);
        assert_eq!(timing.min, 10.0);
        assert_eq!(timing.max, 30.0);
        assert_eq!(timing.total, 60.0);
        assert_eq!(timing.count, 3);
    }

    #[test]
    fn test_conversion_rate_recomputed_on_conversion() {
        let mut stats = RealTimeStats::default();
        for _ in 0..10 {
            stats.apply(&EventBuilder::submitted("quote").build());
        }
        for _ in 0..2 {
            stats.apply(&EventBuilder::converted("quote").build());
        }
        assert_eq!(stats.conversions.conversion_rate, 20.0);
        assert_eq!(stats.conversions.by_type.get("quote"), Some(&2));
    }

    #[test]
    fn test_conversion_without_submissions_is_zero() {
        let mut stats = RealTimeStats::default();
        stats.apply(&EventBuilder::converted("quote").build());
        assert_eq!(stats.conversions.conversion_rate, 0.0);
        assert_eq!(stats.conversions.total, 1);
    }

    #[test]
    fn test_errors_grouped_by_form_type() {
        let mut stats = RealTimeStats::default();
        stats.apply(&EventBuilder::error("contact", "validation").build());
        stats.apply(&EventBuilder::error("contact", "validation").build());
        stats.apply(&EventBuilder::error("booking", "timeout").build());

        assert_eq!(stats.errors.total, 3);
        assert_eq!(stats.errors.by_type.get("validation"), Some(&2));
        assert_eq!(
            stats.errors.by_form_type["contact"].get("validation"),
            Some(&2)
        );
        assert_eq!(stats.form_submissions.by_status.error, 3);
    }

    #[test]
    fn test_stats_serialize_camel_case() {
        let snapshot = StatsSnapshot {
            stats: RealTimeStats::default(),
            last_updated: None,
            buffer_size: 4,
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert!(json["formSubmissions"]["byStatus"]["submitted"].is_number());
        assert!(json["conversions"]["conversionRate"].is_number());
        assert_eq!(json["bufferSize"], 4);
    }
}
