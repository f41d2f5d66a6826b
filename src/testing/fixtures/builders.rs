//! Test data builders for events and snapshots

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::cadence::Cadence;
use crate::events::{Event, EventType};
use crate::storage::{CountMap, MetricsSnapshot};

/// Builder for creating test events
pub struct EventBuilder {
    event: Event,
}

impl EventBuilder {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event: Event::new(event_type, "test-session", Utc::now()),
        }
    }

    fn form(event_type: EventType, form_type: &str) -> Self {
        Self::new(event_type).form_type(form_type)
    }

    pub fn submitted(form_type: &str) -> Self {
        Self::form(EventType::Submitted, form_type)
    }

    pub fn processed(form_type: &str) -> Self {
        Self::form(EventType::Processed, form_type)
    }

    pub fn error(form_type: &str, error_type: &str) -> Self {
        Self::form(EventType::Error, form_type).meta("error_type", error_type)
    }

    pub fn converted(form_type: &str) -> Self {
        Self::form(EventType::Converted, form_type)
    }

    pub fn page_visit() -> Self {
        Self::new(EventType::PageVisit)
    }

    pub fn form_type(mut self, form_type: &str) -> Self {
        self.event.form_type = Some(form_type.to_string());
        self
    }

    pub fn session(mut self, session_id: &str) -> Self {
        self.event.session_id = session_id.to_string();
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.event.timestamp = timestamp;
        self
    }

    pub fn device(mut self, device_type: &str) -> Self {
        self.event.device_type = Some(device_type.to_string());
        self
    }

    pub fn user_agent(mut self, user_agent: &str) -> Self {
        self.event.user_agent = Some(user_agent.to_string());
        self
    }

    pub fn meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.event.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn processing_time(self, ms: f64) -> Self {
        self.meta("processing_time", ms)
    }

    pub fn time_to_conversion(self, ms: f64) -> Self {
        self.meta("time_to_conversion", ms)
    }

    pub fn utm_source(self, source: &str) -> Self {
        self.meta("utm_source", source)
    }

    pub fn country(self, country: &str) -> Self {
        self.meta("country", country)
    }

    pub fn time_on_page(self, seconds: f64) -> Self {
        self.meta("time_on_page", seconds)
    }

    pub fn bot(self) -> Self {
        self.meta("is_bot", true)
    }

    pub fn build(self) -> Event {
        self.event
    }
}

/// Builder for creating test snapshots
pub struct SnapshotBuilder {
    snapshot: MetricsSnapshot,
}

impl SnapshotBuilder {
    pub fn new(report_type: Cadence) -> Self {
        let now = Utc::now();
        Self {
            snapshot: MetricsSnapshot {
                id: Uuid::new_v4(),
                report_type,
                landing_page_visits: 0,
                conversions: 0,
                conversion_rate: 0.0,
                referral_counts: CountMap::new(),
                devices: CountMap::new(),
                geography: CountMap::new(),
                average_time_per_user: 0.0,
                window_start: now,
                window_end: now,
                snapshot_time: now,
            },
        }
    }

    pub fn taken_at(mut self, snapshot_time: DateTime<Utc>) -> Self {
        self.snapshot.snapshot_time = snapshot_time;
        self
    }

    pub fn build(self) -> MetricsSnapshot {
        self.snapshot
    }
}
