//! Lifecycle events consumed by the analytics engine
//!
//! Producers (form handlers, page tracking) publish [`Event`]s on the
//! [`EventBus`]. Payload metadata varies by producer, so it is kept as a JSON
//! map with typed accessors for the keys the engine understands.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub mod bus;

pub use bus::{BroadcastEventBus, EventBus, EventSubscription};

use crate::error::{AnalyticsError, ErrorCode, Result};

/// Free-form event metadata
pub type Metadata = HashMap<String, serde_json::Value>;

/// Kind of lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Submitted,
    Processed,
    Error,
    Converted,
    PageVisit,
}

impl EventType {
    /// Name the event is published under on the bus
    pub fn bus_name(&self) -> &'static str {
        match self {
            Self::Submitted => "form.submitted",
            Self::Processed => "form.processed",
            Self::Error => "form.error",
            Self::Converted => "form.converted",
            Self::PageVisit => "page.visit",
        }
    }

    /// Resolve a bus event name
    pub fn from_bus_name(name: &str) -> Option<Self> {
        match name {
            "form.submitted" => Some(Self::Submitted),
            "form.processed" => Some(Self::Processed),
            "form.error" => Some(Self::Error),
            "form.converted" => Some(Self::Converted),
            "page.visit" | "page_visit" => Some(Self::PageVisit),
            _ => None,
        }
    }

    /// Whether this is one of the `form.*` lifecycle events
    pub fn is_form_event(&self) -> bool {
        !matches!(self, Self::PageVisit)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.bus_name())
    }
}

/// Device class used for breakdowns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Desktop,
    Mobile,
    Tablet,
    Unknown,
}

impl DeviceType {
    /// Parse an explicit device label, falling back to `Unknown`
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "desktop" => Self::Desktop,
            "mobile" | "phone" => Self::Mobile,
            "tablet" => Self::Tablet,
            _ => Self::Unknown,
        }
    }

    /// Classify a user agent string
    pub fn from_user_agent(user_agent: &str) -> Self {
        let ua = user_agent.to_ascii_lowercase();
        if ua.trim().is_empty() {
            Self::Unknown
        } else if ua.contains("ipad") || ua.contains("tablet") {
            Self::Tablet
        } else if ua.contains("mobi") || ua.contains("iphone") || ua.contains("android") {
            Self::Mobile
        } else {
            Self::Desktop
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Desktop => "desktop",
            Self::Mobile => "mobile",
            Self::Tablet => "tablet",
            Self::Unknown => "unknown",
        }
    }
}

/// A single lifecycle event. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_id: Option<String>,
    #[serde(default)]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Create an event of the given type stamped with `timestamp`
    pub fn new(event_type: EventType, session_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            event_type,
            form_type: None,
            form_id: None,
            session_id: session_id.into(),
            user_id: None,
            device_type: None,
            ip_address: None,
            user_agent: None,
            metadata: Metadata::new(),
            timestamp,
        }
    }

    /// Decode a named bus payload (`form.submitted`, ...) into an event.
    /// A payload without a timestamp is stamped with `now`.
    pub fn from_named(name: &str, mut payload: serde_json::Value, now: DateTime<Utc>) -> Result<Self> {
        let event_type = EventType::from_bus_name(name).ok_or_else(|| {
            AnalyticsError::event(
                ErrorCode::EVENT_UNKNOWN_NAME,
                format!("unknown event name '{}'", name),
            )
        })?;

        let object = payload.as_object_mut().ok_or_else(|| {
            AnalyticsError::event(
                ErrorCode::EVENT_MALFORMED,
                format!("payload for '{}' is not an object", name),
            )
        })?;
        object.insert("type".to_string(), serde_json::to_value(event_type).unwrap_or_default());
        if !object.contains_key("timestamp") {
            object.insert(
                "timestamp".to_string(),
                serde_json::Value::String(now.to_rfc3339()),
            );
        }

        serde_json::from_value(payload).map_err(|e| {
            AnalyticsError::event(ErrorCode::EVENT_MALFORMED, format!("invalid '{}' payload", name))
                .with_source(e)
        })
    }

    /// Check the fields the aggregator depends on
    pub fn validate(&self) -> Result<()> {
        if self.session_id.trim().is_empty() {
            return Err(AnalyticsError::event(
                ErrorCode::EVENT_MALFORMED,
                format!("{} event is missing sessionId", self.event_type),
            ));
        }
        if self.event_type.is_form_event()
            && self.form_type.as_deref().map_or(true, |t| t.trim().is_empty())
        {
            return Err(AnalyticsError::event(
                ErrorCode::EVENT_MALFORMED,
                format!("{} event is missing formType", self.event_type),
            ));
        }
        Ok(())
    }

    /// Device class from the explicit field, else from the user agent
    pub fn device(&self) -> DeviceType {
        match (&self.device_type, &self.user_agent) {
            (Some(label), _) => DeviceType::from_label(label),
            (None, Some(ua)) => DeviceType::from_user_agent(ua),
            (None, None) => DeviceType::Unknown,
        }
    }

    fn metadata_value(&self, keys: &[&str]) -> Option<&serde_json::Value> {
        keys.iter().find_map(|key| self.metadata.get(*key))
    }

    fn metadata_f64(&self, keys: &[&str]) -> Option<f64> {
        match self.metadata_value(keys)? {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        }
        .filter(|v| v.is_finite() && *v >= 0.0)
    }

    fn metadata_str(&self, keys: &[&str]) -> Option<&str> {
        self.metadata_value(keys)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Form processing duration in milliseconds
    pub fn processing_time_ms(&self) -> Option<f64> {
        self.metadata_f64(&["processing_time", "processingTime"])
    }

    /// Time from first submission to conversion in milliseconds
    pub fn time_to_conversion_ms(&self) -> Option<f64> {
        self.metadata_f64(&["time_to_conversion", "timeToConversion"])
    }

    pub fn error_type(&self) -> &str {
        self.metadata_str(&["error_type", "errorType"])
            .unwrap_or("unknown")
    }

    pub fn conversion_type(&self) -> &str {
        self.metadata_str(&["conversion_type", "conversionType"])
            .or(self.form_type.as_deref())
            .unwrap_or("unknown")
    }

    pub fn utm_source(&self) -> Option<&str> {
        self.metadata_str(&["utm_source", "utmSource"])
    }

    pub fn country(&self) -> Option<&str> {
        self.metadata_str(&["country"])
    }

    /// Seconds spent on the page, for page visits
    pub fn time_on_page(&self) -> Option<f64> {
        self.metadata_f64(&["time_on_page", "timeOnPage"])
    }

    pub fn is_bot(&self) -> bool {
        self.metadata_value(&["is_bot", "isBot"])
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_from_named_decodes_camel_case_payload() {
        let event = Event::from_named(
            "form.submitted",
            json!({
                "formType": "contact",
                "formId": "f-1",
                "sessionId": "s-1",
                "ipAddress": "10.0.0.1",
                "userAgent": "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0)",
                "metadata": {"processingTime": 120},
                "timestamp": "2026-03-01T10:00:00Z"
            }),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(event.event_type, EventType::Submitted);
        assert_eq!(event.form_type.as_deref(), Some("contact"));
        assert_eq!(event.device(), DeviceType::Mobile);
        assert_eq!(event.processing_time_ms(), Some(120.0));
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_unknown_event_name_rejected() {
        let err = Event::from_named("lead.created", json!({}), Utc::now()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::EVENT_UNKNOWN_NAME);
    }

    #[test]
    fn test_missing_timestamp_uses_caller_time() {
        let now = Utc.with_ymd_and_hms(2026, 7, 4, 9, 15, 0).unwrap();
        let event = Event::from_named("page.visit", json!({"sessionId": "s-9"}), now).unwrap();
        assert_eq!(event.timestamp, now);

        let stamped = Event::from_named(
            "page.visit",
            json!({"sessionId": "s-9", "timestamp": "2026-03-01T10:00:00Z"}),
            now,
        )
        .unwrap();
        assert_eq!(stamped.timestamp, Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn test_form_event_without_form_type_is_malformed() {
        let event = Event::new(EventType::Converted, "s-1", Utc::now());
        let err = event.validate().unwrap_err();
        assert_eq!(err.code(), ErrorCode::EVENT_MALFORMED);

        let visit = Event::new(EventType::PageVisit, "s-1", Utc::now());
        assert!(visit.validate().is_ok());
    }

    #[test]
    fn test_metadata_accessors_ignore_bad_values() {
        let mut event = Event::new(EventType::Processed, "s-1", Utc::now());
        event.metadata.insert("processing_time".into(), json!(-5));
        event.metadata.insert("error_type".into(), json!("  "));
        event.metadata.insert("time_to_conversion".into(), json!("2500"));
        assert_eq!(event.processing_time_ms(), None);
        assert_eq!(event.error_type(), "unknown");
        assert_eq!(event.time_to_conversion_ms(), Some(2500.0));
    }

    #[test]
    fn test_device_classification() {
        assert_eq!(DeviceType::from_user_agent("Mozilla/5.0 (iPad; CPU OS 16)"), DeviceType::Tablet);
        assert_eq!(DeviceType::from_user_agent("Mozilla/5.0 (X11; Linux x86_64)"), DeviceType::Desktop);
        assert_eq!(DeviceType::from_user_agent(""), DeviceType::Unknown);
        assert_eq!(DeviceType::from_label("Mobile"), DeviceType::Mobile);
        assert_eq!(DeviceType::from_label("watch"), DeviceType::Unknown);
    }
}
