//! Events recorded by the host application and batches of them handed to the sink.
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use derive_more::From;
use serde::Serialize;

use crate::fingerprint::UserFingerprint;

/// Optional value attached to an event (e.g., a price for a "purchase" event).
#[derive(Debug, Clone, PartialEq, From, Serialize)]
#[serde(untagged)]
pub enum EventValue {
    String(String),
    Number(f64),
}

impl From<&str> for EventValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

/// A single recorded event. Immutable once built.
///
/// ```
/// # use eventlog_core::{Event, UserFingerprint};
/// let event = Event::new("purchase", UserFingerprint::from_raw("user-1"))
///     .with_value(9.99)
///     .with_metadata("sku", "ABC-123");
/// assert_eq!(event.name(), "purchase");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(rename = "eventName")]
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<EventValue>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    metadata: HashMap<String, serde_json::Value>,
    #[serde(rename = "time", with = "chrono::serde::ts_milliseconds")]
    timestamp: DateTime<Utc>,
    user: UserFingerprint,
}

impl Event {
    /// Create a new event timestamped now.
    pub fn new(name: impl Into<String>, user: UserFingerprint) -> Event {
        Event {
            name: name.into(),
            value: None,
            metadata: HashMap::new(),
            timestamp: Utc::now(),
            user,
        }
    }

    pub fn with_value(mut self, value: impl Into<EventValue>) -> Event {
        self.value = Some(value.into());
        self
    }

    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Event {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Override event timestamp. Mostly useful for replaying events and in tests.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Event {
        self.timestamp = timestamp;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> Option<&EventValue> {
        self.value.as_ref()
    }

    pub fn metadata(&self) -> &HashMap<String, serde_json::Value> {
        &self.metadata
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn user(&self) -> &UserFingerprint {
        &self.user
    }
}

/// An ordered group of events drained from the buffer at a flush point.
///
/// Events appear in the order they were recorded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    events: Vec<Event>,
}

impl Batch {
    pub fn new(events: Vec<Event>) -> Batch {
        Batch { events }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }
}

impl From<Vec<Event>> for Batch {
    fn from(events: Vec<Event>) -> Batch {
        Batch::new(events)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    #[test]
    fn event_serializes_in_wire_format() {
        let event = Event::new("purchase", UserFingerprint::from_raw("abc"))
            .with_value(9.5)
            .with_metadata("sku", "ABC-123")
            .with_timestamp(Utc.timestamp_millis_opt(1_700_000_000_123).unwrap());

        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "eventName": "purchase",
                "value": 9.5,
                "metadata": {"sku": "ABC-123"},
                "time": 1_700_000_000_123i64,
                "user": "abc",
            })
        );
    }

    #[test]
    fn empty_optional_fields_are_omitted() {
        let event = Event::new("page_view", UserFingerprint::from_raw("abc"))
            .with_timestamp(Utc.timestamp_millis_opt(0).unwrap());

        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"eventName": "page_view", "time": 0, "user": "abc"})
        );
    }
}
