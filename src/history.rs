//! Read-only view of the host's intention history
//!
//! The host stores its application state as one JSON blob whose
//! `allSegments` field maps `YYYY-MM-DD` keys to the intentions recorded on
//! that day. The engine only ever reads it.

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::DetectError;
use crate::store::{KeyValueStore, APP_STATE_KEY};

/// One recorded intention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Declared activity (`context` in the host's layout)
    #[serde(default, alias = "context", deserialize_with = "string_or_none")]
    pub activity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intention: Option<String>,
    #[serde(default)]
    pub feelings: Vec<String>,
    /// ISO 8601 timestamp of when the intention was set. Epoch
    /// milliseconds are converted; anything else reads as `None`.
    #[serde(
        default,
        alias = "timestampISO",
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<String>,
}

impl HistoryEntry {
    pub fn new(activity: &str, timestamp: &str) -> Self {
        Self {
            activity: Some(activity.to_string()),
            intention: None,
            feelings: Vec::new(),
            timestamp: Some(timestamp.to_string()),
        }
    }

    /// Parsed timestamp, `None` when the stored value is not RFC 3339
    pub fn recorded_at(&self) -> Option<DateTime<FixedOffset>> {
        DateTime::parse_from_rfc3339(self.timestamp.as_deref()?).ok()
    }
}

fn string_or_none<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        _ => None,
    })
}

fn lenient_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .map(|at| at.to_rfc3339()),
        _ => None,
    })
}

/// Per-day intention log, ordered by date key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryLog {
    days: BTreeMap<String, Vec<HistoryEntry>>,
}

#[derive(Deserialize)]
struct AppStateBlob {
    #[serde(default, rename = "allSegments")]
    all_segments: HistoryLog,
}

impl HistoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract the log from the host's application state blob
    pub fn from_app_state_json(json: &str) -> Result<Self, DetectError> {
        let blob: AppStateBlob = serde_json::from_str(json)?;
        Ok(blob.all_segments)
    }

    /// Wrap the log in an application state blob
    pub fn to_app_state_json(&self) -> Result<String, DetectError> {
        let mut blob = serde_json::Map::new();
        blob.insert("allSegments".to_string(), serde_json::to_value(self)?);
        Ok(serde_json::Value::Object(blob).to_string())
    }

    /// Read the log from a store; a missing blob is an empty log
    pub fn load(store: &dyn KeyValueStore) -> Result<Self, DetectError> {
        match store.load(APP_STATE_KEY)? {
            Some(json) => Self::from_app_state_json(&json),
            None => Ok(Self::default()),
        }
    }

    pub fn push(&mut self, date_key: &str, entry: HistoryEntry) {
        self.days.entry(date_key.to_string()).or_default().push(entry);
    }

    /// Number of date keys, including days with no entries
    pub fn day_count(&self) -> usize {
        self.days.len()
    }

    /// Days in ascending date order
    pub fn days(&self) -> impl Iterator<Item = (&str, &[HistoryEntry])> {
        self.days.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}
