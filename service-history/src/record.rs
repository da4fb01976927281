//! Event records and query windows
//!
//! An [`EventRecord`] is the unit of storage: an identifier, a caller-defined
//! map of scalar fields and the millisecond timestamp assigned at write time.
//! Records are immutable once written.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};

/// A scalar field value
///
/// Nested objects, arrays and null are not representable; callers define
/// flat schemas only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Boolean value
    Bool(bool),
    /// Integer value
    Integer(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
}

impl FieldValue {
    /// Convert a JSON value, rejecting anything that is not a scalar
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::String(s) => Some(Self::String(s.clone())),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Integer)
                .or_else(|| n.as_f64().map(Self::Float)),
            _ => None,
        }
    }

    /// Borrow the string value, if any
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean value, if any
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

/// Caller-defined fields, ordered by key
pub type Fields = BTreeMap<String, FieldValue>;

/// Build a [`Fields`] map from a JSON object
///
/// Fails with [`Error::InvalidPayload`] if the value is not an object or any
/// entry is not a scalar.
pub fn fields_from_json(value: &serde_json::Value) -> Result<Fields> {
    let object = value
        .as_object()
        .ok_or_else(|| Error::InvalidPayload("Request body must be a JSON object".to_string()))?;

    object
        .iter()
        .map(|(key, value)| {
            FieldValue::from_json(value)
                .map(|v| (key.clone(), v))
                .ok_or_else(|| {
                    Error::InvalidPayload(format!(
                        "Field '{key}' must be a string, number or boolean"
                    ))
                })
        })
        .collect()
}

/// One stored event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    /// Caller-supplied identifier
    pub id: String,
    /// Epoch milliseconds assigned at write time
    pub recorded_at: i64,
    /// Caller-defined scalar fields
    #[serde(default)]
    pub fields: Fields,
}

impl EventRecord {
    /// Create a record stamped with the given time
    pub fn new(id: impl Into<String>, fields: Fields, recorded_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            recorded_at: recorded_at.timestamp_millis(),
            fields,
        }
    }

    /// Serialize as the single structured line appended to the log store
    pub fn to_line(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::Internal(format!("Failed to serialize record: {e}")))
    }

    /// Parse a structured line produced by [`EventRecord::to_line`]
    pub fn from_line(line: &str) -> Option<Self> {
        serde_json::from_str(line).ok()
    }

    /// Stream key the record is appended under
    pub fn stream_name(&self) -> String {
        format!("{}/{}", self.id, self.recorded_at)
    }

}

/// Reject empty or whitespace-only identifiers
pub fn validate_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(Error::InvalidId("ID is required".to_string()));
    }
    Ok(())
}

/// Identifier plus an inclusive time range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryWindow {
    /// Identifier to match
    pub id: String,
    /// Inclusive lower bound
    pub start: DateTime<Utc>,
    /// Inclusive upper bound
    pub end: DateTime<Utc>,
}

impl QueryWindow {
    /// Create a window, rejecting an empty id or `start > end`
    pub fn new(id: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        let id = id.into();
        validate_id(&id)?;
        if start > end {
            return Err(Error::InvalidTimeRange(
                "Start time must not be after end time".to_string(),
            ));
        }
        Ok(Self { id, start, end })
    }

    /// Build a window from optional textual bounds
    ///
    /// `end` defaults to `now`, `start` to `end - default_window`.
    pub fn from_params(
        id: impl Into<String>,
        start: Option<&str>,
        end: Option<&str>,
        default_window: Duration,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let id = id.into();
        validate_id(&id)?;

        let end = match end {
            Some(raw) => parse_instant(raw).ok_or_else(|| {
                Error::InvalidTimeRange(
                    "Invalid end time format. Expected ISO 8601 format.".to_string(),
                )
            })?,
            None => now,
        };
        let start = match start {
            Some(raw) => parse_instant(raw).ok_or_else(|| {
                Error::InvalidTimeRange(
                    "Invalid start time format. Expected ISO 8601 format.".to_string(),
                )
            })?,
            None => {
                let window = chrono::Duration::from_std(default_window)
                    .map_err(|e| Error::Internal(format!("Invalid default window: {e}")))?;
                end.checked_sub_signed(window).ok_or_else(|| {
                    Error::InvalidTimeRange(
                        "End time is too early to derive a default start time".to_string(),
                    )
                })?
            }
        };

        Self::new(id, start, end)
    }

    /// Lower bound in epoch milliseconds
    pub fn start_ms(&self) -> i64 {
        self.start.timestamp_millis()
    }

    /// Upper bound in epoch milliseconds
    pub fn end_ms(&self) -> i64 {
        self.end.timestamp_millis()
    }

    /// Whether a record belongs to this window (both bounds inclusive)
    pub fn contains(&self, record: &EventRecord) -> bool {
        record.id == self.id
            && record.recorded_at >= self.start_ms()
            && record.recorded_at <= self.end_ms()
    }
}

/// Parse a time bound
///
/// Accepts RFC 3339, naive ISO 8601 date-times (UTC), bare dates (midnight
/// UTC) and integer epoch milliseconds.
pub fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }

    raw.parse::<i64>()
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}
