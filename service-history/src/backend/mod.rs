//! External collaborator contracts
//!
//! The history service owns no storage. It talks to two collaborators:
//!
//! - a [`ConfigurationSource`] that names the destination for writes and
//!   queries (session-based: open a session, then fetch the document)
//! - a [`LogStore`] that appends structured lines and runs asynchronous
//!   search queries over them
//!
//! # Available Backends
//!
//! - **Memory** ([`MemoryLogStore`], [`StaticConfigurationSource`]): in-process,
//!   used for local runs and tests
//! - **HTTP** ([`HttpLogStore`], [`HttpConfigurationSource`]): JSON over HTTP via reqwest

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::QueryId;

pub mod http;
pub mod memory;

pub use self::http::{HttpConfigurationSource, HttpLogStore};
pub use self::memory::{MemoryLogStore, StaticConfigurationSource};

/// Errors reported by collaborators
///
/// The core maps these onto its own taxonomy depending on which call failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    /// Network or connection failure
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend answered with a non-success status
    #[error("backend rejected request with status {status}: {body}")]
    Rejected {
        /// HTTP (or equivalent) status
        status: u16,
        /// Response body, possibly truncated
        body: String,
    },

    /// Response could not be decoded
    #[error("malformed response: {0}")]
    Protocol(String),

    /// Referenced destination, session or query does not exist
    #[error("not found: {0}")]
    NotFound(String),
}

/// Opaque credential returned by [`ConfigurationSource::open_session`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    /// Wrap a raw token
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the token as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Remote configuration service
#[async_trait]
pub trait ConfigurationSource: Send + Sync {
    /// Open a configuration session for the given application/environment/profile
    async fn open_session(
        &self,
        application: &str,
        environment: &str,
        profile: &str,
    ) -> Result<SessionToken, BackendError>;

    /// Fetch the current configuration document
    async fn get_configuration(
        &self,
        token: &SessionToken,
    ) -> Result<serde_json::Value, BackendError>;
}

/// A single line to append
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    /// Stream the line is written under
    pub stream: String,
    /// Event time in epoch milliseconds
    pub timestamp: i64,
    /// Structured payload
    pub message: String,
}

/// Identifier match plus inclusive millisecond bounds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryFilter {
    /// Identifier to match exactly
    pub id: String,
    /// Inclusive lower bound (epoch ms)
    pub start_ms: i64,
    /// Inclusive upper bound (epoch ms)
    pub end_ms: i64,
}

impl QueryFilter {
    /// Render as a log-insights style query string
    pub fn expression(&self, limit: u32) -> String {
        format!(
            "fields @timestamp, @message | filter id = \"{}\" and recordedAt >= {} and recordedAt <= {} | sort recordedAt asc | limit {}",
            escape_literal(&self.id),
            self.start_ms,
            self.end_ms,
            limit
        )
    }

    /// Whether an already-decoded record satisfies the filter
    pub fn matches(&self, id: &str, recorded_at: i64) -> bool {
        id == self.id && recorded_at >= self.start_ms && recorded_at <= self.end_ms
    }
}

fn escape_literal(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Backend-reported status of a submitted query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryStatus {
    /// Accepted, not started
    Scheduled,
    /// In progress
    Running,
    /// Finished; rows are available
    Complete,
    /// Finished with an error
    Failed,
    /// Cancelled before completion
    Cancelled,
    /// Backend gave up on its own
    Timeout,
    /// Status not recognized
    #[serde(other)]
    Unknown,
}

impl QueryStatus {
    /// Whether polling should stop
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Scheduled | Self::Running)
    }
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Scheduled => "Scheduled",
            Self::Running => "Running",
            Self::Complete => "Complete",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
            Self::Timeout => "Timeout",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// One `{field, value}` cell of a result row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultField {
    /// Field name, e.g. `@message`
    pub field: String,
    /// Raw value
    pub value: String,
}

impl ResultField {
    /// Create a cell
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// A raw result row
pub type ResultRow = Vec<ResultField>;

/// Response to a status poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryPoll {
    /// Current status
    pub status: QueryStatus,
    /// Rows, populated once `status` is `Complete`
    #[serde(default, rename = "results")]
    pub rows: Vec<ResultRow>,
}

impl QueryPoll {
    /// A poll result with no rows
    pub fn pending(status: QueryStatus) -> Self {
        Self {
            status,
            rows: Vec::new(),
        }
    }
}

/// Append-only log store with asynchronous search
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Append one line to the destination as a single atomic write
    async fn append(&self, destination: &str, line: &LogLine) -> Result<(), BackendError>;

    /// Submit a query; returns immediately with a handle
    async fn start_query(
        &self,
        destination: &str,
        filter: &QueryFilter,
        limit: u32,
    ) -> Result<QueryId, BackendError>;

    /// Poll a submitted query
    async fn get_query_results(&self, query_id: &QueryId) -> Result<QueryPoll, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expression_escapes_id() {
        let filter = QueryFilter {
            id: r#"cust"omer\1"#.to_string(),
            start_ms: 10,
            end_ms: 20,
        };
        let expr = filter.expression(100);
        assert!(expr.contains(r#"filter id = "cust\"omer\\1""#));
        assert!(expr.contains("recordedAt >= 10 and recordedAt <= 20"));
        assert!(expr.ends_with("limit 100"));
    }

    #[test]
    fn test_filter_matches_inclusive_bounds() {
        let filter = QueryFilter {
            id: "a".to_string(),
            start_ms: 10,
            end_ms: 20,
        };
        assert!(filter.matches("a", 10));
        assert!(filter.matches("a", 20));
        assert!(!filter.matches("a", 21));
        assert!(!filter.matches("b", 15));
    }

    #[test]
    fn test_status_deserializes_unknown_values() {
        let status: QueryStatus = serde_json::from_str("\"Complete\"").unwrap();
        assert_eq!(status, QueryStatus::Complete);
        let status: QueryStatus = serde_json::from_str("\"Exploded\"").unwrap();
        assert_eq!(status, QueryStatus::Unknown);
        assert!(status.is_terminal());
        assert!(!QueryStatus::Running.is_terminal());
    }

    #[test]
    fn test_poll_decodes_results_field() {
        let poll: QueryPoll = serde_json::from_str(
            r#"{"status":"Complete","results":[[{"field":"@message","value":"{}"}]]}"#,
        )
        .unwrap();
        assert_eq!(poll.rows.len(), 1);
        assert_eq!(poll.rows[0][0].field, "@message");

        let poll: QueryPoll = serde_json::from_str(r#"{"status":"Running"}"#).unwrap();
        assert!(poll.rows.is_empty());
    }
}
