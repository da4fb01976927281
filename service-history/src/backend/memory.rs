//! In-process collaborators
//!
//! [`MemoryLogStore`] keeps every appended line for the lifetime of the
//! process and answers queries by scanning them. It mimics the asynchronous
//! protocol of a real log-search backend: a query reports `Scheduled`, then
//! `Running`, for a configurable number of polls before completing. A
//! completed query is dropped after its results are returned.
//!
//! Both types count their calls so tests can assert exactly which
//! collaborator traffic an operation produced.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, RwLock};

use super::{
    BackendError, ConfigurationSource, LogLine, LogStore, QueryFilter, QueryPoll, QueryStatus,
    ResultField, ResultRow, SessionToken,
};
use crate::ids::QueryId;
use crate::record::EventRecord;

/// Configuration source serving a fixed document
#[derive(Debug)]
pub struct StaticConfigurationSource {
    document: serde_json::Value,
    sessions_opened: AtomicUsize,
    fetches: AtomicUsize,
}

impl StaticConfigurationSource {
    /// Serve the given document
    pub fn new(document: serde_json::Value) -> Self {
        Self {
            document,
            sessions_opened: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Serve `{key: destination}`
    pub fn with_destination(key: &str, destination: &str) -> Self {
        let mut document = serde_json::Map::new();
        document.insert(key.to_string(), serde_json::Value::from(destination));
        Self::new(serde_json::Value::Object(document))
    }

    /// Number of `open_session` calls so far
    pub fn sessions_opened(&self) -> usize {
        self.sessions_opened.load(Ordering::SeqCst)
    }

    /// Number of `get_configuration` calls so far
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigurationSource for StaticConfigurationSource {
    async fn open_session(
        &self,
        application: &str,
        environment: &str,
        profile: &str,
    ) -> Result<SessionToken, BackendError> {
        let n = self.sessions_opened.fetch_add(1, Ordering::SeqCst);
        Ok(SessionToken::new(format!(
            "static/{application}/{environment}/{profile}/{n}"
        )))
    }

    async fn get_configuration(
        &self,
        _token: &SessionToken,
    ) -> Result<serde_json::Value, BackendError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.document.clone())
    }
}

struct PendingQuery {
    rows: Vec<ResultRow>,
    polls: u32,
}

/// Append-only in-process log store
pub struct MemoryLogStore {
    destinations: RwLock<HashMap<String, Vec<LogLine>>>,
    queries: Mutex<HashMap<QueryId, PendingQuery>>,
    pending_polls: u32,
    appends: AtomicUsize,
    queries_started: AtomicUsize,
    polls: AtomicUsize,
}

impl MemoryLogStore {
    /// Create an empty store
    ///
    /// `pending_polls` is how many polls report a non-terminal status before
    /// a query completes. Zero completes on the first poll.
    pub fn new(pending_polls: u32) -> Self {
        Self {
            destinations: RwLock::new(HashMap::new()),
            queries: Mutex::new(HashMap::new()),
            pending_polls,
            appends: AtomicUsize::new(0),
            queries_started: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
        }
    }

    /// Lines stored under a destination, in append order
    pub async fn lines(&self, destination: &str) -> Vec<LogLine> {
        self.destinations
            .read()
            .await
            .get(destination)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of `append` calls so far
    pub fn appends(&self) -> usize {
        self.appends.load(Ordering::SeqCst)
    }

    /// Number of `start_query` calls so far
    pub fn queries_started(&self) -> usize {
        self.queries_started.load(Ordering::SeqCst)
    }

    /// Number of `get_query_results` calls so far
    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    /// Total calls of any kind
    pub fn total_calls(&self) -> usize {
        self.appends() + self.queries_started() + self.polls()
    }
}

impl Default for MemoryLogStore {
    fn default() -> Self {
        Self::new(0)
    }
}

fn format_timestamp(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
        .unwrap_or_default()
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn append(&self, destination: &str, line: &LogLine) -> Result<(), BackendError> {
        self.appends.fetch_add(1, Ordering::SeqCst);
        self.destinations
            .write()
            .await
            .entry(destination.to_string())
            .or_default()
            .push(line.clone());
        Ok(())
    }

    async fn start_query(
        &self,
        destination: &str,
        filter: &QueryFilter,
        limit: u32,
    ) -> Result<QueryId, BackendError> {
        self.queries_started.fetch_add(1, Ordering::SeqCst);

        // Snapshot at submission time; a destination nobody wrote to is empty
        let guard = self.destinations.read().await;
        let rows: Vec<ResultRow> = guard
            .get(destination)
            .into_iter()
            .flatten()
            .filter(|line| {
                EventRecord::from_line(&line.message)
                    .is_some_and(|record| filter.matches(&record.id, record.recorded_at))
            })
            .take(limit as usize)
            .map(|line| {
                vec![
                    ResultField::new("@timestamp", format_timestamp(line.timestamp)),
                    ResultField::new("@message", line.message.clone()),
                ]
            })
            .collect();
        drop(guard);

        let query_id = QueryId::generate();
        self.queries
            .lock()
            .await
            .insert(query_id.clone(), PendingQuery { rows, polls: 0 });

        Ok(query_id)
    }

    async fn get_query_results(&self, query_id: &QueryId) -> Result<QueryPoll, BackendError> {
        self.polls.fetch_add(1, Ordering::SeqCst);

        let mut queries = self.queries.lock().await;
        let pending = queries
            .get_mut(query_id)
            .ok_or_else(|| BackendError::NotFound(format!("query '{query_id}'")))?;

        pending.polls += 1;
        if pending.polls <= self.pending_polls {
            let status = if pending.polls == 1 {
                QueryStatus::Scheduled
            } else {
                QueryStatus::Running
            };
            return Ok(QueryPoll::pending(status));
        }

        // Completed queries are handed over once and forgotten
        let rows = queries
            .remove(query_id)
            .map(|finished| finished.rows)
            .unwrap_or_default();
        Ok(QueryPoll {
            status: QueryStatus::Complete,
            rows,
        })
    }
}
