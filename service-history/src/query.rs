//! Range query executor
//!
//! Queries run asynchronously on the backend. The executor submits a filter,
//! then polls the returned handle on a fixed interval until the backend
//! reports a terminal status or the attempt budget runs out:
//!
//! ```text
//! submit ──► Scheduled ──► Running ──► Complete ──► normalize
//!                │            │
//!                └────────────┴──► Failed | Cancelled ──► QueryFailed
//!
//! attempts == max_poll_attempts without a terminal status ──► QueryTimeout
//! ```
//!
//! A timed-out query is never resubmitted. The caller decides whether to
//! retry the whole operation.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{BackendError, LogStore, QueryFilter, QueryStatus, ResultRow};
use crate::config::Config;
use crate::destination::DestinationResolver;
use crate::error::{Error, Result};
use crate::ids::QueryId;
use crate::record::{EventRecord, QueryWindow};

/// Poll loop tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySettings {
    /// Delay before each poll
    pub poll_interval: Duration,
    /// Maximum number of poll calls
    pub max_poll_attempts: u32,
    /// Maximum rows requested from the backend
    pub result_limit: u32,
    /// Hard deadline for the whole poll loop
    pub timeout: Duration,
}

impl QuerySettings {
    /// Derive settings from the service configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.query.poll_interval(),
            max_poll_attempts: config.query.max_poll_attempts,
            result_limit: config.query.result_limit,
            timeout: config.query_timeout(),
        }
    }
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// State of one submitted query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySession {
    /// Backend handle
    pub query_id: QueryId,
    /// Last observed status
    pub status: QueryStatus,
    /// Poll calls made so far
    pub attempts: u32,
}

impl QuerySession {
    fn submitted(query_id: QueryId) -> Self {
        Self {
            query_id,
            status: QueryStatus::Scheduled,
            attempts: 0,
        }
    }

    fn observe(&mut self, status: QueryStatus) {
        self.attempts += 1;
        if status != self.status {
            tracing::debug!(
                query_id = %self.query_id,
                from = %self.status,
                to = %status,
                attempts = self.attempts,
                "Query status changed"
            );
        }
        self.status = status;
    }
}

/// Normalized result of a range query
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    /// Identifier that was matched
    pub id: String,
    /// Inclusive lower bound
    pub start: DateTime<Utc>,
    /// Inclusive upper bound
    pub end: DateTime<Utc>,
    /// Number of records
    pub count: usize,
    /// Matching records, oldest first
    pub records: Vec<EventRecord>,
}

/// Submits range queries and polls them to completion
pub struct RangeQueryExecutor {
    resolver: Arc<DestinationResolver>,
    store: Arc<dyn LogStore>,
    settings: QuerySettings,
}

impl RangeQueryExecutor {
    /// Create an executor
    pub fn new(
        resolver: Arc<DestinationResolver>,
        store: Arc<dyn LogStore>,
        settings: QuerySettings,
    ) -> Self {
        Self {
            resolver,
            store,
            settings,
        }
    }

    /// Validate the bounds and run the query
    pub async fn query(
        &self,
        id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<QueryResult> {
        let window = QueryWindow::new(id, start, end)?;
        self.query_window(&window).await
    }

    /// Run a query for an already validated window
    pub async fn query_window(&self, window: &QueryWindow) -> Result<QueryResult> {
        let destination = self.resolver.resolve_destination().await?;

        let filter = QueryFilter {
            id: window.id.clone(),
            start_ms: window.start_ms(),
            end_ms: window.end_ms(),
        };

        let query_id = match self
            .store
            .start_query(&destination, &filter, self.settings.result_limit)
            .await
        {
            Ok(query_id) => query_id,
            Err(e) => {
                tracing::error!(
                    id = %window.id,
                    destination = %destination,
                    error = %e,
                    "Failed to submit query"
                );
                if matches!(e, BackendError::NotFound(_)) {
                    self.resolver.invalidate().await;
                }
                return Err(Error::QueryFailed(format!("failed to start query: {e}")));
            }
        };

        tracing::info!(
            id = %window.id,
            destination = %destination,
            query_id = %query_id,
            start_ms = filter.start_ms,
            end_ms = filter.end_ms,
            "Query submitted"
        );

        let mut session = QuerySession::submitted(query_id);
        let outcome =
            tokio::time::timeout(self.settings.timeout, self.poll_until_done(&mut session)).await;

        let rows = match outcome {
            Ok(rows) => rows?,
            Err(_) => {
                tracing::warn!(
                    query_id = %session.query_id,
                    attempts = session.attempts,
                    timeout_ms = self.settings.timeout.as_millis() as u64,
                    "Query exceeded invocation budget"
                );
                return Err(Error::QueryTimeout {
                    attempts: session.attempts,
                });
            }
        };

        let records = normalize(window, &rows);
        tracing::info!(
            query_id = %session.query_id,
            attempts = session.attempts,
            rows = rows.len(),
            records = records.len(),
            "Query complete"
        );

        Ok(QueryResult {
            id: window.id.clone(),
            start: window.start,
            end: window.end,
            count: records.len(),
            records,
        })
    }

    async fn poll_until_done(&self, session: &mut QuerySession) -> Result<Vec<ResultRow>> {
        while session.attempts < self.settings.max_poll_attempts {
            tokio::time::sleep(self.settings.poll_interval).await;

            let poll = self
                .store
                .get_query_results(&session.query_id)
                .await
                .map_err(|e| {
                    tracing::error!(
                        query_id = %session.query_id,
                        error = %e,
                        "Failed to poll query"
                    );
                    Error::QueryFailed(format!("failed to poll query: {e}"))
                })?;

            session.observe(poll.status);

            if !poll.status.is_terminal() {
                continue;
            }

            match poll.status {
                QueryStatus::Complete => return Ok(poll.rows),
                status => {
                    tracing::error!(
                        query_id = %session.query_id,
                        status = %status,
                        "Query ended without results"
                    );
                    return Err(Error::QueryFailed(format!(
                        "query {} ended with status {}",
                        session.query_id, status
                    )));
                }
            }
        }

        tracing::warn!(
            query_id = %session.query_id,
            attempts = session.attempts,
            "Query did not complete within poll budget"
        );
        Err(Error::QueryTimeout {
            attempts: session.attempts,
        })
    }
}

/// Turn raw rows into records belonging to the window, oldest first
///
/// Rows without a decodable `@message`, or whose record falls outside the
/// window, are dropped. The sort is stable, so equal timestamps keep the
/// backend's order.
fn normalize(window: &QueryWindow, rows: &[ResultRow]) -> Vec<EventRecord> {
    let mut records: Vec<EventRecord> = rows
        .iter()
        .filter_map(|row| {
            let message = row.iter().find(|cell| cell.field == "@message")?;
            match EventRecord::from_line(&message.value) {
                Some(record) if window.contains(&record) => Some(record),
                Some(record) => {
                    tracing::debug!(
                        id = %record.id,
                        recorded_at = record.recorded_at,
                        "Dropping row outside query window"
                    );
                    None
                }
                None => {
                    tracing::warn!("Dropping row with undecodable message");
                    None
                }
            }
        })
        .collect();

    records.sort_by_key(|record| record.recorded_at);
    records
}
