//! Event writer
//!
//! Appends exactly one immutable record per call. There is no partial
//! success: either the whole line is appended or the call fails.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::backend::{BackendError, LogLine, LogStore};
use crate::destination::DestinationResolver;
use crate::error::{Error, Result};
use crate::record::{validate_id, EventRecord, Fields};

/// Acknowledgement of a successful append
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    /// Identifier the record was written under
    pub id: String,
    /// Always `true`
    pub success: bool,
    /// Timestamp assigned to the record (epoch ms)
    pub recorded_at: i64,
}

/// Formats records and appends them to the resolved destination
pub struct EventWriter {
    resolver: Arc<DestinationResolver>,
    store: Arc<dyn LogStore>,
}

impl EventWriter {
    /// Create a writer
    pub fn new(resolver: Arc<DestinationResolver>, store: Arc<dyn LogStore>) -> Self {
        Self { resolver, store }
    }

    /// Append one record for `id`
    pub async fn write(&self, id: &str, fields: Fields) -> Result<Ack> {
        validate_id(id)?;

        let destination = self.resolver.resolve_destination().await?;

        let record = EventRecord::new(id, fields, Utc::now());
        let line = LogLine {
            stream: record.stream_name(),
            timestamp: record.recorded_at,
            message: record.to_line()?,
        };

        if let Err(e) = self.store.append(&destination, &line).await {
            tracing::error!(
                id,
                destination = %destination,
                error = %e,
                "Failed to append record"
            );
            if matches!(e, BackendError::NotFound(_)) {
                self.resolver.invalidate().await;
            }
            return Err(Error::WriteFailure(e.to_string()));
        }

        tracing::info!(
            id,
            destination = %destination,
            recorded_at = record.recorded_at,
            fields = record.fields.len(),
            "Record appended"
        );

        Ok(Ack {
            id: record.id,
            success: true,
            recorded_at: record.recorded_at,
        })
    }
}
