//! Operation dispatcher
//!
//! Every inbound request is reduced to an [`OperationDescriptor`], classified
//! as create, read or a rejected mutation, validated and then handed to the
//! writer or the query executor. Transport details stop here: the writer and
//! executor never see HTTP methods or resolver events.

use chrono::{DateTime, SecondsFormat, Utc};
use http::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::query::{QueryResult, RangeQueryExecutor};
use crate::record::{fields_from_json, validate_id, EventRecord, Fields, QueryWindow};
use crate::writer::EventWriter;

/// Field name prefixes that mark a GraphQL mutation as an update or delete
const MUTATING_PREFIXES: &[&str] = &[
    "update", "delete", "remove", "put", "patch", "upsert", "modify", "replace",
];

/// What a descriptor asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Append a record
    Create,
    /// Range query
    Read,
    /// Update or delete intent, always refused
    RejectedMutation,
}

impl OperationKind {
    /// Classify a REST method
    ///
    /// Depends on the method alone, so callers can refuse mutations before
    /// reading anything else from the request.
    pub fn for_method(method: &Method) -> Result<Self> {
        match *method {
            Method::POST => Ok(Self::Create),
            Method::GET => Ok(Self::Read),
            Method::PUT | Method::PATCH | Method::DELETE => Ok(Self::RejectedMutation),
            ref other => Err(Error::UnsupportedOperation(format!(
                "Unsupported method: {other}"
            ))),
        }
    }
}

/// Caller-facing operation metadata of a GraphQL resolver event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolverInfo {
    /// `Query` or `Mutation`
    pub parent_type_name: String,
    /// Resolver field being invoked
    pub field_name: String,
}

/// GraphQL resolver event: `{info: {parentTypeName, fieldName}, arguments}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverEvent {
    /// Operation metadata
    pub info: ResolverInfo,
    /// Field arguments
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// A REST-shaped request
#[derive(Debug, Clone, PartialEq)]
pub struct RestRequest {
    /// HTTP method
    pub method: Method,
    /// Percent-decoded id path segment, empty when the path has none
    pub id: String,
    /// Optional lower bound (`start` query parameter)
    pub start: Option<String>,
    /// Optional upper bound (`end` query parameter)
    pub end: Option<String>,
    /// Decoded JSON body, if any
    pub body: Option<Value>,
}

/// Transport-neutral description of an inbound request
#[derive(Debug, Clone, PartialEq)]
pub enum OperationDescriptor {
    /// REST request
    Rest(RestRequest),
    /// GraphQL resolver event
    GraphQl(ResolverEvent),
}

impl OperationDescriptor {
    /// Decide which operation the descriptor asks for
    ///
    /// Fails with [`Error::UnsupportedOperation`] for methods and operation
    /// types this service does not understand.
    pub fn classify(&self) -> Result<OperationKind> {
        match self {
            Self::Rest(request) => OperationKind::for_method(&request.method),
            Self::GraphQl(event) => {
                let parent = event.info.parent_type_name.as_str();
                if parent.eq_ignore_ascii_case("query") {
                    Ok(OperationKind::Read)
                } else if parent.eq_ignore_ascii_case("mutation") {
                    if is_mutating_field(&event.info.field_name) {
                        Ok(OperationKind::RejectedMutation)
                    } else {
                        Ok(OperationKind::Create)
                    }
                } else {
                    Err(Error::UnsupportedOperation(format!(
                        "Unsupported operation type: {parent}"
                    )))
                }
            }
        }
    }

    /// Identifier the operation targets
    pub fn id(&self) -> Result<String> {
        match self {
            Self::Rest(request) => required_id(Some(&request.id)),
            Self::GraphQl(event) => required_id(event.arguments.get("id").and_then(Value::as_str)),
        }
    }

    /// Fields to record on create
    fn fields(&self) -> Result<Fields> {
        match self {
            Self::Rest(request) => match &request.body {
                Some(body) => fields_from_json(body),
                None => Ok(Fields::new()),
            },
            Self::GraphQl(event) => match event.arguments.get("fields") {
                Some(fields) => fields_from_json(fields),
                None => {
                    let mut rest = event.arguments.clone();
                    rest.remove("id");
                    fields_from_json(&Value::Object(rest))
                }
            },
        }
    }

    /// Textual time bounds on read
    fn bounds(&self) -> Result<(Option<&str>, Option<&str>)> {
        match self {
            Self::Rest(request) => Ok((request.start.as_deref(), request.end.as_deref())),
            Self::GraphQl(event) => Ok((
                string_argument(&event.arguments, "start")?,
                string_argument(&event.arguments, "end")?,
            )),
        }
    }

    fn transport(&self) -> &'static str {
        match self {
            Self::Rest(_) => "rest",
            Self::GraphQl(_) => "graphql",
        }
    }
}

fn is_mutating_field(field_name: &str) -> bool {
    let lower = field_name.to_ascii_lowercase();
    MUTATING_PREFIXES
        .iter()
        .any(|prefix| lower.starts_with(prefix))
}

fn required_id(id: Option<&str>) -> Result<String> {
    let id = id.unwrap_or_default();
    validate_id(id)?;
    Ok(id.to_string())
}

fn string_argument<'a>(arguments: &'a Map<String, Value>, name: &str) -> Result<Option<&'a str>> {
    match arguments.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(raw)) => Ok(Some(raw.as_str())),
        Some(_) => Err(Error::InvalidTimeRange(format!(
            "Invalid {name} time format. Expected ISO 8601 format."
        ))),
    }
}

/// Body of a successful create
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateResponse {
    /// Always "Data successfully recorded"
    pub message: String,
    /// Identifier the record was written under
    pub id: String,
    /// Always `true`
    pub success: bool,
}

/// Body of a successful read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadResponse {
    /// Identifier that was queried
    pub id: String,
    /// Lower bound, RFC 3339
    pub start_time: String,
    /// Upper bound, RFC 3339
    pub end_time: String,
    /// Number of records
    pub count: usize,
    /// Records, oldest first
    pub records: Vec<EventRecord>,
}

impl From<QueryResult> for ReadResponse {
    fn from(result: QueryResult) -> Self {
        Self {
            id: result.id,
            start_time: rfc3339(result.start),
            end_time: rfc3339(result.end),
            count: result.count,
            records: result.records,
        }
    }
}

fn rfc3339(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Result of a dispatched operation
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// A record was appended
    Created(CreateResponse),
    /// A range query completed
    Read(ReadResponse),
}

/// Routes descriptors to the writer or the query executor
pub struct OperationDispatcher {
    writer: EventWriter,
    executor: RangeQueryExecutor,
    default_window: Duration,
}

impl OperationDispatcher {
    /// Create a dispatcher
    pub fn new(writer: EventWriter, executor: RangeQueryExecutor, default_window: Duration) -> Self {
        Self {
            writer,
            executor,
            default_window,
        }
    }

    /// Classify, validate and execute one operation
    pub async fn dispatch(&self, descriptor: OperationDescriptor) -> Result<Outcome> {
        let kind = descriptor.classify()?;
        tracing::debug!(
            transport = descriptor.transport(),
            kind = ?kind,
            "Dispatching operation"
        );

        match kind {
            OperationKind::RejectedMutation => {
                tracing::warn!(
                    transport = descriptor.transport(),
                    "Rejected update or delete request"
                );
                Err(Error::ImmutableOperationRejected)
            }
            OperationKind::Create => {
                let id = descriptor.id()?;
                let fields = descriptor.fields()?;
                let ack = self.writer.write(&id, fields).await?;
                Ok(Outcome::Created(CreateResponse {
                    message: "Data successfully recorded".to_string(),
                    id: ack.id,
                    success: ack.success,
                }))
            }
            OperationKind::Read => {
                let id = descriptor.id()?;
                let (start, end) = descriptor.bounds()?;
                let window =
                    QueryWindow::from_params(id, start, end, self.default_window, Utc::now())?;
                let result = self.executor.query_window(&window).await?;
                Ok(Outcome::Read(result.into()))
            }
        }
    }
}
