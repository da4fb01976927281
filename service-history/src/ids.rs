//! Identifiers for requests and backend queries
//!
//! Request IDs follow the [TypeID Specification](https://github.com/jetpack-io/typeid/blob/main/spec/SPEC.md)
//! with a `req` prefix and UUIDv7 suffix, so they sort by creation time in logs.
//!
//! Query IDs are opaque handles issued by the log store. Backends that mint
//! their own (the in-memory store) use the same TypeID scheme with a `qry`
//! prefix; remote backends may return anything.

use http::Request;
use mti::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use tower_http::request_id::{MakeRequestId, RequestId as TowerRequestId};

/// A type-safe request identifier for log correlation.
///
/// Example: `req_01h455vb4pex5vsknk084sn02q`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(MagicTypeId);

impl RequestId {
    /// The prefix used for request IDs
    pub const PREFIX: &'static str = "req";

    /// Creates a new request ID with a UUIDv7 (time-sortable).
    #[must_use]
    pub fn new() -> Self {
        Self(Self::PREFIX.create_type_id::<V7>())
    }

    /// Returns the request ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A `MakeRequestId` implementation that generates `RequestId`s for tower-http.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeTypedRequestId;

impl MakeRequestId for MakeTypedRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<TowerRequestId> {
        let id = RequestId::new();
        let header_value = http::HeaderValue::from_str(id.as_str()).ok()?;
        Some(TowerRequestId::new(header_value))
    }
}

/// Opaque handle for a submitted log query
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryId(String);

impl QueryId {
    /// The prefix used for locally minted query IDs
    pub const PREFIX: &'static str = "qry";

    /// Wrap a backend-issued handle
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Mint a fresh time-sortable handle
    #[must_use]
    pub fn generate() -> Self {
        Self(Self::PREFIX.create_type_id::<V7>().to_string())
    }

    /// Returns the handle as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
