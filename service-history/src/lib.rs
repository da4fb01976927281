//! # service-history
//!
//! Append-only event recorder and time-ranged query service.
//!
//! Callers record immutable events keyed by an identifier and later read back
//! every event for that identifier inside a time window. Events land in a
//! log-search store whose destination name comes from a remote configuration
//! service; reads are asynchronous backend queries polled to completion.
//! Update and delete are refused on every transport.
//!
//! ## Components
//!
//! - [`destination::DestinationResolver`] resolves and caches the destination
//! - [`writer::EventWriter`] appends one record per call
//! - [`query::RangeQueryExecutor`] submits and polls range queries
//! - [`dispatcher::OperationDispatcher`] classifies and validates requests
//! - [`routes::router`] exposes REST and GraphQL-resolver endpoints
//!
//! ## Example
//!
//! ```rust,no_run
//! use service_history::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load()?;
//!     init_tracing(&config)?;
//!
//!     let state = AppState::from_config(config.clone())?;
//!     Server::new(config).serve(router(state)).await
//! }
//! ```

pub mod backend;
pub mod config;
pub mod destination;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod ids;
pub mod middleware;
pub mod observability;
pub mod query;
pub mod record;
pub mod routes;
pub mod server;
pub mod state;
pub mod writer;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::backend::{
        BackendError, ConfigurationSource, HttpConfigurationSource, HttpLogStore, LogStore,
        MemoryLogStore, QueryStatus, StaticConfigurationSource,
    };
    pub use crate::config::Config;
    pub use crate::destination::DestinationResolver;
    pub use crate::dispatcher::{
        OperationDescriptor, OperationDispatcher, OperationKind, Outcome, ResolverEvent,
        RestRequest,
    };
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::health::{health, readiness};
    pub use crate::ids::{QueryId, RequestId};
    pub use crate::observability::init_tracing;
    pub use crate::query::{QueryResult, QuerySettings, RangeQueryExecutor};
    pub use crate::record::{EventRecord, FieldValue, Fields, QueryWindow};
    pub use crate::routes::router;
    pub use crate::server::Server;
    pub use crate::state::AppState;
    pub use crate::writer::{Ack, EventWriter};
}
