//! Health check handlers

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::state::AppState;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service name
    pub service: String,

    /// Version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Readiness check response with dependency status
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadinessResponse {
    /// Overall readiness status
    pub ready: bool,

    /// Service name
    pub service: String,

    /// Dependency statuses
    pub dependencies: HashMap<String, DependencyStatus>,
}

/// Individual dependency status
#[derive(Debug, Serialize, Deserialize)]
pub struct DependencyStatus {
    /// Dependency is healthy
    pub healthy: bool,

    /// Optional message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Liveness probe, 200 while the process is serving
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "healthy".to_string(),
        service: state.config().service.name.clone(),
        version: Some(env!("CARGO_PKG_VERSION").to_string()),
    };

    (StatusCode::OK, Json(response))
}

/// Readiness probe
///
/// Ready once the log destination resolves. A fresh cache entry answers
/// without contacting the configuration service. When a refresh fails the
/// stale entry, if any, is named in the message.
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let mut dependencies = HashMap::new();

    let ready = match state.resolver().resolve_destination().await {
        Ok(destination) => {
            dependencies.insert(
                "destination".to_string(),
                DependencyStatus {
                    healthy: true,
                    message: Some(destination),
                },
            );
            true
        }
        Err(e) => {
            let last_known = state.resolver().cached().await.map(|cached| cached.value);
            tracing::warn!(error = %e, last_known = ?last_known, "Readiness check failed");
            let message = match last_known {
                Some(value) => format!("{} (last known: {value})", e.kind().code()),
                None => e.kind().code().to_string(),
            };
            dependencies.insert(
                "destination".to_string(),
                DependencyStatus {
                    healthy: false,
                    message: Some(message),
                },
            );
            false
        }
    };

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = ReadinessResponse {
        ready,
        service: state.config().service.name.clone(),
        dependencies,
    };

    (status, Json(response))
}
