//! HTTP front door
//!
//! | Route                           | Operation                      |
//! |---------------------------------|--------------------------------|
//! | `POST /service/{id}`            | record an event                |
//! | `GET /service/{id}?start=&end=` | range query                    |
//! | `PUT/PATCH/DELETE /service/..`  | always 405                     |
//! | `POST /graphql`                 | resolver event (query/mutation)|
//! | `GET /health`, `GET /ready`     | probes                         |

use axum::{
    body::Bytes,
    extract::{rejection::PathRejection, Path, Query, State},
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{any, get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::{
    dispatcher::{OperationDescriptor, OperationKind, Outcome, ResolverEvent, RestRequest},
    error::{Error, Result},
    health,
    state::AppState,
};

/// Optional time bounds on reads
#[derive(Debug, Default, Deserialize)]
pub struct ReadParams {
    /// Inclusive lower bound
    pub start: Option<String>,
    /// Inclusive upper bound
    pub end: Option<String>,
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::readiness))
        .route("/service", any(service_operation))
        .route("/service/", any(service_operation))
        .route("/service/{id}", any(service_operation))
        .route("/graphql", post(graphql_operation))
        .with_state(state)
}

impl IntoResponse for Outcome {
    fn into_response(self) -> Response {
        match self {
            Outcome::Created(body) => (StatusCode::OK, Json(body)).into_response(),
            Outcome::Read(body) => (StatusCode::OK, Json(body)).into_response(),
        }
    }
}

/// REST entry point for `/service` with or without an id segment
///
/// The method is classified first, and a mutation is refused before anything
/// else in the request is read, so a malformed one still gets its 405. The
/// id arrives percent-decoded, matching what GraphQL callers pass in
/// `arguments.id`.
async fn service_operation(
    State(state): State<AppState>,
    method: Method,
    id: std::result::Result<Path<String>, PathRejection>,
    uri: Uri,
    body: Bytes,
) -> Result<Outcome> {
    let kind = OperationKind::for_method(&method)?;

    let mut request = RestRequest {
        method,
        id: String::new(),
        start: None,
        end: None,
        body: None,
    };

    if kind != OperationKind::RejectedMutation {
        request.id = id.map(|Path(id)| id).unwrap_or_default();

        match kind {
            OperationKind::Read => {
                let Query(params) = Query::<ReadParams>::try_from_uri(&uri).map_err(|e| {
                    Error::InvalidTimeRange(format!("Invalid query parameters: {}", e.body_text()))
                })?;
                request.start = params.start;
                request.end = params.end;
            }
            _ => request.body = parse_body(&body)?,
        }
    }

    state
        .dispatcher()
        .dispatch(OperationDescriptor::Rest(request))
        .await
}

fn parse_body(body: &[u8]) -> Result<Option<serde_json::Value>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|_| Error::InvalidPayload("Invalid JSON in request body".to_string()))
}

async fn graphql_operation(State(state): State<AppState>, body: Bytes) -> Result<Outcome> {
    let event: ResolverEvent = serde_json::from_slice(&body)
        .map_err(|_| Error::UnsupportedOperation("Unsupported event format".to_string()))?;

    tracing::debug!(
        parent_type = %event.info.parent_type_name,
        field = %event.info.field_name,
        "GraphQL resolver event"
    );

    state
        .dispatcher()
        .dispatch(OperationDescriptor::GraphQl(event))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryLogStore, StaticConfigurationSource};
    use crate::config::Config;
    use crate::error::ErrorResponse;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> (Router, Arc<MemoryLogStore>) {
        let store = Arc::new(MemoryLogStore::new(1));
        let state = AppState::with_backends(
            Config::default(),
            Arc::new(StaticConfigurationSource::with_destination(
                "logGroup",
                "test-log-group",
            )),
            store.clone(),
        );
        (router(state), store)
    }

    fn request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder().method(method).uri(uri);
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_post_records_event() {
        let (app, store) = app();
        let response = app
            .oneshot(request(
                Method::POST,
                "/service/test-id",
                Some(json!({"message": "Test message", "value": 123})),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["message"], "Data successfully recorded");
        assert_eq!(body["id"], "test-id");
        assert_eq!(body["success"], true);
        assert_eq!(store.appends(), 1);
    }

    #[tokio::test]
    async fn test_mutations_are_method_not_allowed() {
        for method in [Method::PUT, Method::PATCH, Method::DELETE] {
            let (app, store) = app();
            let response = app
                .oneshot(request(method.clone(), "/service/test-id", Some(json!({}))))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED, "{method}");

            let body: ErrorResponse = serde_json::from_value(json_body(response).await).unwrap();
            assert!(!body.success);
            assert_eq!(body.code, "IMMUTABLE_OPERATION_REJECTED");
            assert_eq!(store.total_calls(), 0);
        }
    }

    #[tokio::test]
    async fn test_mutations_refused_before_parsing() {
        let (app, store) = app();
        let requests = [
            Request::builder()
                .method(Method::PUT)
                .uri("/service/a")
                .body(Body::from("not json"))
                .unwrap(),
            Request::builder()
                .method(Method::DELETE)
                .uri("/service/a?start=1&start=2")
                .body(Body::empty())
                .unwrap(),
            Request::builder()
                .method(Method::PATCH)
                .uri("/service")
                .body(Body::from("{"))
                .unwrap(),
        ];

        for request in requests {
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
            assert_eq!(
                json_body(response).await["code"],
                "IMMUTABLE_OPERATION_REJECTED"
            );
        }
        assert_eq!(store.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_service_without_id_is_invalid_id() {
        for uri in ["/service", "/service/"] {
            let (app, store) = app();
            let response = app
                .oneshot(request(Method::POST, uri, Some(json!({"a": 1}))))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(json_body(response).await["code"], "INVALID_ID");
            assert_eq!(store.appends(), 0);
        }
    }

    #[tokio::test]
    async fn test_repeated_time_bound_is_bad_request() {
        let (app, store) = app();
        let response = app
            .oneshot(request(
                Method::GET,
                "/service/a?start=2024-01-01&start=2024-01-02",
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["code"], "INVALID_TIME_RANGE");
        assert_eq!(store.total_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_encoded_rest_id_reads_graphql_write() {
        let (app, _) = app();
        let response = app
            .clone()
            .oneshot(request(
                Method::POST,
                "/graphql",
                Some(json!({
                    "info": {"parentTypeName": "Mutation", "fieldName": "recordEvent"},
                    "arguments": {"id": "customer 123", "operation": "login"}
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(request(Method::GET, "/service/customer%20123", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["id"], "customer 123");
        assert_eq!(body["count"], 1);
        assert_eq!(body["records"][0]["fields"]["operation"], "login");
    }

    #[tokio::test]
    async fn test_missing_id_and_bad_body_are_bad_request() {
        let (app, _) = app();
        let response = app
            .clone()
            .oneshot(request(Method::GET, "/service/", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["code"], "INVALID_ID");

        let bad_json = Request::builder()
            .method(Method::POST)
            .uri("/service/test-id")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.oneshot(bad_json).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["code"], "INVALID_PAYLOAD");
    }

    #[tokio::test]
    async fn test_inverted_range_is_bad_request() {
        let (app, store) = app();
        let response = app
            .oneshot(request(
                Method::GET,
                "/service/customer-123?start=2023-01-02T00:00:00Z&end=2023-01-01T00:00:00Z",
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["code"], "INVALID_TIME_RANGE");
        assert_eq!(store.total_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_then_read_over_http() {
        let (app, _) = app();
        let response = app
            .clone()
            .oneshot(request(
                Method::POST,
                "/service/customer-123",
                Some(json!({"operation": "login", "success": true})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(request(Method::GET, "/service/customer-123", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["id"], "customer-123");
        assert_eq!(body["count"], 1);
        assert_eq!(body["records"][0]["fields"]["operation"], "login");
        assert!(body["startTime"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn test_graphql_delete_mutation_rejected() {
        let (app, store) = app();
        let response = app
            .oneshot(request(
                Method::POST,
                "/graphql",
                Some(json!({
                    "info": {"parentTypeName": "Mutation", "fieldName": "deleteRecord"},
                    "arguments": {"id": "test-id"}
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(store.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_graphql_unknown_shape_is_bad_request() {
        let (app, _) = app();
        let response = app
            .oneshot(request(Method::POST, "/graphql", Some(json!({"query": "{}"}))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["code"], "UNSUPPORTED_OPERATION");
    }

    #[tokio::test]
    async fn test_health_endpoints() {
        let (app, _) = app();
        let response = app
            .clone()
            .oneshot(request(Method::GET, "/health", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(request(Method::GET, "/ready", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
