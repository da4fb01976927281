//! JSON-over-HTTP collaborators
//!
//! Wire contracts:
//!
//! Configuration service
//! - `POST {endpoint}/configurationsessions` with
//!   `{ApplicationIdentifier, EnvironmentIdentifier, ConfigurationProfileIdentifier}`
//!   → `{InitialConfigurationToken}`
//! - `GET {endpoint}/configuration?configuration_token=<token>` → configuration document
//!
//! Log store
//! - `POST {endpoint}/destinations/{name}/events` with `{stream, timestamp, message}`
//! - `POST {endpoint}/destinations/{name}/queries` with
//!   `{queryString, startTime, endTime, limit}` → `{queryId}`
//! - `GET {endpoint}/queries/{queryId}` → `{status, results}`

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{
    BackendError, ConfigurationSource, LogLine, LogStore, QueryFilter, QueryPoll, SessionToken,
};
use crate::ids::QueryId;

const MAX_ERROR_BODY: usize = 512;

fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

fn transport(e: reqwest::Error) -> BackendError {
    BackendError::Transport(e.to_string())
}

/// Turn a non-success response into [`BackendError::Rejected`]
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }

    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(BackendError::NotFound(body));
    }
    Err(BackendError::Rejected {
        status: status.as_u16(),
        body,
    })
}

fn trim_endpoint(endpoint: &str) -> String {
    endpoint.trim_end_matches('/').to_string()
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct StartSessionRequest<'a> {
    application_identifier: &'a str,
    environment_identifier: &'a str,
    configuration_profile_identifier: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StartSessionResponse {
    initial_configuration_token: String,
}

/// Remote configuration service client
pub struct HttpConfigurationSource {
    client: reqwest::Client,
    endpoint: String,
    client_id: String,
}

impl HttpConfigurationSource {
    /// Create a client for the service at `endpoint`
    pub fn new(endpoint: &str, client_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: build_client(timeout),
            endpoint: trim_endpoint(endpoint),
            client_id: client_id.into(),
        }
    }
}

#[async_trait]
impl ConfigurationSource for HttpConfigurationSource {
    async fn open_session(
        &self,
        application: &str,
        environment: &str,
        profile: &str,
    ) -> Result<SessionToken, BackendError> {
        let response = self
            .client
            .post(format!("{}/configurationsessions", self.endpoint))
            .header("x-client-id", self.client_id.as_str())
            .json(&StartSessionRequest {
                application_identifier: application,
                environment_identifier: environment,
                configuration_profile_identifier: profile,
            })
            .send()
            .await
            .map_err(transport)?;

        let session: StartSessionResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::Protocol(e.to_string()))?;

        Ok(SessionToken::new(session.initial_configuration_token))
    }

    async fn get_configuration(
        &self,
        token: &SessionToken,
    ) -> Result<serde_json::Value, BackendError> {
        let response = self
            .client
            .get(format!("{}/configuration", self.endpoint))
            .query(&[("configuration_token", token.as_str())])
            .header("x-client-id", self.client_id.as_str())
            .send()
            .await
            .map_err(transport)?;

        check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::Protocol(e.to_string()))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartQueryRequest {
    query_string: String,
    start_time: i64,
    end_time: i64,
    limit: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartQueryResponse {
    query_id: String,
}

/// Remote log-search service client
pub struct HttpLogStore {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpLogStore {
    /// Create a client for the service at `endpoint`
    pub fn new(endpoint: &str, timeout: Duration) -> Self {
        Self {
            client: build_client(timeout),
            endpoint: trim_endpoint(endpoint),
        }
    }

    fn destination_url(&self, destination: &str, tail: &str) -> Result<reqwest::Url, BackendError> {
        let mut url = reqwest::Url::parse(&self.endpoint)
            .map_err(|e| BackendError::Transport(format!("invalid endpoint: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| BackendError::Transport("endpoint cannot be a base URL".to_string()))?
            .pop_if_empty()
            .extend(["destinations", destination, tail]);
        Ok(url)
    }
}

#[async_trait]
impl LogStore for HttpLogStore {
    async fn append(&self, destination: &str, line: &LogLine) -> Result<(), BackendError> {
        let response = self
            .client
            .post(self.destination_url(destination, "events")?)
            .json(line)
            .send()
            .await
            .map_err(transport)?;

        check_status(response).await.map(|_| ())
    }

    async fn start_query(
        &self,
        destination: &str,
        filter: &QueryFilter,
        limit: u32,
    ) -> Result<QueryId, BackendError> {
        let response = self
            .client
            .post(self.destination_url(destination, "queries")?)
            .json(&StartQueryRequest {
                query_string: filter.expression(limit),
                start_time: filter.start_ms,
                end_time: filter.end_ms,
                limit,
            })
            .send()
            .await
            .map_err(transport)?;

        let started: StartQueryResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::Protocol(e.to_string()))?;

        Ok(QueryId::new(started.query_id))
    }

    async fn get_query_results(&self, query_id: &QueryId) -> Result<QueryPoll, BackendError> {
        let mut url = reqwest::Url::parse(&self.endpoint)
            .map_err(|e| BackendError::Transport(format!("invalid endpoint: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| BackendError::Transport("endpoint cannot be a base URL".to_string()))?
            .pop_if_empty()
            .extend(["queries", query_id.as_str()]);

        let response = self.client.get(url).send().await.map_err(transport)?;

        check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::Protocol(e.to_string()))
    }
}
