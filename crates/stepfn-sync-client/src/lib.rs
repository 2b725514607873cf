#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

//! HTTP transport for the stepfn execution service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use stepfn_client_core::config::{
    ConfigError, ExecutePath, normalize_base_url, resolve_api_base_url, resolve_execute_path,
};
use stepfn_client_core::sync::{ExecuteRequest, decode_execute_envelope, decode_load_response};
use stepfn_client_core::{DocumentSource, ExecutionOutcome, Identity, SyncError, SyncTransport};
use thiserror::Error;
use uuid::Uuid;

/// Executions run a whole state machine server side, so the budget is generous.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_REQUEST_ATTEMPTS: usize = 2;
pub const LOAD_PATH: &str = "/sfn";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Clone)]
pub struct SyncClientConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    /// Attempts for loads only. Executes are sent once: a retried execute
    /// could save the same draft twice under two ids.
    pub request_attempts: usize,
    pub execute_path: ExecutePath,
}

impl SyncClientConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            request_attempts: DEFAULT_REQUEST_ATTEMPTS,
            execute_path: ExecutePath::default(),
        }
    }

    /// Builds a config from `STEPFN_API_BASE_URL` and `STEPFN_EXECUTE_PATH`,
    /// falling back to the public service.
    pub fn from_env() -> Result<Self, SyncClientError> {
        let (base_url, base_source) = resolve_api_base_url()?;
        let (execute_path, path_source) = resolve_execute_path();
        tracing::debug!(
            base_url = %base_url,
            base_source,
            execute_path = execute_path.as_str(),
            path_source = %path_source,
            "Resolved sync client config"
        );
        let mut config = Self::new(base_url);
        config.execute_path = execute_path;
        Ok(config)
    }
}

#[derive(Debug, Clone)]
pub struct SyncClient {
    base_url: String,
    execute_path: ExecutePath,
    timeout: Duration,
    request_attempts: usize,
    http: reqwest::Client,
}

#[derive(Debug, Error)]
pub enum SyncClientError {
    #[error("stepfn_client_base_url_missing")]
    BaseUrlMissing,
    #[error("stepfn_client_base_url_invalid")]
    InvalidBaseUrl,
    #[error("stepfn_client_invalid_path")]
    InvalidPath,
    #[error("stepfn_request_failed:{message}")]
    Request { message: String },
    #[error("stepfn_read_failed:{message}")]
    Read { message: String },
    #[error("stepfn_http_{status}:{body}")]
    Http { status: StatusCode, body: String },
    #[error("stepfn_json_decode_failed:{message}")]
    Decode { message: String },
}

impl From<ConfigError> for SyncClientError {
    fn from(error: ConfigError) -> Self {
        match error {
            ConfigError::EmptyBaseUrl => Self::BaseUrlMissing,
            ConfigError::InvalidBaseUrl => Self::InvalidBaseUrl,
        }
    }
}

impl From<SyncClientError> for SyncError {
    fn from(error: SyncClientError) -> Self {
        SyncError::Network {
            message: error.to_string(),
        }
    }
}

impl SyncClient {
    pub fn new(config: SyncClientConfig) -> Result<Self, SyncClientError> {
        let base_url = normalize_base_url(&config.base_url)?;
        Ok(Self {
            base_url,
            execute_path: config.execute_path,
            timeout: Duration::from_millis(config.timeout_ms.max(250)),
            request_attempts: config.request_attempts.max(1),
            http: reqwest::Client::new(),
        })
    }

    pub fn from_env() -> Result<Self, SyncClientError> {
        Self::new(SyncClientConfig::from_env()?)
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn execute_path(&self) -> ExecutePath {
        self.execute_path
    }

    #[must_use]
    pub fn endpoint(&self, path: &str) -> Option<String> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.starts_with('/') {
            Some(format!("{}{}", self.base_url, trimmed))
        } else {
            Some(format!("{}/{}", self.base_url, trimmed))
        }
    }

    /// Fetches a saved document. `Ok(None)` means the service has no document
    /// under `id`.
    pub async fn fetch_document(
        &self,
        id: &str,
    ) -> Result<Option<DocumentSource>, SyncClientError> {
        let response = self.send_get(LOAD_PATH, &[("id", id)]).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = read_success_body(response).await?;
        decode_load_response(&body)
            .map(Some)
            .map_err(|error| SyncClientError::Decode {
                message: error.to_string(),
            })
    }

    /// Sends one execute request and returns the raw success body.
    pub async fn post_execute(&self, request: &ExecuteRequest) -> Result<Vec<u8>, SyncClientError> {
        let path = self.execute_path.as_str();
        let url = self.endpoint(path).ok_or(SyncClientError::InvalidPath)?;
        let request_id = new_request_id();
        tracing::debug!(url = %url, request_id = %request_id, "Sending execute request");

        let response = self
            .http
            .post(url.as_str())
            .header(REQUEST_ID_HEADER, request_id)
            .timeout(self.timeout)
            .json(request)
            .send()
            .await
            .map_err(|error| SyncClientError::Request {
                message: error.to_string(),
            })?;
        read_success_body(response).await
    }

    async fn send_get(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<reqwest::Response, SyncClientError> {
        let url = self.endpoint(path).ok_or(SyncClientError::InvalidPath)?;
        let mut last_error: Option<String> = None;

        for attempt in 0..self.request_attempts {
            let request_id = new_request_id();
            let request = self
                .http
                .get(url.as_str())
                .query(query)
                .header(REQUEST_ID_HEADER, request_id.as_str())
                .timeout(self.timeout);

            match request.send().await {
                Ok(response) => return Ok(response),
                Err(error) => {
                    tracing::warn!(
                        url = %url,
                        request_id = %request_id,
                        attempt = attempt + 1,
                        %error,
                        "Load request failed"
                    );
                    last_error = Some(error.to_string());
                    if attempt + 1 >= self.request_attempts {
                        break;
                    }
                }
            }
        }

        Err(SyncClientError::Request {
            message: last_error.unwrap_or_else(|| "unknown".to_string()),
        })
    }
}

#[async_trait]
impl SyncTransport for SyncClient {
    async fn load_document(&self, id: &str) -> Result<DocumentSource, SyncError> {
        if id.trim().is_empty() {
            return Err(SyncError::NotFound { id: id.to_string() });
        }
        self.fetch_document(id)
            .await?
            .ok_or_else(|| SyncError::NotFound { id: id.to_string() })
    }

    async fn execute_document(
        &self,
        source: &DocumentSource,
        identity: &Identity,
    ) -> Result<ExecutionOutcome, SyncError> {
        let request = ExecuteRequest::new(source, identity);
        let body = self.post_execute(&request).await?;
        decode_execute_envelope(&body)
    }
}

pub fn format_http_error(status: StatusCode, body: &[u8]) -> SyncClientError {
    let body = non_empty_string(String::from_utf8_lossy(body).to_string())
        .unwrap_or_else(|| "<empty>".to_string());
    SyncClientError::Http { status, body }
}

fn new_request_id() -> String {
    format!("req_{}", Uuid::new_v4().simple())
}

async fn read_success_body(response: reqwest::Response) -> Result<Vec<u8>, SyncClientError> {
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|error| SyncClientError::Read {
            message: error.to_string(),
        })?;

    if !status.is_success() {
        return Err(format_http_error(status, &bytes));
    }
    Ok(bytes.to_vec())
}

fn non_empty_string(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
