//! Request/response calls and the progress stream transport.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::ApiConfig;
use crate::protocol::sse;
use crate::protocol::types::{AnalyzeRequest, AnalyzeResult, ErrorBody, NameRequest, NameResponse};

/// Decoded push messages of one progress connection, in arrival order.
pub type MessageStream = BoxStream<'static, Result<String, ApiError>>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(String),
    /// Non-success status; `message` is the server's `error` text when given.
    #[error("{message}")]
    Status { status: u16, message: String },
    #[error("invalid response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Transport failures and server errors may succeed on a later attempt;
    /// client errors will not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Network(_) => true,
            ApiError::Status { status, .. } => *status >= 500,
            ApiError::Decode(_) => false,
        }
    }

    /// Build the error for a non-success response body.
    ///
    /// Uses the body's `error` field when present, else a status-coded
    /// message prefixed with `what`.
    pub fn from_status(status: u16, body: &str, what: &str) -> Self {
        let message = serde_json::from_str::<ErrorBody>(body)
            .ok()
            .and_then(|b| b.error)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| format!("{what} failed (HTTP {status})"));
        ApiError::Status { status, message }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::Network(e.to_string())
        }
    }
}

/// The server surface the flow controller talks to.
#[async_trait]
pub trait Api: Send + Sync {
    /// `POST /api/analyze`.
    async fn analyze(&self, request: &AnalyzeRequest) -> Result<AnalyzeResult, ApiError>;

    /// `POST /api/name`.
    async fn start_naming(&self, request: &NameRequest) -> Result<NameResponse, ApiError>;

    /// `GET /api/progress/{session_id}`. Resolves once the connection is
    /// acknowledged.
    async fn open_progress(&self, session_id: &str) -> Result<MessageStream, ApiError>;
}

/// HTTP implementation of [`Api`].
#[derive(Clone, Debug)]
pub struct HttpApi {
    http: reqwest::Client,
    base_url: String,
    request_timeout: Option<Duration>,
}

impl HttpApi {
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        Ok(Self {
            http: reqwest::Client::builder().pool_max_idle_per_host(8).build()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            request_timeout: config.request_timeout(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn post_json<B, T>(&self, path: &str, body: &B, what: &str) -> Result<T, ApiError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let mut request = self.http.post(self.url(path)).json(body);
        if let Some(timeout) = self.request_timeout {
            request = request.timeout(timeout);
        }
        let resp = request.send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        debug!(path, status = status.as_u16(), len = text.len(), "response");
        if !status.is_success() {
            return Err(ApiError::from_status(status.as_u16(), &text, what));
        }
        serde_json::from_str(&text).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl Api for HttpApi {
    async fn analyze(&self, request: &AnalyzeRequest) -> Result<AnalyzeResult, ApiError> {
        self.post_json("/api/analyze", request, "Analysis").await
    }

    async fn start_naming(&self, request: &NameRequest) -> Result<NameResponse, ApiError> {
        self.post_json("/api/name", request, "Naming request").await
    }

    async fn open_progress(&self, session_id: &str) -> Result<MessageStream, ApiError> {
        // No request timeout here: it would bound the whole stream.
        let resp = self
            .http
            .get(self.url(&format!("/api/progress/{session_id}")))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        let status = resp.status();
        if status != StatusCode::OK {
            let text = resp.text().await.unwrap_or_default();
            return Err(ApiError::from_status(
                status.as_u16(),
                &text,
                "Progress stream",
            ));
        }
        let body = resp.bytes_stream().map(|chunk| chunk.map_err(ApiError::from));
        Ok(sse::decode_stream(body))
    }
}
