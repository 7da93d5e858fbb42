//! Recorded server cases, replayed through the real decoding path.
//!
//! A case is a `<name>.toml` file with the two request/response replies and
//! a sibling `<name>.sse` file with the raw event-stream body. A line
//! consisting of `---` in the `.sse` file ends one connection; each
//! `open_progress` call consumes the next section, so a section without a
//! terminal event replays a dropped connection.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream;
use serde::Deserialize;

use crate::api::{Api, ApiError, MessageStream};
use crate::protocol::sse;
use crate::protocol::types::{AnalyzeRequest, AnalyzeResult, NameRequest, NameResponse};

const CONNECTION_SEPARATOR: &str = "---";

/// Case definition loaded from a `.toml` file.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplayCase {
    #[serde(default)]
    pub analyze: Reply,
    #[serde(default)]
    pub name: Reply,
    /// Status returned when opening the progress stream.
    #[serde(default = "default_status")]
    pub progress_status: u16,
    /// Body chunk size used when replaying the stream.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// One event-stream body per connection, in order.
    #[serde(skip)]
    pub connections: Vec<String>,
}

/// A recorded reply to one request/response call.
#[derive(Debug, Clone, Deserialize)]
pub struct Reply {
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default)]
    pub body: String,
}

impl Default for Reply {
    fn default() -> Self {
        Self {
            status: default_status(),
            body: "{}".to_string(),
        }
    }
}

impl Default for ReplayCase {
    fn default() -> Self {
        Self {
            analyze: Reply::default(),
            name: Reply::default(),
            progress_status: default_status(),
            chunk_size: default_chunk_size(),
            connections: Vec::new(),
        }
    }
}

fn default_status() -> u16 {
    200
}

fn default_chunk_size() -> usize {
    64
}

impl ReplayCase {
    /// Load `<dir>/<name>.toml` and, if present, `<dir>/<name>.sse`.
    pub fn load(dir: &Path, name: &str) -> Result<Self> {
        let toml_path = dir.join(format!("{name}.toml"));
        let contents = std::fs::read_to_string(&toml_path)
            .with_context(|| format!("failed to read {}", toml_path.display()))?;
        let mut case: ReplayCase = toml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", toml_path.display()))?;

        let sse_path = dir.join(format!("{name}.sse"));
        if sse_path.exists() {
            let body = std::fs::read_to_string(&sse_path)
                .with_context(|| format!("failed to read {}", sse_path.display()))?;
            case.connections = split_connections(&body);
        }
        Ok(case)
    }
}

fn split_connections(body: &str) -> Vec<String> {
    let mut connections = vec![String::new()];
    for line in body.lines() {
        if line.trim() == CONNECTION_SEPARATOR {
            connections.push(String::new());
            continue;
        }
        if let Some(current) = connections.last_mut() {
            current.push_str(line);
            current.push('\n');
        }
    }
    connections
}

/// A call observed by [`ReplayApi`].
#[derive(Debug, Clone)]
pub enum RecordedCall {
    Analyze(AnalyzeRequest),
    Name(NameRequest),
    Progress(String),
}

/// [`Api`] backed by a [`ReplayCase`].
pub struct ReplayApi {
    case: ReplayCase,
    connections: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ReplayApi {
    pub fn new(case: ReplayCase) -> Self {
        let connections = Mutex::new(case.connections.iter().cloned().collect());
        Self {
            case,
            connections,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Calls made so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    fn record(&self, call: RecordedCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

fn reply<T: serde::de::DeserializeOwned>(reply: &Reply, what: &str) -> Result<T, ApiError> {
    if !(200..300).contains(&reply.status) {
        return Err(ApiError::from_status(reply.status, &reply.body, what));
    }
    serde_json::from_str(&reply.body).map_err(|e| ApiError::Decode(e.to_string()))
}

#[async_trait]
impl Api for ReplayApi {
    async fn analyze(&self, request: &AnalyzeRequest) -> Result<AnalyzeResult, ApiError> {
        self.record(RecordedCall::Analyze(request.clone()));
        reply(&self.case.analyze, "Analysis")
    }

    async fn start_naming(&self, request: &NameRequest) -> Result<NameResponse, ApiError> {
        self.record(RecordedCall::Name(request.clone()));
        reply(&self.case.name, "Naming request")
    }

    async fn open_progress(&self, session_id: &str) -> Result<MessageStream, ApiError> {
        self.record(RecordedCall::Progress(session_id.to_string()));
        if self.case.progress_status != 200 {
            return Err(ApiError::from_status(
                self.case.progress_status,
                "",
                "Progress stream",
            ));
        }
        let body = self
            .connections
            .lock()
            .ok()
            .and_then(|mut connections| connections.pop_front())
            .ok_or_else(|| ApiError::Network("connection refused".to_string()))?;
        let size = self.case.chunk_size.max(1);
        let chunks: Vec<Result<Vec<u8>, ApiError>> = body
            .as_bytes()
            .chunks(size)
            .map(|chunk| Ok(chunk.to_vec()))
            .collect();
        Ok(sse::decode_stream(stream::iter(chunks)))
    }
}
