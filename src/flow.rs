//! The analyze → name → preview state machine.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::api::{Api, ApiError};
use crate::config::StreamConfig;
use crate::event::{FlowEvent, StreamUpdate};
use crate::progress::{Progress, Signal};
use crate::protocol::parse::extract_file_key;
use crate::protocol::types::{AnalyzeRequest, AnalyzeResult, NameRequest, NodeMetadata, PageInfo};
use crate::session::state::{FlowState, FlowStatus};
use crate::session::stream::{StreamError, StreamSession};

/// Reported when the progress reader goes away without completing or failing.
pub const STREAM_ENDED_MESSAGE: &str = "Progress stream ended unexpectedly";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    #[error("cannot {action} while {status}")]
    InvalidTransition {
        action: &'static str,
        status: FlowStatus,
    },
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Stream(#[from] StreamError),
}

/// Inputs of the analyze call. Token and URL are expected to be non-empty.
#[derive(Debug, Clone, Default)]
pub struct AnalyzeParams {
    pub url: String,
    pub token: String,
    pub vlm_api_key: Option<String>,
    pub context: Option<String>,
    pub config: Option<Value>,
}

/// Inputs of the naming call.
#[derive(Debug, Clone, Default)]
pub struct NamingParams {
    pub token: String,
    pub provider: String,
    pub api_key: String,
    pub context: String,
    pub platform: String,
    pub config: Option<Value>,
    /// Explicit page subset; when absent the analyzed pages (or nodes) are used.
    pub pages: Option<Vec<PageInfo>>,
}

/// Drives one logical naming session.
///
/// Failures are recorded in `FlowState::error` and also returned, so callers
/// can either poll the state or react to the `Result`.
pub struct FlowController {
    api: Arc<dyn Api>,
    stream: StreamSession,
    state: FlowState,
    status_tx: watch::Sender<FlowStatus>,
}

impl FlowController {
    pub fn new(api: Arc<dyn Api>, stream_config: StreamConfig) -> Self {
        let stream = StreamSession::new(Arc::clone(&api), stream_config);
        let (status_tx, _) = watch::channel(FlowStatus::Idle);
        Self {
            api,
            stream,
            state: FlowState::default(),
            status_tx,
        }
    }

    pub fn state(&self) -> &FlowState {
        &self.state
    }

    pub fn status(&self) -> FlowStatus {
        self.state.status
    }

    /// Receive every status change, once per change.
    pub fn subscribe(&self) -> watch::Receiver<FlowStatus> {
        self.status_tx.subscribe()
    }

    /// Whether the progress stream is connected right now.
    pub fn is_connected(&self) -> bool {
        self.stream.is_live() && self.state.progress.connected
    }

    /// Analyze a design file. Replaces any previous analysis.
    ///
    /// If the returned future is dropped before the call resolves, the flow
    /// goes back to `idle`.
    pub async fn analyze(&mut self, params: AnalyzeParams) -> Result<(), FlowError> {
        if self.stream.is_live() {
            return Err(self.invalid("analyze"));
        }
        self.clear();
        self.set_status(FlowStatus::Analyzing);

        let request = AnalyzeRequest {
            figma_url: params.url,
            figma_token: params.token,
            vlm_api_key: params.vlm_api_key,
            global_context: params.context,
            config: params.config,
        };
        let api = Arc::clone(&self.api);
        let call = Revert::new(self, FlowStatus::Idle);
        let outcome = api.analyze(&request).await;
        call.disarm();
        match outcome {
            Ok(result) => {
                info!(
                    total_nodes = result.total_nodes,
                    pages = result.pages.as_ref().map_or(0, Vec::len),
                    "analysis complete"
                );
                self.state.file_key = extract_file_key(&request.figma_url).map(str::to_string);
                self.state.analysis = Some(result);
                self.set_status(FlowStatus::Counted);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "analysis failed");
                self.state.error = Some(e.to_string());
                self.set_status(FlowStatus::Idle);
                Err(e.into())
            }
        }
    }

    /// Request naming of the analyzed file and connect its progress stream.
    ///
    /// Accepted in `counted`, and in `naming` once the stream has failed.
    /// Cancelling the future before the naming call resolves returns the
    /// flow to `counted`.
    pub async fn start_naming(&mut self, params: NamingParams) -> Result<(), FlowError> {
        let retry = self.state.status == FlowStatus::Naming && !self.stream.is_live();
        if self.state.status != FlowStatus::Counted && !retry {
            return Err(self.invalid("start naming"));
        }
        let Some(analysis) = self.state.analysis.as_ref() else {
            return Err(self.invalid("start naming"));
        };
        let (pages, nodes) = work_units(params.pages, analysis);
        let request = NameRequest {
            pages,
            nodes,
            figma_token: params.token,
            file_key: self.state.file_key.clone(),
            root_node_id: analysis.root_node_id.clone(),
            vlm_provider: params.provider,
            vlm_api_key: params.api_key,
            global_context: params.context,
            platform: params.platform,
            config: params.config,
        };

        self.state.error = None;
        self.state.session_id = None;
        self.state.progress = Progress::default();
        self.state.results.clear();
        self.set_status(FlowStatus::Naming);

        let api = Arc::clone(&self.api);
        let call = Revert::new(self, FlowStatus::Counted);
        let response = api.start_naming(&request).await;
        call.disarm();
        let outcome = match response {
            Ok(response) => self
                .stream
                .connect(&response.session_id)
                .map(|()| response.session_id)
                .map_err(FlowError::from),
            Err(e) => Err(FlowError::from(e)),
        };
        match outcome {
            Ok(session_id) => {
                info!(session_id = %session_id, "naming started");
                self.state.session_id = Some(session_id);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "naming request failed");
                self.state.error = Some(e.to_string());
                self.set_status(FlowStatus::Counted);
                Err(e)
            }
        }
    }

    /// Wait for the next progress update and apply it.
    ///
    /// Returns `None` outside `naming` or once the stream has nothing more
    /// to deliver. A reader that stops without a terminal update is
    /// reported once as `StreamFailed`.
    pub async fn next_update(&mut self) -> Option<FlowEvent> {
        if self.state.status != FlowStatus::Naming || !self.stream.is_live() {
            return None;
        }
        match self.stream.next_update().await {
            Some(update) => Some(self.apply_update(update)),
            None => {
                warn!("progress reader stopped without a terminal event");
                let message = STREAM_ENDED_MESSAGE.to_string();
                self.state.progress = self.state.progress.failed(message.clone());
                self.state.error = Some(message.clone());
                Some(FlowEvent::StreamFailed(message))
            }
        }
    }

    /// Drive the stream until the flow leaves `naming` or the stream fails,
    /// calling `on_event` after each update.
    pub async fn run_to_settled<F>(&mut self, mut on_event: F) -> FlowStatus
    where
        F: FnMut(&FlowState, &FlowEvent),
    {
        while let Some(event) = self.next_update().await {
            on_event(&self.state, &event);
            if matches!(event, FlowEvent::StreamFailed(_)) {
                break;
            }
        }
        self.state.status
    }

    /// Promote to `previewing` with whatever has accumulated so far.
    pub fn go_to_preview(&mut self) -> Result<(), FlowError> {
        match self.state.status {
            FlowStatus::Previewing => Ok(()),
            FlowStatus::Naming => {
                self.promote();
                Ok(())
            }
            _ => Err(self.invalid("preview")),
        }
    }

    /// Accept the previewed results.
    pub fn finish(&mut self) -> Result<(), FlowError> {
        match self.state.status {
            FlowStatus::Done => Ok(()),
            FlowStatus::Previewing => {
                self.set_status(FlowStatus::Done);
                Ok(())
            }
            _ => Err(self.invalid("finish")),
        }
    }

    /// Return to the canonical idle state from anywhere, closing the stream.
    pub fn reset(&mut self) {
        self.clear();
        self.set_status(FlowStatus::Idle);
    }

    fn apply_update(&mut self, update: StreamUpdate) -> FlowEvent {
        self.state.progress = update.progress;
        match update.signal {
            Signal::None => FlowEvent::Progress,
            Signal::Completed => {
                self.promote();
                FlowEvent::Previewing
            }
            Signal::Failed => {
                let message = self
                    .state
                    .progress
                    .error
                    .clone()
                    .unwrap_or_else(|| crate::progress::GENERIC_STREAM_ERROR.to_string());
                self.stream.disconnect();
                self.state.error = Some(message.clone());
                FlowEvent::StreamFailed(message)
            }
        }
    }

    /// Move the accumulated results out of the progress record.
    fn promote(&mut self) {
        self.stream.disconnect();
        self.state.progress.connected = false;
        self.state.results = std::mem::take(&mut self.state.progress.results);
        info!(results = self.state.results.len(), "naming results ready");
        self.set_status(FlowStatus::Previewing);
    }

    fn clear(&mut self) {
        self.stream.disconnect();
        let status = self.state.status;
        self.state = FlowState {
            status,
            ..FlowState::default()
        };
    }

    fn set_status(&mut self, status: FlowStatus) {
        if self.state.status == status {
            return;
        }
        info!(from = %self.state.status, to = %status, "flow status");
        self.state.status = status;
        self.status_tx.send_replace(status);
    }

    fn invalid(&self, action: &'static str) -> FlowError {
        FlowError::InvalidTransition {
            action,
            status: self.state.status,
        }
    }
}

/// Restores `status` if dropped while still armed.
struct Revert<'a> {
    flow: &'a mut FlowController,
    status: FlowStatus,
    armed: bool,
}

impl<'a> Revert<'a> {
    fn new(flow: &'a mut FlowController, status: FlowStatus) -> Self {
        Self {
            flow,
            status,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Revert<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(status = %self.status, "call cancelled, reverting flow status");
            self.flow.set_status(self.status);
        }
    }
}

/// Pick the naming work unit: explicit pages, else analyzed pages, else the
/// flat node list.
fn work_units(
    explicit: Option<Vec<PageInfo>>,
    analysis: &AnalyzeResult,
) -> (Option<Vec<PageInfo>>, Option<Vec<NodeMetadata>>) {
    let pages = explicit
        .filter(|pages| !pages.is_empty())
        .or_else(|| analysis.pages.clone().filter(|pages| !pages.is_empty()));
    match pages {
        Some(pages) => (Some(pages), None),
        None => (None, Some(analysis.nodes.clone())),
    }
}
