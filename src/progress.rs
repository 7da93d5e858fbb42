//! Progress event interpretation.
//!
//! A `Progress` record is never mutated in place: applying an event yields
//! the next record plus a `Signal` telling the consumer whether the event
//! was terminal. Records are cheap to clone (images are shared `Arc<str>`)
//! so they can be handed to the flow controller by value.

use std::sync::Arc;

use tracing::debug;

use crate::protocol::parse::parse_event;
use crate::protocol::types::{NamingResult, ProgressEvent};

pub const CONNECTED_MESSAGE: &str = "Connected to progress stream";
pub const RENDERING_MESSAGE: &str = "Rendering annotated image";
pub const CALLING_MODEL_MESSAGE: &str = "Calling vision model";
pub const PARSING_MESSAGE: &str = "Parsing model response";
pub const ALL_COMPLETE_MESSAGE: &str = "All batches complete";
pub const GENERIC_STREAM_ERROR: &str = "Naming failed";

/// Live progress of one naming session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Progress {
    pub connected: bool,
    /// 1-based index of the batch in flight; 0 before the first batch.
    pub current_batch: u32,
    pub total_batches: u32,
    /// 1-based; 0 when the server does not report pages.
    pub current_page: u32,
    pub total_pages: u32,
    pub completed_nodes: u32,
    pub total_nodes: u32,
    pub message: String,
    pub clean_image: Option<Arc<str>>,
    pub frame_image: Option<Arc<str>>,
    /// Set-of-marks overlay image.
    pub som_image: Option<Arc<str>>,
    /// Results accumulated so far, in arrival order.
    pub results: Vec<NamingResult>,
    pub completed: bool,
    pub error: Option<String>,
    /// Count of push messages that could not be parsed and were dropped.
    pub dropped_messages: u64,
}

/// What a consumer must do after an application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Signal {
    #[default]
    None,
    /// The stream reported authoritative completion.
    Completed,
    /// The stream reported a failure.
    Failed,
}

impl Signal {
    /// Whether the connection must be closed after this signal.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Signal::None)
    }
}

impl Progress {
    /// Parse a raw push payload and apply it.
    ///
    /// Malformed payloads are dropped: the record only bumps
    /// `dropped_messages`, and the signal is `None`.
    pub fn apply_raw(&self, data: &str) -> (Self, Signal) {
        match parse_event(data) {
            Ok(Some(event)) => self.apply(&event),
            Ok(None) => (self.clone(), Signal::None),
            Err(e) => {
                debug!(error = %e, len = data.len(), "dropping malformed progress message");
                let mut next = self.clone();
                next.dropped_messages += 1;
                (next, Signal::None)
            }
        }
    }

    /// Apply one event, producing the next record.
    pub fn apply(&self, event: &ProgressEvent) -> (Self, Signal) {
        let mut next = self.clone();
        let signal = match event {
            ProgressEvent::Connected => {
                next.message = CONNECTED_MESSAGE.to_string();
                Signal::None
            }
            ProgressEvent::BatchStarted(batch) => {
                next.current_batch = batch.batch_index.saturating_add(1);
                next.total_batches = batch.total_batches;
                if let Some(page) = batch.page_index {
                    next.current_page = page.saturating_add(1);
                }
                if let Some(total) = batch.total_pages {
                    next.total_pages = total;
                }
                next.message = batch.message.clone().unwrap_or_else(|| {
                    format!(
                        "Processing batch {} of {}",
                        next.current_batch, next.total_batches
                    )
                });
                Signal::None
            }
            ProgressEvent::ImageExported(images) => {
                if let Some(ref clean) = images.clean_image_base64 {
                    next.clean_image = Some(Arc::from(clean.as_str()));
                }
                if let Some(ref frame) = images.frame_image_base64 {
                    next.frame_image = Some(Arc::from(frame.as_str()));
                }
                next.message = RENDERING_MESSAGE.to_string();
                Signal::None
            }
            ProgressEvent::SomRendered(images) => {
                if let Some(ref som) = images.som_image_base64 {
                    next.som_image = Some(Arc::from(som.as_str()));
                }
                if let Some(ref clean) = images.clean_image_base64 {
                    next.clean_image = Some(Arc::from(clean.as_str()));
                }
                next.message = CALLING_MODEL_MESSAGE.to_string();
                Signal::None
            }
            ProgressEvent::VlmCalled => {
                next.message = PARSING_MESSAGE.to_string();
                Signal::None
            }
            ProgressEvent::BatchComplete(batch) => {
                if let Some(completed) = batch.completed_nodes {
                    next.completed_nodes = completed;
                }
                if let Some(total) = batch.total_nodes {
                    next.total_nodes = total;
                }
                next.results.extend(batch.results.iter().cloned());
                next.message = format!(
                    "Batch {} of {} complete",
                    next.current_batch, next.total_batches
                );
                Signal::None
            }
            ProgressEvent::AllComplete(done) => {
                next.completed = true;
                if let Some(ref results) = done.results {
                    next.results.clone_from(results);
                }
                next.message = done
                    .message
                    .clone()
                    .unwrap_or_else(|| ALL_COMPLETE_MESSAGE.to_string());
                next.connected = false;
                Signal::Completed
            }
            ProgressEvent::Error(failure) => {
                next.error = Some(
                    failure
                        .message
                        .clone()
                        .filter(|m| !m.is_empty())
                        .unwrap_or_else(|| GENERIC_STREAM_ERROR.to_string()),
                );
                next.connected = false;
                Signal::Failed
            }
            ProgressEvent::Unknown => Signal::None,
        };
        (next, signal)
    }

    /// The connection was acknowledged.
    pub fn opened(&self) -> Self {
        Self {
            connected: true,
            ..self.clone()
        }
    }

    /// The connection closed without a terminal event.
    pub fn closed(&self) -> Self {
        Self {
            connected: false,
            ..self.clone()
        }
    }

    /// The transport failed for good (retries exhausted, stall, rejection).
    pub fn failed(&self, message: impl Into<String>) -> Self {
        Self {
            connected: false,
            error: Some(message.into()),
            ..self.clone()
        }
    }
}
