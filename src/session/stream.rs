use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use rand::prelude::*;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{Api, ApiError, MessageStream};
use crate::config::StreamConfig;
use crate::event::StreamUpdate;
use crate::progress::{Progress, Signal};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("no session id assigned; cannot open the progress stream")]
    MissingSessionId,
}

/// The live connection: a reader task and the channel it reports on.
struct Connection {
    session_id: String,
    task: JoinHandle<()>,
    updates: mpsc::UnboundedReceiver<StreamUpdate>,
}

/// Owns zero or one progress connection.
///
/// Each connection is read by its own task, which holds the live `Progress`
/// record and sends every new record over a channel created for that
/// connection alone. Replacing the connection aborts the old task and drops
/// its receiver, so nothing from an earlier session can be observed after
/// `connect` returns.
pub struct StreamSession {
    api: Arc<dyn Api>,
    config: StreamConfig,
    active: Option<Connection>,
}

impl StreamSession {
    pub fn new(api: Arc<dyn Api>, config: StreamConfig) -> Self {
        Self {
            api,
            config,
            active: None,
        }
    }

    /// Close any existing connection and open one for `session_id`,
    /// starting from a fresh progress record.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&mut self, session_id: &str) -> Result<(), StreamError> {
        if session_id.is_empty() {
            return Err(StreamError::MissingSessionId);
        }
        self.disconnect();

        let (tx, updates) = mpsc::unbounded_channel();
        let task = tokio::spawn(pump(
            Arc::clone(&self.api),
            session_id.to_string(),
            self.config.clone(),
            tx,
        ));
        info!(session_id, "progress stream connecting");
        self.active = Some(Connection {
            session_id: session_id.to_string(),
            task,
            updates,
        });
        Ok(())
    }

    /// Close the active connection, if any.
    pub fn disconnect(&mut self) {
        if let Some(connection) = self.active.take() {
            connection.task.abort();
            debug!(session_id = %connection.session_id, "progress stream closed");
        }
    }

    /// Whether a connection is held (its reader may still be delivering).
    pub fn is_live(&self) -> bool {
        self.active.is_some()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.active.as_ref().map(|c| c.session_id.as_str())
    }

    /// Wait for the next progress record of the active connection.
    ///
    /// Returns `None` when no connection is held or its reader has finished.
    /// After a terminal update the connection is released. Cancel-safe.
    pub async fn next_update(&mut self) -> Option<StreamUpdate> {
        let connection = self.active.as_mut()?;
        let update = connection.updates.recv().await;
        match update {
            Some(update) => {
                if update.signal.is_terminal() {
                    self.active = None;
                }
                Some(update)
            }
            None => {
                self.active = None;
                None
            }
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Why a connection stopped delivering before a terminal event.
enum Interruption {
    Dropped(ApiError),
    Stalled(Duration),
}

/// Reader task for one session: connects, interprets, reconnects.
async fn pump(
    api: Arc<dyn Api>,
    session_id: String,
    config: StreamConfig,
    tx: mpsc::UnboundedSender<StreamUpdate>,
) {
    let mut progress = Progress::default();
    let mut attempt: u32 = 0;

    loop {
        let interruption = match api.open_progress(&session_id).await {
            Ok(messages) => {
                progress = progress.opened();
                if !send(&tx, &progress, Signal::None) {
                    return;
                }
                let outcome = read(messages, &mut progress, &config, &tx).await;
                match outcome {
                    ReadOutcome::Finished => return,
                    ReadOutcome::Interrupted {
                        cause,
                        received_any,
                    } => {
                        if received_any {
                            attempt = 0;
                        }
                        cause
                    }
                }
            }
            Err(e) => Interruption::Dropped(e),
        };

        let failure = match interruption {
            Interruption::Stalled(limit) => {
                format!("No progress received for {}s", limit.as_secs())
            }
            Interruption::Dropped(e) if !e.is_retryable() => e.to_string(),
            Interruption::Dropped(e) if attempt >= config.max_reconnects => {
                format!("Progress stream lost: {e}")
            }
            Interruption::Dropped(e) => {
                attempt += 1;
                let delay = backoff(&config, attempt);
                warn!(
                    session_id = %session_id,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "progress stream dropped, reconnecting"
                );
                progress = progress.closed();
                if !send(&tx, &progress, Signal::None) {
                    return;
                }
                tokio::time::sleep(delay).await;
                continue;
            }
        };

        warn!(session_id = %session_id, error = %failure, "progress stream failed");
        progress = progress.failed(failure);
        send(&tx, &progress, Signal::Failed);
        return;
    }
}

enum ReadOutcome {
    /// A terminal event was applied, or the consumer went away.
    Finished,
    Interrupted {
        cause: Interruption,
        received_any: bool,
    },
}

async fn read(
    mut messages: MessageStream,
    progress: &mut Progress,
    config: &StreamConfig,
    tx: &mpsc::UnboundedSender<StreamUpdate>,
) -> ReadOutcome {
    let mut received_any = false;
    loop {
        let next = match config.silence_timeout() {
            Some(limit) => match tokio::time::timeout(limit, messages.next()).await {
                Ok(next) => next,
                Err(_) => {
                    return ReadOutcome::Interrupted {
                        cause: Interruption::Stalled(limit),
                        received_any,
                    };
                }
            },
            None => messages.next().await,
        };
        let raw = match next {
            Some(Ok(raw)) => raw,
            Some(Err(e)) => {
                return ReadOutcome::Interrupted {
                    cause: Interruption::Dropped(e),
                    received_any,
                };
            }
            None => {
                return ReadOutcome::Interrupted {
                    cause: Interruption::Dropped(ApiError::Network(
                        "connection closed by server".to_string(),
                    )),
                    received_any,
                };
            }
        };
        received_any = true;
        let (next, signal) = progress.apply_raw(&raw);
        *progress = next;
        if !send(tx, progress, signal) || signal.is_terminal() {
            return ReadOutcome::Finished;
        }
    }
}

fn send(tx: &mpsc::UnboundedSender<StreamUpdate>, progress: &Progress, signal: Signal) -> bool {
    tx.send(StreamUpdate {
        progress: progress.clone(),
        signal,
    })
    .is_ok()
}

/// Exponential backoff for reconnect `attempt` (1-based), capped, plus up
/// to 50% jitter.
fn backoff(config: &StreamConfig, attempt: u32) -> Duration {
    let exp = config
        .backoff_base_ms
        .saturating_mul(1u64 << attempt.saturating_sub(1).min(16));
    let capped = exp.min(config.backoff_max_ms);
    let jitter = if capped > 1 {
        rand::rng().random_range(0..=capped / 2)
    } else {
        0
    };
    Duration::from_millis(capped + jitter)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::protocol::types::{AnalyzeRequest, AnalyzeResult, NameRequest, NameResponse};

    /// Progress endpoint fed by test-held senders, one per session id.
    #[derive(Default)]
    struct ChannelApi {
        streams: Mutex<HashMap<String, mpsc::UnboundedReceiver<Result<String, ApiError>>>>,
        opens: Mutex<Vec<String>>,
    }

    impl ChannelApi {
        fn channel(&self, session_id: &str) -> mpsc::UnboundedSender<Result<String, ApiError>> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.streams
                .lock()
                .unwrap()
                .insert(session_id.to_string(), rx);
            tx
        }

        fn opens(&self) -> Vec<String> {
            self.opens.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Api for ChannelApi {
        async fn analyze(&self, _: &AnalyzeRequest) -> Result<AnalyzeResult, ApiError> {
            Ok(AnalyzeResult::default())
        }

        async fn start_naming(&self, _: &NameRequest) -> Result<NameResponse, ApiError> {
            Ok(NameResponse {
                session_id: "s1".to_string(),
            })
        }

        async fn open_progress(&self, session_id: &str) -> Result<MessageStream, ApiError> {
            self.opens.lock().unwrap().push(session_id.to_string());
            let rx = self
                .streams
                .lock()
                .unwrap()
                .remove(session_id)
                .ok_or_else(|| ApiError::Status {
                    status: 404,
                    message: "unknown session".to_string(),
                })?;
            let stream = futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            });
            Ok(stream.boxed())
        }
    }

    fn quiet_config() -> StreamConfig {
        StreamConfig {
            max_reconnects: 0,
            silence_timeout_secs: 0,
            ..Default::default()
        }
    }

    fn session(api: &Arc<ChannelApi>, config: StreamConfig) -> StreamSession {
        let api: Arc<dyn Api> = api.clone();
        StreamSession::new(api, config)
    }

    #[tokio::test]
    async fn connect_rejects_empty_session_id() {
        let api = Arc::new(ChannelApi::default());
        let mut stream = session(&api, quiet_config());
        assert_eq!(stream.connect(""), Err(StreamError::MissingSessionId));
        assert!(!stream.is_live());
        assert!(stream.next_update().await.is_none());
    }

    #[tokio::test]
    async fn disconnect_without_connection_is_noop() {
        let api = Arc::new(ChannelApi::default());
        let mut stream = session(&api, quiet_config());
        stream.disconnect();
        stream.disconnect();
        assert!(!stream.is_live());
    }

    #[tokio::test]
    async fn open_sets_connected_then_events_apply_in_order() {
        let api = Arc::new(ChannelApi::default());
        let tx = api.channel("s1");
        let mut stream = session(&api, quiet_config());
        stream.connect("s1").unwrap();

        let opened = stream.next_update().await.unwrap();
        assert!(opened.progress.connected);
        assert_eq!(opened.progress, Progress::default().opened());

        tx.send(Ok(r#"{"type":"batch_started","batchIndex":0,"totalBatches":2}"#.into()))
            .unwrap();
        tx.send(Ok("not json".into())).unwrap();
        tx.send(Ok(r#"{"type":"all_complete"}"#.into())).unwrap();

        let started = stream.next_update().await.unwrap();
        assert_eq!(started.progress.current_batch, 1);
        let dropped = stream.next_update().await.unwrap();
        assert_eq!(dropped.progress.dropped_messages, 1);
        let done = stream.next_update().await.unwrap();
        assert_eq!(done.signal, Signal::Completed);
        assert!(!done.progress.connected);
        assert!(!stream.is_live());
        assert!(stream.next_update().await.is_none());
    }

    #[tokio::test]
    async fn reconnect_replaces_previous_session() {
        let api = Arc::new(ChannelApi::default());
        let tx1 = api.channel("sid1");
        let tx2 = api.channel("sid2");
        let mut stream = session(&api, quiet_config());

        stream.connect("sid1").unwrap();
        assert!(stream.next_update().await.unwrap().progress.connected);
        tx1.send(Ok(r#"{"type":"batch_complete","results":[{"nodeId":"old"}]}"#.into()))
            .unwrap();

        stream.connect("sid2").unwrap();
        assert_eq!(stream.session_id(), Some("sid2"));
        // Writes to the first connection have nowhere to go once it is closed.
        tx1.send(Ok(r#"{"type":"all_complete"}"#.into())).ok();

        let opened = stream.next_update().await.unwrap();
        assert!(opened.progress.results.is_empty());
        assert_eq!(opened.progress, Progress::default().opened());

        tx2.send(Ok(r#"{"type":"batch_complete","results":[{"nodeId":"new"}]}"#.into()))
            .unwrap();
        let update = stream.next_update().await.unwrap();
        let ids: Vec<_> = update
            .progress
            .results
            .iter()
            .map(|r| r.node_id.as_str())
            .collect();
        assert_eq!(ids, ["new"]);
        assert_eq!(api.opens(), ["sid1", "sid2"]);
    }

    #[tokio::test]
    async fn connect_then_immediate_disconnect_releases_reader() {
        let api = Arc::new(ChannelApi::default());
        let _tx = api.channel("s1");
        let mut stream = session(&api, quiet_config());
        stream.connect("s1").unwrap();
        stream.disconnect();
        assert!(!stream.is_live());
        assert!(stream.session_id().is_none());
        assert!(stream.next_update().await.is_none());
    }

    #[tokio::test]
    async fn rejected_open_fails_without_retry() {
        let api = Arc::new(ChannelApi::default());
        let mut stream = session(
            &api,
            StreamConfig {
                max_reconnects: 5,
                silence_timeout_secs: 0,
                ..Default::default()
            },
        );
        stream.connect("missing").unwrap();
        let update = stream.next_update().await.unwrap();
        assert_eq!(update.signal, Signal::Failed);
        assert_eq!(update.progress.error.as_deref(), Some("unknown session"));
        assert_eq!(api.opens(), ["missing"]);
    }

    #[tokio::test]
    async fn drop_without_retries_surfaces_error() {
        let api = Arc::new(ChannelApi::default());
        let tx = api.channel("s1");
        let mut stream = session(&api, quiet_config());
        stream.connect("s1").unwrap();
        assert!(stream.next_update().await.unwrap().progress.connected);
        drop(tx);
        let update = stream.next_update().await.unwrap();
        assert_eq!(update.signal, Signal::Failed);
        assert!(!update.progress.connected);
        assert_eq!(
            update.progress.error.as_deref(),
            Some("Progress stream lost: network error: connection closed by server")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn drop_reconnects_and_keeps_progress() {
        let api = Arc::new(ChannelApi::default());
        let tx = api.channel("s1");
        let mut stream = session(
            &api,
            StreamConfig {
                max_reconnects: 2,
                silence_timeout_secs: 0,
                ..Default::default()
            },
        );
        stream.connect("s1").unwrap();
        stream.next_update().await.unwrap();
        tx.send(Ok(r#"{"type":"batch_complete","completedNodes":5,"results":[{"nodeId":"a"}]}"#.into()))
            .unwrap();
        stream.next_update().await.unwrap();

        let tx = {
            let replacement = api.channel("s1");
            drop(tx);
            replacement
        };
        let closed = stream.next_update().await.unwrap();
        assert!(!closed.progress.connected);
        assert_eq!(closed.signal, Signal::None);

        let reopened = stream.next_update().await.unwrap();
        assert!(reopened.progress.connected);
        assert_eq!(reopened.progress.completed_nodes, 5);
        assert_eq!(reopened.progress.results.len(), 1);

        tx.send(Ok(r#"{"type":"all_complete"}"#.into())).unwrap();
        let done = stream.next_update().await.unwrap();
        assert_eq!(done.signal, Signal::Completed);
        assert_eq!(api.opens(), ["s1", "s1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn silence_timeout_surfaces_stall() {
        let api = Arc::new(ChannelApi::default());
        let _tx = api.channel("s1");
        let mut stream = session(
            &api,
            StreamConfig {
                max_reconnects: 3,
                silence_timeout_secs: 30,
                ..Default::default()
            },
        );
        stream.connect("s1").unwrap();
        stream.next_update().await.unwrap();
        let update = stream.next_update().await.unwrap();
        assert_eq!(update.signal, Signal::Failed);
        assert_eq!(
            update.progress.error.as_deref(),
            Some("No progress received for 30s")
        );
    }

    #[test]
    fn backoff_grows_and_caps() {
        let config = StreamConfig {
            backoff_base_ms: 100,
            backoff_max_ms: 1_000,
            ..Default::default()
        };
        let first = backoff(&config, 1).as_millis();
        assert!((100..=150).contains(&first));
        let third = backoff(&config, 3).as_millis();
        assert!((400..=600).contains(&third));
        let capped = backoff(&config, 30).as_millis();
        assert!((1_000..=1_500).contains(&capped));
    }
}
