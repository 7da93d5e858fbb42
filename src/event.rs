use crate::progress::{Progress, Signal};

/// One delivery from a progress connection: the record produced by the
/// latest message, and whether that message was terminal.
#[derive(Debug, Clone)]
pub struct StreamUpdate {
    pub progress: Progress,
    pub signal: Signal,
}

/// What changed in the flow after consuming one stream update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowEvent {
    /// Progress fields changed; status is still `naming`.
    Progress,
    /// Completion was reported and the results were promoted.
    Previewing,
    /// The stream failed with this message; status is still `naming`.
    StreamFailed(String),
}
