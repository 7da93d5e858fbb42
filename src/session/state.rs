use std::fmt;

use crate::progress::Progress;
use crate::protocol::types::{AnalyzeResult, NamingResult};

/// Everything the presentation layer reads about the flow.
///
/// Which fields are meaningful depends on `status`: `analysis` from
/// `counted` on, `progress` during `naming`, `results` in `previewing` and
/// `done`. Fields outside that set are stale.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FlowState {
    pub status: FlowStatus,
    pub analysis: Option<AnalyzeResult>,
    /// Latest record delivered by the progress stream.
    pub progress: Progress,
    /// Results promoted from the stream on completion.
    pub results: Vec<NamingResult>,
    pub session_id: Option<String>,
    /// Key parsed from the analyzed URL, when it had one.
    pub file_key: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum FlowStatus {
    #[default]
    Idle,
    Analyzing,
    Counted,
    Naming,
    Previewing,
    Done,
}

impl fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlowStatus::Idle => "idle",
            FlowStatus::Analyzing => "analyzing",
            FlowStatus::Counted => "counted",
            FlowStatus::Naming => "naming",
            FlowStatus::Previewing => "previewing",
            FlowStatus::Done => "done",
        };
        f.write_str(name)
    }
}
