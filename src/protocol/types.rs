use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ── Request/response bodies ─────────────────────────────────────────────

/// Body of `POST /api/analyze`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    pub figma_url: String,
    pub figma_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlm_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}

/// Snapshot returned by the analyze call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResult {
    #[serde(default)]
    pub root_name: String,
    #[serde(default)]
    pub total_nodes: u32,
    /// Node type name → count.
    #[serde(default)]
    pub node_types: BTreeMap<String, u32>,
    /// Flat list of nameable nodes; the work unit when no pages were detected.
    #[serde(default)]
    pub nodes: Vec<NodeMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<Vec<PageInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structure_analysis: Option<StructureAnalysis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_node_id: Option<String>,
}

/// A nameable node as reported by the analyzer.
///
/// Only the fields the client reads are typed; everything else is kept in
/// `extra` and forwarded verbatim to the naming call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub node_type: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A top-level page (screen) detected in the design file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub node_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub is_auxiliary: bool,
    #[serde(default)]
    pub nodes: Vec<NodeMetadata>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructureAnalysis {
    #[serde(default)]
    pub file_type: String,
    #[serde(default)]
    pub reasoning: String,
}

/// Body of `POST /api/name`. Exactly one of `pages`/`nodes` is populated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NameRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<Vec<PageInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Vec<NodeMetadata>>,
    pub figma_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_node_id: Option<String>,
    pub vlm_provider: String,
    pub vlm_api_key: String,
    pub global_context: String,
    pub platform: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NameResponse {
    #[serde(default)]
    pub session_id: String,
}

/// Failure body of either call. The field is optional on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
}

/// One row of naming output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamingResult {
    pub node_id: String,
    /// Label drawn on the annotated image next to this node.
    #[serde(default)]
    pub mark_id: u32,
    #[serde(default)]
    pub original_name: String,
    #[serde(default)]
    pub suggested_name: String,
    /// In `[0, 1]`.
    #[serde(default)]
    pub confidence: f64,
}

// ── Push events ─────────────────────────────────────────────────────────

/// One message from `GET /api/progress/{sessionId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProgressEvent {
    #[serde(rename = "connected")]
    Connected,
    #[serde(rename = "batch_started")]
    BatchStarted(BatchStarted),
    #[serde(rename = "image_exported")]
    ImageExported(ImageExported),
    #[serde(rename = "som_rendered")]
    SomRendered(SomRendered),
    #[serde(rename = "vlm_called")]
    VlmCalled,
    #[serde(rename = "batch_complete")]
    BatchComplete(BatchComplete),
    #[serde(rename = "all_complete")]
    AllComplete(AllComplete),
    #[serde(rename = "error")]
    Error(StreamFailure),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStarted {
    #[serde(default)]
    pub batch_index: u32,
    #[serde(default)]
    pub total_batches: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageExported {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clean_image_base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_image_base64: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SomRendered {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub som_image_base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clean_image_base64: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchComplete {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_nodes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_nodes: Option<u32>,
    #[serde(default)]
    pub results: Vec<NamingResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllComplete {
    /// When present, the authoritative full result list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<NamingResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamFailure {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
