use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, WeftError};

/// Correlation identifier minted once per workflow run.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceId(pub String);

impl TraceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shape of the completion requested from the generative gateway.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CompletionMode {
    Text,
    Json,
}

/// A completion returned by the generative gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Text(String),
    Json(serde_json::Value),
}

impl Completion {
    /// Text content, rendering structured output as compact JSON.
    pub fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Json(value) => value.to_string(),
        }
    }
}

/// Parse model output requested as JSON.
///
/// Models often wrap JSON in Markdown code fences; those are stripped
/// before parsing.
pub fn parse_json_output(text: &str) -> Result<serde_json::Value> {
    let cleaned = text.replace("```json", "").replace("```", "");
    serde_json::from_str(cleaned.trim()).map_err(|e| {
        let preview: String = text.chars().take(120).collect();
        WeftError::MalformedOutput(format!("{}: {}", e, preview))
    })
}

/// A side effect requested by an `action` node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub trace_id: TraceId,
    pub requested_at: DateTime<Utc>,
}

impl ActionRequest {
    pub fn new(action: impl Into<String>, payload: serde_json::Value, trace_id: TraceId) -> Self {
        Self {
            action: action.into(),
            payload,
            trace_id,
            requested_at: Utc::now(),
        }
    }
}

/// A document recalled from similarity memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryHit {
    pub content: String,
    pub similarity: f32,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// How a workflow run ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Aborted,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Diagnostic event broadcast while a workflow runs.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    /// A run was seeded with fresh context.
    RunStarted { trace_id: TraceId, workflow: String },
    /// A node produced a result.
    NodeCompleted {
        trace_id: TraceId,
        node_id: String,
        elapsed_ms: u64,
    },
    /// A node raised an unrecoverable failure.
    NodeFailed {
        trace_id: TraceId,
        node_id: String,
        error: String,
    },
    /// A router redirected the program counter.
    RouteTaken {
        trace_id: TraceId,
        node_id: String,
        target: String,
    },
    /// A route predicate failed to evaluate and was treated as falsy.
    RuleEvaluationFailed {
        trace_id: TraceId,
        node_id: String,
        rule_index: usize,
        error: String,
    },
    /// A route matched but its target does not exist in the definition.
    DanglingRouteTarget {
        trace_id: TraceId,
        node_id: String,
        target: String,
    },
    /// A collaborator call degraded to a sentinel value.
    GatewayDegraded {
        trace_id: TraceId,
        node_id: String,
        service: String,
        reason: String,
    },
    /// Run content was persisted to memory.
    MemorySaved { trace_id: TraceId },
    /// Persisting run content failed; the failure was swallowed.
    MemorySaveFailed { trace_id: TraceId, error: String },
    /// The run left the execution loop.
    RunFinished {
        trace_id: TraceId,
        status: RunStatus,
        steps: usize,
    },
}

impl WorkflowEvent {
    /// The trace id every event carries.
    pub fn trace_id(&self) -> &TraceId {
        match self {
            Self::RunStarted { trace_id, .. }
            | Self::NodeCompleted { trace_id, .. }
            | Self::NodeFailed { trace_id, .. }
            | Self::RouteTaken { trace_id, .. }
            | Self::RuleEvaluationFailed { trace_id, .. }
            | Self::DanglingRouteTarget { trace_id, .. }
            | Self::GatewayDegraded { trace_id, .. }
            | Self::MemorySaved { trace_id }
            | Self::MemorySaveFailed { trace_id, .. }
            | Self::RunFinished { trace_id, .. } => trace_id,
        }
    }
}
