use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::*;

/// Generative gateway: text or JSON completion from a prompt.
pub trait GenerativeGateway: Send + Sync + 'static {
    /// Complete a prompt. In `Json` mode a successful call returns
    /// `Completion::Json`; unparsable output is `WeftError::MalformedOutput`.
    fn complete(&self, prompt: &str, mode: CompletionMode) -> BoxFuture<'_, Result<Completion>>;

    /// Provider name for logs.
    fn name(&self) -> &str {
        "generative"
    }
}

/// Memory gateway: similarity recall and best-effort persistence.
pub trait MemoryGateway: Send + Sync + 'static {
    /// Recall prior content similar to `query`, best match first.
    fn recall(&self, query: &str) -> BoxFuture<'_, Result<Vec<MemoryHit>>>;

    /// Persist content with an embedding of it and the given metadata.
    fn save(&self, content: &str, metadata: serde_json::Value) -> BoxFuture<'_, Result<()>>;
}

/// Action sink: receives side effects requested by `action` nodes.
///
/// Submission is fire-and-forget: implementations must not block the run
/// and must not report failure back to the caller.
pub trait ActionSink: Send + Sync + 'static {
    fn submit(&self, request: ActionRequest);
}
