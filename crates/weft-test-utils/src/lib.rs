//! Scripted and recording collaborators for Weft tests.

use std::path::PathBuf;
use std::sync::Mutex;

use futures::future::BoxFuture;
use serde_json::Value;

use weft_core::error::{Result, WeftError};
use weft_core::traits::{ActionSink, GenerativeGateway, MemoryGateway};
use weft_core::types::{ActionRequest, Completion, CompletionMode, MemoryHit};

/// What a scripted gateway answers for one completion mode.
#[derive(Debug, Clone)]
pub enum Scripted {
    Json(Value),
    Text(String),
    /// Structured output that does not parse.
    Malformed(String),
    /// An external service failure with this message.
    Fail(String),
    /// Never resolves.
    Hang,
}

/// Generative gateway with one canned answer per mode. Records every prompt.
pub struct ScriptedGenerative {
    json: Scripted,
    text: Scripted,
    calls: Mutex<Vec<(CompletionMode, String)>>,
}

impl ScriptedGenerative {
    pub fn new() -> Self {
        Self {
            json: Scripted::Json(serde_json::json!({})),
            text: Scripted::Text(String::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answer structured requests with this value.
    pub fn json(mut self, value: Value) -> Self {
        self.json = Scripted::Json(value);
        self
    }

    /// Answer text requests with this string.
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Scripted::Text(text.into());
        self
    }

    /// Answer structured requests with unparsable output.
    pub fn malformed_json(mut self, raw: impl Into<String>) -> Self {
        self.json = Scripted::Malformed(raw.into());
        self
    }

    /// Fail every request.
    pub fn failing(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            json: Scripted::Fail(message.clone()),
            text: Scripted::Fail(message),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Never answer.
    pub fn hanging() -> Self {
        Self {
            json: Scripted::Hang,
            text: Scripted::Hang,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Prompts received so far, in order.
    pub fn calls(&self) -> Vec<(CompletionMode, String)> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for ScriptedGenerative {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerativeGateway for ScriptedGenerative {
    fn complete(&self, prompt: &str, mode: CompletionMode) -> BoxFuture<'_, Result<Completion>> {
        self.calls.lock().unwrap().push((mode, prompt.to_string()));
        let script = match mode {
            CompletionMode::Json => self.json.clone(),
            CompletionMode::Text => self.text.clone(),
        };
        Box::pin(async move {
            match script {
                Scripted::Json(value) => Ok(Completion::Json(value)),
                Scripted::Text(text) => Ok(Completion::Text(text)),
                Scripted::Malformed(raw) => Err(WeftError::MalformedOutput(raw)),
                Scripted::Fail(message) => Err(WeftError::service("scripted", message)),
                Scripted::Hang => futures::future::pending().await,
            }
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Memory gateway that returns canned hits and records saves.
#[derive(Default)]
pub struct RecordingMemory {
    hits: Vec<String>,
    fail: bool,
    queries: Mutex<Vec<String>>,
    saved: Mutex<Vec<(String, Value)>>,
}

impl RecordingMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recall returns these contents, best first.
    pub fn with_hits(hits: &[&str]) -> Self {
        Self {
            hits: hits.iter().map(|h| h.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Both recall and save fail.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    /// Saved `(content, metadata)` pairs. Failed saves are recorded too.
    pub fn saved(&self) -> Vec<(String, Value)> {
        self.saved.lock().unwrap().clone()
    }
}

impl MemoryGateway for RecordingMemory {
    fn recall(&self, query: &str) -> BoxFuture<'_, Result<Vec<MemoryHit>>> {
        self.queries.lock().unwrap().push(query.to_string());
        Box::pin(async move {
            if self.fail {
                return Err(WeftError::service("memory", "store unreachable"));
            }
            Ok(self
                .hits
                .iter()
                .map(|content| MemoryHit {
                    content: content.clone(),
                    similarity: 0.9,
                    metadata: Value::Null,
                })
                .collect())
        })
    }

    fn save(&self, content: &str, metadata: Value) -> BoxFuture<'_, Result<()>> {
        self.saved.lock().unwrap().push((content.to_string(), metadata));
        Box::pin(async move {
            if self.fail {
                return Err(WeftError::service("memory", "store unreachable"));
            }
            Ok(())
        })
    }
}

/// Action sink that keeps every request.
#[derive(Default)]
pub struct RecordingActionSink {
    requests: Mutex<Vec<ActionRequest>>,
}

impl RecordingActionSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<ActionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl ActionSink for RecordingActionSink {
    fn submit(&self, request: ActionRequest) {
        self.requests.lock().unwrap().push(request);
    }
}

/// Write `contents` to `name` inside a fresh temp dir. Keep the dir alive
/// for as long as the file is needed.
pub fn temp_file(name: &str, contents: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(name);
    std::fs::write(&path, contents).unwrap();
    (dir, path)
}
