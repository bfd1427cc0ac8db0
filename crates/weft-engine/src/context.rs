use std::borrow::Cow;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use weft_core::error::{Result, WeftError};
use weft_core::types::TraceId;

/// Top-level keys owned by the context itself. Node ids may not use them.
pub const RESERVED_KEYS: [&str; 4] = ["input", "content", "trace_id", "logs"];

/// Inbound fields checked, in order, when deriving the working content.
pub const CONTENT_FIELDS: [&str; 2] = ["message", "text"];

/// Working content used when the inbound record carries no usable text.
pub const EMPTY_CONTENT: &str = "Empty";

/// A dotted path into the context, e.g. `analysis.is_urgent` or `input.items.0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Path(Vec<String>);

impl Path {
    pub fn parse(raw: &str) -> Self {
        Self(raw.split('.').map(|s| s.trim().to_string()).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// The root key, i.e. the first segment.
    pub fn root(&self) -> &str {
        self.0.first().map(|s| s.as_str()).unwrap_or("")
    }

    /// The path without its last segment, or `None` for a single-segment path.
    pub fn parent(&self) -> Option<Path> {
        if self.0.len() < 2 {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    pub fn last(&self) -> &str {
        self.0.last().map(|s| s.as_str()).unwrap_or("")
    }

    /// True when any segment is empty (`a..b`, `.a`, ``).
    pub fn has_empty_segment(&self) -> bool {
        self.0.iter().any(|s| s.is_empty())
    }
}

impl From<String> for Path {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<Path> for String {
    fn from(path: Path) -> Self {
        path.to_string()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// Structured result of an `analyze` node.
///
/// Unknown fields returned by the model are kept in `extra` so templates
/// and rules can still reach them. A known field that is null or of the
/// wrong type takes its default without discarding the others.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    #[serde(default, deserialize_with = "lenient")]
    pub sentiment: f64,
    #[serde(default, deserialize_with = "lenient")]
    pub is_urgent: bool,
    #[serde(default, deserialize_with = "lenient")]
    pub intent: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Analysis {
    fn default() -> Self {
        Self {
            sentiment: 0.0,
            is_urgent: false,
            intent: String::new(),
            extra: Map::new(),
        }
    }
}

impl Analysis {
    /// The neutral analysis substituted when the generative gateway fails.
    pub fn degraded() -> Self {
        Self {
            sentiment: 0.5,
            ..Self::default()
        }
    }

    /// Interpret a structured completion. Only a non-object is `MalformedOutput`.
    pub fn from_value(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(WeftError::MalformedOutput(format!(
                "expected a JSON object, got {}",
                value
            )));
        }
        serde_json::from_value(value).map_err(|e| WeftError::MalformedOutput(e.to_string()))
    }
}

fn lenient<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// Receipt recorded by an `action` node once the request is handed off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionReceipt {
    pub status: String,
    pub action: String,
}

impl ActionReceipt {
    pub fn executed(action: impl Into<String>) -> Self {
        Self {
            status: "executed".to_string(),
            action: action.into(),
        }
    }
}

/// A value a node stored in the context under its id.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NodeOutput {
    Transform(Value),
    Recall(String),
    Analysis(Analysis),
    Generation(String),
    Action(ActionReceipt),
}

impl NodeOutput {
    pub fn to_value(&self) -> Value {
        match self {
            Self::Transform(v) => v.clone(),
            Self::Recall(s) | Self::Generation(s) => Value::String(s.clone()),
            Self::Analysis(a) => serde_json::to_value(a).unwrap_or(Value::Null),
            Self::Action(r) => serde_json::to_value(r).unwrap_or(Value::Null),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Recall(s) | Self::Generation(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Success,
    Failed,
}

/// One entry of the per-run execution log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub trace_id: TraceId,
    pub node_id: String,
    pub status: LogStatus,
    /// The node's output; `{"target": id}` for a router that jumped,
    /// null for one that fell through, `{"error": msg}` on failure.
    pub output: Value,
    pub elapsed_ms: u64,
    pub at: DateTime<Utc>,
}

/// Mutable state of a single workflow run.
///
/// Owned by exactly one run. Nodes read it through `lookup`; only the
/// engine records results and log entries.
#[derive(Debug, Clone)]
pub struct Context {
    input: Value,
    content: String,
    trace_id: TraceId,
    results: Vec<(String, NodeOutput)>,
    logs: Vec<LogEntry>,
}

impl Context {
    /// Seed a context from an inbound record, minting a fresh trace id.
    pub fn new(input: Value) -> Self {
        Self::with_trace_id(input, TraceId::new())
    }

    pub fn with_trace_id(input: Value, trace_id: TraceId) -> Self {
        let content = derive_content(&input);
        Self {
            input,
            content,
            trace_id,
            results: Vec::new(),
            logs: Vec::new(),
        }
    }

    pub fn input(&self) -> &Value {
        &self.input
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn trace_id(&self) -> &TraceId {
        &self.trace_id
    }

    pub fn logs(&self) -> &[LogEntry] {
        &self.logs
    }

    /// Result stored under a node id.
    pub fn result(&self, node_id: &str) -> Option<&NodeOutput> {
        self.results
            .iter()
            .find(|(id, _)| id == node_id)
            .map(|(_, out)| out)
    }

    /// Stored results, oldest write first.
    pub fn results(&self) -> impl Iterator<Item = (&str, &NodeOutput)> {
        self.results.iter().map(|(id, out)| (id.as_str(), out))
    }

    /// Store a node result. Re-executing a node replaces its earlier
    /// result and moves it to the end of the write order.
    pub(crate) fn record(&mut self, node_id: &str, output: NodeOutput) {
        self.results.retain(|(id, _)| id != node_id);
        self.results.push((node_id.to_string(), output));
    }

    pub(crate) fn push_log(&mut self, entry: LogEntry) {
        self.logs.push(entry);
    }

    fn root(&self, key: &str) -> Option<Cow<'_, Value>> {
        match key {
            "input" => Some(Cow::Borrowed(&self.input)),
            "content" => Some(Cow::Owned(Value::String(self.content.clone()))),
            "trace_id" => Some(Cow::Owned(Value::String(self.trace_id.to_string()))),
            "logs" => serde_json::to_value(&self.logs).ok().map(Cow::Owned),
            id => self.result(id).map(|out| Cow::Owned(out.to_value())),
        }
    }

    /// Resolve a path. Missing segments yield `None`; never fails.
    pub fn lookup(&self, path: &Path) -> Option<Value> {
        let (first, rest) = path.segments().split_first()?;
        let root = self.root(first)?;
        walk(&root, rest).cloned()
    }
}

fn walk<'a>(mut current: &'a Value, segments: &[String]) -> Option<&'a Value> {
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// First non-empty string among the content fields, else `"Empty"`.
pub fn derive_content(input: &Value) -> String {
    CONTENT_FIELDS
        .iter()
        .filter_map(|field| input.get(field).and_then(Value::as_str))
        .find(|s| !s.is_empty())
        .unwrap_or(EMPTY_CONTENT)
        .to_string()
}

impl Serialize for Context {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.results.len() + 4))?;
        map.serialize_entry("input", &self.input)?;
        map.serialize_entry("content", &self.content)?;
        map.serialize_entry("trace_id", &self.trace_id)?;
        for (id, output) in &self.results {
            map.serialize_entry(id, output)?;
        }
        map.serialize_entry("logs", &self.logs)?;
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_prefers_message() {
        let ctx = Context::new(json!({"message": "Bonjour", "text": "ignored"}));
        assert_eq!(ctx.content(), "Bonjour");
    }

    #[test]
    fn test_content_falls_back_to_text() {
        let ctx = Context::new(json!({"message": "", "text": "Salut"}));
        assert_eq!(ctx.content(), "Salut");
    }

    #[test]
    fn test_content_defaults_to_empty_marker() {
        assert_eq!(Context::new(json!({"from": "+32"})).content(), "Empty");
        assert_eq!(Context::new(json!("just a string")).content(), "Empty");
        assert_eq!(Context::new(json!({"message": 42})).content(), "Empty");
    }

    #[test]
    fn test_lookup_roots() {
        let ctx = Context::with_trace_id(
            json!({"from": "+32", "items": [{"sku": "a"}]}),
            TraceId::from_string("t-1"),
        );
        assert_eq!(ctx.lookup(&Path::parse("input.from")), Some(json!("+32")));
        assert_eq!(ctx.lookup(&Path::parse("input.items.0.sku")), Some(json!("a")));
        assert_eq!(ctx.lookup(&Path::parse("trace_id")), Some(json!("t-1")));
        assert_eq!(ctx.lookup(&Path::parse("content")), Some(json!("Empty")));
        assert_eq!(ctx.lookup(&Path::parse("input.items.7")), None);
        assert_eq!(ctx.lookup(&Path::parse("input.from.deeper")), None);
        assert_eq!(ctx.lookup(&Path::parse("nope")), None);
    }

    #[test]
    fn test_record_replaces_and_reorders() {
        let mut ctx = Context::new(json!({}));
        ctx.record("a", NodeOutput::Recall("first".into()));
        ctx.record("b", NodeOutput::Generation("hello".into()));
        ctx.record("a", NodeOutput::Recall("second".into()));

        let order: Vec<&str> = ctx.results().map(|(id, _)| id).collect();
        assert_eq!(order, vec!["b", "a"]);
        assert_eq!(ctx.result("a").and_then(|o| o.as_text()), Some("second"));
    }

    #[test]
    fn test_analysis_lookup_through_results() {
        let mut ctx = Context::new(json!({}));
        ctx.record(
            "analysis",
            NodeOutput::Analysis(Analysis {
                is_urgent: true,
                intent: "rdv".into(),
                ..Analysis::default()
            }),
        );
        assert_eq!(ctx.lookup(&Path::parse("analysis.is_urgent")), Some(json!(true)));
        assert_eq!(ctx.lookup(&Path::parse("analysis.intent")), Some(json!("rdv")));
    }

    #[test]
    fn test_analysis_from_value() {
        let a = Analysis::from_value(json!({"sentiment": -0.5, "is_urgent": true, "topic": "billing"}))
            .unwrap();
        assert_eq!(a.sentiment, -0.5);
        assert!(a.is_urgent);
        assert_eq!(a.intent, "");
        assert_eq!(a.extra["topic"], json!("billing"));

        assert!(Analysis::from_value(json!([1, 2])).is_err());
        assert!(Analysis::from_value(json!("urgent")).is_err());
    }

    #[test]
    fn test_analysis_tolerates_null_and_mistyped_fields() {
        let a = Analysis::from_value(json!({"sentiment": -0.9, "is_urgent": true, "intent": null}))
            .unwrap();
        assert_eq!(a.sentiment, -0.9);
        assert!(a.is_urgent);
        assert_eq!(a.intent, "");

        let a = Analysis::from_value(json!({
            "sentiment": "very negative",
            "is_urgent": "yes",
            "intent": "rdv",
            "topic": "booking"
        }))
        .unwrap();
        assert_eq!(a.sentiment, 0.0);
        assert!(!a.is_urgent);
        assert_eq!(a.intent, "rdv");
        assert_eq!(a.extra["topic"], json!("booking"));
        assert!(!a.extra.contains_key("is_urgent"));

        let a = Analysis::from_value(json!({"sentiment": 1, "is_urgent": null})).unwrap();
        assert_eq!(a.sentiment, 1.0);
        assert!(!a.is_urgent);
    }

    #[test]
    fn test_context_serializes_in_write_order() {
        let mut ctx = Context::with_trace_id(json!({"message": "hi"}), TraceId::from_string("t"));
        ctx.record("reply", NodeOutput::Generation("hello".into()));
        let v = serde_json::to_value(&ctx).unwrap();
        assert_eq!(v["content"], "hi");
        assert_eq!(v["trace_id"], "t");
        assert_eq!(v["reply"], "hello");
        assert_eq!(v["logs"], json!([]));
    }

    #[test]
    fn test_path_display_and_parent() {
        let p = Path::parse("analysis.is_urgent");
        assert_eq!(p.to_string(), "analysis.is_urgent");
        assert_eq!(p.parent(), Some(Path::parse("analysis")));
        assert_eq!(p.last(), "is_urgent");
        assert!(Path::parse("a..b").has_empty_segment());
    }
}
