use std::collections::HashSet;
use std::fmt;
use std::path::Path as FsPath;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use weft_core::error::{Result, WeftError};

use crate::context::RESERVED_KEYS;
use crate::rules::{Condition, Predicate, RouteRule};
use crate::transform::TransformRegistry;

pub const DEFAULT_RECALL_QUERY: &str = "{{content}}";

fn default_recall_query() -> String {
    DEFAULT_RECALL_QUERY.to_string()
}

/// An ordered, immutable sequence of nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
}

/// One step of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Unique id; the context key for this node's result and its jump target.
    pub id: String,
    /// Human-readable label for logs.
    #[serde(default)]
    pub name: Option<String>,
    /// End the run successfully once this node completes.
    #[serde(default)]
    pub terminal: bool,
    #[serde(flatten)]
    pub kind: NodeKind,
}

/// Kind-specific payload of a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    /// Apply a registered transform to the inbound record.
    Transform { transform: String },
    /// Recall similar prior content; `query` is a template.
    MemoryRecall {
        #[serde(default = "default_recall_query")]
        query: String,
    },
    /// Structured (JSON) completion of a prompt template.
    Analyze { prompt: String },
    /// Text completion of a prompt template.
    Generate { prompt: String },
    /// Pick the next node from an ordered rule list.
    Route { routes: Vec<RouteRule> },
    /// Hand a side effect to the action sink.
    Action {
        action: String,
        #[serde(default)]
        payload: Value,
    },
}

impl NodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Transform { .. } => "transform",
            Self::MemoryRecall { .. } => "memory_recall",
            Self::Analyze { .. } => "analyze",
            Self::Generate { .. } => "generate",
            Self::Route { .. } => "route",
            Self::Action { .. } => "action",
        }
    }
}

impl NodeSpec {
    fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            name: None,
            terminal: false,
            kind,
        }
    }

    pub fn transform(id: impl Into<String>, transform: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Transform {
            transform: transform.into(),
        })
    }

    pub fn memory_recall(id: impl Into<String>) -> Self {
        Self::new(id, NodeKind::MemoryRecall {
            query: default_recall_query(),
        })
    }

    pub fn analyze(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Analyze {
            prompt: prompt.into(),
        })
    }

    pub fn generate(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Generate {
            prompt: prompt.into(),
        })
    }

    pub fn route(id: impl Into<String>, routes: Vec<RouteRule>) -> Self {
        Self::new(id, NodeKind::Route { routes })
    }

    pub fn action(id: impl Into<String>, action: impl Into<String>, payload: Value) -> Self {
        Self::new(id, NodeKind::Action {
            action: action.into(),
            payload,
        })
    }

    /// Set the display name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Mark the node terminal.
    pub fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }

    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// A problem in a definition that does not prevent it from running.
#[derive(Debug, Clone, PartialEq)]
pub enum DefinitionWarning {
    /// A route points at a node id that does not exist.
    DanglingTarget { node: String, target: String },
    /// A route jumps to an earlier node, so the run may loop.
    BackwardJump { node: String, target: String },
    /// A textual rule does not parse; it will always be skipped.
    InvalidRule {
        node: String,
        rule_index: usize,
        error: String,
    },
}

impl fmt::Display for DefinitionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DanglingTarget { node, target } => {
                write!(f, "route '{}' targets unknown node '{}'", node, target)
            }
            Self::BackwardJump { node, target } => {
                write!(f, "route '{}' jumps back to '{}'", node, target)
            }
            Self::InvalidRule {
                node,
                rule_index,
                error,
            } => write!(f, "route '{}' rule #{} is invalid: {}", node, rule_index, error),
        }
    }
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>, nodes: Vec<NodeSpec>) -> Self {
        Self {
            name: name.into(),
            nodes,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, index: usize) -> Option<&NodeSpec> {
        self.nodes.get(index)
    }

    /// Position of a node id in the sequence.
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == id)
    }

    /// Parse a definition from TOML.
    pub fn from_toml_str(src: &str) -> Result<Self> {
        toml::from_str(src).map_err(|e| WeftError::Definition(e.to_string()))
    }

    /// Load a definition from a TOML file.
    pub fn load(path: &FsPath) -> Result<Self> {
        let src = std::fs::read_to_string(path)?;
        Self::from_toml_str(&src)
            .map_err(|e| WeftError::Definition(format!("{}: {}", path.display(), e)))
    }

    /// Check the definition against a transform registry.
    ///
    /// Empty, reserved, or duplicate ids and unknown transforms are errors.
    /// Route problems come back as warnings.
    pub fn validate(&self, transforms: &TransformRegistry) -> Result<Vec<DefinitionWarning>> {
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if node.id.trim().is_empty() {
                return Err(WeftError::Definition("node id must not be empty".into()));
            }
            if node.id.contains('.') {
                return Err(WeftError::Definition(format!(
                    "node id '{}' must not contain '.'",
                    node.id
                )));
            }
            if RESERVED_KEYS.contains(&node.id.as_str()) {
                return Err(WeftError::Definition(format!(
                    "node id '{}' is reserved",
                    node.id
                )));
            }
            if !seen.insert(node.id.as_str()) {
                return Err(WeftError::Definition(format!(
                    "duplicate node id '{}'",
                    node.id
                )));
            }
            if let NodeKind::Transform { transform } = &node.kind {
                if !transforms.contains(transform) {
                    return Err(WeftError::UnknownTransform(transform.clone()));
                }
            }
        }

        let mut warnings = Vec::new();
        for (index, node) in self.nodes.iter().enumerate() {
            let NodeKind::Route { routes } = &node.kind else {
                continue;
            };
            for (rule_index, rule) in routes.iter().enumerate() {
                if let Condition::Text(src) = &rule.when {
                    if let Err(e) = Predicate::parse(src) {
                        warnings.push(DefinitionWarning::InvalidRule {
                            node: node.id.clone(),
                            rule_index,
                            error: e.to_string(),
                        });
                    }
                }
                match self.index_of(&rule.target) {
                    None => warnings.push(DefinitionWarning::DanglingTarget {
                        node: node.id.clone(),
                        target: rule.target.clone(),
                    }),
                    Some(target) if target <= index => {
                        warnings.push(DefinitionWarning::BackwardJump {
                            node: node.id.clone(),
                            target: rule.target.clone(),
                        })
                    }
                    Some(_) => {}
                }
            }
        }

        Ok(warnings)
    }

    /// The support triage workflow: normalize, recall, analyze, then either
    /// reply or escalate. The `rdv` rule targets a booking node that this
    /// definition does not declare.
    pub fn support_triage() -> Self {
        Self::new(
            "support-triage",
            vec![
                NodeSpec::transform("normalize", "normalize").named("Normalize input"),
                NodeSpec::memory_recall("recall").named("Recall history"),
                NodeSpec::analyze("analysis", ANALYSIS_PROMPT).named("Sentiment analysis"),
                NodeSpec::route(
                    "router",
                    vec![
                        RouteRule::new("analysis.is_urgent == true", "escalation"),
                        RouteRule::new("analysis.intent == \"rdv\"", "booking"),
                        RouteRule::new(Predicate::always(), "reply"),
                    ],
                )
                .named("Router"),
                NodeSpec::generate("reply", REPLY_PROMPT)
                    .named("Generate reply")
                    .terminal(),
                NodeSpec::action(
                    "escalation",
                    "send_sms_alert",
                    Value::String("Urgent message detected".into()),
                )
                .named("Escalate to manager"),
            ],
        )
    }
}

const ANALYSIS_PROMPT: &str = "Analyze this message: '{{content}}'. \
Return ONLY raw JSON with the keys \"sentiment\" (a number from -1 to 1), \
\"is_urgent\" (boolean) and \"intent\" (a short lowercase label, \"rdv\" for appointment requests).";

const REPLY_PROMPT: &str = "Act as an assistant for a small Belgian business. \
Context: {{recall}}. Analysis: {{analysis}}. Message: {{content}}. \
Reply politely and helpfully, in the language of the message.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_support_triage_is_valid() {
        let def = WorkflowDefinition::support_triage();
        let warnings = def.validate(&TransformRegistry::with_builtins()).unwrap();
        assert_eq!(
            warnings,
            vec![DefinitionWarning::DanglingTarget {
                node: "router".into(),
                target: "booking".into()
            }]
        );
        assert_eq!(def.index_of("escalation"), Some(5));
        assert!(def.node(4).unwrap().terminal);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let def = WorkflowDefinition::new(
            "dup",
            vec![NodeSpec::memory_recall("a"), NodeSpec::memory_recall("a")],
        );
        let err = def.validate(&TransformRegistry::new()).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_reserved_and_empty_ids_rejected() {
        let registry = TransformRegistry::new();
        for id in ["", "content", "logs", "a.b"] {
            let def = WorkflowDefinition::new("bad", vec![NodeSpec::memory_recall(id)]);
            assert!(def.validate(&registry).is_err(), "id {:?} accepted", id);
        }
    }

    #[test]
    fn test_unknown_transform_rejected() {
        let def = WorkflowDefinition::new("t", vec![NodeSpec::transform("n", "explode")]);
        let err = def.validate(&TransformRegistry::with_builtins()).unwrap_err();
        assert!(matches!(err, WeftError::UnknownTransform(name) if name == "explode"));
    }

    #[test]
    fn test_backward_jump_and_invalid_rule_warned() {
        let def = WorkflowDefinition::new(
            "loop",
            vec![
                NodeSpec::memory_recall("recall"),
                NodeSpec::route(
                    "again",
                    vec![
                        RouteRule::new("recall ==", "recall"),
                        RouteRule::new("true", "recall"),
                    ],
                ),
            ],
        );
        let warnings = def.validate(&TransformRegistry::new()).unwrap();
        assert!(matches!(warnings[0], DefinitionWarning::InvalidRule { rule_index: 0, .. }));
        assert_eq!(warnings.len(), 3);
        assert!(warnings[2].to_string().contains("jumps back"));
    }

    #[test]
    fn test_deeply_nested_rule_is_reported_not_fatal() {
        let deep = format!("{}true", "!".repeat(100_000));
        let def = WorkflowDefinition::new(
            "deep",
            vec![
                NodeSpec::route("router", vec![RouteRule::new(deep.as_str(), "reply")]),
                NodeSpec::generate("reply", "hi"),
            ],
        );
        let warnings = def.validate(&TransformRegistry::new()).unwrap();
        assert!(matches!(
            warnings.as_slice(),
            [DefinitionWarning::InvalidRule { rule_index: 0, .. }]
        ));
    }

    #[test]
    fn test_from_toml() {
        let src = r#"
name = "mini"

[[nodes]]
id = "clean"
kind = "transform"
transform = "normalize"

[[nodes]]
id = "analysis"
kind = "analyze"
prompt = "Analyze {{content}}"

[[nodes]]
id = "router"
kind = "route"
routes = [
    { when = "analysis.is_urgent == true", target = "alert" },
    { when = { op = "literal", value = true }, target = "reply" },
]

[[nodes]]
id = "reply"
kind = "generate"
prompt = "Reply to {{content}}"
terminal = true

[[nodes]]
id = "alert"
name = "Page the manager"
kind = "action"
action = "page"
payload = { level = 2 }
"#;
        let def = WorkflowDefinition::from_toml_str(src).unwrap();
        assert_eq!(def.name, "mini");
        assert_eq!(def.len(), 5);
        assert!(def.nodes[3].terminal);
        assert_eq!(def.nodes[4].display_name(), "Page the manager");
        match &def.nodes[2].kind {
            NodeKind::Route { routes } => {
                assert_eq!(routes[0].when, Condition::Text("analysis.is_urgent == true".into()));
                assert_eq!(routes[1].when, Condition::Tree(Predicate::always()));
            }
            other => panic!("expected route, got {:?}", other),
        }
        match &def.nodes[4].kind {
            NodeKind::Action { action, payload } => {
                assert_eq!(action, "page");
                assert_eq!(payload["level"], 2);
            }
            other => panic!("expected action, got {:?}", other),
        }
        assert!(def.validate(&TransformRegistry::with_builtins()).unwrap().is_empty());
    }

    #[test]
    fn test_recall_query_defaults_to_content() {
        let def = WorkflowDefinition::from_toml_str(
            "name = \"r\"\n[[nodes]]\nid = \"recall\"\nkind = \"memory_recall\"\n",
        )
        .unwrap();
        match &def.nodes[0].kind {
            NodeKind::MemoryRecall { query } => assert_eq!(query, "{{content}}"),
            other => panic!("expected memory_recall, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let err = WorkflowDefinition::from_toml_str(
            "name = \"x\"\n[[nodes]]\nid = \"a\"\nkind = \"teleport\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, WeftError::Definition(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wf.toml");
        std::fs::write(
            &path,
            "name = \"file\"\n[[nodes]]\nid = \"reply\"\nkind = \"generate\"\nprompt = \"hi\"\n",
        )
        .unwrap();
        let def = WorkflowDefinition::load(&path).unwrap();
        assert_eq!(def.name, "file");
        assert!(WorkflowDefinition::load(&dir.path().join("missing.toml")).is_err());
    }
}
