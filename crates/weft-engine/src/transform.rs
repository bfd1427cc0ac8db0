use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use weft_core::error::{Result, WeftError};

use crate::context::Context;

/// A pure, in-process function applied by `transform` nodes.
pub trait Transform: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Produce the node's output from the inbound record.
    fn apply(&self, input: &Value, ctx: &Context) -> Result<Value>;
}

/// Copies the inbound record and stamps it with a timestamp and the run's
/// trace id. Rejects records that are not JSON objects.
pub struct Normalize;

impl Transform for Normalize {
    fn name(&self) -> &str {
        "normalize"
    }

    fn apply(&self, input: &Value, ctx: &Context) -> Result<Value> {
        let mut record = input
            .as_object()
            .cloned()
            .ok_or_else(|| WeftError::Transform {
                name: self.name().to_string(),
                message: format!("expected an object, got {}", kind_of(input)),
            })?;
        record.insert("timestamp".into(), Value::String(Utc::now().to_rfc3339()));
        record.insert("trace_id".into(), Value::String(ctx.trace_id().to_string()));
        Ok(Value::Object(record))
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Adapter so plain closures can be registered as transforms.
pub struct FnTransform<F> {
    name: String,
    f: F,
}

impl<F> FnTransform<F>
where
    F: Fn(&Value, &Context) -> Result<Value> + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

impl<F> Transform for FnTransform<F>
where
    F: Fn(&Value, &Context) -> Result<Value> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, input: &Value, ctx: &Context) -> Result<Value> {
        (self.f)(input, ctx)
    }
}

/// Registry of named transforms.
#[derive(Clone)]
pub struct TransformRegistry {
    transforms: HashMap<String, Arc<dyn Transform>>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self {
            transforms: HashMap::new(),
        }
    }

    /// Create a registry with all built-in transforms registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Normalize);
        registry
    }

    /// Register a transform, replacing any existing one with the same name.
    pub fn register(&mut self, transform: impl Transform) {
        let name = transform.name().to_string();
        self.transforms.insert(name, Arc::new(transform));
    }

    pub fn register_fn<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&Value, &Context) -> Result<Value> + Send + Sync + 'static,
    {
        self.register(FnTransform::new(name, f));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Transform>> {
        self.transforms.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.transforms.contains_key(name)
    }

    /// List all registered transform names.
    pub fn list(&self) -> Vec<&str> {
        self.transforms.keys().map(|s| s.as_str()).collect()
    }

    /// Apply a transform by name to the context's inbound record. Failures
    /// are reported against `node_id`, the node that invoked the transform.
    pub fn apply(&self, node_id: &str, name: &str, ctx: &Context) -> Result<Value> {
        let transform = self
            .get(name)
            .ok_or_else(|| WeftError::UnknownTransform(name.to_string()))?;
        transform
            .apply(ctx.input(), ctx)
            .map_err(|e| WeftError::NodeExecution {
                node: node_id.to_string(),
                message: e.to_string(),
            })
    }
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weft_core::types::TraceId;

    #[test]
    fn test_normalize_stamps_record() {
        let ctx = Context::with_trace_id(json!({"message": "hi", "from": "+32"}), TraceId::from_string("t-9"));
        let out = TransformRegistry::with_builtins()
            .apply("normalize", "normalize", &ctx)
            .unwrap();
        assert_eq!(out["message"], "hi");
        assert_eq!(out["from"], "+32");
        assert_eq!(out["trace_id"], "t-9");
        assert!(out["timestamp"].as_str().is_some());
    }

    #[test]
    fn test_normalize_rejects_non_object() {
        let ctx = Context::new(json!(["not", "a", "record"]));
        let err = TransformRegistry::with_builtins()
            .apply("clean", "normalize", &ctx)
            .unwrap_err();
        match &err {
            WeftError::NodeExecution { node, message } => {
                assert_eq!(node, "clean");
                assert!(message.contains("normalize"));
                assert!(message.contains("an array"));
            }
            other => panic!("expected NodeExecution, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_transform() {
        let ctx = Context::new(json!({}));
        let err = TransformRegistry::new()
            .apply("clean", "normalize", &ctx)
            .unwrap_err();
        assert!(matches!(err, WeftError::UnknownTransform(name) if name == "normalize"));
    }

    #[test]
    fn test_register_closure() {
        let mut registry = TransformRegistry::new();
        registry.register_fn("shout", |input, _ctx| {
            let text = input["message"].as_str().unwrap_or_default().to_uppercase();
            Ok(json!({ "message": text }))
        });
        assert!(registry.contains("shout"));
        assert_eq!(registry.list(), vec!["shout"]);

        let ctx = Context::new(json!({"message": "allo"}));
        assert_eq!(registry.apply("loud", "shout", &ctx).unwrap(), json!({"message": "ALLO"}));
    }
}
