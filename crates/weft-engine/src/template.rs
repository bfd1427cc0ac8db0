use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::Value;

use crate::context::{Context, Path};

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\{\{(.*?)\}\}").expect("placeholder pattern is valid"))
}

/// Replace every `{{path}}` placeholder with the value found in the context.
///
/// Strings are inserted as-is, objects and arrays as compact JSON, other
/// scalars in their plain form. Missing paths and null render as the empty
/// string. The context is never modified.
pub fn interpolate(template: &str, ctx: &Context) -> String {
    placeholder()
        .replace_all(template, |caps: &Captures<'_>| {
            render(ctx.lookup(&Path::parse(&caps[1])))
        })
        .into_owned()
}

/// Render a resolved value for insertion into text.
pub fn render(value: Option<Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
    }
}

/// Paths referenced by a template, in order of appearance.
pub fn placeholders(template: &str) -> Vec<Path> {
    placeholder()
        .captures_iter(template)
        .map(|caps| Path::parse(&caps[1]))
        .collect()
}
