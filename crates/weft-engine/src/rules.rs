use std::cmp::Ordering;
use std::str::FromStr;

use pest::iterators::{Pair, Pairs};
use pest::Parser;
use pest_derive::Parser;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use weft_core::error::{Result, WeftError};

use crate::context::{Context, Path};

/// A routing predicate evaluated against the context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    Literal { value: Value },
    FieldPath { path: Path },
    Equals { left: Box<Predicate>, right: Box<Predicate> },
    NotEquals { left: Box<Predicate>, right: Box<Predicate> },
    GreaterThan { left: Box<Predicate>, right: Box<Predicate> },
    GreaterOrEqual { left: Box<Predicate>, right: Box<Predicate> },
    LessThan { left: Box<Predicate>, right: Box<Predicate> },
    LessOrEqual { left: Box<Predicate>, right: Box<Predicate> },
    /// Substring for strings, membership for arrays, key presence for objects.
    Contains { left: Box<Predicate>, right: Box<Predicate> },
    And { all: Vec<Predicate> },
    Or { any: Vec<Predicate> },
    Not { expr: Box<Predicate> },
}

impl Predicate {
    pub fn always() -> Self {
        Self::Literal { value: Value::Bool(true) }
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal { value: value.into() }
    }

    pub fn field(path: &str) -> Self {
        Self::FieldPath { path: Path::parse(path) }
    }

    pub fn equals(left: Predicate, right: Predicate) -> Self {
        Self::Equals {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Parse the textual rule syntax, e.g. `analysis.is_urgent == true`.
    pub fn parse(src: &str) -> Result<Self> {
        parse_text(src)
    }

    /// Evaluate to a value.
    pub fn evaluate(&self, ctx: &Context) -> Result<Value> {
        match self {
            Self::Literal { value } => Ok(value.clone()),
            Self::FieldPath { path } => resolve(path, ctx),
            Self::Equals { left, right } => {
                Ok(Value::Bool(loose_eq(&left.evaluate(ctx)?, &right.evaluate(ctx)?)))
            }
            Self::NotEquals { left, right } => {
                Ok(Value::Bool(!loose_eq(&left.evaluate(ctx)?, &right.evaluate(ctx)?)))
            }
            Self::GreaterThan { left, right } => compare(left, right, ctx, |o| o == Ordering::Greater),
            Self::GreaterOrEqual { left, right } => compare(left, right, ctx, |o| o != Ordering::Less),
            Self::LessThan { left, right } => compare(left, right, ctx, |o| o == Ordering::Less),
            Self::LessOrEqual { left, right } => compare(left, right, ctx, |o| o != Ordering::Greater),
            Self::Contains { left, right } => {
                contains(&left.evaluate(ctx)?, &right.evaluate(ctx)?).map(Value::Bool)
            }
            Self::And { all } => {
                for p in all {
                    if !p.test(ctx)? {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            Self::Or { any } => {
                for p in any {
                    if p.test(ctx)? {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            Self::Not { expr } => Ok(Value::Bool(!expr.test(ctx)?)),
        }
    }

    /// Evaluate and coerce to a boolean.
    pub fn test(&self, ctx: &Context) -> Result<bool> {
        self.evaluate(ctx).map(|v| is_truthy(&v))
    }
}

impl FromStr for Predicate {
    type Err = WeftError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Falsy: null, false, 0, NaN, and the empty string. Everything else is truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// A missing final segment is null. A missing or null parent is an error,
/// so `analysis.is_urgent` fails when no `analysis` result exists.
fn resolve(path: &Path, ctx: &Context) -> Result<Value> {
    if path.has_empty_segment() {
        return Err(WeftError::RuleEvaluation(format!("invalid path '{}'", path)));
    }
    if let Some(parent) = path.parent() {
        match ctx.lookup(&parent) {
            None | Some(Value::Null) => {
                return Err(WeftError::RuleEvaluation(format!(
                    "cannot read '{}' of undefined '{}'",
                    path.last(),
                    parent
                )))
            }
            Some(_) => {}
        }
    }
    Ok(ctx.lookup(path).unwrap_or(Value::Null))
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn compare(
    left: &Predicate,
    right: &Predicate,
    ctx: &Context,
    accept: impl Fn(Ordering) -> bool,
) -> Result<Value> {
    let (l, r) = (left.evaluate(ctx)?, right.evaluate(ctx)?);
    let ordering = match (&l, &r) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .zip(y.as_f64())
            .and_then(|(x, y)| x.partial_cmp(&y)),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => {
            return Err(WeftError::RuleEvaluation(format!(
                "cannot order {} against {}",
                l, r
            )))
        }
    };
    Ok(Value::Bool(ordering.is_some_and(accept)))
}

fn contains(haystack: &Value, needle: &Value) -> Result<bool> {
    match (haystack, needle) {
        (Value::String(h), Value::String(n)) => Ok(h.contains(n.as_str())),
        (Value::Array(items), n) => Ok(items.iter().any(|item| loose_eq(item, n))),
        (Value::Object(map), Value::String(key)) => Ok(map.contains_key(key)),
        _ => Err(WeftError::RuleEvaluation(format!(
            "{} cannot contain {}",
            haystack, needle
        ))),
    }
}

// ── Text syntax ──────────────────────────────────────────────────

/// Deepest nesting of groups and negations a text rule may use.
pub const MAX_RULE_DEPTH: usize = 64;

#[derive(Parser)]
#[grammar = "rules.pest"]
struct RuleParser;

fn parse_text(src: &str) -> Result<Predicate> {
    let depth = nesting_depth(src);
    if depth > MAX_RULE_DEPTH {
        return Err(WeftError::RuleParse(format!(
            "rule nests {} levels deep, limit is {}",
            depth, MAX_RULE_DEPTH
        )));
    }

    let mut pairs = RuleParser::parse(Rule::rule, src)
        .map_err(|e| WeftError::RuleParse(format!("'{}': {}", src, e.variant.message())))?;
    let or_expr = pairs
        .next()
        .and_then(|rule| rule.into_inner().next())
        .ok_or_else(|| WeftError::RuleParse("empty rule".into()))?;
    build_or(or_expr)
}

/// Upper bound on the parser's recursion for `src`: each open group and
/// each `!` adds a level until its operand ends.
fn nesting_depth(src: &str) -> usize {
    let mut groups: Vec<usize> = Vec::new();
    let mut depth = 0;
    let mut deepest = 0;
    let mut quote = None;
    let mut escaped = false;
    let mut chars = src.chars().peekable();

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
                depth = groups.last().copied().unwrap_or(0);
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '!' if chars.peek() != Some(&'=') => depth += 1,
            '(' => {
                depth += 1;
                groups.push(depth);
            }
            ')' => {
                groups.pop();
                depth = groups.last().copied().unwrap_or(0);
            }
            c if c.is_alphanumeric() => depth = groups.last().copied().unwrap_or(0),
            _ => {}
        }
        deepest = deepest.max(depth);
    }
    deepest
}

fn build_or(pair: Pair<'_, Rule>) -> Result<Predicate> {
    let mut terms = pair.into_inner().map(build_and).collect::<Result<Vec<_>>>()?;
    Ok(if terms.len() == 1 {
        terms.remove(0)
    } else {
        Predicate::Or { any: terms }
    })
}

fn build_and(pair: Pair<'_, Rule>) -> Result<Predicate> {
    let mut terms = pair
        .into_inner()
        .map(build_comparison)
        .collect::<Result<Vec<_>>>()?;
    Ok(if terms.len() == 1 {
        terms.remove(0)
    } else {
        Predicate::And { all: terms }
    })
}

fn build_comparison(pair: Pair<'_, Rule>) -> Result<Predicate> {
    let mut inner = pair.into_inner();
    let left = build_unary(next_pair(&mut inner)?)?;
    let Some(op) = inner.next() else {
        return Ok(left);
    };
    let right = build_unary(next_pair(&mut inner)?)?;

    let (left, right) = (Box::new(left), Box::new(right));
    Ok(match op.as_str() {
        "==" | "===" => Predicate::Equals { left, right },
        "!=" | "!==" => Predicate::NotEquals { left, right },
        ">" => Predicate::GreaterThan { left, right },
        ">=" => Predicate::GreaterOrEqual { left, right },
        "<" => Predicate::LessThan { left, right },
        "<=" => Predicate::LessOrEqual { left, right },
        "contains" => Predicate::Contains { left, right },
        other => return Err(WeftError::RuleParse(format!("unknown operator '{}'", other))),
    })
}

fn build_unary(pair: Pair<'_, Rule>) -> Result<Predicate> {
    let mut negations = 0;
    let mut operand = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::not_op => negations += 1,
            _ => operand = Some(build_primary(inner)?),
        }
    }

    let mut predicate =
        operand.ok_or_else(|| WeftError::RuleParse("expected a value".into()))?;
    for _ in 0..negations {
        predicate = Predicate::Not {
            expr: Box::new(predicate),
        };
    }
    Ok(predicate)
}

fn build_primary(pair: Pair<'_, Rule>) -> Result<Predicate> {
    match pair.as_rule() {
        Rule::or_expr => build_or(pair),
        Rule::path => Ok(Predicate::field(pair.as_str())),
        Rule::boolean => Ok(Predicate::literal(pair.as_str() == "true")),
        Rule::null => Ok(Predicate::Literal { value: Value::Null }),
        Rule::number => pair
            .as_str()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(Predicate::literal)
            .ok_or_else(|| WeftError::RuleParse(format!("invalid number '{}'", pair.as_str()))),
        Rule::string => {
            let raw = pair.into_inner().next().map(|p| p.as_str()).unwrap_or_default();
            Ok(Predicate::literal(unescape(raw)))
        }
        other => Err(WeftError::RuleParse(format!("unexpected {:?}", other))),
    }
}

fn next_pair<'a>(pairs: &mut Pairs<'a, Rule>) -> Result<Pair<'a, Rule>> {
    pairs
        .next()
        .ok_or_else(|| WeftError::RuleParse("incomplete comparison".into()))
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

// ── Route selection ──────────────────────────────────────────────

/// A rule's condition: textual syntax or a structured predicate tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    Text(String),
    Tree(Predicate),
}

impl Condition {
    /// Evaluate to a boolean. Text conditions are parsed on each call, so
    /// a malformed rule only fails the router that reaches it.
    pub fn test(&self, ctx: &Context) -> Result<bool> {
        match self {
            Self::Text(src) => Predicate::parse(src)?.test(ctx),
            Self::Tree(predicate) => predicate.test(ctx),
        }
    }
}

impl From<&str> for Condition {
    fn from(src: &str) -> Self {
        Self::Text(src.to_string())
    }
}

impl From<Predicate> for Condition {
    fn from(predicate: Predicate) -> Self {
        Self::Tree(predicate)
    }
}

/// One entry of a router's ordered rule list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRule {
    pub when: Condition,
    pub target: String,
}

impl RouteRule {
    pub fn new(when: impl Into<Condition>, target: impl Into<String>) -> Self {
        Self {
            when: when.into(),
            target: target.into(),
        }
    }
}

/// Something that went wrong while scanning a rule list. None of these
/// stop the scan.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleDiagnostic {
    Failed { rule_index: usize, error: String },
    Dangling { rule_index: usize, target: String },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RouteDecision {
    /// Target of the first truthy rule whose node exists.
    pub target: Option<String>,
    pub diagnostics: Vec<RuleDiagnostic>,
}

/// Scan rules in order and pick the first truthy one with an existing
/// target. Failing predicates count as falsy; matches on unknown targets
/// are skipped.
pub fn select_route(
    rules: &[RouteRule],
    ctx: &Context,
    target_exists: impl Fn(&str) -> bool,
) -> RouteDecision {
    let mut decision = RouteDecision::default();

    for (rule_index, rule) in rules.iter().enumerate() {
        match rule.when.test(ctx) {
            Ok(true) if target_exists(&rule.target) => {
                decision.target = Some(rule.target.clone());
                break;
            }
            Ok(true) => decision.diagnostics.push(RuleDiagnostic::Dangling {
                rule_index,
                target: rule.target.clone(),
            }),
            Ok(false) => {}
            Err(e) => decision.diagnostics.push(RuleDiagnostic::Failed {
                rule_index,
                error: e.to_string(),
            }),
        }
    }

    decision
}
