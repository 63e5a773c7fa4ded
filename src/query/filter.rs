//! Filter-expression compiler and local evaluator.
//!
//! A raw filter specification is a dynamic document (`serde_json::Value`):
//! a field-to-literal map, a sequence of such maps, or an `{"__or": [...]}`
//! union. A map key may carry an operator after a single space
//! (`"published >="`); a bare key means equality. `compile` turns a raw
//! spec into an operator-explicit [`FilterNode`] tree, failing only on
//! malformed operator syntax.
//!
//! Nodes serialize to the wire as `{field: {"__operator": op, "__value":
//! literal}}` maps. [`FilterNode::Predicate`] is the one local-only variant:
//! it wraps a caller closure, can never cross the wire, and is evaluated
//! client-side against fetched rows (see `Query::prefilter_fn`).

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde_json::{json, Map, Value};

use crate::error::{JoedbError, Result};

/// Comparison operators recognized in filter keys, equality aside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    /// `!=`
    Ne,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `LIKE` - case-insensitive string equality.
    Like,
    /// `CONTAINS` - substring or sequence-element test.
    Contains,
}

impl FilterOp {
    /// The operator token as written in filter keys and on the wire.
    pub fn token(&self) -> &'static str {
        match self {
            FilterOp::Ne => "!=",
            FilterOp::Gt => ">",
            FilterOp::Ge => ">=",
            FilterOp::Lt => "<",
            FilterOp::Le => "<=",
            FilterOp::Like => "LIKE",
            FilterOp::Contains => "CONTAINS",
        }
    }
}

/// Row-level predicate supplied by the caller.
pub type PredicateFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Compiled, operator-explicit filter AST.
#[derive(Clone)]
pub enum FilterNode {
    /// Field equals literal (the bare-key default).
    Eq { field: String, value: Value },
    /// Field compared to a literal with an explicit operator.
    Cmp {
        field: String,
        op: FilterOp,
        value: Value,
    },
    /// Field matched against a regular expression (`=~`).
    Matches {
        field: String,
        pattern: String,
        regex: Regex,
    },
    /// Caller-supplied boolean test on the field value. Local-only: this
    /// node cannot be serialized and is evaluated against fetched rows.
    Predicate { field: String, test: PredicateFn },
    /// Sub-filter applied to a nested sub-document at `field`.
    Nested {
        field: String,
        inner: Box<FilterNode>,
    },
    /// All children must match.
    And(Vec<FilterNode>),
    /// At least one child must match.
    Or(Vec<FilterNode>),
}

impl fmt::Debug for FilterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterNode::Eq { field, value } => {
                f.debug_struct("Eq").field("field", field).field("value", value).finish()
            }
            FilterNode::Cmp { field, op, value } => f
                .debug_struct("Cmp")
                .field("field", field)
                .field("op", op)
                .field("value", value)
                .finish(),
            FilterNode::Matches { field, pattern, .. } => f
                .debug_struct("Matches")
                .field("field", field)
                .field("pattern", pattern)
                .finish(),
            FilterNode::Predicate { field, .. } => {
                f.debug_struct("Predicate").field("field", field).finish_non_exhaustive()
            }
            FilterNode::Nested { field, inner } => f
                .debug_struct("Nested")
                .field("field", field)
                .field("inner", inner)
                .finish(),
            FilterNode::And(children) => f.debug_tuple("And").field(children).finish(),
            FilterNode::Or(children) => f.debug_tuple("Or").field(children).finish(),
        }
    }
}

/// Key of the explicit union construct in raw specs.
const OR_KEY: &str = "__or";

/// Compile a raw filter specification into a [`FilterNode`].
///
/// Pure, no I/O. Fails only on an unrecognized operator token, a malformed
/// key, a bad `=~` pattern, or a spec that is not a map/sequence shape.
pub fn compile(spec: &Value) -> Result<FilterNode> {
    match spec {
        Value::Array(items) => {
            let mut nodes = Vec::with_capacity(items.len());
            for item in items {
                nodes.push(compile(item)?);
            }
            Ok(collapse_and(nodes))
        }
        Value::Object(map) => compile_map(map),
        other => Err(JoedbError::Filter(format!(
            "filter specification must be a map or sequence, got {}",
            type_name(other)
        ))),
    }
}

fn compile_map(map: &Map<String, Value>) -> Result<FilterNode> {
    if let Some(union) = map.get(OR_KEY) {
        if map.len() != 1 {
            return Err(JoedbError::Filter(
                "`__or` cannot be mixed with other keys in one map".to_string(),
            ));
        }
        let items = union.as_array().ok_or_else(|| {
            JoedbError::Filter("`__or` requires a sequence of filter specs".to_string())
        })?;
        let mut nodes = Vec::with_capacity(items.len());
        for item in items {
            nodes.push(compile(item)?);
        }
        return Ok(FilterNode::Or(nodes));
    }

    let mut nodes = Vec::with_capacity(map.len());
    for (key, value) in map {
        nodes.push(compile_entry(key, value)?);
    }
    Ok(collapse_and(nodes))
}

fn compile_entry(key: &str, value: &Value) -> Result<FilterNode> {
    match value {
        // A nested map or sequence recurses under a bare field name.
        Value::Object(_) | Value::Array(_) => Ok(FilterNode::Nested {
            field: key.to_string(),
            inner: Box::new(compile(value)?),
        }),
        scalar => {
            let (field, op_token) = parse_key(key)?;
            build_comparison(field, op_token, scalar.clone())
        }
    }
}

/// Split `"<field> <OP>"`; a bare key defaults to `==`.
fn parse_key(key: &str) -> Result<(String, &str)> {
    let mut parts = key.splitn(2, ' ');
    let field = parts.next().unwrap_or_default();
    if field.is_empty() {
        return Err(JoedbError::Filter(format!("malformed filter key {:?}", key)));
    }
    match parts.next() {
        None => Ok((field.to_string(), "==")),
        Some(op) if !op.is_empty() && !op.contains(' ') => Ok((field.to_string(), op)),
        Some(_) => Err(JoedbError::Filter(format!("malformed filter key {:?}", key))),
    }
}

fn build_comparison(field: String, op_token: &str, value: Value) -> Result<FilterNode> {
    let op = match op_token {
        "==" => return Ok(FilterNode::Eq { field, value }),
        "=~" => {
            let pattern = value.as_str().ok_or_else(|| {
                JoedbError::Filter("`=~` requires a string pattern".to_string())
            })?;
            let regex = Regex::new(pattern).map_err(|e| {
                JoedbError::Filter(format!("invalid regex {:?}: {}", pattern, e))
            })?;
            return Ok(FilterNode::Matches {
                field,
                pattern: pattern.to_string(),
                regex,
            });
        }
        "!=" => FilterOp::Ne,
        ">" => FilterOp::Gt,
        ">=" => FilterOp::Ge,
        "<" => FilterOp::Lt,
        "<=" => FilterOp::Le,
        "LIKE" => FilterOp::Like,
        "CONTAINS" => FilterOp::Contains,
        other => {
            return Err(JoedbError::Filter(format!(
                "unsupported filter operator `{}`",
                other
            )))
        }
    };
    Ok(FilterNode::Cmp { field, op, value })
}

fn collapse_and(mut nodes: Vec<FilterNode>) -> FilterNode {
    if nodes.len() == 1 {
        nodes.remove(0)
    } else {
        FilterNode::And(nodes)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "map",
    }
}

/// Build an explicit union spec: `or([a, b])` compiles to `Or(a, b)`.
pub fn or<I>(specs: I) -> Value
where
    I: IntoIterator<Item = Value>,
{
    json!({ OR_KEY: specs.into_iter().collect::<Vec<_>>() })
}

impl FilterNode {
    /// Append another compiled filter with implicit AND semantics.
    ///
    /// An existing AND list grows in place; any other node is promoted to a
    /// one-element list first.
    pub fn and_with(self, other: FilterNode) -> FilterNode {
        match self {
            FilterNode::And(mut children) => {
                children.push(other);
                FilterNode::And(children)
            }
            single => FilterNode::And(vec![single, other]),
        }
    }

    /// Evaluate this filter against a candidate row.
    ///
    /// A field path missing on the row never matches any comparison,
    /// including `!=`; rows lacking the nested structure are excluded.
    pub fn matches(&self, row: &Value) -> bool {
        match self {
            FilterNode::Eq { field, value } => lookup(row, field) == Some(value),
            FilterNode::Cmp { field, op, value } => match lookup(row, field) {
                Some(actual) => compare(actual, *op, value),
                None => false,
            },
            FilterNode::Matches { field, regex, .. } => lookup(row, field)
                .and_then(Value::as_str)
                .is_some_and(|s| regex.is_match(s)),
            FilterNode::Predicate { field, test } => {
                lookup(row, field).is_some_and(|v| test(v))
            }
            FilterNode::Nested { field, inner } => match lookup(row, field) {
                Some(sub @ Value::Object(_)) => inner.matches(sub),
                _ => false,
            },
            FilterNode::And(children) => children.iter().all(|c| c.matches(row)),
            FilterNode::Or(children) => children.iter().any(|c| c.matches(row)),
        }
    }

    /// Canonical wire encoding of this filter.
    ///
    /// # Errors
    ///
    /// Fails on [`FilterNode::Predicate`], which never goes on the wire.
    pub fn to_wire(&self) -> Result<Value> {
        match self {
            FilterNode::Eq { field, value } => Ok(operator_entry(field, "==", value.clone())),
            FilterNode::Cmp { field, op, value } => {
                Ok(operator_entry(field, op.token(), value.clone()))
            }
            FilterNode::Matches { field, pattern, .. } => {
                Ok(operator_entry(field, "=~", Value::String(pattern.clone())))
            }
            FilterNode::Predicate { field, .. } => Err(JoedbError::Filter(format!(
                "predicate filter on `{}` evaluates locally and cannot be serialized",
                field
            ))),
            FilterNode::Nested { field, inner } => {
                Ok(json!({ field.clone(): inner.to_wire()? }))
            }
            FilterNode::And(children) => {
                let mut wires = Vec::with_capacity(children.len());
                for child in children {
                    wires.push(child.to_wire()?);
                }
                Ok(merge_and(wires))
            }
            FilterNode::Or(children) => {
                let mut wires = Vec::with_capacity(children.len());
                for child in children {
                    wires.push(child.to_wire()?);
                }
                Ok(json!({ OR_KEY: wires }))
            }
        }
    }
}

fn operator_entry(field: &str, op: &str, value: Value) -> Value {
    json!({ field: { "__operator": op, "__value": value } })
}

/// Merge AND children into one map when keys are disjoint single-key maps,
/// otherwise keep the sequence form. Both shapes mean the same constraint
/// set on the wire.
fn merge_and(wires: Vec<Value>) -> Value {
    let mut merged = Map::new();
    for wire in &wires {
        let obj = match wire.as_object() {
            Some(o) => o,
            None => return Value::Array(wires),
        };
        for (k, v) in obj {
            if merged.contains_key(k) {
                return Value::Array(wires);
            }
            merged.insert(k.clone(), v.clone());
        }
    }
    Value::Object(merged)
}

fn lookup<'a>(row: &'a Value, field: &str) -> Option<&'a Value> {
    row.as_object().and_then(|m| m.get(field))
}

fn compare(actual: &Value, op: FilterOp, expected: &Value) -> bool {
    use std::cmp::Ordering;

    match op {
        FilterOp::Ne => actual != expected,
        FilterOp::Like => match (actual.as_str(), expected.as_str()) {
            // Unicode lowercasing, not just ASCII, so accented names fold
            // the same way on both sides.
            (Some(a), Some(b)) => a.to_lowercase() == b.to_lowercase(),
            _ => false,
        },
        FilterOp::Contains => match actual {
            Value::String(s) => expected.as_str().is_some_and(|sub| s.contains(sub)),
            Value::Array(items) => items.contains(expected),
            _ => false,
        },
        FilterOp::Gt | FilterOp::Ge | FilterOp::Lt | FilterOp::Le => {
            let ordering = match (actual, expected) {
                (Value::Number(a), Value::Number(b)) => {
                    a.as_f64().and_then(|a| b.as_f64().and_then(|b| a.partial_cmp(&b)))
                }
                (Value::String(a), Value::String(b)) => Some(a.as_str().cmp(b.as_str())),
                _ => None,
            };
            match ordering {
                Some(ord) => match op {
                    FilterOp::Gt => ord == Ordering::Greater,
                    FilterOp::Ge => ord != Ordering::Less,
                    FilterOp::Lt => ord == Ordering::Less,
                    FilterOp::Le => ord != Ordering::Greater,
                    _ => unreachable!(),
                },
                None => false,
            }
        }
    }
}
