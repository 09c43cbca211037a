#![forbid(unsafe_code)]

//! Normalization of untrusted formula payloads.
//!
//! Authored formulas arrive as loosely-typed JSON trees (UI forms, API
//! payloads). [`normalize`] either turns such a tree into a fully validated
//! [`ExpressionNode`] or rejects it outright; there is no partial result and
//! no type coercion. Depth and node budgets are enforced while descending so
//! hostile payloads cannot drive unbounded recursion.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::expr::ast::{
    BinaryOperator, ColumnRef, ExpressionNode, FunctionName, Literal, LiteralType, UnaryOperator,
};
use crate::expr::errors::ExpressionError;

/// Default nesting budget in JSON levels; the root object sits at depth 1 and
/// a call's `args` array takes a level of its own.
pub const DEFAULT_MAX_DEPTH: usize = 96;
/// Hard cap on any configured depth. serde_json rejects text nested deeper
/// than 127 levels, and a stored formula must still load inside its
/// enclosing definition or template document.
pub const MAX_DEPTH_CEILING: usize = 120;
/// Default node budget for a single formula.
pub const DEFAULT_MAX_NODES: usize = 10_000;

/// Convenience alias for normalizer results.
pub type NormalizeResult<T> = std::result::Result<T, ExpressionError>;

/// Resource limits applied while normalizing.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Limits {
    /// Maximum nesting depth in JSON levels, capped at [`MAX_DEPTH_CEILING`].
    pub max_depth: usize,
    /// Maximum number of nodes.
    pub max_nodes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_nodes: DEFAULT_MAX_NODES,
        }
    }
}

impl Limits {
    /// Budgets used when loading a stored tree. Never tighter than any
    /// compile-time budget, since depth is capped at [`MAX_DEPTH_CEILING`]
    /// everywhere.
    pub const fn stored() -> Self {
        Self {
            max_depth: MAX_DEPTH_CEILING,
            max_nodes: usize::MAX,
        }
    }

    /// Copy with `max_depth` capped at [`MAX_DEPTH_CEILING`].
    pub fn clamped(self) -> Self {
        Self {
            max_depth: self.max_depth.min(MAX_DEPTH_CEILING),
            ..self
        }
    }
}

/// Normalizes a raw tree using [`Limits::default`].
pub fn normalize(raw: &Value) -> NormalizeResult<ExpressionNode> {
    normalize_with(raw, &Limits::default())
}

/// Normalizes a raw tree under explicit limits.
pub fn normalize_with(raw: &Value, limits: &Limits) -> NormalizeResult<ExpressionNode> {
    Normalizer::new(limits.clamped()).node(raw, 1)
}

#[derive(Clone, Copy, Debug)]
enum PathSegment {
    Key(&'static str),
    Index(usize),
}

struct Normalizer {
    limits: Limits,
    nodes: usize,
    path: Vec<PathSegment>,
}

impl Normalizer {
    fn new(limits: Limits) -> Self {
        Self {
            limits,
            nodes: 0,
            path: Vec::new(),
        }
    }

    fn here(&self) -> String {
        let mut out = String::from("$");
        for segment in &self.path {
            match segment {
                PathSegment::Key(key) => {
                    let _ = write!(out, ".{key}");
                }
                PathSegment::Index(idx) => {
                    let _ = write!(out, "[{idx}]");
                }
            }
        }
        out
    }

    fn node(&mut self, raw: &Value, depth: usize) -> NormalizeResult<ExpressionNode> {
        if depth > self.limits.max_depth {
            return Err(ExpressionError::TooDeep {
                path: self.here(),
                max: self.limits.max_depth,
            });
        }
        self.nodes += 1;
        if self.nodes > self.limits.max_nodes {
            return Err(ExpressionError::TooManyNodes {
                path: self.here(),
                max: self.limits.max_nodes,
            });
        }
        let Value::Object(obj) = raw else {
            return Err(ExpressionError::NotAnObject {
                path: self.here(),
                found: json_type_name(raw),
            });
        };
        let kind = match obj.get("type") {
            None => return Err(ExpressionError::MissingType { path: self.here() }),
            Some(Value::String(kind)) if kind.is_empty() => {
                return Err(ExpressionError::MissingType { path: self.here() })
            }
            Some(Value::String(kind)) => kind.as_str(),
            Some(other) => {
                return Err(ExpressionError::UnknownNodeType {
                    path: self.here(),
                    found: other.to_string(),
                })
            }
        };
        match kind {
            "column" => self.column(obj),
            "literal" => self.literal(obj),
            "binary" => self.binary(obj, depth),
            "unary" => self.unary(obj, depth),
            "function" => self.function(obj, depth),
            other => Err(ExpressionError::UnknownNodeType {
                path: self.here(),
                found: Value::from(other).to_string(),
            }),
        }
    }

    fn column(&self, obj: &Map<String, Value>) -> NormalizeResult<ExpressionNode> {
        let model_id = self.identifier(obj, "modelId")?;
        let field_id = self.identifier(obj, "fieldId")?;
        Ok(ExpressionNode::Column(ColumnRef { model_id, field_id }))
    }

    fn identifier(&self, obj: &Map<String, Value>, field: &'static str) -> NormalizeResult<String> {
        let raw = self.string_member(obj, field)?;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ExpressionError::EmptyIdentifier {
                path: self.here(),
                field,
            });
        }
        Ok(trimmed.to_owned())
    }

    fn literal(&self, obj: &Map<String, Value>) -> NormalizeResult<ExpressionNode> {
        let value_type = match obj.get("valueType") {
            Some(Value::String(raw)) => {
                LiteralType::parse(raw).ok_or_else(|| ExpressionError::UnknownValueType {
                    path: self.here(),
                    found: Value::from(raw.as_str()).to_string(),
                })?
            }
            Some(other) => {
                return Err(ExpressionError::UnknownValueType {
                    path: self.here(),
                    found: other.to_string(),
                })
            }
            None => {
                return Err(ExpressionError::MissingField {
                    path: self.here(),
                    field: "valueType",
                    expected: "string",
                })
            }
        };
        let value = obj.get("value").unwrap_or(&Value::Null);
        let literal = match (value_type, value) {
            (LiteralType::Number, Value::Number(num)) => {
                match num.as_f64().filter(|v| v.is_finite()) {
                    Some(v) => Literal::Number(v),
                    None => return Err(self.mismatch(value_type, "a non-finite number")),
                }
            }
            (LiteralType::String, Value::String(s)) => Literal::String(s.clone()),
            (LiteralType::Boolean, Value::Bool(b)) => Literal::Boolean(*b),
            (_, other) => {
                let found = if obj.contains_key("value") {
                    json_type_name(other)
                } else {
                    "missing"
                };
                return Err(self.mismatch(value_type, found));
            }
        };
        Ok(ExpressionNode::Literal(literal))
    }

    fn mismatch(&self, expected: LiteralType, found: &'static str) -> ExpressionError {
        ExpressionError::LiteralTypeMismatch {
            path: self.here(),
            expected,
            found,
        }
    }

    fn binary(&mut self, obj: &Map<String, Value>, depth: usize) -> NormalizeResult<ExpressionNode> {
        let raw = self.string_member(obj, "operator")?;
        let operator = BinaryOperator::from_symbol(raw).ok_or_else(|| {
            ExpressionError::UnknownBinaryOperator {
                path: self.here(),
                operator: Value::from(raw).to_string(),
            }
        })?;
        let left = self.child(obj, "left", depth)?;
        let right = self.child(obj, "right", depth)?;
        Ok(ExpressionNode::Binary {
            operator,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn unary(&mut self, obj: &Map<String, Value>, depth: usize) -> NormalizeResult<ExpressionNode> {
        let raw = self.string_member(obj, "operator")?;
        let operator = UnaryOperator::from_symbol(raw).ok_or_else(|| {
            ExpressionError::UnknownUnaryOperator {
                path: self.here(),
                operator: Value::from(raw).to_string(),
            }
        })?;
        let argument = self.child(obj, "argument", depth)?;
        Ok(ExpressionNode::Unary {
            operator,
            argument: Box::new(argument),
        })
    }

    fn function(
        &mut self,
        obj: &Map<String, Value>,
        depth: usize,
    ) -> NormalizeResult<ExpressionNode> {
        let raw = self.string_member(obj, "name")?;
        let name = FunctionName::lookup(raw).ok_or_else(|| ExpressionError::UnknownFunction {
            path: self.here(),
            name: Value::from(raw).to_string(),
        })?;
        let raw_args = match obj.get("args") {
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(ExpressionError::ArgsNotArray {
                    path: self.here(),
                    found: json_type_name(other),
                })
            }
            None => {
                return Err(ExpressionError::MissingField {
                    path: self.here(),
                    field: "args",
                    expected: "array",
                })
            }
        };
        self.path.push(PathSegment::Key("args"));
        // The args array is a nesting level of its own.
        if depth + 1 > self.limits.max_depth {
            return Err(ExpressionError::TooDeep {
                path: self.here(),
                max: self.limits.max_depth,
            });
        }
        let mut args = Vec::with_capacity(raw_args.len());
        for (idx, raw_arg) in raw_args.iter().enumerate() {
            self.path.push(PathSegment::Index(idx));
            args.push(self.node(raw_arg, depth + 2)?);
            self.path.pop();
        }
        self.path.pop();
        Ok(ExpressionNode::Function { name, args })
    }

    fn child(
        &mut self,
        obj: &Map<String, Value>,
        key: &'static str,
        depth: usize,
    ) -> NormalizeResult<ExpressionNode> {
        let raw = obj.get(key).ok_or_else(|| ExpressionError::MissingField {
            path: self.here(),
            field: key,
            expected: "expression",
        })?;
        self.path.push(PathSegment::Key(key));
        let node = self.node(raw, depth + 1)?;
        self.path.pop();
        Ok(node)
    }

    fn string_member<'v>(
        &self,
        obj: &'v Map<String, Value>,
        field: &'static str,
    ) -> NormalizeResult<&'v str> {
        match obj.get(field) {
            Some(Value::String(value)) => Ok(value.as_str()),
            _ => Err(ExpressionError::MissingField {
                path: self.here(),
                field,
                expected: "string",
            }),
        }
    }
}

/// JSON type label used in diagnostics.
pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
