#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::expr::ast::LiteralType;

/// Coarse classification of a rejected formula.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed tree: wrong shape, missing or empty members, unknown node type.
    Structural,
    /// Binary or unary operator outside the whitelist.
    UnknownOperator,
    /// Function name outside the whitelist.
    UnknownFunction,
    /// Literal `valueType` disagrees with its value.
    TypeMismatch,
    /// Depth or node budget exceeded.
    LimitExceeded,
}

impl ErrorKind {
    /// Stable lowercase label.
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Structural => "structural",
            ErrorKind::UnknownOperator => "unknown_operator",
            ErrorKind::UnknownFunction => "unknown_function",
            ErrorKind::TypeMismatch => "type_mismatch",
            ErrorKind::LimitExceeded => "limit_exceeded",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured rejection produced while compiling a formula.
///
/// `path` locates the offending node using JSON-path notation rooted at `$`
/// (for example `$.left.args[1]`). A rejection is always total: no partial
/// tree accompanies it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExpressionError {
    /// Formula text was not valid JSON.
    #[error("expression is not valid JSON (line {line}, column {column}): {message}")]
    InvalidJson {
        line: usize,
        column: usize,
        message: String,
    },
    /// A node was not a JSON object.
    #[error("{path}: expected an expression object, found {found}")]
    NotAnObject { path: String, found: &'static str },
    /// Node omitted its `type` discriminant or left it blank.
    #[error("{path}: expression node is missing its 'type'")]
    MissingType { path: String },
    /// Node `type` is not one of the known node kinds.
    #[error("{path}: unknown expression type {found}")]
    UnknownNodeType { path: String, found: String },
    /// A required member was absent or had the wrong JSON type.
    #[error("{path}: missing {expected} member '{field}'")]
    MissingField {
        path: String,
        field: &'static str,
        expected: &'static str,
    },
    /// `modelId` / `fieldId` was blank after trimming.
    #[error("{path}: '{field}' cannot be empty")]
    EmptyIdentifier { path: String, field: &'static str },
    /// Function `args` was not an array.
    #[error("{path}: function 'args' must be an array, found {found}")]
    ArgsNotArray { path: String, found: &'static str },
    /// Binary operator outside `+ - * /`.
    #[error("{path}: binary operator {operator} is not allowed")]
    UnknownBinaryOperator { path: String, operator: String },
    /// Unary operator outside `+ -`.
    #[error("{path}: unary operator {operator} is not allowed")]
    UnknownUnaryOperator { path: String, operator: String },
    /// Function name not on the allow-list.
    #[error("{path}: function {name} is not allowed")]
    UnknownFunction { path: String, name: String },
    /// `valueType` is not `number`, `string` or `boolean`.
    #[error("{path}: literal valueType {found} is not supported")]
    UnknownValueType { path: String, found: String },
    /// Literal value does not match its declared `valueType`.
    #[error("{path}: literal declared as {expected} but value is {found}")]
    LiteralTypeMismatch {
        path: String,
        expected: LiteralType,
        found: &'static str,
    },
    /// Nesting exceeds the configured depth.
    #[error("{path}: expression exceeds maximum depth {max}")]
    TooDeep { path: String, max: usize },
    /// Tree exceeds the configured node budget.
    #[error("{path}: expression exceeds {max} nodes")]
    TooManyNodes { path: String, max: usize },
}

impl ExpressionError {
    /// Conceptual category of the rejection.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExpressionError::InvalidJson { .. }
            | ExpressionError::NotAnObject { .. }
            | ExpressionError::MissingType { .. }
            | ExpressionError::UnknownNodeType { .. }
            | ExpressionError::MissingField { .. }
            | ExpressionError::EmptyIdentifier { .. }
            | ExpressionError::ArgsNotArray { .. } => ErrorKind::Structural,
            ExpressionError::UnknownBinaryOperator { .. }
            | ExpressionError::UnknownUnaryOperator { .. } => ErrorKind::UnknownOperator,
            ExpressionError::UnknownFunction { .. } => ErrorKind::UnknownFunction,
            ExpressionError::UnknownValueType { .. }
            | ExpressionError::LiteralTypeMismatch { .. } => ErrorKind::TypeMismatch,
            ExpressionError::TooDeep { .. } | ExpressionError::TooManyNodes { .. } => {
                ErrorKind::LimitExceeded
            }
        }
    }

    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            ExpressionError::InvalidJson { .. } => "InvalidJson",
            ExpressionError::NotAnObject { .. } => "NotAnObject",
            ExpressionError::MissingType { .. } => "MissingType",
            ExpressionError::UnknownNodeType { .. } => "UnknownNodeType",
            ExpressionError::MissingField { .. } => "MissingField",
            ExpressionError::EmptyIdentifier { .. } => "EmptyIdentifier",
            ExpressionError::ArgsNotArray { .. } => "ArgsNotArray",
            ExpressionError::UnknownBinaryOperator { .. } => "UnknownOperator",
            ExpressionError::UnknownUnaryOperator { .. } => "UnknownOperator",
            ExpressionError::UnknownFunction { .. } => "UnknownFunction",
            ExpressionError::UnknownValueType { .. } => "TypeMismatch",
            ExpressionError::LiteralTypeMismatch { .. } => "TypeMismatch",
            ExpressionError::TooDeep { .. } => "ExpressionTooDeep",
            ExpressionError::TooManyNodes { .. } => "ExpressionTooLarge",
        }
    }

    /// Location of the offending node, `$` for the root. Text-level JSON
    /// errors have no node location and report `$`.
    pub fn path(&self) -> &str {
        match self {
            ExpressionError::InvalidJson { .. } => "$",
            ExpressionError::NotAnObject { path, .. }
            | ExpressionError::MissingType { path }
            | ExpressionError::UnknownNodeType { path, .. }
            | ExpressionError::MissingField { path, .. }
            | ExpressionError::EmptyIdentifier { path, .. }
            | ExpressionError::ArgsNotArray { path, .. }
            | ExpressionError::UnknownBinaryOperator { path, .. }
            | ExpressionError::UnknownUnaryOperator { path, .. }
            | ExpressionError::UnknownFunction { path, .. }
            | ExpressionError::UnknownValueType { path, .. }
            | ExpressionError::LiteralTypeMismatch { path, .. }
            | ExpressionError::TooDeep { path, .. }
            | ExpressionError::TooManyNodes { path, .. } => path,
        }
    }

    /// Serializable summary for API responses.
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            code: self.code(),
            path: self.path().to_owned(),
            message: self.to_string(),
        }
    }
}

impl From<serde_json::Error> for ExpressionError {
    fn from(err: serde_json::Error) -> Self {
        ExpressionError::InvalidJson {
            line: err.line(),
            column: err.column(),
            message: err.to_string(),
        }
    }
}

/// JSON-friendly view of an [`ExpressionError`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ErrorReport {
    /// Conceptual category.
    pub kind: ErrorKind,
    /// Machine-readable code.
    pub code: &'static str,
    /// Location of the offending node.
    pub path: String,
    /// Human-readable message.
    pub message: String,
}

/// Convenience wrapper that formats expression errors with their codes.
pub struct ExpressionErrorWithCode<'a>(pub &'a ExpressionError);

impl fmt::Display for ExpressionErrorWithCode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.0.code(), self.0)
    }
}
