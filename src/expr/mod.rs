#![forbid(unsafe_code)]

//! Derived-field formula engine.
//!
//! Formulas arrive as untrusted JSON trees. They are normalized into a typed
//! AST, scanned for the reporting models and fields they touch, and
//! summarized by a signature that downstream caches and the staleness gate
//! key on.

/// Typed formula tree.
///
/// Column references, literals, arithmetic, sign changes and built-in calls,
/// with infix rendering and the authored JSON shape on serialization.
pub mod ast;

/// Compilation entry points.
///
/// Runs normalization and dependency extraction as a single all-or-nothing
/// step.
pub mod compile;

/// Referenced models, fields and join pairs.
pub mod deps;

/// Rejection types shared by every formula stage.
pub mod errors;

/// Validation of raw JSON payloads.
///
/// Enforces the closed grammar plus depth and node budgets.
pub mod normalize;

/// Digest over the referenced schema surface.
pub mod signature;

pub use ast::{
    BinaryOperator, ColumnRef, ExpressionNode, FunctionName, Literal, LiteralType, UnaryOperator,
};
pub use compile::{compile, compile_str, CompileResult, CompiledExpression, Compiler, CompilerConfig};
pub use deps::{extract, DependencyMetadata, JoinDependency};
pub use errors::{ErrorKind, ErrorReport, ExpressionError, ExpressionErrorWithCode};
pub use normalize::{
    normalize, normalize_with, Limits, DEFAULT_MAX_DEPTH, DEFAULT_MAX_NODES, MAX_DEPTH_CEILING,
};
pub use signature::{ModelGraphSignature, SignatureParseError};
