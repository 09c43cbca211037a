//! Derived field expression engine for the reporting platform.
//!
//! Report authors define computed fields as JSON formula trees. This crate
//! validates those trees, extracts the models and fields they depend on, and
//! tracks whether the schema they reference still exists.

#![warn(missing_docs)]

pub mod catalog;
pub mod definition;
pub mod expr;

pub use catalog::{check_staleness, FieldStatus, InMemoryCatalog, SchemaCatalog, StalenessReport};
pub use definition::{
    active_fields, DefinitionError, DerivedFieldDefinition, DerivedFieldKind, FieldScope,
};
pub use expr::{
    compile, compile_str, CompiledExpression, Compiler, CompilerConfig, DependencyMetadata,
    ExpressionError, ExpressionNode, ModelGraphSignature,
};
