//! Derived field definitions as persisted next to a report template.
//!
//! A definition always holds a validated formula: construction and every
//! expression edit go through the compiler, and loading a persisted
//! definition recompiles its expression and checks it against the stored
//! tree. Status changes only through
//! [`DerivedFieldDefinition::refresh_status`], which the owning subsystem
//! calls whenever the reporting schema may have moved.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::catalog::{check_staleness, FieldStatus, SchemaCatalog, StalenessReport};
use crate::expr::ast::ExpressionNode;
use crate::expr::compile::{Compiler, CompilerConfig};
use crate::expr::deps::DependencyMetadata;
use crate::expr::errors::ExpressionError;
use crate::expr::normalize::Limits;
use crate::expr::signature::ModelGraphSignature;

/// Evaluation granularity of a derived field.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DerivedFieldKind {
    /// Evaluated per source row.
    #[default]
    Row,
    /// Evaluated over a grouped result.
    Aggregate,
}

/// Visibility of a derived field. Only template-scoped fields exist today.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldScope {
    /// Owned by a single report template.
    #[default]
    Template,
}

/// Errors raised while creating or editing a definition.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DefinitionError {
    /// Identifier was blank.
    #[error("derived field id must not be empty")]
    EmptyId,
    /// Display name was blank.
    #[error("derived field name must not be empty")]
    EmptyName,
    /// Formula was rejected.
    #[error(transparent)]
    Expression(#[from] ExpressionError),
    /// Persisted tree disagrees with the authored expression.
    #[error("stored ast does not match the expression")]
    AstMismatch,
}

impl DefinitionError {
    /// Machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            DefinitionError::EmptyId => "EmptyId",
            DefinitionError::EmptyName => "EmptyName",
            DefinitionError::Expression(err) => err.code(),
            DefinitionError::AstMismatch => "AstMismatch",
        }
    }
}

/// A computed field over the reporting schema.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "DefinitionRecord")]
pub struct DerivedFieldDefinition {
    id: String,
    name: String,
    expression: Value,
    kind: DerivedFieldKind,
    scope: FieldScope,
    ast: ExpressionNode,
    #[serde(flatten)]
    dependencies: DependencyMetadata,
    model_graph_signature: ModelGraphSignature,
    #[serde(skip_serializing_if = "Option::is_none")]
    compiled_sql_hash: Option<String>,
    status: FieldStatus,
}

impl DerivedFieldDefinition {
    /// Compiles `expression` with default limits and builds an active
    /// definition.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        expression: Value,
        kind: DerivedFieldKind,
    ) -> Result<Self, DefinitionError> {
        Self::compile_with(&Compiler::default(), id, name, expression, kind)
    }

    /// Like [`DerivedFieldDefinition::new`] with an explicit compiler.
    ///
    /// `expression` may be the JSON tree itself or a JSON string holding the
    /// tree's text; it is stored exactly as given.
    pub fn compile_with(
        compiler: &Compiler,
        id: impl Into<String>,
        name: impl Into<String>,
        expression: Value,
        kind: DerivedFieldKind,
    ) -> Result<Self, DefinitionError> {
        let id = id.into();
        let name = name.into();
        if id.trim().is_empty() {
            return Err(DefinitionError::EmptyId);
        }
        if name.trim().is_empty() {
            return Err(DefinitionError::EmptyName);
        }
        let (ast, dependencies) = compiler.compile_authored(&expression)?.into_parts();
        let model_graph_signature = ModelGraphSignature::of(&dependencies);
        Ok(Self {
            id,
            name,
            expression,
            kind,
            scope: FieldScope::Template,
            ast,
            dependencies,
            model_graph_signature,
            compiled_sql_hash: None,
            status: FieldStatus::Active,
        })
    }

    /// Stable identifier within the template.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Expression exactly as authored.
    pub fn expression(&self) -> &Value {
        &self.expression
    }

    /// Row or aggregate.
    pub fn kind(&self) -> DerivedFieldKind {
        self.kind
    }

    /// Visibility scope.
    pub fn scope(&self) -> FieldScope {
        self.scope
    }

    /// Validated formula.
    pub fn ast(&self) -> &ExpressionNode {
        &self.ast
    }

    /// Models, fields and join pairs the formula references.
    pub fn dependencies(&self) -> &DependencyMetadata {
        &self.dependencies
    }

    /// Signature captured when the expression was last compiled.
    pub fn model_graph_signature(&self) -> ModelGraphSignature {
        self.model_graph_signature
    }

    /// Hash of the SQL generated by the query compiler, if any.
    pub fn compiled_sql_hash(&self) -> Option<&str> {
        self.compiled_sql_hash.as_deref()
    }

    /// Current lifecycle status.
    pub fn status(&self) -> FieldStatus {
        self.status
    }

    /// True when the field may take part in query compilation.
    pub fn is_compilable(&self) -> bool {
        self.status == FieldStatus::Active
    }

    /// Renames the field.
    pub fn rename(&mut self, name: impl Into<String>) -> Result<(), DefinitionError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DefinitionError::EmptyName);
        }
        self.name = name;
        Ok(())
    }

    /// Changes the row/aggregate kind.
    pub fn set_kind(&mut self, kind: DerivedFieldKind) {
        self.kind = kind;
    }

    /// Replaces the expression, compiling it with default limits.
    pub fn set_expression(&mut self, expression: Value) -> Result<(), DefinitionError> {
        self.set_expression_with(&Compiler::default(), expression)
    }

    /// Replaces the expression using `compiler`.
    ///
    /// On rejection the definition is left untouched. On success the status
    /// returns to active and the compiled SQL hash is cleared.
    pub fn set_expression_with(
        &mut self,
        compiler: &Compiler,
        expression: Value,
    ) -> Result<(), DefinitionError> {
        let (ast, dependencies) = compiler.compile_authored(&expression)?.into_parts();
        self.model_graph_signature = ModelGraphSignature::of(&dependencies);
        self.expression = expression;
        self.ast = ast;
        self.dependencies = dependencies;
        self.compiled_sql_hash = None;
        if self.status != FieldStatus::Active {
            debug!(id = %self.id, "definition.status_reset");
        }
        self.status = FieldStatus::Active;
        Ok(())
    }

    /// Records the hash of the SQL the query compiler produced.
    pub fn set_compiled_sql_hash(&mut self, hash: impl Into<String>) {
        self.compiled_sql_hash = Some(hash.into());
    }

    /// Re-evaluates the status against `catalog` and returns the details.
    pub fn refresh_status(&mut self, catalog: &dyn SchemaCatalog) -> StalenessReport {
        let report = check_staleness(&self.dependencies, self.model_graph_signature, catalog);
        if report.status != self.status {
            info!(
                id = %self.id,
                from = %self.status,
                to = %report.status,
                missing_models = report.missing_models.len(),
                missing_fields = report.missing_fields.len(),
                "definition.status_changed"
            );
            self.status = report.status;
        }
        report
    }
}

/// Filters `definitions` down to those eligible for query compilation.
pub fn active_fields<'a, I>(definitions: I) -> impl Iterator<Item = &'a DerivedFieldDefinition>
where
    I: IntoIterator<Item = &'a DerivedFieldDefinition>,
{
    definitions
        .into_iter()
        .filter(|definition| definition.is_compilable())
}

/// Persisted shape. Dependency metadata is rebuilt from the tree on load.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DefinitionRecord {
    id: String,
    name: String,
    expression: Value,
    #[serde(default)]
    kind: DerivedFieldKind,
    #[serde(default)]
    scope: FieldScope,
    ast: ExpressionNode,
    model_graph_signature: ModelGraphSignature,
    #[serde(default)]
    compiled_sql_hash: Option<String>,
    #[serde(default)]
    status: FieldStatus,
}

impl TryFrom<DefinitionRecord> for DerivedFieldDefinition {
    type Error = DefinitionError;

    fn try_from(record: DefinitionRecord) -> Result<Self, Self::Error> {
        if record.id.trim().is_empty() {
            return Err(DefinitionError::EmptyId);
        }
        if record.name.trim().is_empty() {
            return Err(DefinitionError::EmptyName);
        }
        let loader = Compiler::new(CompilerConfig {
            limits: Limits::stored(),
        });
        let (ast, dependencies) = loader.compile_authored(&record.expression)?.into_parts();
        if ast != record.ast {
            return Err(DefinitionError::AstMismatch);
        }
        Ok(Self {
            id: record.id,
            name: record.name,
            expression: record.expression,
            kind: record.kind,
            scope: record.scope,
            ast: record.ast,
            dependencies,
            model_graph_signature: record.model_graph_signature,
            compiled_sql_hash: record.compiled_sql_hash,
            status: record.status,
        })
    }
}
