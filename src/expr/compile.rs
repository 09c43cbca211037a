//! Single entry point that normalizes a formula and extracts its metadata.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::expr::ast::ExpressionNode;
use crate::expr::deps::{extract, DependencyMetadata, JoinDependency};
use crate::expr::errors::ExpressionError;
use crate::expr::normalize::{normalize_with, Limits, MAX_DEPTH_CEILING};
use crate::expr::signature::ModelGraphSignature;

use std::collections::BTreeMap;

/// Convenience alias for compiler results.
pub type CompileResult<T> = std::result::Result<T, ExpressionError>;

/// Compiler configuration.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompilerConfig {
    /// Depth and node budgets applied during normalization.
    pub limits: Limits,
}

/// Validated formula plus the metadata downstream consumers persist.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledExpression {
    /// Normalized tree.
    pub ast: ExpressionNode,
    /// Models, fields and join pairs; flattened when serialized.
    #[serde(flatten)]
    pub dependencies: DependencyMetadata,
}

impl CompiledExpression {
    /// Sorted model ids.
    pub fn referenced_models(&self) -> &[String] {
        self.dependencies.referenced_models()
    }

    /// Sorted field ids per model.
    pub fn referenced_fields(&self) -> &BTreeMap<String, Vec<String>> {
        self.dependencies.referenced_fields()
    }

    /// Complete join graph.
    pub fn join_dependencies(&self) -> &[JoinDependency] {
        self.dependencies.join_dependencies()
    }

    /// Model graph signature of the dependency metadata.
    pub fn signature(&self) -> ModelGraphSignature {
        ModelGraphSignature::of(&self.dependencies)
    }

    /// Splits into the tree and its metadata.
    pub fn into_parts(self) -> (ExpressionNode, DependencyMetadata) {
        (self.ast, self.dependencies)
    }
}

/// Stateless formula compiler. Cheap to clone and safe to share across threads.
#[derive(Clone, Debug, Default)]
pub struct Compiler {
    config: CompilerConfig,
}

impl Compiler {
    /// Creates a compiler with the given configuration. A depth budget above
    /// [`MAX_DEPTH_CEILING`] is lowered to it.
    pub fn new(mut config: CompilerConfig) -> Self {
        if config.limits.max_depth > MAX_DEPTH_CEILING {
            warn!(
                requested = config.limits.max_depth,
                ceiling = MAX_DEPTH_CEILING,
                "expr.compile.depth_clamped"
            );
            config.limits = config.limits.clamped();
        }
        Self { config }
    }

    /// Active configuration.
    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Normalizes `raw` and extracts its dependencies. Either everything
    /// validates or nothing is returned.
    pub fn compile(&self, raw: &Value) -> CompileResult<CompiledExpression> {
        match normalize_with(raw, &self.config.limits) {
            Ok(ast) => {
                let dependencies = extract(&ast);
                debug!(
                    models = dependencies.model_count(),
                    joins = dependencies.join_dependencies().len(),
                    nodes = ast.node_count(),
                    "expr.compile.accepted"
                );
                Ok(CompiledExpression { ast, dependencies })
            }
            Err(err) => {
                debug!(code = err.code(), path = err.path(), kind = %err.kind(), "expr.compile.rejected");
                Err(err)
            }
        }
    }

    /// Parses JSON text, then compiles it.
    pub fn compile_str(&self, text: &str) -> CompileResult<CompiledExpression> {
        let raw: Value = serde_json::from_str(text).map_err(|err| {
            let err = ExpressionError::from(err);
            debug!(code = err.code(), "expr.compile.rejected");
            err
        })?;
        self.compile(&raw)
    }

    /// Compiles an authored expression that is either a JSON tree or a JSON
    /// string holding the tree's text.
    pub fn compile_authored(&self, expression: &Value) -> CompileResult<CompiledExpression> {
        match expression {
            Value::String(text) => self.compile_str(text),
            other => self.compile(other),
        }
    }

    /// Re-validates a programmatically built tree under this compiler's
    /// limits.
    pub fn compile_ast(&self, ast: &ExpressionNode) -> CompileResult<CompiledExpression> {
        let raw = serde_json::to_value(ast)?;
        self.compile(&raw)
    }
}

/// Compiles `raw` with default limits.
pub fn compile(raw: &Value) -> CompileResult<CompiledExpression> {
    Compiler::default().compile(raw)
}

/// Compiles JSON text with default limits.
pub fn compile_str(text: &str) -> CompileResult<CompiledExpression> {
    Compiler::default().compile_str(text)
}
