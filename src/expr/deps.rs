//! Dependency extraction over validated formulas.
//!
//! The extractor reports which reporting models and fields a formula touches
//! and which model pairs must be mutually reachable in the query plan. Every
//! collection is sorted so the metadata hashes and diffs deterministically.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::catalog::SchemaCatalog;
use crate::expr::ast::{ColumnRef, ExpressionNode};

/// Unordered pair of models that must be joined; stored with `left < right`.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
pub struct JoinDependency(String, String);

impl JoinDependency {
    /// Builds a pair, ordering the two model ids.
    pub fn new(a: impl Into<String>, b: impl Into<String>) -> Self {
        let (a, b) = (a.into(), b.into());
        if a <= b {
            JoinDependency(a, b)
        } else {
            JoinDependency(b, a)
        }
    }

    /// Lexicographically smaller model id.
    pub fn left(&self) -> &str {
        &self.0
    }

    /// Lexicographically larger model id.
    pub fn right(&self) -> &str {
        &self.1
    }

    /// Whether `model` is one side of the pair.
    pub fn contains(&self, model: &str) -> bool {
        self.0 == model || self.1 == model
    }
}

impl fmt::Display for JoinDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {}", self.0, self.1)
    }
}

/// Models, fields and join pairs referenced by a formula.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "DependencyRecord")]
pub struct DependencyMetadata {
    referenced_models: Vec<String>,
    referenced_fields: BTreeMap<String, Vec<String>>,
    join_dependencies: Vec<JoinDependency>,
}

impl DependencyMetadata {
    /// Builds metadata from column references; duplicates collapse.
    pub fn from_columns<'a, I>(columns: I) -> Self
    where
        I: IntoIterator<Item = &'a ColumnRef>,
    {
        let mut collector = DependencyCollector::default();
        for column in columns {
            collector.record(&column.model_id, &column.field_id);
        }
        collector.finish()
    }

    /// Sorted, de-duplicated model ids.
    pub fn referenced_models(&self) -> &[String] {
        &self.referenced_models
    }

    /// Sorted field ids per model, keyed by model id.
    pub fn referenced_fields(&self) -> &BTreeMap<String, Vec<String>> {
        &self.referenced_fields
    }

    /// Complete pairwise join graph over the referenced models.
    pub fn join_dependencies(&self) -> &[JoinDependency] {
        &self.join_dependencies
    }

    /// Fields referenced on `model`, empty when the model is not referenced.
    pub fn fields_for(&self, model: &str) -> &[String] {
        self.referenced_fields
            .get(model)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of distinct models.
    pub fn model_count(&self) -> usize {
        self.referenced_models.len()
    }

    /// True when evaluating the formula needs at least one join.
    pub fn requires_join(&self) -> bool {
        !self.join_dependencies.is_empty()
    }

    /// True when the formula references no model at all.
    pub fn is_constant(&self) -> bool {
        self.referenced_models.is_empty()
    }

    /// Iterates referenced columns in sorted order.
    pub fn columns(&self) -> impl Iterator<Item = ColumnRef> + '_ {
        self.referenced_fields.iter().flat_map(|(model, fields)| {
            fields
                .iter()
                .map(move |field| ColumnRef::new(model.as_str(), field.as_str()))
        })
    }

    /// Keeps only the models and fields `catalog` still exposes.
    pub fn project_onto(&self, catalog: &dyn SchemaCatalog) -> DependencyMetadata {
        let mut collector = DependencyCollector::default();
        for (model, fields) in &self.referenced_fields {
            if !catalog.has_model(model) {
                continue;
            }
            for field in fields {
                if catalog.has_field(model, field) {
                    collector.record(model, field);
                }
            }
        }
        collector.finish()
    }
}

/// Persisted form; only the field map is authoritative, the rest is rebuilt.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DependencyRecord {
    #[serde(default)]
    referenced_fields: BTreeMap<String, Vec<String>>,
}

impl From<DependencyRecord> for DependencyMetadata {
    fn from(record: DependencyRecord) -> Self {
        let mut collector = DependencyCollector::default();
        for (model, fields) in &record.referenced_fields {
            for field in fields {
                collector.record(model, field);
            }
        }
        collector.finish()
    }
}

#[derive(Default)]
struct DependencyCollector {
    fields: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyCollector {
    fn record(&mut self, model: &str, field: &str) {
        match self.fields.get_mut(model) {
            Some(set) => {
                if !set.contains(field) {
                    set.insert(field.to_owned());
                }
            }
            None => {
                self.fields
                    .insert(model.to_owned(), BTreeSet::from([field.to_owned()]));
            }
        }
    }

    fn finish(self) -> DependencyMetadata {
        let referenced_models: Vec<String> = self.fields.keys().cloned().collect();
        let referenced_fields = self
            .fields
            .into_iter()
            .map(|(model, fields)| (model, fields.into_iter().collect()))
            .collect();
        let join_dependencies = complete_join_graph(&referenced_models);
        DependencyMetadata {
            referenced_models,
            referenced_fields,
            join_dependencies,
        }
    }
}

/// Every unordered pair from a sorted, de-duplicated model list.
fn complete_join_graph(models: &[String]) -> Vec<JoinDependency> {
    let n = models.len();
    let mut pairs = Vec::with_capacity(n * n.saturating_sub(1) / 2);
    for (idx, left) in models.iter().enumerate() {
        for right in &models[idx + 1..] {
            pairs.push(JoinDependency(left.clone(), right.clone()));
        }
    }
    pairs
}

/// Computes dependency metadata for a validated formula. Never fails.
pub fn extract(ast: &ExpressionNode) -> DependencyMetadata {
    let mut collector = DependencyCollector::default();
    ast.walk(&mut |node| {
        if let ExpressionNode::Column(column) = node {
            collector.record(&column.model_id, &column.field_id);
        }
    });
    collector.finish()
}
