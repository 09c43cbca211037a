//! Schema catalog lookups used to detect drift of derived fields.
//!
//! The live reporting catalog is owned elsewhere; this module only defines
//! the narrow questions the staleness gate needs answered and an in-memory
//! implementation for tests and offline tooling.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::expr::ast::ColumnRef;
use crate::expr::deps::DependencyMetadata;
use crate::expr::signature::ModelGraphSignature;

/// Answers existence questions about the live reporting schema.
pub trait SchemaCatalog {
    /// Whether the model is currently defined.
    fn has_model(&self, model: &str) -> bool;
    /// Whether the field is currently defined on the model.
    fn has_field(&self, model: &str, field: &str) -> bool;
}

/// Simple in-memory catalog used for tests or prototyping.
///
/// Deserializes from `{"models": {"bookings": ["id", "price_gross"]}}`.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InMemoryCatalog {
    #[serde(default)]
    models: BTreeMap<String, BTreeSet<String>>,
}

impl InMemoryCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a model and its fields, merging with any existing entry.
    pub fn with_model<I, S>(mut self, model: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_model(model, fields);
        self
    }

    /// In-place variant of [`InMemoryCatalog::with_model`].
    pub fn add_model<I, S>(&mut self, model: impl Into<String>, fields: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.models
            .entry(model.into())
            .or_default()
            .extend(fields.into_iter().map(Into::into));
    }

    /// Drops a model; returns whether it existed.
    pub fn remove_model(&mut self, model: &str) -> bool {
        self.models.remove(model).is_some()
    }

    /// Drops a single field; returns whether it existed.
    pub fn remove_field(&mut self, model: &str, field: &str) -> bool {
        self.models
            .get_mut(model)
            .map(|fields| fields.remove(field))
            .unwrap_or(false)
    }

    /// Registered model ids in sorted order.
    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }
}

impl SchemaCatalog for InMemoryCatalog {
    fn has_model(&self, model: &str) -> bool {
        self.models.contains_key(model)
    }

    fn has_field(&self, model: &str, field: &str) -> bool {
        self.models
            .get(model)
            .map(|fields| fields.contains(field))
            .unwrap_or(false)
    }
}

/// Lifecycle status of a derived field.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldStatus {
    /// Every referenced model and field exists; eligible for query compilation.
    #[default]
    Active,
    /// Part of the referenced schema surface disappeared.
    Stale,
}

impl FieldStatus {
    /// Lowercase label.
    pub const fn as_str(self) -> &'static str {
        match self {
            FieldStatus::Active => "active",
            FieldStatus::Stale => "stale",
        }
    }
}

impl std::fmt::Display for FieldStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of comparing stored dependency metadata with the live catalog.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StalenessReport {
    /// Resulting status.
    pub status: FieldStatus,
    /// Signature persisted with the derived field.
    pub expected_signature: ModelGraphSignature,
    /// Signature of the referenced surface still present in the catalog.
    pub observed_signature: ModelGraphSignature,
    /// Referenced models absent from the catalog.
    pub missing_models: Vec<String>,
    /// Referenced fields absent from models that still exist.
    pub missing_fields: Vec<ColumnRef>,
}

impl StalenessReport {
    /// Shorthand for `status == Stale`.
    pub fn is_stale(&self) -> bool {
        self.status == FieldStatus::Stale
    }
}

/// Projects `metadata` onto `catalog` and compares signatures.
///
/// The field is active only when the projected signature equals `expected`;
/// a stored signature computed from other metadata is therefore also stale.
pub fn check_staleness(
    metadata: &DependencyMetadata,
    expected: ModelGraphSignature,
    catalog: &dyn SchemaCatalog,
) -> StalenessReport {
    let observed = ModelGraphSignature::of(&metadata.project_onto(catalog));
    let mut missing_models = Vec::new();
    let mut missing_fields = Vec::new();
    for (model, fields) in metadata.referenced_fields() {
        if !catalog.has_model(model) {
            missing_models.push(model.clone());
            continue;
        }
        missing_fields.extend(
            fields
                .iter()
                .filter(|field| !catalog.has_field(model, field))
                .map(|field| ColumnRef::new(model.as_str(), field.as_str())),
        );
    }
    let status = if observed == expected {
        FieldStatus::Active
    } else {
        FieldStatus::Stale
    };
    StalenessReport {
        status,
        expected_signature: expected,
        observed_signature: observed,
        missing_models,
        missing_fields,
    }
}
