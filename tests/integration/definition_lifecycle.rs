#![allow(missing_docs)]

use calcfield::{
    active_fields, Compiler, CompilerConfig, DefinitionError, DerivedFieldDefinition,
    DerivedFieldKind, FieldStatus, InMemoryCatalog, ModelGraphSignature,
};
use calcfield::expr::{Limits, DEFAULT_MAX_DEPTH, MAX_DEPTH_CEILING};
use serde_json::{json, Value};

fn revenue_after_commission() -> Value {
    json!({
        "type": "function",
        "name": "round",
        "args": [{
            "type": "binary",
            "operator": "-",
            "left": {"type": "column", "modelId": "bookings", "fieldId": "price_gross"},
            "right": {
                "type": "binary",
                "operator": "*",
                "left": {"type": "column", "modelId": "bookings", "fieldId": "price_gross"},
                "right": {"type": "column", "modelId": "channels", "fieldId": "commission_rate"}
            }
        }]
    })
}

fn live_catalog() -> InMemoryCatalog {
    InMemoryCatalog::new()
        .with_model("bookings", ["id", "price_gross", "nights"])
        .with_model("channels", ["id", "name", "commission_rate"])
        .with_model("rooms", ["id", "rate"])
}

#[test]
fn template_save_flow() {
    let mut definition = DerivedFieldDefinition::new(
        "net_revenue",
        "Net revenue",
        revenue_after_commission(),
        DerivedFieldKind::Row,
    )
    .expect("valid definition");
    assert_eq!(
        definition.ast().to_string(),
        "round(bookings.price_gross - bookings.price_gross * channels.commission_rate)"
    );
    assert_eq!(definition.dependencies().fields_for("bookings"), ["price_gross"]);
    assert!(definition.dependencies().requires_join());

    let report = definition.refresh_status(&live_catalog());
    assert_eq!(report.status, FieldStatus::Active);
    definition.set_compiled_sql_hash("9f2c");
    assert_eq!(definition.compiled_sql_hash(), Some("9f2c"));
}

#[test]
fn schema_drift_excludes_field_until_restored() {
    let mut definition = DerivedFieldDefinition::new(
        "net_revenue",
        "Net revenue",
        revenue_after_commission(),
        DerivedFieldKind::Row,
    )
    .expect("valid definition");
    let mut catalog = live_catalog();

    catalog.remove_model("channels");
    let report = definition.refresh_status(&catalog);
    assert!(report.is_stale());
    assert_eq!(report.missing_models, ["channels"]);
    assert_ne!(report.observed_signature, report.expected_signature);
    assert!(active_fields([&definition]).next().is_none());

    catalog.add_model("channels", ["commission_rate"]);
    let report = definition.refresh_status(&catalog);
    assert!(!report.is_stale());
    assert_eq!(active_fields([&definition]).count(), 1);
}

#[test]
fn edits_are_all_or_nothing() {
    let mut definition = DerivedFieldDefinition::new(
        "net_revenue",
        "Net revenue",
        revenue_after_commission(),
        DerivedFieldKind::Row,
    )
    .expect("valid definition");
    let signature = definition.model_graph_signature();

    let err = definition
        .set_expression(json!({"type": "function", "name": "exec", "args": []}))
        .expect_err("rejected");
    assert_eq!(err.code(), "UnknownFunction");
    assert_eq!(definition.model_graph_signature(), signature);
    assert_eq!(definition.expression(), &revenue_after_commission());

    definition
        .set_expression(json!({
            "type": "binary",
            "operator": "*",
            "left": {"type": "column", "modelId": "rooms", "fieldId": "rate"},
            "right": {"type": "column", "modelId": "bookings", "fieldId": "nights"}
        }))
        .expect("valid edit");
    assert_ne!(definition.model_graph_signature(), signature);
    assert_eq!(
        definition.model_graph_signature(),
        ModelGraphSignature::of(definition.dependencies())
    );
    assert_eq!(definition.dependencies().referenced_models(), ["bookings", "rooms"]);
}

#[test]
fn compiler_limits_apply_to_definitions() {
    let compiler = Compiler::new(CompilerConfig {
        limits: Limits {
            max_depth: 2,
            max_nodes: 100,
        },
    });
    let err = DerivedFieldDefinition::compile_with(
        &compiler,
        "net_revenue",
        "Net revenue",
        revenue_after_commission(),
        DerivedFieldKind::Aggregate,
    )
    .expect_err("too deep");
    assert_eq!(err.code(), "ExpressionTooDeep");

    let err = DerivedFieldDefinition::new("x", "", json!(null), DerivedFieldKind::Row)
        .expect_err("blank name");
    assert_eq!(err, DefinitionError::EmptyName);
}

#[test]
fn persisted_definition_reloads_with_status() {
    let mut definition = DerivedFieldDefinition::new(
        "net_revenue",
        "Net revenue",
        Value::String(revenue_after_commission().to_string()),
        DerivedFieldKind::Row,
    )
    .expect("valid definition");
    definition.refresh_status(&InMemoryCatalog::new());
    assert_eq!(definition.status(), FieldStatus::Stale);

    let stored = serde_json::to_string(&definition).expect("serialize");
    let reloaded: DerivedFieldDefinition = serde_json::from_str(&stored).expect("deserialize");
    assert_eq!(reloaded, definition);
    assert!(!reloaded.is_compilable());
}

fn unary(argument: Value) -> Value {
    json!({"type": "unary", "operator": "-", "argument": argument})
}

fn abs(argument: Value) -> Value {
    json!({"type": "function", "name": "abs", "args": [argument]})
}

#[test]
fn formula_at_default_depth_saves_and_reloads() {
    // column + unary is two levels; every call adds two more
    let mut raw = unary(json!({"type": "column", "modelId": "bookings", "fieldId": "price_gross"}));
    for _ in 0..(DEFAULT_MAX_DEPTH - 2) / 2 {
        raw = abs(raw);
    }
    let definition = DerivedFieldDefinition::new("deep", "Deep", raw.clone(), DerivedFieldKind::Row)
        .expect("at the default budget");
    assert_eq!(definition.ast().depth(), DEFAULT_MAX_DEPTH);

    let stored = serde_json::to_string(&definition).expect("serialize");
    let reloaded: DerivedFieldDefinition = serde_json::from_str(&stored).expect("deserialize");
    assert_eq!(reloaded, definition);
    let template = serde_json::to_string(&json!({"fields": [definition]})).expect("serialize");
    let template: Value = serde_json::from_str(&template).expect("template parses");
    let from_template: DerivedFieldDefinition =
        serde_json::from_value(template["fields"][0].clone()).expect("deserialize");
    assert_eq!(from_template, reloaded);

    let err = DerivedFieldDefinition::new("deep", "Deep", unary(raw), DerivedFieldKind::Row)
        .expect_err("one level over");
    assert_eq!(err.code(), "ExpressionTooDeep");
}

#[test]
fn widest_depth_budget_still_reloads() {
    let compiler = Compiler::new(CompilerConfig {
        limits: Limits {
            max_depth: 400,
            max_nodes: 10_000,
        },
    });
    assert_eq!(compiler.config().limits.max_depth, MAX_DEPTH_CEILING);

    let mut raw = json!({"type": "literal", "value": 1, "valueType": "number"});
    for _ in 1..MAX_DEPTH_CEILING {
        raw = unary(raw);
    }
    let definition = DerivedFieldDefinition::compile_with(
        &compiler,
        "deep",
        "Deep",
        raw.clone(),
        DerivedFieldKind::Row,
    )
    .expect("at the ceiling");
    assert_eq!(definition.ast().depth(), MAX_DEPTH_CEILING);

    let as_value = serde_json::to_value(&definition).expect("serialize");
    let from_value: DerivedFieldDefinition =
        serde_json::from_value(as_value).expect("deserialize value");
    assert_eq!(from_value, definition);
    let stored = serde_json::to_string(&definition).expect("serialize");
    let from_text: DerivedFieldDefinition = serde_json::from_str(&stored).expect("deserialize text");
    assert_eq!(from_text, definition);

    let err = DerivedFieldDefinition::compile_with(
        &compiler,
        "deep",
        "Deep",
        unary(raw),
        DerivedFieldKind::Row,
    )
    .expect_err("past the ceiling");
    assert_eq!(err.code(), "ExpressionTooDeep");
}
