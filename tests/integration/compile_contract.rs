#![allow(missing_docs)]

use calcfield::expr::{
    compile, compile_str, normalize, CompiledExpression, Compiler, CompilerConfig,
    DependencyMetadata, ErrorKind, ExpressionError, ExpressionNode, FunctionName, JoinDependency,
    Limits, ModelGraphSignature,
};
use calcfield::{DerivedFieldDefinition, InMemoryCatalog, StalenessReport};
use serde_json::{json, Value};

fn column(model: &str, field: &str) -> Value {
    json!({"type": "column", "modelId": model, "fieldId": field})
}

fn number(value: f64) -> Value {
    json!({"type": "literal", "value": value, "valueType": "number"})
}

fn binary(operator: &str, left: Value, right: Value) -> Value {
    json!({"type": "binary", "operator": operator, "left": left, "right": right})
}

fn function(name: &str, args: Vec<Value>) -> Value {
    json!({"type": "function", "name": name, "args": args})
}

#[test]
fn literal_arithmetic_has_no_dependencies() {
    let compiled = compile(&binary("+", number(1.0), number(2.0))).expect("compiles");
    assert!(compiled.referenced_models().is_empty());
    assert!(compiled.referenced_fields().is_empty());
    assert!(compiled.join_dependencies().is_empty());
    assert_eq!(compiled.ast.to_string(), "1 + 2");
}

#[test]
fn two_models_produce_one_join() {
    let compiled = compile(&binary(
        "+",
        column("bookings", "price_gross"),
        column("channels", "name"),
    ))
    .expect("compiles");
    assert_eq!(compiled.referenced_models(), ["bookings", "channels"]);
    assert_eq!(
        compiled.join_dependencies(),
        [JoinDependency::new("bookings", "channels")]
    );
    let json = serde_json::to_value(&compiled).expect("serialize");
    assert_eq!(json["joinDependencies"], json!([["bookings", "channels"]]));
    assert_eq!(
        json["referencedFields"],
        json!({"bookings": ["price_gross"], "channels": ["name"]})
    );
}

#[test]
fn three_models_produce_complete_join_graph() {
    let compiled = compile(&function(
        "greatest",
        vec![column("C", "z"), column("A", "x"), column("B", "y")],
    ))
    .expect("compiles");
    assert_eq!(compiled.referenced_models(), ["A", "B", "C"]);
    assert_eq!(
        compiled.join_dependencies(),
        [
            JoinDependency::new("A", "B"),
            JoinDependency::new("A", "C"),
            JoinDependency::new("B", "C"),
        ]
    );
}

#[test]
fn function_names_are_normalized() {
    let compiled =
        compile(&function("ROUND", vec![column("bookings", "price_gross")])).expect("compiles");
    match &compiled.ast {
        ExpressionNode::Function { name, args } => {
            assert_eq!(*name, FunctionName::Round);
            assert_eq!(args.len(), 1);
        }
        other => panic!("expected function node, got {other:?}"),
    }
    let json = serde_json::to_value(&compiled.ast).expect("serialize");
    assert_eq!(json["name"], "round");
}

#[test]
fn unknown_function_is_rejected() {
    let err = compile(&function("exec", vec![])).expect_err("rejected");
    assert_eq!(err.kind(), ErrorKind::UnknownFunction);
    assert_eq!(err.code(), "UnknownFunction");
    assert_eq!(err.path(), "$");
}

#[test]
fn stringly_typed_number_is_rejected() {
    let err = compile(&json!({"type": "literal", "value": "12", "valueType": "number"}))
        .expect_err("rejected");
    assert_eq!(err.kind(), ErrorKind::TypeMismatch);
}

#[test]
fn duplicate_columns_collapse() {
    let compiled = compile(&binary(
        "*",
        column("bookings", "id"),
        column("bookings", "id"),
    ))
    .expect("compiles");
    assert_eq!(compiled.referenced_fields()["bookings"], ["id"]);
    assert!(compiled.join_dependencies().is_empty());
}

#[test]
fn nested_rejections_report_their_location() {
    let raw = binary(
        "+",
        column("bookings", "id"),
        function("coalesce", vec![number(1.0), json!({"type": "unary", "operator": "!", "argument": number(2.0)})]),
    );
    let err = compile(&raw).expect_err("rejected");
    assert_eq!(err.kind(), ErrorKind::UnknownOperator);
    assert_eq!(err.path(), "$.right.args[1]");
    assert_eq!(err.report().path, "$.right.args[1]");
}

#[test]
fn structural_rejections() {
    let cases = [
        json!(42),
        json!({"modelId": "a", "fieldId": "b"}),
        json!({"type": "variable", "name": "x"}),
        json!({"type": "column", "modelId": "  ", "fieldId": "b"}),
        json!({"type": "column", "modelId": "a"}),
        json!({"type": "function", "name": "abs", "args": {"0": 1}}),
        json!({"type": "binary", "operator": "+", "left": number(1.0)}),
    ];
    for raw in cases {
        let err = compile(&raw).expect_err("rejected");
        assert_eq!(err.kind(), ErrorKind::Structural, "payload {raw}");
    }
}

#[test]
fn identifiers_are_trimmed() {
    let compiled = compile(&column(" bookings ", "\tid ")).expect("compiles");
    assert_eq!(compiled.referenced_fields()["bookings"], ["id"]);
}

#[test]
fn unknown_keys_are_ignored() {
    let mut raw = column("bookings", "id");
    raw["label"] = json!("Booking id");
    assert!(compile(&raw).is_ok());
}

#[test]
fn arity_is_not_checked() {
    assert!(compile(&function("abs", vec![])).is_ok());
    assert!(compile(&function("round", vec![number(1.0), number(2.0), number(3.0)])).is_ok());
}

#[test]
fn recompiling_serialized_ast_is_idempotent() {
    let raw = function(
        " Coalesce",
        vec![
            binary("/", column("bookings", "price_gross"), number(1.2)),
            json!({"type": "unary", "operator": "-", "argument": column("channels", "fee")}),
            json!({"type": "literal", "value": "n/a", "valueType": "string"}),
            json!({"type": "literal", "value": true, "valueType": "boolean"}),
        ],
    );
    let first = compile(&raw).expect("compiles");
    let serialized = serde_json::to_value(&first.ast).expect("serialize");
    let second = compile(&serialized).expect("recompiles");
    assert_eq!(first, second);
    assert_eq!(first.signature(), second.signature());
}

#[test]
fn text_entry_point_matches_tree_entry_point() {
    let raw = binary("-", column("rooms", "rate"), number(10.0));
    let from_text = compile_str(&raw.to_string()).expect("compiles");
    assert_eq!(from_text, compile(&raw).expect("compiles"));

    let err = compile_str("not json").expect_err("rejected");
    assert_eq!(err.code(), "InvalidJson");
}

#[test]
fn persisted_ast_is_validated_on_load() {
    let ok: ExpressionNode = serde_json::from_value(column("bookings", "id")).expect("valid");
    assert_eq!(ok, ExpressionNode::column("bookings", "id"));
    assert!(serde_json::from_value::<ExpressionNode>(function("exec", vec![])).is_err());
}

#[test]
fn depth_budget_rejects_deep_payloads() {
    let mut raw = number(1.0);
    for _ in 0..40 {
        raw = json!({"type": "unary", "operator": "-", "argument": raw});
    }
    let tight = Compiler::new(CompilerConfig {
        limits: Limits {
            max_depth: 16,
            max_nodes: 10_000,
        },
    });
    let err = tight.compile(&raw).expect_err("too deep");
    assert_eq!(err.kind(), ErrorKind::LimitExceeded);
    assert_eq!(err.code(), "ExpressionTooDeep");
    assert!(compile(&raw).is_ok());
}

#[test]
fn node_budget_rejects_wide_payloads() {
    let raw = function("greatest", (0..64).map(|i| number(i as f64)).collect());
    let tight = Compiler::new(CompilerConfig {
        limits: Limits {
            max_depth: 64,
            max_nodes: 32,
        },
    });
    let err = tight.compile(&raw).expect_err("too large");
    assert_eq!(err.code(), "ExpressionTooLarge");
    assert!(compile(&raw).is_ok());
}

#[test]
fn signature_tracks_schema_surface_only() {
    let a = compile(&binary("+", column("bookings", "price"), column("channels", "fee")))
        .expect("compiles");
    let b = compile(&function(
        "least",
        vec![column("channels", "fee"), column("bookings", "price"), number(3.0)],
    ))
    .expect("compiles");
    let c = compile(&column("bookings", "price")).expect("compiles");
    assert_eq!(a.signature(), b.signature());
    assert_ne!(a.signature(), c.signature());
    let hex = a.signature().to_string();
    assert_eq!(hex.parse::<ModelGraphSignature>().expect("parse"), a.signature());
}

#[test]
fn normalize_agrees_with_compile() {
    let raw = binary("*", column("bookings", "nights"), column("rooms", "rate"));
    assert_eq!(normalize(&raw).expect("valid"), compile(&raw).expect("valid").ast);
}

fn assert_send_sync<T: Send + Sync>() {}

#[test]
fn public_types_are_thread_safe() {
    assert_send_sync::<Compiler>();
    assert_send_sync::<CompilerConfig>();
    assert_send_sync::<CompiledExpression>();
    assert_send_sync::<ExpressionNode>();
    assert_send_sync::<ExpressionError>();
    assert_send_sync::<DependencyMetadata>();
    assert_send_sync::<ModelGraphSignature>();
    assert_send_sync::<DerivedFieldDefinition>();
    assert_send_sync::<InMemoryCatalog>();
    assert_send_sync::<StalenessReport>();
}

#[test]
fn shared_compiler_works_across_threads() {
    let compiler = std::sync::Arc::new(Compiler::default());
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let compiler = std::sync::Arc::clone(&compiler);
            std::thread::spawn(move || {
                compiler
                    .compile(&column(&format!("model_{i}"), "id"))
                    .map(|compiled| compiled.referenced_models().to_vec())
            })
        })
        .collect();
    for (i, handle) in handles.into_iter().enumerate() {
        let models = handle.join().expect("thread").expect("compiles");
        assert_eq!(models, [format!("model_{i}")]);
    }
}
