// crates/weavesteps/tests/workflow_test.rs

use std::collections::HashMap;
use weavecore::{RunStatus, StepStatus, Value, WorkflowDocument, WorkflowError};
use weaveruntime::{Orchestrator, WorkflowLoader};
use weavesteps::standard_registry;

const ORDERS: &str = r#"{
    "id": "orders",
    "name": "Order totals",
    "steps": [
        { "id": "parse", "kind": "transform", "capability": "json.parse" },
        { "id": "amounts", "kind": "filter", "depends_on": ["parse"],
          "predicate": { "op": "greater_than", "path": "item", "value": 0 } },
        { "id": "total", "kind": "aggregate", "depends_on": ["amounts"],
          "capability": "math.sum", "output_var": "total" },
        { "id": "count", "kind": "call", "depends_on": ["amounts"],
          "capability": "collection.count" },
        { "id": "report", "kind": "call", "depends_on": ["total", "count"],
          "capability": { "name": "debug.log", "config": { "label": "report" } } }
    ]
}"#;

#[tokio::test]
async fn test_document_runs_end_to_end() {
    let registry = standard_registry();
    let document = WorkflowDocument::from_json(ORDERS).unwrap();
    let definition = registry.build(&document).unwrap();

    let orchestrator = Orchestrator::new();
    orchestrator.validate(&definition).unwrap();
    orchestrator.register(definition).await.unwrap();

    let result = orchestrator
        .execute("orders", Value::from("[5, -1, 10, 0]"), HashMap::new())
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.count(StepStatus::Completed), 5);

    let report = result.output.unwrap();
    assert_eq!(report.get_path("total"), Some(&Value::from(15.0)));
    assert_eq!(report.get_path("count"), Some(&Value::from(2.0)));
}

#[tokio::test]
async fn test_loop_document_increments_until_guard() {
    let document = WorkflowDocument::from_json(
        r#"{
            "id": "counter",
            "steps": [
                { "id": "start", "kind": "call",
                  "capability": { "name": "value.constant", "config": { "value": 0 } } },
                { "id": "repeat", "kind": "loop", "depends_on": ["start"],
                  "condition": { "op": "less_than", "path": "value", "value": 3 },
                  "body": { "id": "inc", "kind": "transform", "capability": "math.increment" } }
            ]
        }"#,
    )
    .unwrap();
    let definition = standard_registry().build(&document).unwrap();

    let orchestrator = Orchestrator::new();
    orchestrator.register(definition).await.unwrap();
    let result = orchestrator
        .execute("counter", Value::Null, HashMap::new())
        .await
        .unwrap();

    assert_eq!(
        result.output,
        Some(Value::Array(vec![
            Value::from(1.0),
            Value::from(2.0),
            Value::from(3.0)
        ]))
    );
}

#[tokio::test]
async fn test_unknown_capability_in_document() {
    let document = WorkflowDocument::from_json(
        r#"{ "id": "bad", "steps": [ { "id": "a", "kind": "call", "capability": "nope.nothing" } ] }"#,
    )
    .unwrap();

    let err = standard_registry().build(&document).unwrap_err();
    assert_eq!(err, WorkflowError::UnknownCapability("nope.nothing".to_string()));
}

#[tokio::test]
async fn test_loader_registers_directory() {
    let dir = std::env::temp_dir().join(format!("weave-loader-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("orders.json"), ORDERS).unwrap();
    std::fs::write(dir.join("notes.txt"), "not a workflow").unwrap();

    let orchestrator = Orchestrator::new();
    let loaded = WorkflowLoader::new(&dir)
        .load_into(&standard_registry(), &orchestrator)
        .await
        .unwrap();

    assert_eq!(loaded, vec!["orders".to_string()]);
    assert!(orchestrator.get_workflow("orders").await.is_some());

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_standard_capabilities_are_registered() {
    let registry = standard_registry();
    for name in [
        "json.parse",
        "json.stringify",
        "math.sum",
        "math.average",
        "math.increment",
        "collection.count",
        "collection.flatten",
        "value.constant",
        "vars.set",
        "time.delay",
        "debug.log",
        "http.request",
    ] {
        assert!(registry.contains(name), "{name} is not registered");
    }
    assert_eq!(registry.list_capabilities().len(), 12);
    assert_eq!(registry.get_metadata("math.sum").unwrap().category, "math");
}
