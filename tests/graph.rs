//! End-to-end tests of the flow graph: build validation, incremental
//! ingestion, evaluation and output change detection on the canonical graph.

mod common;

use common::*;
use flowmill::error::BuildError;
use flowmill::flow::{FlowGraph, Value};
use serde_json::json;

fn value_of(graph: &FlowGraph, key: &str) -> Value {
    graph
        .node(key)
        .unwrap_or_else(|| panic!("node {key} exists"))
        .computed_value
        .clone()
}

#[test]
fn first_message_computes_and_marks_both_outputs_changed() {
    let mut graph = canonical_graph();

    let recompute = send_at(
        &mut graph,
        1,
        json!({ "ramusage": 1.0, "loadaverage": 0.2, "ram": 4.0 }),
    )
    .expect("ingest");
    assert!(recompute);

    graph.compute().expect("compute");

    assert_eq!(value_of(&graph, "op_ram"), Value::Float(0.25));
    assert_eq!(value_of(&graph, "op0"), Value::Bool(false));
    assert_eq!(value_of(&graph, "op1"), Value::Bool(false));
    assert_eq!(value_of(&graph, "op3"), Value::Bool(false));
    assert_eq!(value_of(&graph, "op4"), Value::Float(0.25));
    assert_eq!(value_of(&graph, "op5"), Value::Str("slow".into()));

    // First assignment: both outputs report a change.
    assert!(graph.node("output0").map(|n| n.changed).unwrap_or(false));
    assert!(graph.node("output1").map(|n| n.changed).unwrap_or(false));

    // Both outputs share a sensor id, so they bundle into one payload.
    let outputs = graph.changed_outputs();
    assert_eq!(outputs.len(), 1);
    let payload = outputs.get(OUT_SID).expect("bundled payload");
    assert_eq!(payload.get("id"), Some(&json!(OUT_SID)));
    assert_eq!(payload.get("windmill_onfire"), Some(&json!(false)));
    assert_eq!(payload.get("windmill_propeler_speed"), Some(&json!("slow")));
}

#[test]
fn rising_load_flips_the_outputs() {
    let mut graph = canonical_graph();
    send_at(
        &mut graph,
        1,
        json!({ "ramusage": 1.0, "loadaverage": 0.2, "ram": 4.0 }),
    )
    .expect("ingest");
    graph.compute().expect("compute");

    // Float arrives as a string and is parsed; load average rises past 0.8.
    let recompute = send_at(
        &mut graph,
        2,
        json!({ "ramusage": "1.0", "loadaverage": 1.0, "ram": 4.0 }),
    )
    .expect("ingest");
    assert!(recompute);
    graph.compute().expect("compute");

    assert_eq!(value_of(&graph, "op_ram"), Value::Float(0.25));
    assert_eq!(value_of(&graph, "op3"), Value::Bool(true));
    assert_eq!(value_of(&graph, "op4"), Value::Float(1.0));
    assert_eq!(value_of(&graph, "op5"), Value::Str("fast".into()));

    assert!(graph.node("output0").map(|n| n.changed).unwrap_or(false));
    assert!(graph.node("output1").map(|n| n.changed).unwrap_or(false));
}

#[test]
fn stale_and_equal_timestamps_are_rejected() {
    let mut graph = canonical_graph();
    send_at(
        &mut graph,
        1,
        json!({ "ramusage": 1.0, "loadaverage": 0.2, "ram": 4.0 }),
    )
    .expect("ingest");
    graph.compute().expect("compute");
    send_at(
        &mut graph,
        2,
        json!({ "ramusage": "1.0", "loadaverage": 1.0, "ram": 4.0 }),
    )
    .expect("ingest");
    graph.compute().expect("compute");

    let before = value_of(&graph, "op5");
    let seen = graph.node("input0").and_then(|n| n.last_changed);

    // Same timestamp, different values: strict monotonicity rejects it.
    let recompute = send_at(
        &mut graph,
        2,
        json!({ "ramusage": 3.0, "loadaverage": 0.0, "ram": 4.0 }),
    )
    .expect("ingest");
    assert!(!recompute, "must not recompute with an equal timestamp");

    // Older timestamp: same story.
    let recompute = send_at(
        &mut graph,
        1,
        json!({ "ramusage": 3.0, "loadaverage": 0.0, "ram": 4.0 }),
    )
    .expect("ingest");
    assert!(!recompute, "must not recompute with an older message");

    assert_eq!(value_of(&graph, "op5"), before);
    assert_eq!(graph.node("input0").and_then(|n| n.last_changed), seen);
}

#[test]
fn unchanged_values_do_not_emit() {
    let mut graph = canonical_graph();
    send_at(
        &mut graph,
        1,
        json!({ "ramusage": 1.0, "loadaverage": 1.0, "ram": 4.0 }),
    )
    .expect("ingest");
    graph.compute().expect("compute");
    assert_eq!(graph.changed_outputs().len(), 1);

    // Fresh timestamps, identical values: ingestion accepts, outputs don't.
    let recompute = send_at(
        &mut graph,
        2,
        json!({ "ramusage": 1.0, "loadaverage": 1.0, "ram": 4.0 }),
    )
    .expect("ingest");
    assert!(recompute);
    graph.compute().expect("compute");

    assert!(graph.node("output0").map(|n| !n.changed).unwrap_or(false));
    assert!(graph.node("output1").map(|n| !n.changed).unwrap_or(false));
    assert!(graph.changed_outputs().is_empty());
}

#[test]
fn compute_is_idempotent() {
    let mut graph = canonical_graph();
    send_at(
        &mut graph,
        1,
        json!({ "ramusage": 1.0, "loadaverage": 0.2, "ram": 4.0 }),
    )
    .expect("ingest");
    graph.compute().expect("compute");

    let snapshot: Vec<Value> = graph
        .order
        .iter()
        .map(|key| value_of(&graph, key))
        .collect();

    graph.compute().expect("compute again");

    let after: Vec<Value> = graph
        .order
        .iter()
        .map(|key| value_of(&graph, key))
        .collect();
    assert_eq!(snapshot, after);
    for node in graph.output_nodes() {
        assert!(!node.changed, "second compute must not report changes");
    }
}

#[test]
fn unknown_sensor_is_ignored_without_bumping_rev() {
    let mut graph = canonical_graph();
    let rev = graph.rev();

    let recompute = graph
        .send_input(
            AID,
            "00000000-0000-0000-0000-000000000000",
            chrono::DateTime::from_timestamp(1, 0),
            json!({ "ramusage": 1.0 }).as_object().expect("payload"),
        )
        .expect("ingest");

    assert!(!recompute);
    assert_eq!(graph.rev(), rev);
}

#[test]
fn order_is_topological() {
    let graph = canonical_graph();
    assert_eq!(graph.order.len(), graph.flow.len());
    for (position, key) in graph.order.iter().enumerate() {
        let node = graph.node(key).expect("ordered node");
        for input in &node.inputs {
            let input_position = graph
                .order
                .iter()
                .position(|k| k == input)
                .expect("input placed");
            assert!(
                input_position < position,
                "{input} must be placed before {key}"
            );
        }
    }
}

#[test]
fn build_is_reentrant() {
    let mut graph = canonical_graph();
    send_at(
        &mut graph,
        1,
        json!({ "ramusage": 1.0, "loadaverage": 0.2, "ram": 4.0 }),
    )
    .expect("ingest");
    graph.compute().expect("compute");

    // A second build re-derives everything; timestamps survive, so stale
    // messages stay rejected.
    graph.build().expect("rebuild");
    let recompute = send_at(
        &mut graph,
        1,
        json!({ "ramusage": 2.0, "loadaverage": 0.2, "ram": 4.0 }),
    )
    .expect("ingest");
    assert!(!recompute);
    assert_eq!(graph.order.len(), graph.flow.len());
}

#[test]
fn bad_field_aborts_but_keeps_prior_updates() {
    let mut graph = canonical_graph();

    // Field iteration is in key order: loadaverage and ram merge before the
    // malformed ramusage aborts the call.
    let err = send_at(
        &mut graph,
        1,
        json!({ "loadaverage": 0.4, "ram": 4.0, "ramusage": "not-a-number" }),
    )
    .expect_err("malformed float must fail");
    assert!(err.to_string().contains("wanted float"));

    assert_eq!(value_of(&graph, "input1"), Value::Float(0.4));
    assert_eq!(value_of(&graph, "input2"), Value::Float(4.0));
    assert_eq!(value_of(&graph, "input0"), Value::Float(0.0));
}

#[test]
fn missing_id_fails_build() {
    let raw = r#"{
        "name": "broken",
        "flow": {
            "in": {"operator": "input", "type": "string", "name": "status", "id": "001"},
            "out": {"operator": "output", "type": "string", "inputs": ["in"]}
        }
    }"#;
    let mut graph: FlowGraph = serde_json::from_str(raw).expect("json");
    let err = graph.build().expect_err("missing id must be caught");
    assert_eq!(err.to_string(), "missing id in node 'out'");
}

#[test]
fn unwired_output_fails_build() {
    let raw = r#"{
        "name": "broken",
        "flow": {
            "in": {"operator": "input", "type": "string", "id": "001"},
            "out": {"operator": "output", "type": "string", "id": "002"}
        }
    }"#;
    let mut graph: FlowGraph = serde_json::from_str(raw).expect("json");
    let err = graph.build().expect_err("arity must be caught");
    assert!(matches!(err, BuildError::InputArity { .. }), "{err}");
}

#[test]
fn webhook_is_wired_into_hooks() {
    let graph = canonical_graph();
    assert_eq!(
        graph.hooks.get(OUT_SID).map(String::as_str),
        Some("http://localhost:2030/")
    );
}

#[test]
fn sustained_input_stream() {
    let mut graph = canonical_graph();
    let rams = [0.01, 0.2, 0.4, 0.6, 0.8, 0.9, 1.0, 1.6, 2.0, 2.5, 3.0, 3.3, 3.5, 3.8, 4.0];
    let lavg = [0.01, 0.2, 0.4, 0.6, 0.8, 0.9, 1.0];

    for i in 0..200i64 {
        let recompute = send_at(
            &mut graph,
            i + 1,
            json!({
                "ramusage": rams[i as usize % rams.len()],
                "loadaverage": lavg[i as usize % lavg.len()],
                "ram": rams[rams.len() - 1],
            }),
        )
        .expect("ingest");
        assert!(recompute);
        graph.compute().expect("compute");
    }
}
