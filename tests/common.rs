//! Common test utilities: the canonical windmill graph and ingest helpers.

use chrono::DateTime;
use flowmill::error::FlowError;
use flowmill::flow::FlowGraph;

/// Account owning the canonical graph.
pub const AID: &str = "fe8927e9-a02a-416a-8928-c3a86dae4c61";

/// Sensor feeding the canonical graph's inputs.
pub const SID: &str = "1377959e-97ce-46c1-9715-22c34bb9afbe";

/// Sensor id carried by both outputs and the webhook.
pub const OUT_SID: &str = "1949f63d-5e40-45bb-9d31-13ab52b5e92a";

/// The canonical "database server load" graph: ram ratio and load average
/// drive an on-fire flag and a discrete propeller speed.
pub const RAW_GRAPH: &str = r#"
{
    "name": "database server load",
    "id": "3e8c8cc8-7567-4594-a8d0-c38d9f64765e",
    "account_id": "fe8927e9-a02a-416a-8928-c3a86dae4c61",
    "flow": {
        "input0": {
            "operator": "input",
            "type": "float",
            "name": "ramusage",
            "id": "1377959e-97ce-46c1-9715-22c34bb9afbe"
        },
        "input1": {
            "operator": "input",
            "type": "float",
            "name": "loadaverage",
            "id": "1377959e-97ce-46c1-9715-22c34bb9afbe"
        },
        "input2": {
            "operator": "input",
            "type": "float",
            "name": "ram",
            "id": "1377959e-97ce-46c1-9715-22c34bb9afbe"
        },

        "const0": {
            "operator": "const",
            "type": "float",
            "computed_value": 0.8
        },

        "op_ram": {
            "operator": "div",
            "inputs": ["input0", "input2"]
        },

        "op0": {
            "operator": "gt",
            "inputs": ["op_ram", "const0"]
        },
        "op1": {
            "operator": "gt",
            "inputs": ["input1", "const0"]
        },
        "op3": {
            "operator": "or",
            "inputs": ["op0", "op1"]
        },

        "op4": {
            "operator": "max",
            "inputs": ["op_ram", "input1"]
        },
        "op5": {
            "operator": "select",
            "inputs": ["op4"],
            "values": ["stop", "slow", "medium", "fast"],
            "condition": ["0:.1", ".1:.3", ".3:.6", ".6:1"]
        },

        "output0": {
            "operator": "output",
            "name": "windmill_onfire",
            "type": "bool",
            "inputs": ["op3"],
            "id": "1949f63d-5e40-45bb-9d31-13ab52b5e92a"
        },
        "output1": {
            "operator": "output",
            "name": "windmill_propeler_speed",
            "type": "enum",
            "values": ["stop", "slow", "medium", "fast"],
            "inputs": ["op5"],
            "id": "1949f63d-5e40-45bb-9d31-13ab52b5e92a"
        },

        "webhook": {
            "operator": "send",
            "values": ["http://localhost:2030"],
            "id": "1949f63d-5e40-45bb-9d31-13ab52b5e92a"
        }
    }
}"#;

/// Decode and build the canonical graph.
#[allow(dead_code)]
pub fn canonical_graph() -> FlowGraph {
    let mut graph: FlowGraph = serde_json::from_str(RAW_GRAPH).expect("canonical graph json");
    graph.build().expect("canonical graph builds");
    graph
}

/// Merge a sensor payload into the graph at the given unix-seconds timestamp.
#[allow(dead_code)]
pub fn send_at(
    graph: &mut FlowGraph,
    secs: i64,
    data: serde_json::Value,
) -> Result<bool, FlowError> {
    let payload = data.as_object().expect("payload object").clone();
    graph.send_input(AID, SID, DateTime::from_timestamp(secs, 0), &payload)
}
