/// Core flow graph type definitions
///
/// Defines the tagged value union carried between nodes and the graph vertex
/// itself. Both are serialized/deserialized from the JSON graph description
/// stored with each workflow.

use crate::error::EvalError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A value flowing through the graph.
///
/// Sensor fields and node results are one of: IEEE-754 double, boolean,
/// string (enum values are strings constrained by a per-node list), or empty.
/// JSON numbers decode as floats, `null` as empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Float(f64),
    Str(String),
    Empty,
}

impl Default for Value {
    fn default() -> Self {
        Value::Empty
    }
}

impl Value {
    /// Human-readable tag, used in type mismatch diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Float(_) => "float64",
            Value::Str(_) => "string",
            Value::Empty => "empty",
        }
    }

    pub fn as_float(&self) -> Result<f64, EvalError> {
        match self {
            Value::Float(f) => Ok(*f),
            other => Err(EvalError::Type {
                wanted: "float64",
                got: other.type_name(),
            }),
        }
    }

    pub fn as_bool(&self) -> Result<bool, EvalError> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(EvalError::Type {
                wanted: "bool",
                got: other.type_name(),
            }),
        }
    }

    pub fn as_str(&self) -> Result<&str, EvalError> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(EvalError::Type {
                wanted: "string",
                got: other.type_name(),
            }),
        }
    }

    /// Best-effort conversion from an arbitrary JSON value. Objects and
    /// arrays have no place in a node and map to empty.
    pub fn from_json(value: &serde_json::Value) -> Value {
        match value {
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(f) => Value::Float(f),
                None => Value::Empty,
            },
            serde_json::Value::String(s) => Value::Str(s.clone()),
            _ => Value::Empty,
        }
    }
}

impl From<&Value> for serde_json::Value {
    fn from(value: &Value) -> Self {
        match value {
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Empty => serde_json::Value::Null,
        }
    }
}

/// A single vertex of the flow graph, decoded from the workflow JSON.
///
/// The key it is known by lives in the enclosing `flow` map. Runtime state
/// (`rev`, `changed`, `last_changed`) never round-trips through JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowNode {
    /// External sensor identifier; required for input/output/send operators.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    /// Field name inside a sensor payload, for input and output nodes.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Declared data type of the node's output value.
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub node_type: String,

    /// Operator name; must resolve in the registry.
    pub operator: String,

    /// Ordered keys of the nodes consumed as arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<String>,

    /// Auxiliary value table used by `select` and `send`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,

    /// Range table used by `select`, entries shaped `"lo:hi"`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub condition: Vec<String>,

    /// Current value. Fixed at decode time for `const`, seeded by build for
    /// `input`, produced by compute for everything else.
    #[serde(default, alias = "ComputedValue")]
    pub computed_value: Value,

    /// Timestamp of the newest observation merged into this node (inputs only).
    #[serde(skip)]
    pub last_changed: Option<DateTime<Utc>>,

    /// Set by the `output` operator when the value it copies differs from the
    /// previously emitted one. The only signal used to decide emission.
    #[serde(skip)]
    pub changed: bool,

    /// Revision marker: build placement flag, then ingest freshness counter.
    #[serde(skip)]
    pub rev: u64,
}
