/// Flow graph evaluation engine
///
/// Converts the JSON graph description into a validated, topologically
/// ordered DAG and evaluates it incrementally: sensor messages merge into
/// input nodes under per-field timestamp monotonicity, one compute pass
/// re-evaluates every node, and change-detected outputs are bundled into
/// outbound sensor payloads.

use crate::error::{BuildError, ComputeError, FlowError, IngestError};
use crate::flow::operators;
use crate::flow::types::{FlowNode, Value};
use chrono::{DateTime, Utc};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt::Write;
use uuid::Uuid;

/// The parsed representation of a workflow graph.
///
/// `flow` is the JSON-decoded node map; everything else is derived by
/// [`build`](FlowGraph::build). Derived fields reference nodes by their map
/// key, and compute passes a snapshot of input values into each operator, so
/// the graph needs no interior aliasing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowGraph {
    pub id: Uuid,
    pub account_id: Uuid,
    pub name: String,
    pub flow: HashMap<String, FlowNode>,

    /// sensor id -> payload field name -> node key
    #[serde(skip_deserializing)]
    pub inputs: HashMap<String, HashMap<String, String>>,
    /// Keys of output nodes, in topological-scan order.
    #[serde(skip_deserializing)]
    pub outputs: Vec<String>,
    /// Every node key in topological order; compute iterates this.
    #[serde(skip_deserializing)]
    pub order: Vec<String>,
    /// sensor id -> webhook URL, populated from `send` nodes.
    #[serde(skip_deserializing)]
    pub hooks: HashMap<String, String>,

    #[serde(skip)]
    rev: u64,
    #[serde(skip)]
    built: bool,
}

impl FlowGraph {
    /// Assemble a graph from a persisted workflow row's raw `graph` JSON.
    pub fn from_parts(
        id: Uuid,
        account_id: Uuid,
        name: &str,
        graph: &serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        let flow: HashMap<String, FlowNode> = serde_json::from_value(graph.clone())?;
        Ok(FlowGraph {
            id,
            account_id,
            name: name.to_string(),
            flow,
            ..Default::default()
        })
    }

    /// Monotonically increasing graph revision, bumped by every input merge.
    pub fn rev(&self) -> u64 {
        self.rev
    }

    pub fn node(&self, key: &str) -> Option<&FlowNode> {
        self.flow.get(key)
    }

    /// Validate the graph and derive the evaluation structures.
    ///
    /// Re-entrant but destructive: derived fields are rebuilt wholesale,
    /// node revisions reset, and input nodes re-seeded by declared type.
    pub fn build(&mut self) -> Result<(), BuildError> {
        self.inputs = HashMap::new();
        self.hooks = HashMap::new();
        self.outputs = Vec::new();
        self.order = Vec::new();

        for node in self.flow.values_mut() {
            node.rev = 0;
        }

        // Deterministic per graph: scan nodes sorted by key.
        let mut keys: Vec<String> = self.flow.keys().cloned().collect();
        keys.sort();

        for key in &keys {
            let Some(node) = self.flow.get_mut(key) else {
                continue;
            };
            if matches!(node.operator.as_str(), "input" | "output" | "send")
                && node.id.is_empty()
            {
                return Err(BuildError::MissingId(key.clone()));
            }

            match node.operator.as_str() {
                "output" => self.outputs.push(key.clone()),
                "input" => {
                    node.computed_value = match node.node_type.to_lowercase().as_str() {
                        "float" => Value::Float(0.0),
                        "bool" => Value::Bool(false),
                        _ => Value::Str(String::new()),
                    };
                    self.inputs
                        .entry(node.id.clone())
                        .or_default()
                        .insert(node.name.clone(), key.clone());
                }
                "send" => {
                    if node.values.is_empty() {
                        return Err(BuildError::SendMissingUrl(key.clone()));
                    }
                    let url = reqwest::Url::parse(&node.values[0]).map_err(|e| {
                        BuildError::BadUrl {
                            node: key.clone(),
                            detail: e.to_string(),
                        }
                    })?;
                    Uuid::parse_str(&node.id).map_err(|e| BuildError::BadSensorId {
                        node: key.clone(),
                        detail: e.to_string(),
                    })?;
                    self.hooks.insert(node.id.clone(), url.to_string());
                }
                _ => {}
            }
        }

        for key in &keys {
            let Some(node) = self.flow.get(key) else {
                continue;
            };
            for input in &node.inputs {
                if !self.flow.contains_key(input) {
                    return Err(BuildError::UnknownInput {
                        input: input.clone(),
                        node: key.clone(),
                    });
                }
            }

            let op = operators::get(&node.operator).ok_or_else(|| {
                BuildError::UnknownOperator {
                    node: key.clone(),
                    operator: node.operator.clone(),
                }
            })?;

            let arity = node.inputs.len();
            if (arity as i32) < op.min_inputs
                || (op.max_inputs >= 0 && (arity as i32) > op.max_inputs)
            {
                return Err(BuildError::InputArity {
                    node: key.clone(),
                    operator: op.name.to_string(),
                    min: op.min_inputs,
                    max: op.max_inputs,
                    got: arity,
                });
            }
        }

        // Topological order with cycle rejection.
        let mut dag = DiGraph::<&str, ()>::with_capacity(keys.len(), 0);
        let mut index_of = HashMap::with_capacity(keys.len());
        for key in &keys {
            index_of.insert(key.as_str(), dag.add_node(key.as_str()));
        }
        for key in &keys {
            let Some(node) = self.flow.get(key) else {
                continue;
            };
            for input in &node.inputs {
                if let (Some(&from), Some(&to)) =
                    (index_of.get(input.as_str()), index_of.get(key.as_str()))
                {
                    dag.add_edge(from, to, ());
                }
            }
        }
        let sorted = toposort(&dag, None).map_err(|_| BuildError::Cycle)?;
        self.order = sorted.into_iter().map(|ix| dag[ix].to_string()).collect();

        // Mark placement; ingest bumps these past 1 as data arrives.
        for key in &self.order {
            if let Some(node) = self.flow.get_mut(key) {
                node.rev = 1;
            }
        }

        self.built = true;
        Ok(())
    }

    /// Merge one sensor message into the graph's input nodes.
    ///
    /// Returns `Ok(false)` without touching anything when the sensor id is
    /// not wired into this graph. Fields merge independently under strict
    /// timestamp monotonicity: a field only updates when `created_at` is
    /// strictly newer than its node's last accepted observation. A type
    /// coercion failure aborts the call; updates already applied from the
    /// same message are kept.
    pub fn send_input(
        &mut self,
        _account_id: &str,
        sensor_id: &str,
        created_at: Option<DateTime<Utc>>,
        payload: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<bool, FlowError> {
        if !self.built {
            self.build()?;
        }
        let Some(fields) = self.inputs.get(sensor_id) else {
            return Ok(false);
        };
        self.rev += 1;
        let rev = self.rev;

        let mut must_recompute = false;
        for (field, value) in payload {
            let Some(key) = fields.get(field) else {
                continue;
            };
            let Some(node) = self.flow.get_mut(key) else {
                continue;
            };
            if created_at <= node.last_changed {
                continue;
            }

            let coerced = coerce(field, &node.node_type, value)?;
            node.computed_value = coerced;
            node.last_changed = created_at;
            node.rev = rev;
            must_recompute = true;
        }
        Ok(must_recompute)
    }

    /// Re-evaluate every node in topological order. One pass suffices; there
    /// is no convergence loop.
    pub fn compute(&mut self) -> Result<(), ComputeError> {
        for key in &self.order {
            let Some(node) = self.flow.get(key) else {
                continue;
            };
            let Some(op) = operators::get(&node.operator) else {
                continue;
            };
            let mut inputs = Vec::with_capacity(node.inputs.len());
            for input_key in &node.inputs {
                if let Some(input) = self.flow.get(input_key) {
                    inputs.push(input.computed_value.clone());
                }
            }
            let compute = op.compute;
            if let Some(node) = self.flow.get_mut(key) {
                compute(node, &inputs).map_err(|e| ComputeError {
                    node: key.clone(),
                    source: e,
                })?;
            }
        }
        Ok(())
    }

    /// The graph's output nodes, in scan order.
    pub fn output_nodes(&self) -> impl Iterator<Item = &FlowNode> {
        self.outputs.iter().filter_map(|key| self.flow.get(key))
    }

    /// Bundle changed outputs into one payload per sensor id.
    ///
    /// A sensor id is emitted when at least one of its output nodes changed
    /// in the last compute; every output node sharing that id contributes its
    /// field. Name collisions resolve last-write.
    pub fn changed_outputs(
        &self,
    ) -> HashMap<String, serde_json::Map<String, serde_json::Value>> {
        let mut changed = HashSet::new();
        for node in self.output_nodes() {
            if node.changed {
                changed.insert(node.id.clone());
            }
        }

        let mut payloads: HashMap<String, serde_json::Map<String, serde_json::Value>> =
            HashMap::new();
        for node in self.output_nodes() {
            if !changed.contains(&node.id) {
                continue;
            }
            let entry = payloads.entry(node.id.clone()).or_insert_with(|| {
                let mut payload = serde_json::Map::new();
                payload.insert(
                    "id".to_string(),
                    serde_json::Value::String(node.id.clone()),
                );
                payload
            });
            entry.insert(node.name.clone(), (&node.computed_value).into());
        }
        payloads
    }

    /// Render the graph in GraphViz dot, for the runtime debug endpoint.
    pub fn write_dot(&self, w: &mut impl Write) -> std::fmt::Result {
        writeln!(w, "digraph \"{} {}\" {{", self.id, self.name)?;
        writeln!(w, " {{")?;
        let mut keys: Vec<&String> = self.flow.keys().collect();
        keys.sort();
        for key in &keys {
            let Some(node) = self.flow.get(*key) else {
                continue;
            };
            let value = serde_json::Value::from(&node.computed_value);
            write!(w, "    \"{}\" [", key)?;
            match node.operator.as_str() {
                "input" => {
                    let seen = node
                        .last_changed
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_default();
                    write!(
                        w,
                        "label=\"{}\\n{}\\n{}\\n{}\\n{}\\n{}\" shape=box",
                        key, node.id, node.name, node.operator, seen, value
                    )?;
                }
                "output" => {
                    write!(
                        w,
                        "label=\"{}\\n{}\\n{}\\n{}\\n{}\" shape=box",
                        key, node.id, node.name, node.operator, value
                    )?;
                }
                _ => {
                    write!(w, "label=\"{}\\n{}\\n{}\"", key, node.operator, value)?;
                }
            }
            writeln!(w, "]")?;
        }
        writeln!(w, " }};")?;
        for key in &keys {
            let Some(node) = self.flow.get(*key) else {
                continue;
            };
            for from in &node.inputs {
                writeln!(w, "  \"{}\" -> \"{}\";", from, key)?;
            }
        }
        write!(w, "}}")
    }
}

/// Coerce one payload field to the declared type of its input node.
fn coerce(
    field: &str,
    declared: &str,
    value: &serde_json::Value,
) -> Result<Value, IngestError> {
    match declared {
        "string" => match value {
            serde_json::Value::String(s) => Ok(Value::Str(s.clone())),
            other => Err(IngestError::WrongType {
                node: field.to_string(),
                wanted: "string",
                got: json_type_name(other).to_string(),
            }),
        },
        "enum" => match value {
            serde_json::Value::String(s) => Ok(Value::Str(s.clone())),
            other => Err(IngestError::WrongType {
                node: field.to_string(),
                wanted: "enum",
                got: json_type_name(other).to_string(),
            }),
        },
        "float" => match value {
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(f) => Ok(Value::Float(f)),
                None => Err(IngestError::WrongType {
                    node: field.to_string(),
                    wanted: "float64",
                    got: "number".to_string(),
                }),
            },
            serde_json::Value::String(s) => {
                s.parse::<f64>().map(Value::Float).map_err(|e| {
                    IngestError::BadFloat {
                        node: field.to_string(),
                        detail: e.to_string(),
                    }
                })
            }
            other => Err(IngestError::WrongType {
                node: field.to_string(),
                wanted: "float64",
                got: json_type_name(other).to_string(),
            }),
        },
        "bool" => match value {
            serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
            serde_json::Value::String(s) => {
                s.parse::<bool>().map(Value::Bool).map_err(|e| {
                    IngestError::BadBool {
                        node: field.to_string(),
                        detail: e.to_string(),
                    }
                })
            }
            other => Err(IngestError::WrongType {
                node: field.to_string(),
                wanted: "bool",
                got: json_type_name(other).to_string(),
            }),
        },
        // Unknown declared types take the value as-is.
        _ => Ok(Value::from_json(value)),
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
