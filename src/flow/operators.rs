/// Operator registry
///
/// Process-wide immutable catalog of the pure operators a node may apply.
/// Each entry carries arity and type metadata for build-time validation plus
/// the compute function itself. The registry (minus the functions) is
/// serializable for the `/workflow/operation` dump.

use crate::error::EvalError;
use crate::flow::types::{FlowNode, Value};
use serde::Serialize;

/// Compute functions read the snapshot of input values, gathered in declared
/// order, and write the node's `computed_value`.
pub type ComputeFn = fn(&mut FlowNode, &[Value]) -> Result<(), EvalError>;

/// A named pure operator with its arity and type metadata.
#[derive(Clone, Serialize)]
pub struct Operator {
    pub name: &'static str,
    #[serde(skip_serializing_if = "str::is_empty")]
    pub description: &'static str,
    pub min_inputs: i32,
    /// -1 means unbounded.
    pub max_inputs: i32,
    #[serde(skip_serializing_if = "str::is_empty")]
    pub inputs_type: &'static str,
    #[serde(skip_serializing_if = "str::is_empty")]
    pub output_type: &'static str,
    #[serde(skip)]
    pub compute: ComputeFn,
}

impl std::fmt::Debug for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operator")
            .field("name", &self.name)
            .field("min_inputs", &self.min_inputs)
            .field("max_inputs", &self.max_inputs)
            .finish()
    }
}

/// Look an operator up by name.
pub fn get(name: &str) -> Option<&'static Operator> {
    OPERATORS.iter().find(|op| op.name == name)
}

/// Every operator the engine knows about.
pub static OPERATORS: &[Operator] = &[
    Operator {
        name: "const",
        description: "constant value fixed in the graph description",
        min_inputs: 0,
        max_inputs: 0,
        inputs_type: "",
        output_type: "",
        compute: noop,
    },
    Operator {
        name: "input",
        description: "sensor field fed from the bus",
        min_inputs: 0,
        max_inputs: 0,
        inputs_type: "",
        output_type: "",
        compute: noop,
    },
    Operator {
        name: "output",
        description: "derived sensor field, emitted when its value changes",
        min_inputs: 1,
        max_inputs: 1,
        inputs_type: "",
        output_type: "",
        compute: output,
    },
    Operator {
        name: "lt",
        description: "",
        min_inputs: 2,
        max_inputs: 2,
        inputs_type: "float64",
        output_type: "float64",
        compute: lt,
    },
    Operator {
        name: "le",
        description: "",
        min_inputs: 2,
        max_inputs: 2,
        inputs_type: "float64",
        output_type: "float64",
        compute: le,
    },
    Operator {
        name: "gt",
        description: "",
        min_inputs: 2,
        max_inputs: 2,
        inputs_type: "float64",
        output_type: "float64",
        compute: gt,
    },
    Operator {
        name: "ge",
        description: "",
        min_inputs: 2,
        max_inputs: 2,
        inputs_type: "float64",
        output_type: "float64",
        compute: ge,
    },
    Operator {
        name: "eq",
        description: "",
        min_inputs: 2,
        max_inputs: 2,
        inputs_type: "float64",
        output_type: "float64",
        compute: eq,
    },
    Operator {
        name: "ne",
        description: "",
        min_inputs: 2,
        max_inputs: 2,
        inputs_type: "float64",
        output_type: "float64",
        compute: ne,
    },
    Operator {
        name: "and",
        description: "",
        min_inputs: 1,
        max_inputs: -1,
        inputs_type: "bool",
        output_type: "bool",
        compute: and,
    },
    Operator {
        name: "or",
        description: "",
        min_inputs: 1,
        max_inputs: -1,
        inputs_type: "bool",
        output_type: "bool",
        compute: or,
    },
    Operator {
        name: "not",
        description: "",
        min_inputs: 1,
        max_inputs: 1,
        inputs_type: "bool",
        output_type: "bool",
        compute: not,
    },
    Operator {
        name: "add",
        description: "",
        min_inputs: 1,
        max_inputs: -1,
        inputs_type: "float64",
        output_type: "float64",
        compute: add,
    },
    Operator {
        name: "div",
        description: "",
        min_inputs: 2,
        max_inputs: 2,
        inputs_type: "float64",
        output_type: "float64",
        compute: div,
    },
    Operator {
        name: "min",
        description: "",
        min_inputs: 1,
        max_inputs: -1,
        inputs_type: "float64",
        output_type: "float64",
        compute: min,
    },
    Operator {
        name: "max",
        description: "",
        min_inputs: 1,
        max_inputs: -1,
        inputs_type: "float64",
        output_type: "float64",
        compute: max,
    },
    Operator {
        name: "select",
        description: "map a float onto a value table by range conditions",
        min_inputs: 1,
        max_inputs: -1,
        inputs_type: "float",
        output_type: "enum",
        compute: select,
    },
    Operator {
        name: "contains_exactly",
        description: "",
        min_inputs: 2,
        max_inputs: 2,
        inputs_type: "string",
        output_type: "bool",
        compute: contains_exactly,
    },
    Operator {
        name: "match_str",
        description: "",
        min_inputs: 3,
        max_inputs: 3,
        inputs_type: "bool/string/string",
        output_type: "bool",
        compute: match_str,
    },
    Operator {
        name: "send",
        description: "bind a webhook URL to a sensor id",
        min_inputs: 0,
        max_inputs: 0,
        inputs_type: "",
        output_type: "",
        compute: noop,
    },
];

fn arg(inputs: &[Value], i: usize) -> Result<&Value, EvalError> {
    inputs.get(i).ok_or(EvalError::MissingInput(i))
}

fn noop(_node: &mut FlowNode, _inputs: &[Value]) -> Result<(), EvalError> {
    Ok(())
}

fn output(node: &mut FlowNode, inputs: &[Value]) -> Result<(), EvalError> {
    let input = arg(inputs, 0)?;
    node.changed = node.computed_value != *input;
    if node.changed {
        node.computed_value = input.clone();
    }
    Ok(())
}

fn lt(node: &mut FlowNode, inputs: &[Value]) -> Result<(), EvalError> {
    let (a, b) = (arg(inputs, 0)?.as_float()?, arg(inputs, 1)?.as_float()?);
    node.computed_value = Value::Bool(a < b);
    Ok(())
}

fn le(node: &mut FlowNode, inputs: &[Value]) -> Result<(), EvalError> {
    let (a, b) = (arg(inputs, 0)?.as_float()?, arg(inputs, 1)?.as_float()?);
    node.computed_value = Value::Bool(a <= b);
    Ok(())
}

fn gt(node: &mut FlowNode, inputs: &[Value]) -> Result<(), EvalError> {
    let (a, b) = (arg(inputs, 0)?.as_float()?, arg(inputs, 1)?.as_float()?);
    node.computed_value = Value::Bool(a > b);
    Ok(())
}

fn ge(node: &mut FlowNode, inputs: &[Value]) -> Result<(), EvalError> {
    let (a, b) = (arg(inputs, 0)?.as_float()?, arg(inputs, 1)?.as_float()?);
    node.computed_value = Value::Bool(a >= b);
    Ok(())
}

// eq/ne use an absolute 1e-9 band. They are intentionally not complements at
// the exact boundary |a-b| == 1e-9, where both report false.
fn eq(node: &mut FlowNode, inputs: &[Value]) -> Result<(), EvalError> {
    let (a, b) = (arg(inputs, 0)?.as_float()?, arg(inputs, 1)?.as_float()?);
    node.computed_value = Value::Bool((a - b).abs() < 1.0e-9);
    Ok(())
}

fn ne(node: &mut FlowNode, inputs: &[Value]) -> Result<(), EvalError> {
    let (a, b) = (arg(inputs, 0)?.as_float()?, arg(inputs, 1)?.as_float()?);
    node.computed_value = Value::Bool((a - b).abs() > 1.0e-9);
    Ok(())
}

fn and(node: &mut FlowNode, inputs: &[Value]) -> Result<(), EvalError> {
    for v in inputs {
        if !v.as_bool()? {
            node.computed_value = Value::Bool(false);
            return Ok(());
        }
    }
    node.computed_value = Value::Bool(true);
    Ok(())
}

fn or(node: &mut FlowNode, inputs: &[Value]) -> Result<(), EvalError> {
    for v in inputs {
        if v.as_bool()? {
            node.computed_value = Value::Bool(true);
            return Ok(());
        }
    }
    node.computed_value = Value::Bool(false);
    Ok(())
}

fn not(node: &mut FlowNode, inputs: &[Value]) -> Result<(), EvalError> {
    node.computed_value = Value::Bool(!arg(inputs, 0)?.as_bool()?);
    Ok(())
}

fn add(node: &mut FlowNode, inputs: &[Value]) -> Result<(), EvalError> {
    let mut acc = 0.0;
    for v in inputs {
        acc += v.as_float()?;
    }
    node.computed_value = Value::Float(acc);
    Ok(())
}

// No guard against b == 0; IEEE-754 division applies.
fn div(node: &mut FlowNode, inputs: &[Value]) -> Result<(), EvalError> {
    let (a, b) = (arg(inputs, 0)?.as_float()?, arg(inputs, 1)?.as_float()?);
    node.computed_value = Value::Float(a / b);
    Ok(())
}

fn min(node: &mut FlowNode, inputs: &[Value]) -> Result<(), EvalError> {
    let mut acc = f64::MAX;
    for v in inputs {
        let v = v.as_float()?;
        if v < acc {
            acc = v;
        }
    }
    node.computed_value = Value::Float(acc);
    Ok(())
}

fn max(node: &mut FlowNode, inputs: &[Value]) -> Result<(), EvalError> {
    let mut acc = -f64::MAX;
    for v in inputs {
        let v = v.as_float()?;
        if v > acc {
            acc = v;
        }
    }
    node.computed_value = Value::Float(acc);
    Ok(())
}

/// Walk the `condition` table; an entry that does not split into exactly two
/// parts is skipped. The first range containing the input selects the value
/// at the same index. No match is an evaluation error.
fn select(node: &mut FlowNode, inputs: &[Value]) -> Result<(), EvalError> {
    let input = arg(inputs, 0)?.as_float()?;
    let mut selected = None;
    for (i, cond) in node.condition.iter().enumerate() {
        let bounds: Vec<&str> = cond.split(':').collect();
        if bounds.len() != 2 {
            continue;
        }
        let lo: f64 = bounds[0]
            .parse()
            .map_err(|_| EvalError::ConditionMin(cond.clone()))?;
        let hi: f64 = bounds[1]
            .parse()
            .map_err(|_| EvalError::ConditionMax(cond.clone()))?;
        if lo <= input && input <= hi {
            selected = Some(i);
            break;
        }
    }
    match selected.and_then(|i| node.values.get(i).cloned()) {
        Some(value) => {
            node.computed_value = Value::Str(value);
            Ok(())
        }
        None => Err(EvalError::UnmatchedConditions),
    }
}

fn contains_exactly(node: &mut FlowNode, inputs: &[Value]) -> Result<(), EvalError> {
    let (a, b) = (arg(inputs, 0)?.as_str()?, arg(inputs, 1)?.as_str()?);
    node.computed_value = Value::Bool(a == b);
    Ok(())
}

// Ternary select over strings. The declared output type in the registry is
// documentation only; the emitted value is whichever string gets picked.
fn match_str(node: &mut FlowNode, inputs: &[Value]) -> Result<(), EvalError> {
    let picked = if arg(inputs, 0)?.as_bool()? {
        arg(inputs, 1)?
    } else {
        arg(inputs, 2)?
    };
    node.computed_value = picked.clone();
    Ok(())
}
