/// Error kinds for the flow graph core
///
/// Split by phase: `BuildError` covers configuration problems caught while
/// finalizing a graph, `IngestError` covers bad sensor payloads at the input
/// boundary, and `EvalError` covers failures raised by an operator while the
/// graph is being re-evaluated.

use thiserror::Error;

/// Configuration errors raised by [`FlowGraph::build`](crate::flow::FlowGraph::build).
///
/// These surface as HTTP 400 when a workflow is posted, and are logged and
/// dropped when a stored graph turns out to be stale at start time.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("missing id in node '{0}'")]
    MissingId(String),

    #[error("send operator '{0}' takes 1 value, an URL")]
    SendMissingUrl(String),

    #[error("error in '{node}' url: {detail}")]
    BadUrl { node: String, detail: String },

    #[error("error in '{node}' sensor id: {detail}")]
    BadSensorId { node: String, detail: String },

    #[error("unknown input {input} in {node}")]
    UnknownInput { input: String, node: String },

    #[error("in node '{node}': '{operator}' is not a valid operator")]
    UnknownOperator { node: String, operator: String },

    #[error("in '{node}' operator {operator}, expected number of inputs between {min} and {max}, got {got}")]
    InputArity {
        node: String,
        operator: String,
        min: i32,
        max: i32,
        got: usize,
    },

    #[error("workflow graph contains a cycle")]
    Cycle,
}

/// Payload errors raised by [`FlowGraph::send_input`](crate::flow::FlowGraph::send_input).
///
/// The offending field aborts the call; fields already merged from the same
/// message keep their new values.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("in node '{node}' input wanted {wanted}, got {got}")]
    WrongType {
        node: String,
        wanted: &'static str,
        got: String,
    },

    #[error("in node '{node}' input wanted float: {detail}")]
    BadFloat { node: String, detail: String },

    #[error("in node '{node}' input wanted bool: {detail}")]
    BadBool { node: String, detail: String },
}

/// Failures raised inside an operator compute function.
///
/// The runtime logs these and drops the tick; graph state keeps whatever the
/// already-evaluated nodes produced.
#[derive(Debug, Error, PartialEq)]
pub enum EvalError {
    #[error("wanted {wanted}, got {got}")]
    Type {
        wanted: &'static str,
        got: &'static str,
    },

    #[error("missing input {0}")]
    MissingInput(usize),

    #[error("condition min not a float: {0}")]
    ConditionMin(String),

    #[error("condition max not a float: {0}")]
    ConditionMax(String),

    #[error("unmatched conditions")]
    UnmatchedConditions,
}

/// An [`EvalError`] tagged with the node it was raised in.
#[derive(Debug, Error, PartialEq)]
#[error("evaluating node '{node}': {source}")]
pub struct ComputeError {
    pub node: String,
    #[source]
    pub source: EvalError,
}

/// Any error a graph can raise once it is live.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Compute(#[from] ComputeError),
}
