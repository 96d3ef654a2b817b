/// flowmill: incremental dataflow workflow engine for sensor streams
///
/// This library provides a typed DAG evaluator fed by a topic bus: sensor
/// readings merge into input nodes, one compute pass re-evaluates the graph,
/// and change-detected outputs are published back as derived sensor readings
/// and webhook notifications. Workflows are versioned in PostgreSQL and
/// assigned to exactly one worker of the fleet at a time.

// Core configuration and setup
pub mod config;

// Error kinds of the flow graph core
pub mod error;

// Flow graph core - operators, build, ingest, compute
pub mod flow;

// Workflow catalog - versioned persistence
pub mod workflow;

// Topic bus layer on NATS
pub mod bus;

// Runtime execution - per-workflow event loops and the fleet supervisor
pub mod runtime;

// HTTP API layer - catalog CRUD and runtime inspection
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use error::{BuildError, ComputeError, EvalError, FlowError, IngestError};
pub use flow::{FlowGraph, FlowNode, Value};
pub use runtime::Supervisor;
pub use server::start_server;
pub use workflow::{WorkflowRecord, WorkflowStore};
