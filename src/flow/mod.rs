/// Flow Graph Core
///
/// The typed, incremental dataflow evaluator. This module is pure: it knows
/// nothing about the bus, persistence, or HTTP. It provides:
/// - The tagged value union and node types
/// - The operator registry with arity/type metadata
/// - Graph build (validation + topological ordering), incremental input
///   ingestion, single-pass evaluation and output change bundling

// Value union and graph vertex
pub mod types;

// Catalog of named pure operators
pub mod operators;

// Parse -> validate -> order -> ingest -> compute -> emit
pub mod graph;

// Re-export the working set
pub use graph::FlowGraph;
pub use operators::{Operator, OPERATORS};
pub use types::{FlowNode, Value};
