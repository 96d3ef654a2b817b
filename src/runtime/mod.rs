/// Runtime Layer
///
/// Execution of workflows against the bus:
/// - One event-loop task per workflow, owning its graph
/// - The supervisor table coordinating start/stop across the worker fleet

// Per-workflow event loop
pub mod runner;

// Fleet coordination and the running-workflow table
pub mod supervisor;

// Re-export main types
pub use runner::WorkflowRunner;
pub use supervisor::Supervisor;
