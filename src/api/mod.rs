/// HTTP API Layer
///
/// REST endpoints for the workflow catalog and runtime inspection. Handlers
/// stay thin: persistence plus a command broadcast where a change must reach
/// the fleet.

// Workflow CRUD and inspection endpoints
pub mod workflows;

// Re-export router builder and state
pub use workflows::{create_workflow_routes, AppState};
