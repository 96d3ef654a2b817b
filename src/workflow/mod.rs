/// Workflow Catalog Layer
///
/// Versioned persistence for user-defined workflows:
/// - Row types shared by the store, the HTTP surface and the bus commands
/// - Append-only PostgreSQL storage with latest-version queries

// Persisted row types
pub mod types;

// PostgreSQL persistence layer
pub mod storage;

// Re-export commonly used types
pub use storage::WorkflowStore;
pub use types::WorkflowRecord;
