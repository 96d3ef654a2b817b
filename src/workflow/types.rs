/// Persisted workflow type definitions
///
/// A workflow row is one version of a user-defined graph. Versions are
/// append-only: every POST writes a new row under the same (account_id, id)
/// with a fresh created_at, and "the workflow" is the row with the largest
/// created_at. Rows are also the payload of `start` commands on the bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::flow::FlowGraph;

/// One persisted version of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRecord {
    #[serde(default)]
    pub id: Uuid,
    #[serde(default)]
    pub account_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Name of the worker process this workflow is assigned to.
    #[serde(default)]
    pub worker: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    /// The opaque JSON node map describing the flow.
    pub graph: serde_json::Value,
}

impl WorkflowRecord {
    /// Decode the stored graph JSON into an evaluation graph. The result is
    /// not yet built.
    pub fn flow_graph(&self) -> anyhow::Result<FlowGraph> {
        let graph = FlowGraph::from_parts(self.id, self.account_id, &self.name, &self.graph)?;
        Ok(graph)
    }
}
