/// Workflow management REST API endpoints
///
/// Thin CRUD handlers over the version store that drive the core: a POST
/// validates the graph by building it, persists a new version and broadcasts
/// the start command; a DELETE purges the versions and broadcasts stop. The
/// running/* endpoints inspect this worker's supervisor table.
///
/// Authentication is fronted by the platform's auth service; the proxy
/// injects the caller's account id in the `x-account-id` header.

use crate::{
    bus,
    flow::{FlowGraph, OPERATORS},
    runtime::supervisor::{RunningWorkflow, Supervisor},
    workflow::{WorkflowRecord, WorkflowStore},
};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{Html, Json},
    routing::get,
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    /// Workflow version store
    pub store: WorkflowStore,
    /// Bus client for start/stop command publication
    pub bus: async_nats::Client,
    /// This worker's supervisor table, for inspection endpoints
    pub supervisor: Arc<Supervisor>,
    /// Default worker assignment for new workflows
    pub worker_name: String,
}

/// An output-operator node extracted from a persisted graph.
///
/// Decoded loosely from the raw graph JSON: unknown node fields are ignored,
/// non-output nodes are filtered out.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct WorkflowOutput {
    #[serde(skip_deserializing, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub operator: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

/// Create the workflow API routes
pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/workflow", get(list_workflows).post(create_workflow))
        .route("/workflow/running", get(get_running))
        .route("/workflow/running/debug", get(get_running_debug))
        .route("/workflow/running/debug/{id}", get(get_running_debug_dot))
        .route("/workflow/operation", get(get_operations))
        .route("/workflow/outputs", get(get_outputs))
        .route("/workflow/outputs/{wid}", get(get_outputs_by_id))
        .route("/workflow/history/{wid}", get(get_workflow_history))
        .route(
            "/workflow/{wid}",
            get(get_workflow).delete(delete_workflow),
        )
}

/// Pull the caller's account id out of the auth proxy header.
fn account_id(headers: &HeaderMap) -> Result<Uuid, StatusCode> {
    headers
        .get("x-account-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or(StatusCode::UNAUTHORIZED)
}

/// GET /workflow — latest version of every workflow of the account
async fn list_workflows(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<WorkflowRecord>>, StatusCode> {
    let account = account_id(&headers)?;
    match state.store.latest_for_account(account).await {
        Ok(records) => Ok(Json(records)),
        Err(e) => {
            tracing::error!("❌ cannot find workflows for {}: {}", account, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /workflow/:wid — latest version of one workflow
async fn get_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(wid): Path<Uuid>,
) -> Result<Json<WorkflowRecord>, StatusCode> {
    let account = account_id(&headers)?;
    match state.store.latest(account, wid).await {
        Ok(Some(record)) => Ok(Json(record)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("❌ cannot find workflow {}.{}: {}", account, wid, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /workflow/history/:wid — every version, oldest first
async fn get_workflow_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(wid): Path<Uuid>,
) -> Result<Json<Vec<WorkflowRecord>>, StatusCode> {
    let account = account_id(&headers)?;
    match state.store.history(account, wid).await {
        Ok(records) => Ok(Json(records)),
        Err(e) => {
            tracing::error!("❌ cannot find workflow history {}.{}: {}", account, wid, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// POST /workflow — create a new workflow version
///
/// Assigns id, worker and created_at when absent, validates the graph by
/// building it (400 on any config error), persists the new version and
/// broadcasts the start command to the fleet.
async fn create_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut record): Json<WorkflowRecord>,
) -> Result<Json<WorkflowRecord>, (StatusCode, Json<Value>)> {
    let account = account_id(&headers)
        .map_err(|code| (code, Json(json!({ "message": "missing account" }))))?;

    record.account_id = account;
    record.created_at = Some(Utc::now());
    if record.id.is_nil() {
        record.id = Uuid::new_v4();
    }
    if record.worker.is_empty() {
        record.worker = state.worker_name.clone();
    }

    // Check the validity of the graph before persisting anything.
    let mut graph = FlowGraph::from_parts(record.id, record.account_id, &record.name, &record.graph)
        .map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "message": e.to_string() })),
            )
        })?;
    graph.build().map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "message": e.to_string() })),
        )
    })?;

    if let Err(e) = state.store.insert(&record).await {
        tracing::error!("❌ cannot insert workflow for {}: {}", account, e);
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "message": "storage failure" })),
        ));
    }

    if let Err(e) = bus::send_start_command(&state.bus, &record).await {
        tracing::error!("❌ cannot broadcast start for {}.{}: {}", account, record.id, e);
    }

    Ok(Json(record))
}

/// DELETE /workflow/:wid — remove every version, broadcast stop
///
/// The stop broadcast is unconditional on a successful delete: even when no
/// rows matched, every worker still drops any replica it may hold.
async fn delete_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(wid): Path<Uuid>,
) -> StatusCode {
    let Ok(account) = account_id(&headers) else {
        return StatusCode::UNAUTHORIZED;
    };
    match state.store.delete(account, wid).await {
        Ok(_) => {
            if let Err(e) =
                bus::send_stop_command(&state.bus, &account.to_string(), &wid.to_string()).await
            {
                tracing::error!("❌ cannot broadcast stop for {}.{}: {}", account, wid, e);
            }
            StatusCode::OK
        }
        Err(e) => {
            tracing::error!("❌ cannot delete workflow {}.{}: {}", account, wid, e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Filter the output-operator nodes out of one persisted graph.
fn extract_outputs(record: &WorkflowRecord) -> Vec<WorkflowOutput> {
    let nodes: HashMap<String, WorkflowOutput> =
        match serde_json::from_value(record.graph.clone()) {
            Ok(nodes) => nodes,
            Err(_) => return Vec::new(),
        };
    nodes
        .into_values()
        .filter(|node| node.operator == "output")
        .map(|mut node| {
            node.workflow_id = Some(record.id);
            node
        })
        .collect()
}

/// GET /workflow/outputs — output nodes across the account's latest graphs
async fn get_outputs(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<WorkflowOutput>>, StatusCode> {
    let account = account_id(&headers)?;
    match state.store.latest_for_account(account).await {
        Ok(records) => Ok(Json(records.iter().flat_map(extract_outputs).collect())),
        Err(e) => {
            tracing::error!("❌ cannot find workflows for {}: {}", account, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /workflow/outputs/:wid — output nodes of one workflow
async fn get_outputs_by_id(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(wid): Path<Uuid>,
) -> Result<Json<Vec<WorkflowOutput>>, StatusCode> {
    let account = account_id(&headers)?;
    match state.store.latest(account, wid).await {
        Ok(Some(record)) => Ok(Json(extract_outputs(&record))),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("❌ cannot find workflow {}.{}: {}", account, wid, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /workflow/running — workflows running on this worker
async fn get_running(State(state): State<AppState>) -> Json<Vec<RunningWorkflow>> {
    Json(state.supervisor.running().await)
}

/// GET /workflow/running/debug — full graph state dump
async fn get_running_debug(State(state): State<AppState>) -> Json<Vec<Value>> {
    Json(state.supervisor.graphs().await)
}

/// GET /workflow/running/debug/:id — GraphViz rendering of one graph
async fn get_running_debug_dot(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Html<String>, StatusCode> {
    let Some(dot) = state.supervisor.graph_dot(&id).await else {
        return Err(StatusCode::NOT_FOUND);
    };
    Ok(Html(format!(
        r##"<!DOCTYPE html>
<meta charset="utf-8">
<body>
<script src="//d3js.org/d3.v4.min.js"></script>
<script src="https://unpkg.com/viz.js@1.8.0/viz.js" type="javascript/worker"></script>
<script src="https://unpkg.com/d3-graphviz@1.4.0/build/d3-graphviz.min.js"></script>
<div id="graph" style="text-align: center;"></div>
<script>
d3.select("#graph").graphviz()
    .fade(false)
    .renderDot(`{dot}`);
</script>"##
    )))
}

/// GET /workflow/operation — operator registry dump
async fn get_operations() -> Json<&'static [crate::flow::Operator]> {
    Json(OPERATORS)
}
