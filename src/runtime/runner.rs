/// Per-workflow runtime
///
/// Binds one flow graph to the bus: subscribes to the graph's input sensor
/// subjects, merges the replayed latest-known values with the live stream,
/// runs the ingest/compute cycle, and publishes changed outputs plus webhook
/// notifications.
///
/// All graph mutation happens on one task, so the graph needs no locking of
/// its own; the mutex only lets the debug endpoints take a snapshot between
/// messages.

use crate::bus;
use crate::flow::FlowGraph;
use crate::workflow::WorkflowRecord;
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use uuid::Uuid;

/// Handle to one running workflow.
#[derive(Debug)]
pub struct WorkflowRunner {
    pub id: Uuid,
    pub account_id: Uuid,
    pub name: String,
    graph: Arc<Mutex<FlowGraph>>,
    shutdown: watch::Sender<bool>,
}

impl WorkflowRunner {
    /// Build the graph, replay the latest sensor values, bind the input
    /// subjects and spawn the event loop.
    pub async fn start(
        client: async_nats::Client,
        http: reqwest::Client,
        record: &WorkflowRecord,
        worker_name: &str,
    ) -> Result<Self> {
        let mut graph = record.flow_graph()?;
        graph.build()?;

        let aid = graph.account_id;
        let wid = graph.id;
        let hooks = graph.hooks.clone();

        // Bind the input subjects before requesting the replay so nothing
        // published in between is lost.
        let queue = bus::queue_name(worker_name, aid, wid);
        let mut subscriptions = Vec::new();
        for sid in graph.inputs.keys() {
            let subject = bus::sensor_subject(&aid.to_string(), sid);
            let subscription = client
                .queue_subscribe(subject.clone(), queue.clone())
                .await
                .with_context(|| format!("failed to subscribe to {subject}"))?;
            tracing::info!("🔗 for {} bind to {}", wid, subject);
            subscriptions.push(subscription);
        }
        let mut messages = futures::stream::select_all(subscriptions);

        // Latest-known sensor values arrive on the same loop as live
        // messages, so a workflow starting mid-stream sees the current world.
        let (snapshot_tx, mut snapshots) = mpsc::channel::<bus::SensorSnapshot>(16);
        {
            let client = client.clone();
            tokio::spawn(async move {
                match bus::latest_sensors(&client, aid).await {
                    Ok(latest) => {
                        for snapshot in latest {
                            if snapshot_tx.send(snapshot).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!("⚠️ could not find latest sensor messages for {}: {}", aid, e)
                    }
                }
            });
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let graph = Arc::new(Mutex::new(graph));
        let loop_graph = Arc::clone(&graph);

        tokio::spawn(async move {
            tracing::info!("📡 ready, waiting for sensor events for {} {}", aid, wid);
            let mut replay_done = false;
            loop {
                let (msg_aid, msg_sid, data) = tokio::select! {
                    changed = shutdown_rx.changed() => {
                        match changed {
                            Ok(()) if *shutdown_rx.borrow() => break,
                            Ok(()) => continue,
                            Err(_) => break,
                        }
                    }
                    message = messages.next() => {
                        let Some(message) = message else { break };
                        let Some((msg_aid, msg_sid)) =
                            bus::parse_sensor_subject(message.subject.as_str())
                        else {
                            continue;
                        };
                        match serde_json::from_slice::<
                            serde_json::Map<String, serde_json::Value>,
                        >(&message.payload)
                        {
                            Ok(data) => (msg_aid.to_string(), msg_sid.to_string(), data),
                            Err(e) => {
                                tracing::warn!(
                                    "⚠️ failed to decode sensor body on {}: {}",
                                    message.subject,
                                    e
                                );
                                continue;
                            }
                        }
                    }
                    snapshot = snapshots.recv(), if !replay_done => {
                        match snapshot {
                            Some(s) if !s.sid.is_empty() => (s.aid, s.sid, s.data),
                            Some(_) => continue,
                            None => {
                                replay_done = true;
                                continue;
                            }
                        }
                    }
                };

                let created_at = parse_created_at(&msg_aid, &msg_sid, &data);

                let mut graph = loop_graph.lock().await;
                let recompute =
                    match graph.send_input(&msg_aid, &msg_sid, created_at, &data) {
                        Ok(recompute) => recompute,
                        Err(e) => {
                            tracing::warn!(
                                "⚠️ error in the input sensor {} to workflow {}.{}: {}",
                                msg_sid,
                                msg_aid,
                                wid,
                                e
                            );
                            continue;
                        }
                    };
                if !recompute {
                    continue;
                }

                if let Err(e) = graph.compute() {
                    tracing::warn!("⚠️ dropping tick for workflow {}.{}: {}", msg_aid, wid, e);
                    continue;
                }

                let outputs = graph.changed_outputs();
                drop(graph);

                emit_outputs(&client, &http, &hooks, &msg_aid, outputs).await;
            }
            tracing::info!("⏹️ workflow {} {} stopped", aid, wid);
        });

        Ok(Self {
            id: record.id,
            account_id: record.account_id,
            name: record.name.clone(),
            graph,
            shutdown,
        })
    }

    /// Signal the event loop to terminate. In-flight webhook posts may
    /// outlive the runner.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Snapshot of the full graph state, for the debug endpoint.
    pub async fn graph_json(&self) -> serde_json::Value {
        let graph = self.graph.lock().await;
        serde_json::to_value(&*graph).unwrap_or(serde_json::Value::Null)
    }

    /// GraphViz dot rendering of the graph, for the debug endpoint.
    pub async fn graph_dot(&self) -> String {
        let graph = self.graph.lock().await;
        let mut out = String::new();
        let _ = graph.write_dot(&mut out);
        out
    }
}

/// Pull `created_at` out of a sensor payload. A missing or malformed field
/// is logged and treated as the zero time, which strict monotonicity then
/// rejects for any node that has already seen data.
fn parse_created_at(
    aid: &str,
    sid: &str,
    data: &serde_json::Map<String, serde_json::Value>,
) -> Option<DateTime<Utc>> {
    let Some(raw) = data.get("created_at").and_then(|v| v.as_str()) else {
        tracing::warn!("⚠️ missing created_at field in sensors {}.{}", aid, sid);
        return None;
    };
    match DateTime::parse_from_rfc3339(raw) {
        Ok(t) => Some(t.with_timezone(&Utc)),
        Err(e) => {
            tracing::warn!("⚠️ created_at parsing error in sensors {}.{}: {}", aid, sid, e);
            None
        }
    }
}

/// Publish one sensor message per changed output id and fan out to the
/// bound webhooks. Webhook posts run detached; failures are logged, never
/// retried, and never touch graph state.
async fn emit_outputs(
    client: &async_nats::Client,
    http: &reqwest::Client,
    hooks: &HashMap<String, String>,
    aid: &str,
    outputs: HashMap<String, serde_json::Map<String, serde_json::Value>>,
) {
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true);
    for (sid, mut payload) in outputs {
        payload.insert(
            "created_at".to_string(),
            serde_json::Value::String(now.clone()),
        );
        let body = match serde_json::to_vec(&payload) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!("❌ could not encode output for {}.{}: {}", aid, sid, e);
                continue;
            }
        };

        tracing::debug!("📤 send {}.{}", aid, sid);
        if let Err(e) = bus::publish_sensor(client, aid, &sid, body.clone()).await {
            tracing::error!("❌ could not publish output {}.{}: {}", aid, sid, e);
        }

        if let Some(url) = hooks.get(&sid) {
            let http = http.clone();
            let url = url.clone();
            let aid = aid.to_string();
            tokio::spawn(async move {
                let response = http
                    .post(&url)
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .body(body)
                    .send()
                    .await;
                match response {
                    Ok(resp) if resp.status().is_success() => {
                        tracing::debug!("✅ sent webhook {}.{} to {}", aid, sid, url)
                    }
                    Ok(resp) => tracing::warn!(
                        "⚠️ cannot send webhook for {}.{}: {}",
                        aid,
                        sid,
                        resp.status()
                    ),
                    Err(e) => tracing::warn!("⚠️ cannot send webhook for {}.{}: {}", aid, sid, e),
                }
            });
        }
    }
}
