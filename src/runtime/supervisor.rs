/// Workflow supervisor
///
/// Process-wide table of the workflows this worker is running, and the
/// command plumbing that keeps the fleet consistent: start/stop commands are
/// broadcast to every worker, and a start naming another worker doubles as
/// the stop signal for any local replica. Account-deletion fanout broadcasts
/// stops and purges the rows.

use crate::bus::{self, Command, CommandVerb};
use crate::runtime::runner::WorkflowRunner;
use crate::workflow::{WorkflowRecord, WorkflowStore};
use anyhow::{Context, Result};
use futures::StreamExt;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

/// What a worker does with a parsed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandAction {
    /// Start targets this worker: instantiate the workflow.
    StartLocal,
    /// Start targets another worker: drop any local replica.
    StopReplica,
    /// Stop: drop any local replica.
    Stop,
}

/// The command decision table. Broadcast semantics guarantee that after every
/// worker has observed a start naming worker W, at most W owns the workflow.
pub fn command_action(worker_name: &str, command: &Command) -> CommandAction {
    match command.verb {
        CommandVerb::Start if command.target == worker_name => CommandAction::StartLocal,
        CommandVerb::Start => CommandAction::StopReplica,
        CommandVerb::Stop => CommandAction::Stop,
    }
}

/// Summary row for the running-workflows endpoint.
#[derive(Debug, Serialize)]
pub struct RunningWorkflow {
    pub id: Uuid,
    pub account_id: Uuid,
    pub name: String,
}

/// Registry of running workflows plus the consumers feeding it.
pub struct Supervisor {
    worker_name: String,
    client: async_nats::Client,
    http: reqwest::Client,
    store: WorkflowStore,
    workflows: RwLock<HashMap<String, WorkflowRunner>>,
}

impl Supervisor {
    pub fn new(
        worker_name: String,
        client: async_nats::Client,
        store: WorkflowStore,
    ) -> Result<Arc<Self>> {
        // One bounded HTTP client shared by every workflow's webhook posts.
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build webhook HTTP client")?;
        Ok(Arc::new(Self {
            worker_name,
            client,
            http,
            store,
            workflows: RwLock::new(HashMap::new()),
        }))
    }

    /// Boot recovery: start the latest version of every workflow assigned to
    /// this worker. Local catch-up only, nothing is broadcast.
    pub async fn recover_assigned(&self) -> Result<()> {
        let records = self.store.latest_for_worker(&self.worker_name).await?;
        for record in records {
            if let Err(e) = self.start_workflow(&record).await {
                tracing::error!(
                    "❌ could not launch workflow {} {}: {}",
                    record.account_id,
                    record.id,
                    e
                );
            }
        }
        Ok(())
    }

    /// Instantiate a workflow and insert it into the table. A replica already
    /// present under the same id is stopped and replaced.
    pub async fn start_workflow(&self, record: &WorkflowRecord) -> Result<()> {
        let runner = WorkflowRunner::start(
            self.client.clone(),
            self.http.clone(),
            record,
            &self.worker_name,
        )
        .await?;
        tracing::info!("🚀 start workflow {} {}", record.account_id, record.id);

        let mut workflows = self.workflows.write().await;
        if let Some(previous) = workflows.insert(record.id.to_string(), runner) {
            previous.stop();
        }
        Ok(())
    }

    /// Stop and remove a workflow. Returns whether it was running here.
    pub async fn stop_workflow(&self, wid: &str) -> bool {
        let mut workflows = self.workflows.write().await;
        match workflows.remove(wid) {
            Some(runner) => {
                runner.stop();
                true
            }
            None => false,
        }
    }

    /// Consume the full command exchange. Every worker sees every command.
    pub async fn run_command_loop(self: Arc<Self>) -> Result<()> {
        let mut messages = self
            .client
            .subscribe(bus::COMMAND_WILDCARD)
            .await
            .context("failed to subscribe to workflow commands")?;
        tracing::info!("📡 ready, waiting for workflow command events");

        while let Some(message) = messages.next().await {
            let Some(command) = bus::parse_command_subject(message.subject.as_str()) else {
                tracing::warn!("⚠️ unhandled command subject {}", message.subject);
                continue;
            };
            self.apply_command(&command, &message.payload).await;
        }
        Ok(())
    }

    async fn apply_command(&self, command: &Command, body: &[u8]) {
        match command_action(&self.worker_name, command) {
            CommandAction::StartLocal => {
                let record: WorkflowRecord = match serde_json::from_slice(body) {
                    Ok(record) => record,
                    Err(e) => {
                        tracing::error!(
                            "❌ could not decode workflow {}.{}: {}",
                            command.account_id,
                            command.workflow_id,
                            e
                        );
                        return;
                    }
                };
                if let Err(e) = self.start_workflow(&record).await {
                    tracing::error!(
                        "❌ could not start workflow {}.{}: {}",
                        command.account_id,
                        command.workflow_id,
                        e
                    );
                }
            }
            CommandAction::StopReplica => {
                if self.stop_workflow(&command.workflow_id).await {
                    tracing::info!(
                        "⏹️ stop workflow {}.{}, moved to {}",
                        command.account_id,
                        command.workflow_id,
                        command.target
                    );
                }
            }
            CommandAction::Stop => {
                if self.stop_workflow(&command.workflow_id).await {
                    tracing::info!(
                        "⏹️ stop workflow {}.{}",
                        command.account_id,
                        command.workflow_id
                    );
                }
            }
        }
    }

    /// Consume the account-deletion fanout: broadcast a stop per workflow id,
    /// then purge the account's rows.
    pub async fn run_account_delete_loop(self: Arc<Self>) -> Result<()> {
        let mut messages = self
            .client
            .subscribe(bus::ACCOUNT_DELETE_WILDCARD)
            .await
            .context("failed to subscribe to account deletions")?;
        tracing::info!("📡 ready, waiting on account deletions");

        while let Some(message) = messages.next().await {
            let Some(aid) = bus::parse_account_delete_subject(message.subject.as_str()) else {
                tracing::warn!(
                    "⚠️ cannot extract account id from subject {}",
                    message.subject
                );
                continue;
            };
            if let Err(e) = self.purge_account(aid).await {
                tracing::error!("❌ cannot purge account {}: {}", aid, e);
            }
        }
        Ok(())
    }

    async fn purge_account(&self, aid: Uuid) -> Result<()> {
        tracing::info!("🗑️ purge workflows for account {}", aid);
        let ids = self.store.workflow_ids(aid).await?;
        for wid in ids {
            if let Err(e) =
                bus::send_stop_command(&self.client, &aid.to_string(), &wid.to_string()).await
            {
                tracing::error!("❌ could not broadcast stop for {}.{}: {}", aid, wid, e);
            }
        }
        self.store.purge_account(aid).await?;
        Ok(())
    }

    /// Ids and names of the workflows running on this worker.
    pub async fn running(&self) -> Vec<RunningWorkflow> {
        let workflows = self.workflows.read().await;
        workflows
            .values()
            .map(|runner| RunningWorkflow {
                id: runner.id,
                account_id: runner.account_id,
                name: runner.name.clone(),
            })
            .collect()
    }

    /// Full graph snapshots of the running workflows.
    pub async fn graphs(&self) -> Vec<serde_json::Value> {
        let workflows = self.workflows.read().await;
        let mut snapshots = Vec::with_capacity(workflows.len());
        for runner in workflows.values() {
            snapshots.push(runner.graph_json().await);
        }
        snapshots
    }

    /// Dot rendering of one running workflow's graph.
    pub async fn graph_dot(&self, wid: &str) -> Option<String> {
        let workflows = self.workflows.read().await;
        match workflows.get(wid) {
            Some(runner) => Some(runner.graph_dot().await),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(target: &str, verb: CommandVerb) -> Command {
        Command {
            target: target.to_string(),
            account_id: "aid".to_string(),
            workflow_id: "wid".to_string(),
            verb,
        }
    }

    #[test]
    fn start_targeting_self_starts() {
        let cmd = command("worker0", CommandVerb::Start);
        assert_eq!(command_action("worker0", &cmd), CommandAction::StartLocal);
    }

    #[test]
    fn start_targeting_other_stops_replica() {
        let cmd = command("worker1", CommandVerb::Start);
        assert_eq!(command_action("worker0", &cmd), CommandAction::StopReplica);
    }

    #[test]
    fn stop_always_stops() {
        let cmd = command(bus::EMPTY_TARGET, CommandVerb::Stop);
        assert_eq!(command_action("worker0", &cmd), CommandAction::Stop);
        assert_eq!(command_action("worker1", &cmd), CommandAction::Stop);
    }

    #[test]
    fn broadcast_start_with_no_target_starts_nowhere() {
        // A start with the empty-target placeholder matches no worker, so
        // every worker drops its replica and none starts one.
        let cmd = command(bus::EMPTY_TARGET, CommandVerb::Start);
        for worker in ["worker0", "worker1", "worker2"] {
            assert_eq!(command_action(worker, &cmd), CommandAction::StopReplica);
        }
    }
}
