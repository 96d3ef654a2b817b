/// Topic bus layer on NATS
///
/// The engine's three exchanges map onto NATS subject prefixes:
/// - `sensors.<aid>.<sid>`: sensor readings, inbound and outbound
/// - `workflow.<target>.<aid>.<wid>.<start|stop>`: fleet commands
/// - `account.<aid>.delete`: account-deletion fanout
/// plus the `rpc_sensors_latest` request/reply subject used to replay the
/// latest known sensor values when a workflow starts mid-stream.
///
/// Subject tokens cannot be empty, so a command addressed to no worker (the
/// broadcast stop) carries `-` as its target. `-` never names a worker, so
/// every worker fails the start-target comparison and stop ignores the token
/// entirely.

use anyhow::{anyhow, Context, Result};
use chrono::{SecondsFormat, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::workflow::WorkflowRecord;

/// Target token standing in for "no worker" on broadcast commands.
pub const EMPTY_TARGET: &str = "-";

/// Wildcard consumed by the supervisor's command loop.
pub const COMMAND_WILDCARD: &str = "workflow.>";

/// Wildcard consumed by the account-deletion loop.
pub const ACCOUNT_DELETE_WILDCARD: &str = "account.*.delete";

/// Request/reply subject answering with the latest sensor snapshots of an
/// account.
pub const RPC_SENSORS_LATEST: &str = "rpc_sensors_latest";

/// How long a starting workflow waits for the latest-sensors reply before
/// going live with only the live stream.
pub const LATEST_SENSORS_DEADLINE: Duration = Duration::from_secs(60);

/// Verbs understood by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandVerb {
    Start,
    Stop,
}

/// A parsed fleet command routing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub target: String,
    pub account_id: String,
    pub workflow_id: String,
    pub verb: CommandVerb,
}

/// One replayed sensor snapshot from the latest-sensors RPC.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SensorSnapshot {
    #[serde(default)]
    pub aid: String,
    #[serde(default)]
    pub sid: String,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

/// Connect to the bus. A lost connection is fatal at process scope: the
/// deployment restarts the worker rather than the worker replaying state.
pub async fn connect(url: &str) -> Result<async_nats::Client> {
    let client = async_nats::ConnectOptions::new()
        .event_callback(|event| async move {
            match event {
                async_nats::Event::Closed => {
                    tracing::error!("❌ bus connection closed, terminating");
                    std::process::exit(1);
                }
                other => tracing::warn!("⚠️ bus event: {:?}", other),
            }
        })
        .connect(url)
        .await
        .with_context(|| format!("failed to connect to NATS at {url}"))?;
    Ok(client)
}

pub fn sensor_subject(aid: &str, sid: &str) -> String {
    format!("sensors.{aid}.{sid}")
}

pub fn command_subject(target: &str, aid: &str, wid: &str, verb: &str) -> String {
    let target = if target.is_empty() { EMPTY_TARGET } else { target };
    format!("workflow.{target}.{aid}.{wid}.{verb}")
}

pub fn account_delete_subject(aid: &str) -> String {
    format!("account.{aid}.delete")
}

/// Per-workflow consumer queue name, unique per instantiation.
pub fn queue_name(worker: &str, aid: Uuid, wid: Uuid) -> String {
    let nonce: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!("{worker}_{aid}_{wid}_{nonce}")
}

/// Split a sensor subject back into (account id, sensor id).
pub fn parse_sensor_subject(subject: &str) -> Option<(&str, &str)> {
    let rest = subject.strip_prefix("sensors.")?;
    let (aid, sid) = rest.split_once('.')?;
    if aid.is_empty() || sid.is_empty() || sid.contains('.') {
        return None;
    }
    Some((aid, sid))
}

/// Parse a command subject into its routing grammar
/// `<target>.<aid>.<wid>.<verb>`. Unknown verbs and malformed keys yield
/// None; the caller logs and skips them.
pub fn parse_command_subject(subject: &str) -> Option<Command> {
    let rest = subject.strip_prefix("workflow.")?;
    let parts: Vec<&str> = rest.split('.').collect();
    if parts.len() != 4 {
        return None;
    }
    let verb = match parts[3] {
        "start" => CommandVerb::Start,
        "stop" => CommandVerb::Stop,
        _ => return None,
    };
    Some(Command {
        target: parts[0].to_string(),
        account_id: parts[1].to_string(),
        workflow_id: parts[2].to_string(),
        verb,
    })
}

/// Extract the account id from an `account.<aid>.delete` subject.
pub fn parse_account_delete_subject(subject: &str) -> Option<Uuid> {
    let rest = subject.strip_prefix("account.")?;
    let (aid, _) = rest.split_once('.')?;
    Uuid::parse_str(aid).ok()
}

fn timestamp_headers() -> async_nats::HeaderMap {
    let mut headers = async_nats::HeaderMap::new();
    headers.insert(
        "timestamp",
        Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true).as_str(),
    );
    headers
}

/// Publish one sensor reading.
pub async fn publish_sensor(
    client: &async_nats::Client,
    aid: &str,
    sid: &str,
    body: Vec<u8>,
) -> Result<()> {
    client
        .publish_with_headers(sensor_subject(aid, sid), timestamp_headers(), body.into())
        .await
        .context("failed to publish sensor message")?;
    Ok(())
}

/// Broadcast a start command carrying the persisted workflow record. Every
/// worker sees it; the named target starts the workflow, everyone else drops
/// any replica they own.
pub async fn send_start_command(
    client: &async_nats::Client,
    record: &WorkflowRecord,
) -> Result<()> {
    let body = serde_json::to_vec(record)?;
    let subject = command_subject(
        &record.worker,
        &record.account_id.to_string(),
        &record.id.to_string(),
        "start",
    );
    client
        .publish_with_headers(subject, timestamp_headers(), body.into())
        .await
        .context("failed to publish start command")?;
    Ok(())
}

/// Broadcast a stop command with no target, so every worker cleans up.
pub async fn send_stop_command(client: &async_nats::Client, aid: &str, wid: &str) -> Result<()> {
    let subject = command_subject(EMPTY_TARGET, aid, wid, "stop");
    client
        .publish_with_headers(subject, timestamp_headers(), Vec::new().into())
        .await
        .context("failed to publish stop command")?;
    Ok(())
}

/// Ask the sensor service for the latest known values of an account, bounded
/// by [`LATEST_SENSORS_DEADLINE`]. On timeout the caller proceeds with only
/// live data.
pub async fn latest_sensors(
    client: &async_nats::Client,
    aid: Uuid,
) -> Result<Vec<SensorSnapshot>> {
    let request = serde_json::json!({ "aid": aid });
    let reply = tokio::time::timeout(
        LATEST_SENSORS_DEADLINE,
        client.request(RPC_SENSORS_LATEST, serde_json::to_vec(&request)?.into()),
    )
    .await
    .map_err(|_| anyhow!("latest sensors request timed out"))?
    .context("latest sensors request failed")?;

    let snapshots: Vec<SensorSnapshot> = serde_json::from_slice(&reply.payload)
        .context("could not decode latest sensors reply")?;
    Ok(snapshots)
}
