/// PostgreSQL persistence layer for workflow storage
///
/// The workflow table is an append-only version log keyed logically by
/// (account_id, id, created_at). The latest version of a workflow is the row
/// with the largest created_at for its (account_id, id).

use crate::workflow::types::WorkflowRecord;
use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use uuid::Uuid;

/// Columns selected for every record query.
const RECORD_COLUMNS: &str = "account_id, id, created_at, worker, name, version, graph";

/// Workflow version store backed by a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct WorkflowStore {
    pool: PgPool,
}

impl WorkflowStore {
    /// Connect and bootstrap the schema. Safe to call on an existing
    /// database (IF NOT EXISTS throughout).
    pub async fn connect(uri: &str) -> Result<Self> {
        let pool = PgPool::connect(uri)
            .await
            .context("failed to connect to PostgreSQL")?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow (
                account_id UUID NOT NULL,
                id UUID NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                worker TEXT NOT NULL DEFAULT '',
                name TEXT,
                version TEXT NOT NULL DEFAULT '',
                graph JSONB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS workflow_id_aid_rec
            ON workflow (account_id, id, created_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Latest version of every workflow assigned to the given worker.
    /// Used for boot recovery.
    pub async fn latest_for_worker(&self, worker: &str) -> Result<Vec<WorkflowRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM workflow JOIN (
                SELECT account_id AS maxaid, id AS maxid, MAX(created_at) AS maxc
                FROM workflow
                GROUP BY account_id, id
            ) w
            ON w.maxc = created_at AND w.maxid = id AND w.maxaid = account_id
            WHERE worker = $1
            "#
        ))
        .bind(worker)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    /// Latest version of every workflow belonging to an account.
    pub async fn latest_for_account(&self, account_id: Uuid) -> Result<Vec<WorkflowRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM workflow JOIN (
                SELECT id AS maxid, MAX(created_at) AS maxc
                FROM workflow
                WHERE account_id = $1
                GROUP BY maxid
            ) w
            ON w.maxc = created_at AND w.maxid = id AND account_id = $1
            "#
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    /// Latest version of one workflow, or None if it does not exist.
    pub async fn latest(&self, account_id: Uuid, id: Uuid) -> Result<Option<WorkflowRecord>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM workflow
            WHERE created_at = (
                SELECT MAX(created_at) FROM workflow
                WHERE account_id = $1 AND id = $2
            )
            AND account_id = $1 AND id = $2
            "#
        ))
        .bind(account_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    /// Every version of one workflow, oldest first.
    pub async fn history(&self, account_id: Uuid, id: Uuid) -> Result<Vec<WorkflowRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM workflow
            WHERE account_id = $1 AND id = $2
            ORDER BY created_at
            "#
        ))
        .bind(account_id)
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    /// Distinct workflow ids belonging to an account. Used before a purge to
    /// broadcast stop commands.
    pub async fn workflow_ids(&self, account_id: Uuid) -> Result<Vec<Uuid>> {
        let rows = sqlx::query("SELECT DISTINCT id FROM workflow WHERE account_id = $1")
            .bind(account_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| row.try_get::<Uuid, _>("id").map_err(Into::into))
            .collect()
    }

    /// Append a new version. Existing versions are never touched.
    pub async fn insert(&self, record: &WorkflowRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow (account_id, id, created_at, worker, name, version, graph)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.account_id)
        .bind(record.id)
        .bind(record.created_at.unwrap_or_else(Utc::now))
        .bind(&record.worker)
        .bind(&record.name)
        .bind(&record.version)
        .bind(&record.graph)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Remove every version of one workflow. Returns the number of rows
    /// removed.
    pub async fn delete(&self, account_id: Uuid, id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM workflow WHERE id = $1 AND account_id = $2")
            .bind(id)
            .bind(account_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Remove every workflow of an account. Used by account-deletion fanout.
    pub async fn purge_account(&self, account_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM workflow WHERE account_id = $1")
            .bind(account_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

fn record_from_row(row: &PgRow) -> Result<WorkflowRecord> {
    Ok(WorkflowRecord {
        account_id: row.try_get("account_id")?,
        id: row.try_get("id")?,
        created_at: Some(row.try_get("created_at")?),
        worker: row.try_get("worker")?,
        name: row.try_get::<Option<String>, _>("name")?.unwrap_or_default(),
        version: row.try_get("version")?,
        graph: row.try_get("graph")?,
    })
}
