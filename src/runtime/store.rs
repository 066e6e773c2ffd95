//! Execution record store
//!
//! Executions are persisted as JSON documents with indexed lookup columns,
//! the same shape the workflow store uses. Each record is single-writer: only
//! the owning execution touches it, first with `create` (status=running) and
//! then with exactly one terminal `update`.

use anyhow::Result;
use sqlx::{sqlite::SqlitePool, Row};

use crate::runtime::context::Execution;

#[derive(Debug, Clone)]
pub struct ExecutionStore {
    pool: SqlitePool,
}

impl ExecutionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Safe to call multiple times (uses IF NOT EXISTS)
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at_ms INTEGER NOT NULL,
                record JSON NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_executions_workflow
            ON executions(workflow_id, started_at_ms DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn create(&self, execution: &Execution) -> Result<()> {
        let record = serde_json::to_string(execution)?;
        sqlx::query(
            "INSERT INTO executions (id, workflow_id, status, started_at_ms, record) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&execution.id)
        .bind(&execution.workflow_id)
        .bind(execution.status.as_str())
        .bind(execution.started_at.timestamp_millis())
        .bind(&record)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Idempotent replace by id
    pub async fn update(&self, execution: &Execution) -> Result<()> {
        let record = serde_json::to_string(execution)?;
        sqlx::query(
            r#"
            INSERT INTO executions (id, workflow_id, status, started_at_ms, record)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                record = excluded.record
            "#,
        )
        .bind(&execution.id)
        .bind(&execution.workflow_id)
        .bind(execution.status.as_str())
        .bind(execution.started_at.timestamp_millis())
        .bind(&record)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Execution>> {
        let row = sqlx::query("SELECT record FROM executions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let record: String = row.get("record");
                Ok(Some(serde_json::from_str(&record)?))
            }
            None => Ok(None),
        }
    }

    /// Page through a workflow's executions, newest first. Pages are 1-based;
    /// returns the items plus the total count.
    pub async fn list_by_workflow(
        &self,
        workflow_id: &str,
        page: u32,
        size: u32,
    ) -> Result<(Vec<Execution>, i64)> {
        let size = size.max(1);
        let offset = (page.max(1) - 1) as i64 * size as i64;

        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM executions WHERE workflow_id = ?")
                .bind(workflow_id)
                .fetch_one(&self.pool)
                .await?;

        let rows = sqlx::query(
            r#"
            SELECT record FROM executions
            WHERE workflow_id = ?
            ORDER BY started_at_ms DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(workflow_id)
        .bind(size as i64)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let record: String = row.get("record");
            items.push(serde_json::from_str(&record)?);
        }
        Ok((items, total))
    }

    /// Most recent executions for a workflow, newest first
    pub async fn latest(&self, workflow_id: &str, n: u32) -> Result<Vec<Execution>> {
        let (items, _) = self.list_by_workflow(workflow_id, 1, n).await?;
        Ok(items)
    }
}
