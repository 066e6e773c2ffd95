//! SQLite persistence for workflows, projects, and node schemas
//!
//! Entities are stored as JSON documents with indexed lookup columns. The
//! workflow table keeps `project_id` and `status` as real columns so listing
//! and routability checks stay cheap, while the definition column remains the
//! single source of truth.

use anyhow::Result;
use sqlx::{sqlite::SqlitePool, Row};
use std::collections::HashMap;

use crate::workflow::types::{NodeSchema, Project, Workflow};

/// Workflow document store
#[derive(Debug, Clone)]
pub struct WorkflowStore {
    pool: SqlitePool,
}

impl WorkflowStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Safe to call multiple times (uses IF NOT EXISTS)
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                project_id TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'draft',
                definition JSON NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_workflows_project ON workflows(project_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Store a new workflow or update an existing one
    pub async fn save(&self, workflow: &Workflow) -> Result<()> {
        let definition = serde_json::to_string(workflow)?;
        sqlx::query(
            r#"
            INSERT INTO workflows (id, name, project_id, status, definition, updated_at)
            VALUES (?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                project_id = excluded.project_id,
                status = excluded.status,
                definition = excluded.definition,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&workflow.id)
        .bind(&workflow.name)
        .bind(&workflow.project_id)
        .bind(workflow.status.as_str())
        .bind(&definition)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<Workflow>> {
        let row = sqlx::query("SELECT definition FROM workflows WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let definition: String = row.get("definition");
                Ok(Some(serde_json::from_str(&definition)?))
            }
            None => Ok(None),
        }
    }

    /// Basic listing metadata, most recently updated first
    pub async fn list(&self) -> Result<Vec<WorkflowMetadata>> {
        let rows = sqlx::query(
            "SELECT id, name, project_id, status, created_at, updated_at FROM workflows ORDER BY updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| WorkflowMetadata {
                id: row.get("id"),
                name: row.get("name"),
                project_id: row.get("project_id"),
                status: row.get("status"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            })
            .collect())
    }

    /// Load every workflow for registry initialization
    pub async fn load_all(&self) -> Result<HashMap<String, Workflow>> {
        let rows = sqlx::query("SELECT id, definition FROM workflows")
            .fetch_all(&self.pool)
            .await?;

        let mut workflows = HashMap::new();
        for row in rows {
            let id: String = row.get("id");
            let definition: String = row.get("definition");
            workflows.insert(id, serde_json::from_str(&definition)?);
        }
        Ok(workflows)
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Find the active workflow answering on an endpoint path, matching either
    /// the legacy workflow-level endpoint or a trigger webhook path. The
    /// uniqueness invariant guarantees at most one match.
    pub async fn find_by_endpoint_path(&self, path: &str) -> Result<Option<Workflow>> {
        let workflows = self.load_all().await?;
        Ok(workflows.into_values().find(|w| {
            w.is_routable() && w.endpoint_paths().iter().any(|p| p == path)
        }))
    }

    /// True if any workflow other than `exclude` already declares this
    /// endpoint path; used to enforce the global uniqueness invariant.
    pub async fn check_endpoint_exists(&self, path: &str, exclude: Option<&str>) -> Result<bool> {
        let workflows = self.load_all().await?;
        Ok(workflows.values().any(|w| {
            Some(w.id.as_str()) != exclude && w.endpoint_paths().iter().any(|p| p == path)
        }))
    }
}

/// Basic workflow metadata for listing operations
#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowMetadata {
    pub id: String,
    pub name: String,
    pub project_id: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Project document store
#[derive(Debug, Clone)]
pub struct ProjectStore {
    pool: SqlitePool,
}

impl ProjectStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                record JSON NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn save(&self, project: &Project) -> Result<()> {
        let record = serde_json::to_string(project)?;
        sqlx::query(
            r#"
            INSERT INTO projects (id, record) VALUES (?, ?)
            ON CONFLICT(id) DO UPDATE SET record = excluded.record
            "#,
        )
        .bind(&project.id)
        .bind(&record)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<Project>> {
        let row = sqlx::query("SELECT record FROM projects WHERE id = ?")
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

    pub async fn list(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query("SELECT record FROM projects ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        let mut projects = Vec::with_capacity(rows.len());
        for row in rows {
            let record: String = row.get("record");
            projects.push(serde_json::from_str(&record)?);
        }
        Ok(projects)
    }
}

/// Node schema side-table, keyed by (workflow_id, node_id)
#[derive(Debug, Clone)]
pub struct NodeSchemaStore {
    pool: SqlitePool,
}

impl NodeSchemaStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS node_schemas (
                workflow_id TEXT NOT NULL,
                node_id TEXT NOT NULL,
                record JSON NOT NULL,
                PRIMARY KEY (workflow_id, node_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert(&self, schema: &NodeSchema) -> Result<()> {
        let record = serde_json::to_string(schema)?;
        sqlx::query(
            r#"
            INSERT INTO node_schemas (workflow_id, node_id, record) VALUES (?, ?, ?)
            ON CONFLICT(workflow_id, node_id) DO UPDATE SET record = excluded.record
            "#,
        )
        .bind(&schema.workflow_id)
        .bind(&schema.node_id)
        .bind(&record)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, workflow_id: &str, node_id: &str) -> Result<Option<NodeSchema>> {
        let row =
            sqlx::query("SELECT record FROM node_schemas WHERE workflow_id = ? AND node_id = ?")
                .bind(workflow_id)
                .bind(node_id)
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

    pub async fn delete(&self, workflow_id: &str, node_id: &str) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM node_schemas WHERE workflow_id = ? AND node_id = ?")
                .bind(workflow_id)
                .bind(node_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn memory_pool() -> SqlitePool {
        // One connection so every store sees the same in-memory database
        sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    fn workflow_with_trigger(id: &str, path: &str, status: &str) -> Workflow {
        serde_json::from_value(json!({
            "id": id,
            "name": id,
            "status": status,
            "nodes": [
                {"id": "t1", "type": "trigger", "data": {"triggerType": "webhook", "webhookPath": path}}
            ],
            "edges": []
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn save_get_delete_roundtrip() {
        let store = WorkflowStore::new(memory_pool().await);
        store.init_schema().await.unwrap();

        let wf = workflow_with_trigger("wf-1", "/api/v1/a", "active");
        store.save(&wf).await.unwrap();

        let loaded = store.get("wf-1").await.unwrap().unwrap();
        assert_eq!(loaded.name, "wf-1");
        assert_eq!(loaded.endpoint_paths(), vec!["/api/v1/a"]);

        assert!(store.delete("wf-1").await.unwrap());
        assert!(store.get("wf-1").await.unwrap().is_none());
        assert!(!store.delete("wf-1").await.unwrap());
    }

    #[tokio::test]
    async fn find_by_endpoint_path_only_matches_active() {
        let store = WorkflowStore::new(memory_pool().await);
        store.init_schema().await.unwrap();

        store
            .save(&workflow_with_trigger("wf-active", "/api/v1/a", "active"))
            .await
            .unwrap();
        store
            .save(&workflow_with_trigger("wf-draft", "/api/v1/b", "draft"))
            .await
            .unwrap();

        let found = store.find_by_endpoint_path("/api/v1/a").await.unwrap();
        assert_eq!(found.unwrap().id, "wf-active");
        assert!(store.find_by_endpoint_path("/api/v1/b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn check_endpoint_exists_excludes_self() {
        let store = WorkflowStore::new(memory_pool().await);
        store.init_schema().await.unwrap();
        store
            .save(&workflow_with_trigger("wf-1", "/api/v1/x", "active"))
            .await
            .unwrap();

        assert!(store.check_endpoint_exists("/api/v1/x", None).await.unwrap());
        assert!(!store
            .check_endpoint_exists("/api/v1/x", Some("wf-1"))
            .await
            .unwrap());
        assert!(!store.check_endpoint_exists("/api/v1/y", None).await.unwrap());
    }

    #[tokio::test]
    async fn project_store_roundtrip() {
        let store = ProjectStore::new(memory_pool().await);
        store.init_schema().await.unwrap();

        let mut project = Project::new("p1".into(), "Orders".into(), "v1".into());
        store.save(&project).await.unwrap();

        project.is_locked = true;
        store.save(&project).await.unwrap();

        let loaded = store.get("p1").await.unwrap().unwrap();
        assert!(loaded.is_locked);
        assert_eq!(loaded.path_prefix, "/api/orders/v1");
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn node_schema_store_upserts_by_composite_key() {
        let store = NodeSchemaStore::new(memory_pool().await);
        store.init_schema().await.unwrap();

        let schema: NodeSchema = serde_json::from_value(json!({
            "workflowId": "wf-1",
            "nodeId": "n1",
            "connections": [
                {"sourceField": "a", "targetField": "b"}
            ]
        }))
        .unwrap();
        store.upsert(&schema).await.unwrap();
        store.upsert(&schema).await.unwrap();

        let loaded = store.get("wf-1", "n1").await.unwrap().unwrap();
        assert_eq!(loaded.connections.len(), 1);
        assert!(store.get("wf-1", "n2").await.unwrap().is_none());
        assert!(store.delete("wf-1", "n1").await.unwrap());
    }
}
