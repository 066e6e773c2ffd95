//! Management REST API
//!
//! CRUD for workflows and projects, execution record queries, node schema
//! upserts, and manual runs. Workflow writes enforce the project lock and the
//! global endpoint uniqueness invariant, auto-prefix trigger paths with the
//! owning project's path prefix, and hot-reload the registry and cron
//! scheduler so changes take effect without a restart.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::runtime::engine::{FlowExecutor, RunRequest};
use crate::runtime::scheduler::CronSchedulerService;
use crate::runtime::store::ExecutionStore;
use crate::workflow::registry::WorkflowRegistry;
use crate::workflow::storage::{NodeSchemaStore, ProjectStore, WorkflowStore};
use crate::workflow::types::{slug, NodeSchema, Project, TriggerKind, Workflow};

/// Shared state for the management API
#[derive(Clone)]
pub struct AppState {
    pub storage: WorkflowStore,
    pub projects: ProjectStore,
    pub schemas: NodeSchemaStore,
    pub executions: ExecutionStore,
    pub registry: Arc<WorkflowRegistry>,
    pub scheduler: Arc<CronSchedulerService>,
    pub executor: Arc<FlowExecutor>,
}

type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, error: &str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(json!({"error": error, "message": message.into(), "success": false})),
    )
}

fn internal(message: impl std::fmt::Display) -> ApiError {
    tracing::error!("management api failure: {message}");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", message.to_string())
}

#[derive(Debug, Serialize)]
pub struct WorkflowResponse {
    pub id: String,
    pub message: String,
}

pub fn create_management_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows", post(create_workflow).get(list_workflows))
        .route(
            "/api/workflows/{id}",
            get(get_workflow).put(update_workflow).delete(delete_workflow),
        )
        .route("/api/workflows/{id}/run", post(run_workflow))
        .route("/api/workflows/{id}/executions", get(list_executions))
        .route("/api/workflows/{id}/executions/latest", get(latest_executions))
        .route("/api/executions/{id}", get(get_execution))
        .route("/api/projects", post(create_project).get(list_projects))
        .route("/api/projects/{id}", get(get_project).patch(patch_project))
        .route(
            "/api/workflows/{id}/nodes/{node_id}/schema",
            put(put_node_schema).get(get_node_schema).delete(delete_node_schema),
        )
}

/// Reject writes into a locked project
async fn ensure_unlocked(state: &AppState, project_id: &str) -> Result<Option<Project>, ApiError> {
    if project_id.is_empty() {
        return Ok(None);
    }
    let project = state
        .projects
        .get(project_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| {
            api_error(
                StatusCode::BAD_REQUEST,
                "unknown_project",
                format!("project '{project_id}' does not exist"),
            )
        })?;
    if project.is_locked {
        return Err(api_error(
            StatusCode::FORBIDDEN,
            "locked",
            format!("project '{project_id}' is locked"),
        ));
    }
    Ok(Some(project))
}

/// Trigger webhook paths must live under the owning project's prefix;
/// missing prefixes are added rather than rejected.
fn apply_project_prefix(workflow: &mut Workflow, project: &Project) {
    let prefix = project.path_prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return;
    }
    for node in workflow.nodes.iter_mut().filter(|n| n.node_type == "trigger") {
        if let Some(path) = &node.data.webhook_path {
            if path.is_empty() || path.starts_with(prefix) {
                continue;
            }
            let joined = if path.starts_with('/') {
                format!("{prefix}{path}")
            } else {
                format!("{prefix}/{path}")
            };
            node.data.webhook_path = Some(joined);
        }
    }
}

/// Global endpoint uniqueness: no two workflows may declare the same trigger
/// path (the current workflow is excluded on update).
async fn ensure_unique_endpoints(
    state: &AppState,
    workflow: &Workflow,
    exclude: Option<&str>,
) -> Result<(), ApiError> {
    for path in workflow.endpoint_paths() {
        let taken = state
            .storage
            .check_endpoint_exists(&path, exclude)
            .await
            .map_err(internal)?;
        if taken {
            return Err(api_error(
                StatusCode::CONFLICT,
                "endpoint_conflict",
                format!("endpoint path '{path}' is already declared by another workflow"),
            ));
        }
    }
    Ok(())
}

/// Persist, hot-reload the registry, and resync cron triggers
async fn commit_workflow(state: &AppState, workflow: &Workflow) -> Result<(), ApiError> {
    state.storage.save(workflow).await.map_err(internal)?;
    state
        .registry
        .reload_workflow(&workflow.id)
        .await
        .map_err(internal)?;
    state
        .scheduler
        .sync_workflow_triggers(workflow)
        .await
        .map_err(internal)?;
    Ok(())
}

async fn create_workflow(
    State(state): State<AppState>,
    Json(mut workflow): Json<Workflow>,
) -> Result<Json<WorkflowResponse>, ApiError> {
    if workflow.id.is_empty() || workflow.name.is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "invalid_workflow",
            "workflow id and name are required",
        ));
    }
    if state.storage.get(&workflow.id).await.map_err(internal)?.is_some() {
        return Err(api_error(
            StatusCode::CONFLICT,
            "exists",
            format!("workflow '{}' already exists", workflow.id),
        ));
    }

    let project = ensure_unlocked(&state, &workflow.project_id).await?;
    if let Some(project) = &project {
        apply_project_prefix(&mut workflow, project);
    }
    ensure_unique_endpoints(&state, &workflow, None).await?;

    if workflow.version <= 0 {
        workflow.version = 1;
    }
    commit_workflow(&state, &workflow).await?;

    tracing::info!(workflow_id = %workflow.id, "created workflow");
    Ok(Json(WorkflowResponse {
        id: workflow.id.clone(),
        message: format!("workflow '{}' created", workflow.name),
    }))
}

async fn list_workflows(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let workflows = state.storage.list().await.map_err(internal)?;
    Ok(Json(json!({"workflows": workflows})))
}

async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Workflow>, ApiError> {
    match state.storage.get(&id).await.map_err(internal)? {
        Some(workflow) => Ok(Json(workflow)),
        None => Err(api_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("workflow '{id}' does not exist"),
        )),
    }
}

async fn update_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut workflow): Json<Workflow>,
) -> Result<Json<WorkflowResponse>, ApiError> {
    workflow.id = id.clone();
    if workflow.name.is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "invalid_workflow",
            "workflow name is required",
        ));
    }

    let existing = state
        .storage
        .get(&id)
        .await
        .map_err(internal)?
        .ok_or_else(|| {
            api_error(StatusCode::NOT_FOUND, "not_found", format!("workflow '{id}' does not exist"))
        })?;

    // The lock applies to the project the workflow lives in, and to the one
    // it is being moved into
    ensure_unlocked(&state, &existing.project_id).await?;
    let project = if workflow.project_id != existing.project_id {
        ensure_unlocked(&state, &workflow.project_id).await?
    } else if !workflow.project_id.is_empty() {
        state.projects.get(&workflow.project_id).await.map_err(internal)?
    } else {
        None
    };

    if let Some(project) = &project {
        apply_project_prefix(&mut workflow, project);
    }
    ensure_unique_endpoints(&state, &workflow, Some(&id)).await?;

    workflow.version = existing.version + 1;
    commit_workflow(&state, &workflow).await?;

    tracing::info!(workflow_id = %id, version = workflow.version, "updated workflow");
    Ok(Json(WorkflowResponse {
        id,
        message: format!("workflow '{}' updated", workflow.name),
    }))
}

async fn delete_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let existing = state
        .storage
        .get(&id)
        .await
        .map_err(internal)?
        .ok_or_else(|| {
            api_error(StatusCode::NOT_FOUND, "not_found", format!("workflow '{id}' does not exist"))
        })?;
    ensure_unlocked(&state, &existing.project_id).await?;

    state.scheduler.remove_workflow_triggers(&id).await;
    state.registry.remove_workflow(&id);
    state.storage.delete(&id).await.map_err(internal)?;

    // Node schema side records may orphan here; they are never read without
    // their parent workflow
    tracing::info!(workflow_id = %id, "deleted workflow");
    Ok(Json(json!({"message": "workflow deleted"})))
}

async fn run_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: String,
) -> Result<Json<Value>, ApiError> {
    // Manual runs tolerate an empty or non-JSON body
    let input = serde_json::from_str(&body).unwrap_or_else(|_| json!({}));
    let request = RunRequest::new(id.clone(), TriggerKind::Manual, input);

    let execution = state
        .executor
        .run(request, CancellationToken::new())
        .await
        .map_err(|e| match e {
            crate::error::EngineError::WorkflowNotFound(_) => api_error(
                StatusCode::NOT_FOUND,
                "not_found",
                format!("workflow '{id}' is not loaded"),
            ),
            other => internal(other),
        })?;

    Ok(Json(json!({
        "executionId": execution.id,
        "status": execution.status.as_str(),
        "output": execution.output,
        "duration": execution.duration_ms,
    })))
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    page: Option<u32>,
    size: Option<u32>,
}

async fn list_executions(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Value>, ApiError> {
    let page = query.page.unwrap_or(1);
    let size = query.size.unwrap_or(20);
    let (items, total) = state
        .executions
        .list_by_workflow(&id, page, size)
        .await
        .map_err(internal)?;
    Ok(Json(json!({
        "items": items,
        "total": total,
        "page": page,
        "size": size,
    })))
}

#[derive(Debug, Deserialize)]
struct LatestQuery {
    n: Option<u32>,
}

async fn latest_executions(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LatestQuery>,
) -> Result<Json<Value>, ApiError> {
    let items = state
        .executions
        .latest(&id, query.n.unwrap_or(10))
        .await
        .map_err(internal)?;
    Ok(Json(json!({"items": items})))
}

async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    match state.executions.find_by_id(&id).await.map_err(internal)? {
        Some(execution) => Ok(Json(serde_json::to_value(execution).map_err(internal)?)),
        None => Err(api_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("execution '{id}' does not exist"),
        )),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateProjectRequest {
    id: Option<String>,
    name: String,
    version_tag: Option<String>,
    path_prefix: Option<String>,
}

async fn create_project(
    State(state): State<AppState>,
    Json(payload): Json<CreateProjectRequest>,
) -> Result<Json<Project>, ApiError> {
    if payload.name.is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "invalid_project",
            "project name is required",
        ));
    }
    let id = payload.id.unwrap_or_else(|| slug(&payload.name));
    if state.projects.get(&id).await.map_err(internal)?.is_some() {
        return Err(api_error(
            StatusCode::CONFLICT,
            "exists",
            format!("project '{id}' already exists"),
        ));
    }

    let mut project = Project::new(
        id,
        payload.name,
        payload.version_tag.unwrap_or_else(|| "v1".to_string()),
    );
    if let Some(prefix) = payload.path_prefix {
        project.path_prefix = prefix;
    }
    state.projects.save(&project).await.map_err(internal)?;
    tracing::info!(project_id = %project.id, "created project");
    Ok(Json(project))
}

async fn list_projects(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let projects = state.projects.list().await.map_err(internal)?;
    Ok(Json(json!({"projects": projects})))
}

async fn get_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Project>, ApiError> {
    match state.projects.get(&id).await.map_err(internal)? {
        Some(project) => Ok(Json(project)),
        None => Err(api_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("project '{id}' does not exist"),
        )),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PatchProjectRequest {
    name: Option<String>,
    version_tag: Option<String>,
    path_prefix: Option<String>,
    is_locked: Option<bool>,
}

async fn patch_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<PatchProjectRequest>,
) -> Result<Json<Project>, ApiError> {
    let mut project = state
        .projects
        .get(&id)
        .await
        .map_err(internal)?
        .ok_or_else(|| {
            api_error(StatusCode::NOT_FOUND, "not_found", format!("project '{id}' does not exist"))
        })?;

    if project.is_locked {
        // Unlocking is the only mutation a locked project accepts
        if payload.is_locked == Some(false)
            && payload.name.is_none()
            && payload.version_tag.is_none()
            && payload.path_prefix.is_none()
        {
            project.is_locked = false;
            state.projects.save(&project).await.map_err(internal)?;
            tracing::info!(project_id = %id, "unlocked project");
            return Ok(Json(project));
        }
        return Err(api_error(
            StatusCode::FORBIDDEN,
            "locked",
            format!("project '{id}' is locked"),
        ));
    }

    if let Some(name) = payload.name {
        project.name = name;
    }
    if let Some(version_tag) = payload.version_tag {
        project.version_tag = version_tag;
    }
    if let Some(path_prefix) = payload.path_prefix {
        project.path_prefix = path_prefix;
    }
    if let Some(is_locked) = payload.is_locked {
        project.is_locked = is_locked;
    }
    state.projects.save(&project).await.map_err(internal)?;
    Ok(Json(project))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PutNodeSchemaRequest {
    #[serde(default)]
    source_schema: Value,
    #[serde(default)]
    target_schema: Value,
    #[serde(default)]
    connections: Vec<crate::workflow::types::SchemaConnection>,
}

async fn put_node_schema(
    State(state): State<AppState>,
    Path((workflow_id, node_id)): Path<(String, String)>,
    Json(payload): Json<PutNodeSchemaRequest>,
) -> Result<Json<NodeSchema>, ApiError> {
    let schema = NodeSchema {
        workflow_id,
        node_id,
        source_schema: payload.source_schema,
        target_schema: payload.target_schema,
        connections: payload.connections,
    };
    state.schemas.upsert(&schema).await.map_err(internal)?;
    Ok(Json(schema))
}

async fn get_node_schema(
    State(state): State<AppState>,
    Path((workflow_id, node_id)): Path<(String, String)>,
) -> Result<Json<NodeSchema>, ApiError> {
    match state
        .schemas
        .get(&workflow_id, &node_id)
        .await
        .map_err(internal)?
    {
        Some(schema) => Ok(Json(schema)),
        None => Err(api_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no schema for node '{node_id}'"),
        )),
    }
}

async fn delete_node_schema(
    State(state): State<AppState>,
    Path((workflow_id, node_id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    state
        .schemas
        .delete(&workflow_id, &node_id)
        .await
        .map_err(internal)?;
    Ok(Json(json!({"message": "schema deleted"})))
}
