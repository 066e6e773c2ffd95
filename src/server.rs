//! Server setup and initialization
//!
//! Wires storage, registry, node executors, flow executor, scheduler, and the
//! HTTP routes into one axum application.

use anyhow::Result;
use axum::{response::Json, routing::get, Router};
use serde_json::{json, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use crate::{
    api::{
        endpoints::{create_endpoint_routes, EndpointState},
        workflows::{create_management_routes, AppState},
    },
    config::Config,
    runtime::{
        engine::FlowExecutor, nodes::NodeRegistry, scheduler::CronSchedulerService,
        store::ExecutionStore,
    },
    workflow::{
        registry::WorkflowRegistry,
        storage::{NodeSchemaStore, ProjectStore, WorkflowStore},
    },
};

/// Build the full application router with all state wired up
pub async fn create_app(config: &Config) -> Result<Router> {
    let pool = connect(&config.database.url).await?;
    create_app_with_pool(config, pool).await
}

/// Variant that takes an existing pool; integration tests hand in an
/// in-memory database here.
pub async fn create_app_with_pool(config: &Config, pool: SqlitePool) -> Result<Router> {
    tracing::info!("📦 initializing document stores");
    let storage = WorkflowStore::new(pool.clone());
    storage.init_schema().await?;
    let projects = ProjectStore::new(pool.clone());
    projects.init_schema().await?;
    let schemas = NodeSchemaStore::new(pool.clone());
    schemas.init_schema().await?;
    let executions = ExecutionStore::new(pool);
    executions.init_schema().await?;

    tracing::info!("📊 initializing workflow registry");
    let registry = Arc::new(WorkflowRegistry::new(storage.clone()));
    registry.init_from_storage().await?;

    tracing::info!("⚙️ initializing node registry and flow executor");
    let nodes = Arc::new(NodeRegistry::with_builtin());
    let executor = Arc::new(FlowExecutor::new(
        nodes,
        Arc::clone(&registry),
        executions.clone(),
        schemas.clone(),
        config.engine.step_budget,
        Duration::from_secs(config.engine.execution_timeout_secs),
    ));

    tracing::info!("⏰ starting cron scheduler");
    let scheduler = Arc::new(
        CronSchedulerService::new(Arc::clone(&registry), Arc::clone(&executor)).await?,
    );
    {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move {
            if let Err(e) = scheduler.start().await {
                tracing::error!(error = %e, "cron scheduler failed to start");
            }
        });
    }

    let app_state = AppState {
        storage,
        projects,
        schemas,
        executions,
        registry: Arc::clone(&registry),
        scheduler,
        executor: Arc::clone(&executor),
    };
    let endpoint_state = EndpointState { registry, executor };

    let app = Router::new()
        .route("/health", get(health))
        .merge(create_management_routes().with_state(app_state))
        .merge(create_endpoint_routes().with_state(endpoint_state));

    tracing::info!("✅ application initialized");
    Ok(app)
}

/// Start the HTTP server
pub async fn start_server(config: Config) -> Result<()> {
    let app = create_app(&config).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("🚀 listening on http://{bind_addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

async fn connect(url: &str) -> Result<SqlitePool> {
    if let Some(path) = url
        .strip_prefix("sqlite://")
        .filter(|p| !p.starts_with(':') && !p.is_empty())
    {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    Ok(SqlitePool::connect_with(options).await?)
}

/// Liveness probe
async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}
