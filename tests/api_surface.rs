//! HTTP surface tests: routing, method enforcement, uniqueness, project
//! locks, and response shaping, driven through the full axum router.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use tower::ServiceExt;

use flowdeck::config::Config;
use flowdeck::server::create_app_with_pool;

async fn test_app() -> Router {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let config = Config::default();
    create_app_with_pool(&config, pool).await.unwrap()
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = match body {
        Some(body) => Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn echo_workflow(id: &str, path: &str) -> Value {
    json!({
        "id": id,
        "name": id,
        "status": "active",
        "nodes": [
            {
                "id": "t1", "type": "trigger",
                "data": {"triggerType": "webhook", "webhookPath": path, "webhookMethod": "POST"}
            },
            {
                "id": "x1", "type": "transform",
                "data": {"mappingRules": [{"sourceField": "user.email", "targetField": "email"}]}
            },
            {
                "id": "r1", "type": "response",
                "data": {"statusCode": 200, "selectedFields": [{"fieldPath": "email"}]}
            }
        ],
        "edges": [
            {"id": "e1", "source": "t1", "target": "x1"},
            {"id": "e2", "source": "x1", "target": "r1"}
        ]
    })
}

#[tokio::test]
async fn health_probe() {
    let app = test_app().await;
    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn webhook_dispatch_end_to_end() {
    let app = test_app().await;

    let (status, _) = send(
        &app,
        "POST",
        "/api/workflows",
        Some(echo_workflow("wf-echo", "/api/v1/echo")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/echo",
        Some(json!({"user": {"email": "a@b.com"}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"email": "a@b.com"}));
}

#[tokio::test]
async fn method_mismatch_is_405() {
    let app = test_app().await;
    send(
        &app,
        "POST",
        "/api/workflows",
        Some(echo_workflow("wf-echo", "/api/v1/echo")),
    )
    .await;

    let (status, body) = send(&app, "GET", "/api/v1/echo", None).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body["error"], json!("method_not_allowed"));
}

#[tokio::test]
async fn unknown_endpoint_is_404() {
    let app = test_app().await;
    let (status, body) = send(&app, "POST", "/api/v1/nothing-here", Some(json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], json!("not_found"));
}

#[tokio::test]
async fn invalid_body_becomes_empty_input() {
    let app = test_app().await;
    send(
        &app,
        "POST",
        "/api/workflows",
        Some(echo_workflow("wf-echo", "/api/v1/echo")),
    )
    .await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/echo")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    // The workflow still runs; the selected field is simply null
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn terminal_output_without_body_returns_envelope() {
    let app = test_app().await;
    let workflow = json!({
        "id": "wf-code",
        "name": "code only",
        "status": "active",
        "nodes": [
            {"id": "t1", "type": "trigger", "data": {"triggerType": "webhook", "webhookPath": "/webhook/code"}},
            {"id": "c1", "type": "code", "data": {"expression": "user.name"}}
        ],
        "edges": [{"id": "e1", "source": "t1", "target": "c1"}]
    });
    send(&app, "POST", "/api/workflows", Some(workflow)).await;

    let (status, body) = send(
        &app,
        "POST",
        "/webhook/code",
        Some(json!({"user": {"name": "ada"}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("completed"));
    assert_eq!(body["output"], json!("ada"));
    assert!(body["executionId"].as_str().is_some());
    assert!(body["duration"].as_i64().is_some());
}

#[tokio::test]
async fn duplicate_endpoint_path_conflicts() {
    let app = test_app().await;

    let (status, _) = send(
        &app,
        "POST",
        "/api/workflows",
        Some(echo_workflow("wf-a", "/api/v1/x")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &app,
        "POST",
        "/api/workflows",
        Some(echo_workflow("wf-b", "/api/v1/x")),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], json!("endpoint_conflict"));

    // Updating A itself with the same path stays allowed
    let (status, _) = send(
        &app,
        "PUT",
        "/api/workflows/wf-a",
        Some(echo_workflow("wf-a", "/api/v1/x")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn locked_project_rejects_workflow_writes() {
    let app = test_app().await;

    let (status, project) = send(
        &app,
        "POST",
        "/api/projects",
        Some(json!({"id": "p1", "name": "Orders", "versionTag": "v1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(project["pathPrefix"], json!("/api/orders/v1"));

    let mut workflow = echo_workflow("wf-locked", "/echo");
    workflow["projectId"] = json!("p1");
    let (status, _) = send(&app, "POST", "/api/workflows", Some(workflow.clone())).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &app,
        "PATCH",
        "/api/projects/p1",
        Some(json!({"isLocked": true})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Updates inside the locked project are forbidden
    let (status, body) = send(&app, "PUT", "/api/workflows/wf-locked", Some(workflow.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], json!("locked"));

    // Creating and deleting are forbidden too
    let mut another = echo_workflow("wf-locked-2", "/echo2");
    another["projectId"] = json!("p1");
    let (status, _) = send(&app, "POST", "/api/workflows", Some(another)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send(&app, "DELETE", "/api/workflows/wf-locked", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // A locked project refuses every mutation except unlocking
    let (status, _) = send(
        &app,
        "PATCH",
        "/api/projects/p1",
        Some(json!({"name": "Renamed"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send(
        &app,
        "PATCH",
        "/api/projects/p1",
        Some(json!({"isLocked": false})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Unlocked again: updates pass
    let (status, _) = send(&app, "PUT", "/api/workflows/wf-locked", Some(workflow)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn trigger_paths_are_auto_prefixed_and_routable() {
    let app = test_app().await;
    send(
        &app,
        "POST",
        "/api/projects",
        Some(json!({"id": "p2", "name": "Billing", "versionTag": "v2"})),
    )
    .await;

    let mut workflow = echo_workflow("wf-billing", "/invoice");
    workflow["projectId"] = json!("p2");
    let (status, _) = send(&app, "POST", "/api/workflows", Some(workflow)).await;
    assert_eq!(status, StatusCode::OK);

    // The stored trigger path gained the project prefix
    let (_, stored) = send(&app, "GET", "/api/workflows/wf-billing", None).await;
    assert_eq!(
        stored["nodes"][0]["data"]["webhookPath"],
        json!("/api/billing/v2/invoice")
    );

    let (status, body) = send(
        &app,
        "POST",
        "/api/billing/v2/invoice",
        Some(json!({"user": {"email": "pay@b.com"}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"email": "pay@b.com"}));
}

#[tokio::test]
async fn manual_run_and_execution_records() {
    let app = test_app().await;
    send(
        &app,
        "POST",
        "/api/workflows",
        Some(echo_workflow("wf-echo", "/api/v1/echo")),
    )
    .await;

    let (status, run) = send(
        &app,
        "POST",
        "/api/workflows/wf-echo/run",
        Some(json!({"user": {"email": "m@b.com"}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(run["status"], json!("completed"));
    let execution_id = run["executionId"].as_str().unwrap().to_string();

    let (status, execution) =
        send(&app, "GET", &format!("/api/executions/{execution_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(execution["workflowId"], json!("wf-echo"));
    assert_eq!(execution["nodeLogs"].as_array().unwrap().len(), 3);
    assert!(execution["metadata"]["traceId"].as_str().is_some());

    let (status, list) = send(
        &app,
        "GET",
        "/api/workflows/wf-echo/executions?page=1&size=10",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["total"], json!(1));

    let (status, latest) = send(
        &app,
        "GET",
        "/api/workflows/wf-echo/executions/latest?n=5",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(latest["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn node_schema_api_roundtrip() {
    let app = test_app().await;
    send(
        &app,
        "POST",
        "/api/workflows",
        Some(echo_workflow("wf-echo", "/api/v1/echo")),
    )
    .await;

    let (status, schema) = send(
        &app,
        "PUT",
        "/api/workflows/wf-echo/nodes/x1/schema",
        Some(json!({
            "connections": [{"sourceField": "user.email", "targetField": "contact"}]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(schema["workflowId"], json!("wf-echo"));

    // The schema supersedes the inline rules on the next run
    let (_, run) = send(
        &app,
        "POST",
        "/api/workflows/wf-echo/run",
        Some(json!({"user": {"email": "s@b.com"}})),
    )
    .await;
    assert_eq!(run["status"], json!("completed"));
    assert_eq!(run["output"]["body"], json!({"email": null}));

    let (status, _) = send(
        &app,
        "DELETE",
        "/api/workflows/wf-echo/nodes/x1/schema",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, "GET", "/api/workflows/wf-echo/nodes/x1/schema", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn inactive_workflows_do_not_route() {
    let app = test_app().await;
    let mut workflow = echo_workflow("wf-draft", "/api/v1/draft");
    workflow["status"] = json!("draft");
    send(&app, "POST", "/api/workflows", Some(workflow)).await;

    let (status, _) = send(&app, "POST", "/api/v1/draft", Some(json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
