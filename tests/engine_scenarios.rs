//! End-to-end flow executor scenarios against an in-memory document store

use serde_json::{json, Value};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use flowdeck::runtime::engine::{FlowExecutor, RunRequest};
use flowdeck::runtime::nodes::NodeRegistry;
use flowdeck::runtime::store::ExecutionStore;
use flowdeck::runtime::ExecutionStatus;
use flowdeck::workflow::registry::WorkflowRegistry;
use flowdeck::workflow::storage::{NodeSchemaStore, WorkflowStore};
use flowdeck::workflow::types::{NodeSchema, TriggerKind, Workflow};

struct Harness {
    executor: Arc<FlowExecutor>,
    executions: ExecutionStore,
    schemas: NodeSchemaStore,
}

async fn memory_pool() -> SqlitePool {
    // A single connection keeps every store on the same in-memory database
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap()
}

async fn harness_with(workflows: Vec<Value>) -> Harness {
    harness_with_budget(workflows, 1000).await
}

async fn harness_with_budget(workflows: Vec<Value>, step_budget: usize) -> Harness {
    let pool = memory_pool().await;
    let storage = WorkflowStore::new(pool.clone());
    storage.init_schema().await.unwrap();
    let schemas = NodeSchemaStore::new(pool.clone());
    schemas.init_schema().await.unwrap();
    let executions = ExecutionStore::new(pool);
    executions.init_schema().await.unwrap();

    for raw in workflows {
        let workflow: Workflow = serde_json::from_value(raw).unwrap();
        storage.save(&workflow).await.unwrap();
    }

    let registry = Arc::new(WorkflowRegistry::new(storage));
    registry.init_from_storage().await.unwrap();

    let executor = Arc::new(FlowExecutor::new(
        Arc::new(NodeRegistry::with_builtin()),
        registry,
        executions.clone(),
        schemas.clone(),
        step_budget,
        Duration::from_secs(30),
    ));
    Harness {
        executor,
        executions,
        schemas,
    }
}

fn echo_workflow() -> Value {
    json!({
        "id": "wf-echo",
        "name": "echo",
        "status": "active",
        "nodes": [
            {
                "id": "t1", "type": "trigger", "label": "Webhook",
                "data": {"triggerType": "webhook", "webhookPath": "/api/v1/echo", "webhookMethod": "POST"}
            },
            {
                "id": "x1", "type": "transform", "label": "Pick email",
                "data": {"mappingRules": [{"sourceField": "user.email", "targetField": "email"}]}
            },
            {
                "id": "r1", "type": "response", "label": "Reply",
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
async fn linear_transform_and_response() {
    let harness = harness_with(vec![echo_workflow()]).await;

    let mut request = RunRequest::new(
        "wf-echo",
        TriggerKind::Webhook,
        json!({"user": {"email": "a@b.com"}}),
    );
    request.trigger_path = Some("/api/v1/echo".to_string());

    let execution = harness
        .executor
        .run(request, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    let output = execution.output.clone().unwrap();
    assert_eq!(output["statusCode"], json!(200));
    assert_eq!(output["body"], json!({"email": "a@b.com"}));
    assert_eq!(execution.node_logs.len(), 3);
    assert_eq!(execution.node_logs[0].node_id, "t1");
    assert_eq!(execution.node_logs[1].node_id, "x1");
    assert_eq!(execution.node_logs[2].node_id, "r1");

    // The persisted record carries the same terminal state
    let stored = harness
        .executions
        .find_by_id(&execution.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, ExecutionStatus::Completed);
    assert_eq!(stored.node_logs.len(), 3);
}

#[tokio::test]
async fn execution_record_invariants_hold() {
    let harness = harness_with(vec![echo_workflow()]).await;

    let mut request = RunRequest::new(
        "wf-echo",
        TriggerKind::Webhook,
        json!({"user": {"email": "a@b.com"}}),
    );
    request.trigger_path = Some("/api/v1/echo".to_string());
    let execution = harness
        .executor
        .run(request, CancellationToken::new())
        .await
        .unwrap();

    // traceId is a well-formed UUID generated for this execution
    let trace_id = execution.trace_id().unwrap();
    assert!(Uuid::parse_str(trace_id).is_ok());

    // startedAt <= completedAt and duration matches within tolerance
    let completed_at = execution.completed_at.unwrap();
    assert!(execution.started_at <= completed_at);
    let expected = (completed_at - execution.started_at).num_milliseconds();
    let recorded = execution.duration_ms.unwrap();
    assert!((recorded - expected).abs() <= 1);
    assert!(execution.status.is_terminal());
}

#[tokio::test]
async fn condition_branch_takes_false_port() {
    let workflow = json!({
        "id": "wf-branch",
        "name": "branch",
        "status": "active",
        "nodes": [
            {"id": "t1", "type": "trigger", "data": {"triggerType": "webhook", "webhookPath": "/api/v1/branch"}},
            {
                "id": "c1", "type": "condition",
                "data": {"conditions": [{"field": "n", "operator": "gt", "value": 10, "outputPortId": "big"}]}
            },
            {"id": "resp-a", "type": "response", "data": {"statusCode": 200}},
            {"id": "resp-b", "type": "response", "data": {"statusCode": 400}}
        ],
        "edges": [
            {"id": "e1", "source": "t1", "target": "c1"},
            {"id": "e2", "source": "c1", "target": "resp-a", "sourceHandle": "big"},
            {"id": "e3", "source": "c1", "target": "resp-b", "sourceHandle": "false"}
        ]
    });
    let harness = harness_with(vec![workflow]).await;

    let request = RunRequest::new("wf-branch", TriggerKind::Manual, json!({"n": 7}));
    let execution = harness
        .executor
        .run(request, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.output.clone().unwrap()["statusCode"], json!(400));
    let visited: Vec<&str> = execution
        .node_logs
        .iter()
        .map(|l| l.node_id.as_str())
        .collect();
    assert!(visited.contains(&"resp-b"));
    assert!(!visited.contains(&"resp-a"));
}

#[tokio::test]
async fn edge_selection_is_deterministic() {
    let workflow = json!({
        "id": "wf-det",
        "name": "deterministic",
        "status": "active",
        "nodes": [
            {"id": "t1", "type": "trigger", "data": {}},
            // Two edges both match an empty handle; the first stored wins
            {"id": "r1", "type": "response", "data": {"statusCode": 201}},
            {"id": "r2", "type": "response", "data": {"statusCode": 202}}
        ],
        "edges": [
            {"id": "e1", "source": "t1", "target": "r1"},
            {"id": "e2", "source": "t1", "target": "r2"}
        ]
    });
    let harness = harness_with(vec![workflow]).await;

    for _ in 0..3 {
        let request = RunRequest::new("wf-det", TriggerKind::Manual, json!({}));
        let execution = harness
            .executor
            .run(request, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(execution.output.clone().unwrap()["statusCode"], json!(201));
    }
}

#[tokio::test]
async fn http_error_fans_out_to_error_response() {
    let workflow = json!({
        "id": "wf-fanout",
        "name": "fanout",
        "status": "active",
        "nodes": [
            {"id": "t1", "type": "trigger", "data": {"triggerType": "webhook", "webhookPath": "/api/v1/fanout"}},
            {
                "id": "h1", "type": "http",
                "data": {"url": "http://127.0.0.1:1/", "method": "GET"}
            },
            {"id": "ok", "type": "response", "data": {"statusCode": 200}},
            {
                "id": "bad", "type": "response",
                "data": {"statusCode": 502, "errorConfig": {"errorStatusCode": 502}}
            }
        ],
        "edges": [
            {"id": "e1", "source": "t1", "target": "h1"},
            {"id": "e2", "source": "h1", "target": "ok", "sourceHandle": "response"},
            {"id": "e3", "source": "h1", "target": "bad", "sourceHandle": "error"}
        ]
    });
    let harness = harness_with(vec![workflow]).await;

    let request = RunRequest::new("wf-fanout", TriggerKind::Manual, json!({}));
    let execution = harness
        .executor
        .run(request, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    let output = execution.output.clone().unwrap();
    assert_eq!(output["statusCode"], json!(502));
    assert_eq!(output["body"]["success"], json!(false));
    assert!(output["body"]["traceId"].as_str().is_some());
}

#[tokio::test]
async fn template_response_with_each_and_unless() {
    let workflow = json!({
        "id": "wf-template",
        "name": "template",
        "status": "active",
        "nodes": [
            {"id": "t1", "type": "trigger", "data": {}},
            {
                "id": "r1", "type": "response",
                "data": {
                    "useTemplate": true,
                    "responseTemplate": "{\"items\":[{{#each rows}}{\"v\":{{v}}}{{#unless @last}},{{/unless}}{{/each}}]}"
                }
            }
        ],
        "edges": [{"id": "e1", "source": "t1", "target": "r1"}]
    });
    let harness = harness_with(vec![workflow]).await;

    let request = RunRequest::new(
        "wf-template",
        TriggerKind::Manual,
        json!({"rows": [{"v": 1}, {"v": 2}]}),
    );
    let execution = harness
        .executor
        .run(request, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(
        execution.output.clone().unwrap()["body"],
        json!({"items": [{"v": 1}, {"v": 2}]})
    );
}

#[tokio::test]
async fn node_schema_supersedes_inline_mapping_rules() {
    let harness = harness_with(vec![echo_workflow()]).await;
    let schema: NodeSchema = serde_json::from_value(json!({
        "workflowId": "wf-echo",
        "nodeId": "x1",
        "connections": [
            {"sourceField": "user.email", "targetField": "contact"}
        ]
    }))
    .unwrap();
    harness.schemas.upsert(&schema).await.unwrap();

    let mut request = RunRequest::new(
        "wf-echo",
        TriggerKind::Webhook,
        json!({"user": {"email": "a@b.com"}}),
    );
    request.trigger_path = Some("/api/v1/echo".to_string());
    let execution = harness
        .executor
        .run(request, CancellationToken::new())
        .await
        .unwrap();

    // The transform produced {contact: ...}, so the response's selected
    // "email" field resolves to null
    let transform_log = execution
        .node_logs
        .iter()
        .find(|l| l.node_id == "x1")
        .unwrap();
    assert_eq!(
        transform_log.output.clone().unwrap(),
        json!({"contact": "a@b.com"})
    );
}

#[tokio::test]
async fn cyclic_workflow_exhausts_step_budget() {
    let workflow = json!({
        "id": "wf-cycle",
        "name": "cycle",
        "status": "active",
        "nodes": [
            {"id": "t1", "type": "trigger", "data": {}},
            {"id": "c1", "type": "code", "data": {"expression": "x"}}
        ],
        "edges": [
            {"id": "e1", "source": "t1", "target": "c1"},
            {"id": "e2", "source": "c1", "target": "c1"}
        ]
    });
    let harness = harness_with_budget(vec![workflow], 25).await;

    let request = RunRequest::new("wf-cycle", TriggerKind::Manual, json!({"x": 1}));
    let execution = harness
        .executor
        .run(request, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    let error = execution.error.clone().unwrap();
    assert!(error.message.contains("step budget exhausted"));
}

#[tokio::test]
async fn workflow_without_trigger_fails_cleanly() {
    let workflow = json!({
        "id": "wf-no-trigger",
        "name": "no trigger",
        "status": "active",
        "nodes": [{"id": "r1", "type": "response", "data": {}}],
        "edges": []
    });
    let harness = harness_with(vec![workflow]).await;

    let request = RunRequest::new("wf-no-trigger", TriggerKind::Manual, json!({}));
    let execution = harness
        .executor
        .run(request, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(
        execution.error.clone().unwrap().message,
        "no trigger node found"
    );
    assert!(execution.node_logs.is_empty());
}

#[tokio::test]
async fn unknown_node_type_fails_the_execution() {
    let workflow = json!({
        "id": "wf-unknown",
        "name": "unknown",
        "status": "active",
        "nodes": [
            {"id": "t1", "type": "trigger", "data": {}},
            {"id": "m1", "type": "custom_mystery", "data": {}}
        ],
        "edges": [{"id": "e1", "source": "t1", "target": "m1"}]
    });
    let harness = harness_with(vec![workflow]).await;

    let request = RunRequest::new("wf-unknown", TriggerKind::Manual, json!({}));
    let execution = harness
        .executor
        .run(request, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution
        .error
        .clone()
        .unwrap()
        .message
        .contains("no executor for type custom_mystery"));
}

#[tokio::test]
async fn cancellation_finalizes_as_cancelled() {
    let workflow = json!({
        "id": "wf-slow",
        "name": "slow",
        "status": "active",
        "nodes": [
            {"id": "t1", "type": "trigger", "data": {}},
            {"id": "d1", "type": "delay", "data": {"customConfig": {"duration": 60000}}},
            {"id": "r1", "type": "response", "data": {}}
        ],
        "edges": [
            {"id": "e1", "source": "t1", "target": "d1"},
            {"id": "e2", "source": "d1", "target": "r1"}
        ]
    });
    let harness = harness_with(vec![workflow]).await;

    let cancel = CancellationToken::new();
    let trigger_cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger_cancel.cancel();
    });

    let request = RunRequest::new("wf-slow", TriggerKind::Manual, json!({}));
    let execution = harness.executor.run(request, cancel).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Cancelled);
    // The terminal write still reached the store
    let stored = harness
        .executions
        .find_by_id(&execution.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, ExecutionStatus::Cancelled);
}

#[tokio::test]
async fn executions_are_listed_newest_first() {
    let harness = harness_with(vec![echo_workflow()]).await;
    for i in 0..3 {
        let mut request = RunRequest::new(
            "wf-echo",
            TriggerKind::Manual,
            json!({"user": {"email": format!("u{i}@b.com")}}),
        );
        request.trigger_path = Some("/api/v1/echo".to_string());
        harness
            .executor
            .run(request, CancellationToken::new())
            .await
            .unwrap();
    }

    let (items, total) = harness
        .executions
        .list_by_workflow("wf-echo", 1, 2)
        .await
        .unwrap();
    assert_eq!(total, 3);
    assert_eq!(items.len(), 2);
    assert!(items[0].started_at >= items[1].started_at);

    let latest = harness.executions.latest("wf-echo", 1).await.unwrap();
    assert_eq!(latest.len(), 1);
}
