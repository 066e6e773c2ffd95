//! Dynamic endpoint router
//!
//! Resolves inbound requests under `/webhook/*` and `/api/{version}/*` to an
//! active workflow via the registry's O(1) endpoint index, enforces the
//! trigger's declared method, shapes the execution input (tolerant body parse
//! plus a `_request` sub-mapping), runs the flow executor, and shapes the
//! HTTP response from the terminal node's `{statusCode, headers, body}`.
//!
//! Executions are spawned as detached tasks so a dropped connection cannot
//! abandon a half-finalized record: the drop guard cancels the token and the
//! task finalizes the execution as cancelled on its own.

use axum::{
    extract::{Path, Query, Request, State},
    http::{header::HeaderName, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::any,
    Router,
};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::runtime::context::{Execution, ExecutionStatus};
use crate::runtime::engine::{FlowExecutor, RunRequest};
use crate::workflow::registry::WorkflowRegistry;
use crate::workflow::types::{Node, TriggerKind};

#[derive(Clone)]
pub struct EndpointState {
    pub registry: Arc<WorkflowRegistry>,
    pub executor: Arc<FlowExecutor>,
}

/// Routes for the two dynamic path spaces
pub fn create_endpoint_routes() -> Router<EndpointState> {
    Router::new()
        .route("/webhook/{*path}", any(handle_webhook))
        .route("/api/{version}/{*path}", any(handle_versioned))
}

async fn handle_webhook(
    State(state): State<EndpointState>,
    Path(rest): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    request: Request,
) -> Response {
    let key = format!("/webhook/{rest}");
    dispatch(state, key, None, query, request).await
}

async fn handle_versioned(
    State(state): State<EndpointState>,
    Path((version, rest)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    request: Request,
) -> Response {
    let key = format!("/api/{version}/{rest}");
    dispatch(state, key, Some(version), query, request).await
}

async fn dispatch(
    state: EndpointState,
    key: String,
    version: Option<String>,
    query: HashMap<String, String>,
    request: Request,
) -> Response {
    let method = request.method().clone();
    let headers = request.headers().clone();
    let ip = request
        .extensions()
        .get::<axum::extract::ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_default();

    let Some(workflow_id) = state.registry.resolve_endpoint(&key) else {
        tracing::debug!(path = %key, "no active workflow for endpoint");
        return routing_error(&key);
    };
    let Some(compiled) = state.registry.get(&workflow_id) else {
        return routing_error(&key);
    };

    // Method restriction lives on the trigger node that owns the path
    let trigger = compiled
        .workflow
        .trigger_nodes()
        .find(|n| n.data.webhook_path.as_deref() == Some(key.as_str()))
        .or_else(|| compiled.workflow.trigger_nodes().next());
    if let Some(allowed) = trigger.and_then(declared_method) {
        if !allowed.eq_ignore_ascii_case(method.as_str()) {
            return (
                StatusCode::METHOD_NOT_ALLOWED,
                Json(json!({
                    "error": "method_not_allowed",
                    "message": format!("endpoint accepts {allowed}"),
                    "success": false,
                })),
            )
                .into_response();
        }
    }

    let body_bytes = match axum::body::to_bytes(request.into_body(), usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => Default::default(),
    };
    let input = shape_input(&body_bytes, &method, &key, &headers, &query, &ip, version);

    let mut run = RunRequest::new(workflow_id, TriggerKind::Webhook, input);
    run.trigger_path = Some(key.clone());

    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let executor = Arc::clone(&state.executor);
    let task = tokio::spawn(async move { executor.run(run, cancel).await });

    match task.await {
        Ok(Ok(execution)) => shape_response(execution),
        Ok(Err(EngineError::WorkflowNotFound(_))) => routing_error(&key),
        Ok(Err(e)) => {
            tracing::error!(path = %key, error = %e, "execution failed to start");
            execution_error_response(&e.to_string(), None)
        }
        Err(e) => {
            tracing::error!(path = %key, error = %e, "execution task panicked");
            execution_error_response("internal execution failure", None)
        }
    }
}

fn declared_method(trigger: &Node) -> Option<String> {
    trigger
        .data
        .webhook_method
        .as_deref()
        .filter(|m| !m.is_empty())
        .map(str::to_string)
}

/// Tolerant input shaping: JSON object body or empty mapping, plus the
/// `_request` sub-mapping with transport facts.
fn shape_input(
    body: &[u8],
    method: &Method,
    path: &str,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
    ip: &str,
    version: Option<String>,
) -> Value {
    let mut input = match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };

    let mut header_map = Map::new();
    for key in headers.keys() {
        if let Some(value) = headers.get(key).and_then(|v| v.to_str().ok()) {
            header_map.insert(key.to_string(), json!(value));
        }
    }

    let mut request_info = Map::new();
    request_info.insert("method".to_string(), json!(method.as_str()));
    request_info.insert("path".to_string(), json!(path));
    request_info.insert("headers".to_string(), Value::Object(header_map));
    request_info.insert("query".to_string(), json!(query));
    request_info.insert("ip".to_string(), json!(ip));
    if let Some(version) = version {
        request_info.insert("version".to_string(), json!(version));
    }
    input.insert("_request".to_string(), Value::Object(request_info));

    Value::Object(input)
}

/// Map a finalized execution onto the HTTP response
fn shape_response(execution: Execution) -> Response {
    match execution.status {
        ExecutionStatus::Completed => {
            let output = execution.output.clone().unwrap_or(Value::Null);
            let status = extract_status(&output).unwrap_or(200);
            let headers = extract_headers(&output);

            match output.get("body") {
                Some(body) => respond(status, headers, body.clone()),
                None => respond(status, headers, envelope(&execution)),
            }
        }
        ExecutionStatus::Cancelled => execution_error_response(
            "execution cancelled",
            execution.trace_id(),
        ),
        _ => {
            let message = execution
                .error
                .as_ref()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| "execution failed".to_string());
            execution_error_response(&message, execution.trace_id())
        }
    }
}

/// Synthetic envelope for terminal output without an explicit body
fn envelope(execution: &Execution) -> Value {
    json!({
        "executionId": execution.id,
        "status": execution.status.as_str(),
        "output": execution.output.clone().unwrap_or(Value::Null),
        "duration": execution.duration_ms.unwrap_or(0),
    })
}

/// statusCode may arrive as an integer or a float (e.g. 200.0)
fn extract_status(output: &Value) -> Option<u16> {
    match output.get("statusCode") {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().map(|f| f as u64))
            .map(|v| v as u16),
        _ => None,
    }
}

fn extract_headers(output: &Value) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(Value::Object(map)) = output.get("headers") {
        for (key, value) in map {
            let Some(value) = value.as_str() else { continue };
            if let (Ok(name), Ok(value)) = (
                key.parse::<HeaderName>(),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, value);
            }
        }
    }
    headers
}

fn respond(status: u16, headers: HeaderMap, body: Value) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
    (status, headers, Json(body)).into_response()
}

fn routing_error(path: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "not_found",
            "message": format!("no active workflow matches endpoint '{path}'"),
            "success": false,
        })),
    )
        .into_response()
}

fn execution_error_response(message: &str, trace_id: Option<&str>) -> Response {
    let mut body = Map::new();
    body.insert("error".to_string(), json!("execution_error"));
    body.insert("message".to_string(), json!(message));
    body.insert("success".to_string(), json!(false));
    if let Some(trace_id) = trace_id {
        body.insert("traceId".to_string(), json!(trace_id));
    }
    (StatusCode::INTERNAL_SERVER_ERROR, Json(Value::Object(body))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_accepts_integers_and_floats() {
        assert_eq!(extract_status(&json!({"statusCode": 201})), Some(201));
        assert_eq!(extract_status(&json!({"statusCode": 200.0})), Some(200));
        assert_eq!(extract_status(&json!({"statusCode": "200"})), None);
        assert_eq!(extract_status(&json!({})), None);
    }

    #[test]
    fn input_shaping_injects_request_and_tolerates_bad_bodies() {
        let mut headers = HeaderMap::new();
        headers.insert("x-token", HeaderValue::from_static("abc"));
        let query = HashMap::from([("a".to_string(), "1".to_string())]);

        let input = shape_input(
            br#"{"user": {"id": 7}}"#,
            &Method::POST,
            "/api/v1/echo",
            &headers,
            &query,
            "127.0.0.1",
            Some("v1".to_string()),
        );
        assert_eq!(input["user"]["id"], json!(7));
        assert_eq!(input["_request"]["method"], json!("POST"));
        assert_eq!(input["_request"]["path"], json!("/api/v1/echo"));
        assert_eq!(input["_request"]["headers"]["x-token"], json!("abc"));
        assert_eq!(input["_request"]["query"]["a"], json!("1"));
        assert_eq!(input["_request"]["version"], json!("v1"));

        let input = shape_input(
            b"{broken",
            &Method::GET,
            "/webhook/x",
            &HeaderMap::new(),
            &HashMap::new(),
            "",
            None,
        );
        assert_eq!(input["_request"]["path"], json!("/webhook/x"));
        assert!(input.as_object().unwrap().len() == 1);
    }
}
