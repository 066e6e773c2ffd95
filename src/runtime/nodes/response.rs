//! Response node: assembles the terminal HTTP response
//!
//! Output is always `{statusCode, headers, body}`; the endpoint router
//! consumes these fields verbatim. Body selection priority: upstream error,
//! rendered template, selected-field projection, raw input. Template
//! rendering failures degrade into a structured 500 error body instead of
//! aborting the execution.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};

use crate::error::EngineError;
use crate::runtime::context::{ExecutionContext, LogEntry, LogLevel, NodeResult};
use crate::runtime::nodes::NodeBehavior;
use crate::runtime::path::{resolve_path, set_path};
use crate::runtime::template;
use crate::workflow::types::{ErrorConfig, ErrorTypeConfig, NodeData};

pub struct ResponseNode;

#[async_trait]
impl NodeBehavior for ResponseNode {
    fn type_tag(&self) -> &'static str {
        "response"
    }

    fn validate(&self, data: &NodeData) -> Result<(), EngineError> {
        if data.use_template && data.response_template.as_deref().unwrap_or("").is_empty() {
            return Err(EngineError::config(
                "responseTemplate",
                "useTemplate is set but the template is empty",
            ));
        }
        Ok(())
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        data: &NodeData,
    ) -> Result<NodeResult, EngineError> {
        let mut logs = Vec::new();

        // Upstream error routed in via an "error" port takes precedence
        if let Some(message) = &ctx.error {
            let error_type = classify_error(&ctx.input);
            let (status, body) =
                build_error_response(data, &error_type, message, &ctx.trace_id, &ctx.input);
            return Ok(shaped(status, data, body, logs));
        }

        if data.use_template {
            if let Some(template) = data.response_template.as_deref().filter(|t| !t.is_empty()) {
                match template::render(template, &ctx.input) {
                    Ok(body) => {
                        let status = data.status_code.unwrap_or(200);
                        return Ok(shaped(status, data, body, logs));
                    }
                    Err(e) => {
                        logs.push(LogEntry::new(
                            LogLevel::Error,
                            format!("response template failed: {e}"),
                        ));
                        let (status, body) = build_error_response(
                            data,
                            "template_error",
                            &e.to_string(),
                            &ctx.trace_id,
                            &ctx.input,
                        );
                        return Ok(shaped(status, data, body, logs));
                    }
                }
            }
        }

        if !data.selected_fields.is_empty() {
            let mut body = Map::new();
            for field in &data.selected_fields {
                let value = resolve_path(&ctx.input, &field.field_path);
                let target = field.alias.as_deref().unwrap_or(&field.field_path);
                set_path(&mut body, target, value);
            }
            let status = data.status_code.unwrap_or(200);
            return Ok(shaped(status, data, Value::Object(body), logs));
        }

        let status = data.status_code.unwrap_or(200);
        Ok(shaped(status, data, ctx.input.clone(), logs))
    }
}

fn shaped(status: u16, data: &NodeData, body: Value, logs: Vec<LogEntry>) -> NodeResult {
    let headers: Map<String, Value> = data
        .headers
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    let mut result = NodeResult::new(
        json!({
            "statusCode": status,
            "headers": headers,
            "body": body,
        }),
        "output",
    );
    result.logs = logs;
    result
}

/// Derive the error type from the upstream output when it carries a hint
/// (e.g., an HTTP node's 404), defaulting to a generic execution error.
fn classify_error(input: &Value) -> String {
    match input.get("statusCode").and_then(Value::as_u64) {
        Some(400) => "validation".to_string(),
        Some(401) => "unauthorized".to_string(),
        Some(403) => "forbidden".to_string(),
        Some(404) => "not_found".to_string(),
        _ => "execution_error".to_string(),
    }
}

/// Build the `{error, message, success, traceId?, timestamp}` body and pick
/// the status code: matching per-type sub-config, then the generic
/// `errorStatusCode`, then the default for the error type.
fn build_error_response(
    data: &NodeData,
    error_type: &str,
    message: &str,
    trace_id: &str,
    input: &Value,
) -> (u16, Value) {
    let config = data.error_config.clone().unwrap_or_default();
    let sub = sub_config(&config, error_type);

    let status = sub
        .as_ref()
        .and_then(|s| s.status_code)
        .or(config.error_status_code)
        .unwrap_or_else(|| default_status(error_type));

    let include_trace = config.include_trace_id != Some(false);
    let timestamp = Utc::now().to_rfc3339();

    let mut render_ctx = match input {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    render_ctx.insert("error".to_string(), json!(error_type));
    render_ctx.insert("message".to_string(), json!(message));
    render_ctx.insert("traceId".to_string(), json!(trace_id));
    render_ctx.insert("timestamp".to_string(), json!(timestamp));
    let render_ctx = Value::Object(render_ctx);

    let templated = sub
        .as_ref()
        .and_then(|s| s.template.as_deref())
        .filter(|t| !t.is_empty())
        .or_else(|| {
            if config.use_custom_template {
                config.error_template.as_deref().filter(|t| !t.is_empty())
            } else {
                None
            }
        })
        .and_then(|t| template::render(t, &render_ctx).ok());

    let body = templated.unwrap_or_else(|| {
        let mut body = Map::new();
        body.insert("error".to_string(), json!(error_type));
        body.insert("message".to_string(), json!(message));
        body.insert("success".to_string(), json!(false));
        if include_trace {
            body.insert("traceId".to_string(), json!(trace_id));
        }
        body.insert("timestamp".to_string(), json!(timestamp));
        Value::Object(body)
    });

    (status, body)
}

fn sub_config(config: &ErrorConfig, error_type: &str) -> Option<ErrorTypeConfig> {
    match error_type {
        "validation" => config.validation.clone(),
        "not_found" => config.not_found.clone(),
        "unauthorized" => config.unauthorized.clone(),
        "forbidden" => config.forbidden.clone(),
        _ => None,
    }
}

fn default_status(error_type: &str) -> u16 {
    match error_type {
        "validation" => 400,
        "unauthorized" => 401,
        "forbidden" => 403,
        "not_found" => 404,
        _ => 500,
    }
}
