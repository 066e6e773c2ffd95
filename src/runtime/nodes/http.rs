//! HTTP node: outbound request with response/error fan-out
//!
//! URL, headers, and body support `{{var}}` interpolation from the current
//! input. Responses with status < 400 leave through the `"response"` port;
//! HTTP errors and transport failures leave through `"error"`, so workflows
//! can route failure handling explicitly instead of aborting.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::EngineError;
use crate::runtime::context::{ExecutionContext, LogEntry, LogLevel, NodeResult};
use crate::runtime::nodes::NodeBehavior;
use crate::runtime::template::interpolate;
use crate::workflow::types::NodeData;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpNode {
    client: reqwest::Client,
}

impl HttpNode {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

impl Default for HttpNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeBehavior for HttpNode {
    fn type_tag(&self) -> &'static str {
        "http"
    }

    fn validate(&self, data: &NodeData) -> Result<(), EngineError> {
        if data.url.as_deref().unwrap_or("").is_empty() {
            return Err(EngineError::config("url", "http node requires a url"));
        }
        Ok(())
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        data: &NodeData,
    ) -> Result<NodeResult, EngineError> {
        let method = data
            .method
            .as_deref()
            .unwrap_or("GET")
            .to_uppercase();
        let url = interpolate(data.url.as_deref().unwrap_or(""), &ctx.input);

        let mut request = match method.as_str() {
            "GET" => self.client.get(&url),
            "POST" => self.client.post(&url),
            "PUT" => self.client.put(&url),
            "DELETE" => self.client.delete(&url),
            "PATCH" => self.client.patch(&url),
            "HEAD" => self.client.head(&url),
            other => {
                return Err(EngineError::node(
                    ctx.node_id.clone(),
                    format!("unsupported HTTP method: {other}"),
                ))
            }
        };

        let mut has_content_type = false;
        for (key, value) in &data.headers {
            if key.eq_ignore_ascii_case("content-type") {
                has_content_type = true;
            }
            request = request.header(key, interpolate(value, &ctx.input));
        }
        if !has_content_type {
            request = request.header("Content-Type", "application/json");
        }

        match &data.body {
            Some(body) => {
                request = request.body(interpolate(body, &ctx.input));
            }
            // No explicit body: non-GET/DELETE requests carry the input
            None if method != "GET" && method != "DELETE" => {
                request = request.json(&ctx.input);
            }
            None => {}
        }

        let response = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(EngineError::Cancelled),
            result = request.send() => result,
        };

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                let message = e.to_string();
                let mut result =
                    NodeResult::new(json!({"error": message.clone()}), "error");
                result.logs.push(LogEntry::new(
                    LogLevel::Error,
                    format!("{method} {url} transport failure: {message}"),
                ));
                return Ok(result);
            }
        };

        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
            .collect();

        let text = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(EngineError::Cancelled),
            result = response.text() => result.map_err(|e| {
                EngineError::node(ctx.node_id.clone(), format!("failed to read response body: {e}"))
            })?,
        };
        let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

        let mut output = Map::new();
        output.insert("statusCode".to_string(), json!(status));
        output.insert("headers".to_string(), json!(headers));
        output.insert("body".to_string(), body);

        let next_port = if status < 400 { "response" } else { "error" };
        let mut result = NodeResult::new(Value::Object(output), next_port);
        result.logs.push(LogEntry::new(
            LogLevel::Info,
            format!("{method} {url} -> {status}"),
        ));
        Ok(result)
    }
}
