//! Execution records and the per-node execution context
//!
//! An [`Execution`] is created with status `running` as soon as the workflow
//! is resolved and receives exactly one terminal update. Node-level results
//! and log entries accumulate on the record in node-visit order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::workflow::types::TriggerKind;

/// Execution lifecycle status; transitions form a DAG
/// (running → completed | failed | cancelled, no reopening).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }
}

/// One end-to-end run of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: String,
    pub workflow_id: String,
    pub workflow_name: String,
    pub status: ExecutionStatus,
    pub trigger_type: TriggerKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_path: Option<String>,
    /// Initial payload the execution started with
    #[serde(default)]
    pub input: Value,
    /// Final node output, set only on completed executions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
    /// Per-node trace in visit order
    #[serde(default)]
    pub node_logs: Vec<NodeExecutionLog>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    /// Carries the mandatory `traceId` plus caller-supplied metadata
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Execution {
    pub fn trace_id(&self) -> Option<&str> {
        self.metadata.get("traceId").and_then(|v| v.as_str())
    }
}

/// Top-level execution error: which node failed and why
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionError {
    pub node_id: String,
    pub message: String,
}

/// Trace entry for one node visit
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeExecutionLog {
    pub node_id: String,
    pub node_type: String,
    #[serde(default)]
    pub label: String,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
    /// Structured entries the executor emitted while running
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<LogEntry>,
}

/// Severity of a node-emitted log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One structured log line emitted by a node executor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: Utc::now(),
            data: None,
        }
    }

    pub fn with_data(level: LogLevel, message: impl Into<String>, data: Value) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: Utc::now(),
            data: Some(data),
        }
    }
}

/// What a node executor hands back on success
#[derive(Debug, Clone)]
pub struct NodeResult {
    /// Output mapping threaded to the next node as its input
    pub output: Value,
    /// Named output port used for edge selection; empty matches any edge
    pub next_port: String,
    /// Structured entries to append to the node's trace
    pub logs: Vec<LogEntry>,
}

impl NodeResult {
    pub fn new(output: Value, next_port: impl Into<String>) -> Self {
        Self {
            output,
            next_port: next_port.into(),
            logs: Vec::new(),
        }
    }
}

/// Context threaded explicitly through every node executor
///
/// No hidden task-local state: everything a node may consult travels here,
/// including the trace id for log correlation and the cancellation token
/// derived from the inbound request's lifecycle.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub workflow_id: String,
    pub execution_id: String,
    pub node_id: String,
    pub trace_id: String,
    /// Output of the previous node (or the trigger payload on the first node)
    pub input: Value,
    /// Original payload the execution started with
    pub trigger_input: Value,
    /// Input that was fed to the previous node
    pub previous_input: Value,
    /// Workflow-level variables
    pub variables: Map<String, Value>,
    /// Error bubbled along an upstream "error" port, if any
    pub error: Option<String>,
    pub cancel: CancellationToken,
}

impl ExecutionContext {
    pub fn new(workflow_id: String, execution_id: String, trace_id: String) -> Self {
        Self {
            workflow_id,
            execution_id,
            node_id: String::new(),
            trace_id,
            input: Value::Null,
            trigger_input: Value::Null,
            previous_input: Value::Null,
            variables: Map::new(),
            error: None,
            cancel: CancellationToken::new(),
        }
    }
}
