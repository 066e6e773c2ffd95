//! Flow executor
//!
//! Orchestrates one execution: resolves the workflow and trigger, creates the
//! execution record (status=running, fresh traceId), walks the graph
//! iteratively following port-matched edges, appends a per-node trace entry
//! for every visit, and finalizes the record exactly once. The walk is
//! bounded by a step budget and a wall-clock timeout, and the whole execution
//! observes the caller's cancellation token.

use chrono::Utc;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::EngineError;
use crate::runtime::context::{
    Execution, ExecutionContext, ExecutionError, ExecutionStatus, NodeExecutionLog, NodeResult,
};
use crate::runtime::graph::FlowGraph;
use crate::runtime::nodes::{transform, NodeRegistry};
use crate::runtime::store::ExecutionStore;
use crate::workflow::registry::WorkflowRegistry;
use crate::workflow::storage::NodeSchemaStore;
use crate::workflow::types::{Node, TriggerKind, Workflow};

/// Inputs for one execution
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub workflow_id: String,
    pub trigger_type: TriggerKind,
    /// Endpoint path that triggered the run; selects the trigger node
    pub trigger_path: Option<String>,
    /// Exact trigger node to start from; used by the cron scheduler where no
    /// path exists to match on
    pub trigger_node_id: Option<String>,
    pub input: Value,
    /// Caller metadata merged into the record alongside the traceId
    pub metadata: Map<String, Value>,
}

impl RunRequest {
    pub fn new(workflow_id: impl Into<String>, trigger_type: TriggerKind, input: Value) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            trigger_type,
            trigger_path: None,
            trigger_node_id: None,
            input,
            metadata: Map::new(),
        }
    }
}

pub struct FlowExecutor {
    nodes: Arc<NodeRegistry>,
    workflows: Arc<WorkflowRegistry>,
    executions: ExecutionStore,
    schemas: NodeSchemaStore,
    step_budget: usize,
    execution_timeout: Duration,
}

impl FlowExecutor {
    pub fn new(
        nodes: Arc<NodeRegistry>,
        workflows: Arc<WorkflowRegistry>,
        executions: ExecutionStore,
        schemas: NodeSchemaStore,
        step_budget: usize,
        execution_timeout: Duration,
    ) -> Self {
        Self {
            nodes,
            workflows,
            executions,
            schemas,
            step_budget,
            execution_timeout,
        }
    }

    /// Run a workflow to completion and return the finalized execution
    /// record. Failures inside the walk finalize the record as failed (or
    /// cancelled) and still return `Ok`; only pre-record problems (unknown
    /// workflow, storage failure on create) surface as `Err`.
    pub async fn run(
        &self,
        request: RunRequest,
        cancel: CancellationToken,
    ) -> Result<Execution, EngineError> {
        let compiled = self
            .workflows
            .get(&request.workflow_id)
            .ok_or_else(|| EngineError::WorkflowNotFound(request.workflow_id.clone()))?;
        let workflow = &compiled.workflow;

        let trace_id = Uuid::new_v4().to_string();
        let mut metadata = request.metadata.clone();
        metadata.insert("traceId".to_string(), json!(trace_id));

        let mut execution = Execution {
            id: Uuid::new_v4().to_string(),
            workflow_id: workflow.id.clone(),
            workflow_name: workflow.name.clone(),
            status: ExecutionStatus::Running,
            trigger_type: request.trigger_type,
            trigger_path: request.trigger_path.clone(),
            input: request.input.clone(),
            output: None,
            error: None,
            node_logs: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            metadata,
        };
        self.executions.create(&execution).await?;

        tracing::info!(
            workflow_id = %workflow.id,
            execution_id = %execution.id,
            trace_id = %trace_id,
            trigger = request.trigger_type.as_str(),
            "starting execution"
        );

        let mut logs = Vec::new();
        let outcome = match self.resolve_start(workflow, &request) {
            Err(message) => Err(WalkFailure {
                node_id: String::new(),
                message,
                kind: FailureKind::Failed,
            }),
            Ok((graph, start)) => {
                let walk = self.walk(
                    workflow,
                    &graph,
                    start,
                    &request,
                    &execution.id,
                    &trace_id,
                    cancel.clone(),
                    &mut logs,
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(WalkFailure {
                        node_id: String::new(),
                        message: "execution cancelled".to_string(),
                        kind: FailureKind::Cancelled,
                    }),
                    result = tokio::time::timeout(self.execution_timeout, walk) => match result {
                        Ok(inner) => inner,
                        Err(_) => Err(WalkFailure {
                            node_id: String::new(),
                            message: format!(
                                "execution timed out after {:?}",
                                self.execution_timeout
                            ),
                            kind: FailureKind::Failed,
                        }),
                    },
                }
            }
        };

        execution.node_logs = logs;
        let completed_at = Utc::now();
        execution.completed_at = Some(completed_at);
        execution.duration_ms = Some((completed_at - execution.started_at).num_milliseconds());
        match outcome {
            Ok(output) => {
                execution.status = ExecutionStatus::Completed;
                execution.output = Some(output);
            }
            Err(failure) => {
                execution.status = match failure.kind {
                    FailureKind::Cancelled => ExecutionStatus::Cancelled,
                    FailureKind::Failed => ExecutionStatus::Failed,
                };
                execution.error = Some(ExecutionError {
                    node_id: failure.node_id,
                    message: failure.message,
                });
            }
        }

        // Finalization must reach the store even on failure paths; a write
        // error here must not lose the in-memory record
        if let Err(e) = self.executions.update(&execution).await {
            tracing::error!(
                execution_id = %execution.id,
                error = %e,
                "failed to persist execution finalization"
            );
        }

        tracing::info!(
            execution_id = %execution.id,
            trace_id = %trace_id,
            status = execution.status.as_str(),
            duration_ms = execution.duration_ms.unwrap_or(0),
            "execution finished"
        );
        Ok(execution)
    }

    /// Build the graph and pick the trigger node. With a trigger path, the
    /// first trigger whose webhookPath matches wins; a legacy endpoint match
    /// falls back to the first trigger in document order.
    fn resolve_start<'w>(
        &self,
        workflow: &'w Workflow,
        request: &RunRequest,
    ) -> Result<(FlowGraph, &'w Node), String> {
        let graph = FlowGraph::build(workflow).map_err(|e| e.to_string())?;

        if let Some(node_id) = &request.trigger_node_id {
            return match workflow.trigger_nodes().find(|n| &n.id == node_id) {
                Some(node) => Ok((graph, node)),
                None => Err("no trigger node found".to_string()),
            };
        }

        let trigger = match &request.trigger_path {
            Some(path) => workflow
                .trigger_nodes()
                .find(|n| n.data.webhook_path.as_deref() == Some(path.as_str()))
                .or_else(|| {
                    let legacy = workflow
                        .endpoint
                        .as_ref()
                        .map(|e| e.path == *path)
                        .unwrap_or(false);
                    if legacy {
                        workflow.trigger_nodes().next()
                    } else {
                        None
                    }
                }),
            None => workflow.trigger_nodes().next(),
        };

        match trigger {
            Some(node) => Ok((graph, node)),
            None => Err("no trigger node found".to_string()),
        }
    }

    /// Iterative graph walk; recursion converted to a loop with a visit
    /// counter so cycles hit the step budget instead of the stack.
    #[allow(clippy::too_many_arguments)]
    async fn walk(
        &self,
        workflow: &Workflow,
        graph: &FlowGraph,
        start: &Node,
        request: &RunRequest,
        execution_id: &str,
        trace_id: &str,
        cancel: CancellationToken,
        logs: &mut Vec<NodeExecutionLog>,
    ) -> Result<Value, WalkFailure> {
        let mut current = start;
        let mut input = request.input.clone();
        let mut previous_input = Value::Null;
        let mut upstream_error: Option<String> = None;
        let mut visits = 0usize;

        loop {
            visits += 1;
            if visits > self.step_budget {
                return Err(WalkFailure {
                    node_id: current.id.clone(),
                    message: format!("step budget exhausted after {} node visits", self.step_budget),
                    kind: FailureKind::Failed,
                });
            }

            let executor = self.nodes.get(&current.node_type).ok_or_else(|| WalkFailure {
                node_id: current.id.clone(),
                message: format!("no executor for type {}", current.node_type),
                kind: FailureKind::Failed,
            })?;

            let node_data = self.hydrate(workflow, current).await;

            let ctx = ExecutionContext {
                workflow_id: workflow.id.to_string(),
                execution_id: execution_id.to_string(),
                node_id: current.id.clone(),
                trace_id: trace_id.to_string(),
                input: input.clone(),
                trigger_input: request.input.clone(),
                previous_input: previous_input.clone(),
                variables: workflow.variables.clone(),
                error: upstream_error.clone(),
                cancel: cancel.clone(),
            };

            let started_at = Utc::now();
            let result = match executor.validate(&node_data) {
                Ok(()) => executor.execute(&ctx, &node_data).await,
                Err(e) => Err(e),
            };
            let completed_at = Utc::now();
            let duration_ms = (completed_at - started_at).num_milliseconds();

            tracing::debug!(
                trace_id = %trace_id,
                node_id = %current.id,
                node_type = %current.node_type,
                duration_ms,
                ok = result.is_ok(),
                "node visited"
            );

            let result: NodeResult = match result {
                Ok(result) => {
                    logs.push(NodeExecutionLog {
                        node_id: current.id.clone(),
                        node_type: current.node_type.clone(),
                        label: current.label.clone(),
                        status: ExecutionStatus::Completed,
                        input: input.clone(),
                        output: Some(result.output.clone()),
                        error: None,
                        started_at,
                        completed_at,
                        duration_ms,
                        entries: result.logs.clone(),
                    });
                    result
                }
                Err(e) => {
                    let message = e.to_string();
                    logs.push(NodeExecutionLog {
                        node_id: current.id.clone(),
                        node_type: current.node_type.clone(),
                        label: current.label.clone(),
                        status: ExecutionStatus::Failed,
                        input: input.clone(),
                        output: None,
                        error: Some(message.clone()),
                        started_at,
                        completed_at,
                        duration_ms,
                        entries: Vec::new(),
                    });
                    let kind = if matches!(e, EngineError::Cancelled) {
                        FailureKind::Cancelled
                    } else {
                        FailureKind::Failed
                    };
                    return Err(WalkFailure {
                        node_id: current.id.clone(),
                        message,
                        kind,
                    });
                }
            };

            // First stored edge whose handle is compatible with the port the
            // node actually returned
            let next_edge = graph.outgoing(&current.id).iter().find(|edge| {
                edge.source_handle.is_empty()
                    || result.next_port.is_empty()
                    || edge.source_handle == result.next_port
            });

            let edge = match next_edge {
                Some(edge) => edge,
                None => return Ok(result.output),
            };

            upstream_error = if result.next_port == "error" {
                Some(
                    result
                        .output
                        .get("error")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| {
                            format!("upstream node '{}' took the error port", current.id)
                        }),
                )
            } else {
                None
            };

            current = graph.node(&edge.target).ok_or_else(|| WalkFailure {
                node_id: current.id.clone(),
                message: format!("edge '{}' targets unknown node '{}'", edge.id, edge.target),
                kind: FailureKind::Failed,
            })?;
            previous_input = std::mem::replace(&mut input, result.output);
        }
    }

    /// Transform nodes get their mapping rules superseded by a NodeSchema
    /// side record when one exists with non-empty connections.
    async fn hydrate(&self, workflow: &Workflow, node: &Node) -> crate::workflow::types::NodeData {
        let mut data = node.data.clone();
        if node.node_type == "transform" {
            match self.schemas.get(&workflow.id, &node.id).await {
                Ok(schema) => {
                    data.mapping_rules = transform::effective_rules(
                        &data.mapping_rules,
                        schema.as_ref().map(|s| s.connections.as_slice()),
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        workflow_id = %workflow.id,
                        node_id = %node.id,
                        error = %e,
                        "failed to load node schema, using inline mapping rules"
                    );
                }
            }
        }
        data
    }
}

enum FailureKind {
    Failed,
    Cancelled,
}

struct WalkFailure {
    node_id: String,
    message: String,
    kind: FailureKind,
}
