//! Engine error taxonomy
//!
//! Typed errors for everything the flow executor can surface. Storage and API
//! layers stay on `anyhow` and convert at the boundary.

use std::time::Duration;
use thiserror::Error;

/// Template rendering failure; the response node converts this into a
/// structured 500 error body, everywhere else it aborts the node.
#[derive(Debug, Clone, Error)]
#[error("template rendering failed: {0}")]
pub struct TemplateError(pub String);

#[derive(Debug, Error)]
pub enum EngineError {
    /// Node configuration rejected by the executor's validate step
    #[error("invalid node configuration: {field}: {reason}")]
    Config { field: String, reason: String },

    /// Executor raised during run; aborts the execution
    #[error("node '{node_id}' failed: {message}")]
    NodeExecution { node_id: String, message: String },

    #[error(transparent)]
    Template(#[from] TemplateError),

    /// No active workflow matches the requested endpoint path
    #[error("no active workflow matches endpoint '{0}'")]
    Routing(String),

    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    /// Per-execution wall clock exceeded
    #[error("execution timed out after {0:?}")]
    Timeout(Duration),

    /// Per-execution node-visit budget exceeded
    #[error("step budget exhausted after {0} node visits")]
    StepBudget(usize),

    /// Execution cancelled by the caller (request dropped, shutdown)
    #[error("execution cancelled")]
    Cancelled,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl EngineError {
    pub fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::Config {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn node(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::NodeExecution {
            node_id: node_id.into(),
            message: message.into(),
        }
    }
}
