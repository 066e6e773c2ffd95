//! flowdeck: low-code integration backend
//!
//! A graph-directed workflow execution engine behind dynamically mounted HTTP
//! endpoints. Workflows are stored as JSON documents, hot-reloaded into a
//! lock-free registry, and executed by walking their node graph with typed
//! per-node executors and a per-node execution trace.

pub mod api;
pub mod config;
pub mod error;
pub mod runtime;
pub mod server;
pub mod workflow;

pub use config::Config;
pub use error::{EngineError, TemplateError};
pub use runtime::{Execution, ExecutionStatus, FlowExecutor, NodeRegistry, RunRequest};
pub use server::{create_app, create_app_with_pool, start_server};
pub use workflow::{Node, NodeData, Project, TriggerKind, Workflow, WorkflowRegistry, WorkflowStatus};
