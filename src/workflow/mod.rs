//! Workflow management layer: definitions, persistence, and the hot-reload
//! registry with the endpoint index.

pub mod registry;
pub mod storage;
pub mod types;

pub use registry::{CompiledWorkflow, WorkflowRegistry};
pub use storage::{NodeSchemaStore, ProjectStore, WorkflowStore};
pub use types::{Edge, Node, NodeData, Project, TriggerKind, Workflow, WorkflowStatus};
