//! Node executors and the polymorphic dispatch registry
//!
//! Every node type implements [`NodeBehavior`]; the [`NodeRegistry`] maps type
//! tags to executors. The registry is built once at startup and is read-only
//! afterwards, so concurrent executions can look up executors without locking.

pub mod code;
pub mod condition;
pub mod delay;
pub mod http;
pub mod loops;
pub mod response;
pub mod transform;
pub mod trigger;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::EngineError;
use crate::runtime::context::{ExecutionContext, NodeResult};
use crate::workflow::types::NodeData;

/// Shared operation set of every node executor
#[async_trait]
pub trait NodeBehavior: Send + Sync {
    /// Unique type tag this executor is registered under
    fn type_tag(&self) -> &'static str;

    /// Reject invalid node configuration before execution
    fn validate(&self, data: &NodeData) -> Result<(), EngineError>;

    /// Run the node against the current execution context
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        data: &NodeData,
    ) -> Result<NodeResult, EngineError>;
}

/// Type-tag keyed executor registry
///
/// `with_builtin` registers the eight core node types; custom_* executors can
/// be registered on top before the registry is shared with the server.
pub struct NodeRegistry {
    executors: HashMap<String, Arc<dyn NodeBehavior>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Registry with all built-in executors
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(trigger::TriggerNode));
        registry.register(Arc::new(transform::TransformNode));
        registry.register(Arc::new(http::HttpNode::new()));
        registry.register(Arc::new(condition::ConditionNode));
        registry.register(Arc::new(loops::LoopNode));
        registry.register(Arc::new(code::CodeNode));
        registry.register(Arc::new(delay::DelayNode));
        registry.register(Arc::new(response::ResponseNode));
        registry
    }

    /// Register an executor under its type tag; last registration wins
    pub fn register(&mut self, executor: Arc<dyn NodeBehavior>) {
        self.executors
            .insert(executor.type_tag().to_string(), executor);
    }

    pub fn get(&self, type_tag: &str) -> Option<Arc<dyn NodeBehavior>> {
        self.executors.get(type_tag).cloned()
    }

    pub fn type_tags(&self) -> Vec<String> {
        self.executors.keys().cloned().collect()
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}
