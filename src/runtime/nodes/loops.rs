//! Loop node
//!
//! `forEach` resolves an array path and exposes `{items, count, original}` to
//! the downstream node; it does not sub-execute the downstream subgraph per
//! item. If per-item sub-flows are ever added, that behavior must be
//! documented here. `while` and `for` are acknowledged shapes that currently
//! pass the input through.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::EngineError;
use crate::runtime::context::{ExecutionContext, NodeResult};
use crate::runtime::nodes::NodeBehavior;
use crate::runtime::path::resolve_path;
use crate::workflow::types::{LoopKind, NodeData};

pub struct LoopNode;

#[async_trait]
impl NodeBehavior for LoopNode {
    fn type_tag(&self) -> &'static str {
        "loop"
    }

    fn validate(&self, data: &NodeData) -> Result<(), EngineError> {
        if data.loop_type == Some(LoopKind::ForEach)
            && data.array_path.as_deref().unwrap_or("").is_empty()
        {
            return Err(EngineError::config(
                "arrayPath",
                "forEach loop requires an array path",
            ));
        }
        Ok(())
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        data: &NodeData,
    ) -> Result<NodeResult, EngineError> {
        match data.loop_type {
            Some(LoopKind::ForEach) => {
                let path = data.array_path.as_deref().unwrap_or("");
                let items = match resolve_path(&ctx.input, path) {
                    Value::Array(items) => items,
                    _ => Vec::new(),
                };
                let count = items.len();
                let output = json!({
                    "items": items,
                    "count": count,
                    "original": ctx.input.clone(),
                });
                Ok(NodeResult::new(output, "done"))
            }
            // while/for are reserved shapes: pass through until they grow
            // real iteration semantics
            _ => Ok(NodeResult::new(ctx.input.clone(), "done")),
        }
    }
}
