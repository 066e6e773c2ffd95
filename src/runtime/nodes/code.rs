//! Code node: declarative expression evaluator
//!
//! Despite the editor label this is not a script runtime. An expression is
//! either a JSON template (`{`/`[` prefix, `{{var}}` substituted), a dotted
//! path into the input, or an opaque value echoed back with the input.
//! Unsandboxed evaluation must not be added here without a security review.

use async_trait::async_trait;
use serde_json::json;

use crate::error::EngineError;
use crate::runtime::context::{ExecutionContext, NodeResult};
use crate::runtime::nodes::NodeBehavior;
use crate::runtime::path::resolve_path;
use crate::runtime::template::interpolate;
use crate::workflow::types::NodeData;

pub struct CodeNode;

#[async_trait]
impl NodeBehavior for CodeNode {
    fn type_tag(&self) -> &'static str {
        "code"
    }

    fn validate(&self, data: &NodeData) -> Result<(), EngineError> {
        if data.expression.as_deref().unwrap_or("").is_empty() {
            return Err(EngineError::config(
                "expression",
                "code node requires an expression",
            ));
        }
        Ok(())
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        data: &NodeData,
    ) -> Result<NodeResult, EngineError> {
        let expression = data.expression.as_deref().unwrap_or("").trim();

        if expression.starts_with('{') || expression.starts_with('[') {
            let substituted = interpolate(expression, &ctx.input);
            let value = serde_json::from_str(&substituted).map_err(|e| {
                EngineError::node(
                    ctx.node_id.clone(),
                    format!("expression is not valid JSON after substitution: {e}"),
                )
            })?;
            return Ok(NodeResult::new(value, "output"));
        }

        let resolved = resolve_path(&ctx.input, expression);
        if !resolved.is_null() {
            return Ok(NodeResult::new(resolved, "output"));
        }

        Ok(NodeResult::new(
            json!({"expression": expression, "data": ctx.input.clone()}),
            "output",
        ))
    }
}
