//! Trigger node: uniform entry point
//!
//! Passes its input through untouched so every execution starts the same way
//! regardless of how it was triggered.

use async_trait::async_trait;

use crate::error::EngineError;
use crate::runtime::context::{ExecutionContext, NodeResult};
use crate::runtime::nodes::NodeBehavior;
use crate::workflow::types::NodeData;

pub struct TriggerNode;

#[async_trait]
impl NodeBehavior for TriggerNode {
    fn type_tag(&self) -> &'static str {
        "trigger"
    }

    fn validate(&self, _data: &NodeData) -> Result<(), EngineError> {
        Ok(())
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        _data: &NodeData,
    ) -> Result<NodeResult, EngineError> {
        Ok(NodeResult::new(ctx.input.clone(), "output"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn passes_input_through() {
        let mut ctx = ExecutionContext::new("wf".into(), "ex".into(), "trace".into());
        ctx.input = json!({"a": 1});
        let result = TriggerNode
            .execute(&ctx, &NodeData::default())
            .await
            .unwrap();
        assert_eq!(result.output, json!({"a": 1}));
        assert_eq!(result.next_port, "output");
    }
}
