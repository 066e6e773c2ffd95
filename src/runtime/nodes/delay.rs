//! Delay node: cancellable sleep, input passed through

use async_trait::async_trait;
use std::time::Duration;

use crate::error::EngineError;
use crate::runtime::context::{ExecutionContext, NodeResult};
use crate::runtime::nodes::NodeBehavior;
use crate::workflow::types::NodeData;

pub struct DelayNode;

#[async_trait]
impl NodeBehavior for DelayNode {
    fn type_tag(&self) -> &'static str {
        "delay"
    }

    fn validate(&self, _data: &NodeData) -> Result<(), EngineError> {
        Ok(())
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        data: &NodeData,
    ) -> Result<NodeResult, EngineError> {
        let millis = data
            .custom_config
            .as_ref()
            .and_then(|c| c.get("duration"))
            .and_then(|d| d.as_u64())
            .unwrap_or(0);

        if millis > 0 {
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return Err(EngineError::Cancelled),
                _ = tokio::time::sleep(Duration::from_millis(millis)) => {}
            }
        }
        Ok(NodeResult::new(ctx.input.clone(), "output"))
    }
}
