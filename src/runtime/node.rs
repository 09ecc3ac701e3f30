use async_trait::async_trait;
use crate::runtime::context::Execution;
use crate::error::Result;

/// 运行时节点接口
/// Anything that can advance an execution: nodes and transitions.
#[async_trait]
pub trait Action: Send + Sync {
    async fn execute(&self, execution: &mut Execution) -> Result<()>;
}
