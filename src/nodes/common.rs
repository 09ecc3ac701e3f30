use tracing::info;
use crate::error::Result;
use crate::nodes::run_outputs;
use crate::runtime::context::Execution;
use crate::runtime::model::NodeModel;

pub async fn start(node: &NodeModel, execution: &mut Execution) -> Result<()> {
    run_outputs(node, execution).await
}

/// Finishes the order. For a sub-process order this also resumes the parent.
pub async fn end(node: &NodeModel, execution: &mut Execution) -> Result<()> {
    info!(order_id = %execution.order.id, node = %node.name, "Order reached end");
    let engine = execution.engine.clone();
    engine.finish_by_execution(execution).await
}
