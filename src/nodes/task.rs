use tracing::{debug, info};
use crate::dsl::PerformType;
use crate::error::Result;
use crate::nodes::{all_key, run_outputs};
use crate::runtime::context::Execution;
use crate::runtime::model::{NodeModel, TaskModel};

/// Human task node: materializes work items and stops this thread of traversal.
pub async fn enter(node: &NodeModel, model: &TaskModel, execution: &mut Execution) -> Result<()> {
    let service = execution.engine.task_service().clone();
    let tasks = service.create_task(node, model, execution).await?;
    info!(order_id = %execution.order.id, node = %node.name, count = tasks.len(), "Tasks created");
    execution.add_tasks(tasks);
    Ok(())
}

/// Called after one of this node's tasks was completed.
///
/// ALL tasks behave like a join over their siblings: only the completion
/// that drains the sibling counter moves on.
pub async fn resume(node: &NodeModel, execution: &mut Execution) -> Result<()> {
    let perform_type = execution.task.as_ref()
        .map(|t| t.perform_type)
        .unwrap_or_default();

    if perform_type == PerformType::All {
        let key = all_key(&node.name);
        let remaining = execution.engine.store()
            .decrement_join_count(execution.order.id, &key, 1)
            .await?;
        if remaining > 0 {
            debug!(order_id = %execution.order.id, node = %node.name, remaining, "Waiting for sibling tasks");
            execution.record_arrival(key, false);
            return Ok(());
        }
        execution.record_arrival(key, true);
    }

    run_outputs(node, execution).await
}
