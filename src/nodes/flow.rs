use tracing::{debug, info};
use crate::error::{EngineError, Result};
use crate::nodes::{join_key, run_outputs};
use crate::runtime::context::Execution;
use crate::runtime::model::{NodeModel, SubProcessModel, TransitionModel};
use crate::runtime::node::Action;

// --- FORK NODE ---

/// Explicit fork. Behaves like any node with several enabled outputs.
pub async fn fork(node: &NodeModel, execution: &mut Execution) -> Result<()> {
    run_outputs(node, execution).await
}

// --- JOIN NODE ---

/// Reached once per incoming branch. The expected count is the node's static
/// indegree; arrivals are counted in the store so they survive across calls.
pub async fn join(node: &NodeModel, execution: &mut Execution) -> Result<()> {
    let expected = node.indegree().max(1);
    let key = join_key(node);
    let remaining = execution.engine.store()
        .decrement_join_count(execution.order.id, &key, expected)
        .await?;

    if remaining > 0 {
        debug!(order_id = %execution.order.id, node = %node.name, remaining, "Branch arrived at join");
        execution.record_arrival(key, false);
        return Ok(());
    }

    info!(order_id = %execution.order.id, node = %node.name, "Join merged");
    execution.record_arrival(key, true);
    run_outputs(node, execution).await
}

// --- SUB-PROCESS NODE ---

/// Starts the child order and halts here. The parent resumes from this node
/// once the child's end node finishes it.
pub async fn sub_process(node: &NodeModel, model: &SubProcessModel, execution: &mut Execution) -> Result<()> {
    let engine = execution.engine.clone();
    let child_process = match model.version {
        Some(version) => engine.registry().resolve_version(&model.process_id, version)?,
        None => engine.registry().resolve(&model.process_id)?,
    };

    let child = execution.create_sub_execution(child_process, &node.name);
    let (order, tasks) = engine.start_instance_by_execution(child).await?;
    info!(order_id = %execution.order.id, child_order_id = %order.id, node = %node.name, "Sub-process started");

    execution.child_order_id = Some(order.id);
    execution.add_tasks(tasks);
    Ok(())
}

// --- DYNAMIC ROUTING ---

/// Moves straight to `target`, ignoring the graph's own outputs.
pub async fn jump(from: &str, target: &str, execution: &mut Execution) -> Result<()> {
    if execution.process.model.node(target).is_none() {
        return Err(EngineError::Validation(format!("jump target '{}' does not exist", target)));
    }
    info!(order_id = %execution.order.id, from = %from, target = %target, "Jumping");
    TransitionModel::synthetic(from, target).execute(execution).await
}

/// Sends the flow back to the human task node right before `node_name`.
pub async fn reject(node_name: &str, execution: &mut Execution) -> Result<()> {
    let current = execution.task.clone()
        .ok_or_else(|| EngineError::IllegalState("reject needs the completed task".to_string()))?;
    let service = execution.engine.task_service().clone();
    let tasks = service.reject_task(&current, execution).await?;
    info!(order_id = %execution.order.id, node = %node_name, count = tasks.len(), "Rejected to previous step");
    execution.add_tasks(tasks);
    Ok(())
}
