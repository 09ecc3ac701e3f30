pub mod action;
pub mod common;
pub mod flow;
pub mod task;

use async_trait::async_trait;
use tracing::debug;
use crate::error::Result;
use crate::runtime::context::Execution;
use crate::runtime::model::{NodeKind, NodeModel, TransitionModel};
use crate::runtime::node::Action;

#[async_trait]
impl Action for NodeModel {
    /// Entering a node, either from a transition or as the process start.
    async fn execute(&self, execution: &mut Execution) -> Result<()> {
        debug!(order_id = %execution.order.id, node = %self.name, "Entering node");
        match &self.kind {
            NodeKind::Start => common::start(self, execution).await,
            NodeKind::End => common::end(self, execution).await,
            NodeKind::Task(model) => task::enter(self, model, execution).await,
            NodeKind::Custom(model) => action::execute(self, model, execution).await,
            NodeKind::Fork => flow::fork(self, execution).await,
            NodeKind::Join => flow::join(self, execution).await,
            NodeKind::SubProcess(model) => flow::sub_process(self, model, execution).await,
        }
    }
}

#[async_trait]
impl Action for TransitionModel {
    async fn execute(&self, execution: &mut Execution) -> Result<()> {
        if !self.is_enabled(&execution.args)? {
            return Ok(());
        }
        let process = execution.process.clone();
        let target = process.model.require_node(&self.target)?;
        target.execute(execution).await
    }
}

impl NodeModel {
    /// Continues traversal from this node after work that paused here is done:
    /// a task completed at it, or a sub-process it spawned reached its end.
    pub async fn resume(&self, execution: &mut Execution) -> Result<()> {
        match &self.kind {
            NodeKind::Task(_) => task::resume(self, execution).await,
            _ => run_outputs(self, execution).await,
        }
    }
}

/// Default traversal: follow every enabled output. More than one enabled
/// output is an implicit fork; all branches feed the same task list.
pub async fn run_outputs(node: &NodeModel, execution: &mut Execution) -> Result<()> {
    for transition in &node.outputs {
        transition.execute(execution).await?;
    }
    Ok(())
}

pub(crate) fn join_key(node: &NodeModel) -> String {
    format!("join:{}", node.name)
}

pub(crate) fn all_key(node_name: &str) -> String {
    format!("task:{}", node_name)
}
