use tracing::debug;
use crate::actions::resolve_params;
use crate::error::{EngineError, Result};
use crate::nodes::run_outputs;
use crate::runtime::context::Execution;
use crate::runtime::model::{CustomModel, NodeModel};

/// 自动节点: runs its handler (if any) in place, then keeps routing.
pub async fn execute(node: &NodeModel, model: &CustomModel, execution: &mut Execution) -> Result<()> {
    if let Some(name) = &model.handler {
        let handler = execution.engine.handler(name)
            .ok_or_else(|| EngineError::not_found("handler", name))?;

        // 1. Resolve ${var} params
        let params = resolve_params(&model.params, &execution.args);

        // 2. Execute
        let result = handler.execute(params, &mut execution.args).await
            .map_err(|e| EngineError::Internal(e.context(format!("handler '{}' at node '{}' failed", name, node.name))))?;

        // 3. Write output
        if let Some(out_key) = &model.output {
            execution.args.insert(out_key.clone(), result);
        }
        debug!(order_id = %execution.order.id, node = %node.name, handler = %name, "Handler finished");
    }

    // 4. Continue
    run_outputs(node, execution).await
}
