use std::future::Future;
use std::sync::Arc;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;
use tracing::{debug, error, info, warn};
use crate::actions::CustomHandler;
use crate::actions::builtin::{AssignAction, LogAction};
use crate::actions::http::HttpAction;
use crate::dsl::{NodeType, PerformType, ProcessDefinition};
use crate::error::{EngineError, Result};
use crate::nodes::flow;
use crate::runtime::context::{Args, ChildExecution, Execution};
use crate::runtime::interceptor::TaskInterceptor;
use crate::runtime::model::{NodeKind, NodeModel, Process, WorkModel};
use crate::runtime::node::Action;
use crate::runtime::order::{Order, OrderState};
use crate::runtime::registry::ProcessRegistry;
use crate::runtime::storage::{InMemoryStateStore, StateStore};
use crate::runtime::task::{HistoryTask, Task, TaskState, TaskType};
use crate::runtime::task_service::TaskService;
use crate::runtime::transaction::{NoTransaction, Transaction};

/// 流程引擎
/// Public operation set. Cheap to clone; clones share every component.
#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn StateStore>,
    registry: Arc<ProcessRegistry>,
    task_service: TaskService,
    // Registry for automatic-node handlers
    handlers: Arc<DashMap<String, Arc<dyn CustomHandler>>>,
    interceptors: Arc<Vec<Arc<dyn TaskInterceptor>>>,
    transaction: Arc<dyn Transaction>,
}

/// How to continue after a task is completed.
#[derive(Debug, Clone, Copy)]
enum Routing<'a> {
    /// Follow the node's own outputs.
    Default,
    /// Back to the previous human task node.
    Reject,
    /// Straight to the named node.
    Jump(&'a str),
}

impl Engine {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            task_service: TaskService::new(store.clone()),
            store,
            registry: Arc::new(ProcessRegistry::new()),
            handlers: Arc::new(DashMap::new()),
            interceptors: Arc::new(Vec::new()),
            transaction: Arc::new(NoTransaction),
        }
    }

    /// Defaults to memory.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStateStore::new()))
    }

    /// Appends a hook; hooks run in registration order.
    pub fn with_interceptor(mut self, interceptor: Arc<dyn TaskInterceptor>) -> Self {
        Arc::make_mut(&mut self.interceptors).push(interceptor);
        self
    }

    pub fn with_transaction(mut self, transaction: Arc<dyn Transaction>) -> Self {
        self.transaction = transaction;
        self
    }

    pub fn register_handler(&self, handler: Arc<dyn CustomHandler>) {
        self.handlers.insert(handler.name().to_string(), handler);
    }

    /// `log`, `assign` and `http`.
    pub fn register_builtin_handlers(&self) {
        self.register_handler(Arc::new(LogAction));
        self.register_handler(Arc::new(AssignAction));
        self.register_handler(Arc::new(HttpAction::new()));
    }

    pub fn handler(&self, name: &str) -> Option<Arc<dyn CustomHandler>> {
        self.handlers.get(name).map(|h| h.value().clone())
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    pub fn task_service(&self) -> &TaskService {
        &self.task_service
    }

    // --- Deployment ---

    /// Registers `definition` as the next version of its id and persists it.
    pub async fn deploy(&self, definition: ProcessDefinition) -> Result<Arc<Process>> {
        self.validate_handlers(&definition)?;
        let (process, record) = self.registry.register(definition)?;
        self.store.save_process(&record).await?;
        for (process_id, reference) in self.registry.unresolved_references() {
            warn!(process_id = %process_id, reference = %reference, "Sub-process reference does not resolve yet");
        }
        Ok(process)
    }

    /// Loads every stored process version into the registry.
    pub async fn load_processes(&self) -> Result<usize> {
        self.registry.load(self.store.as_ref()).await
    }

    fn validate_handlers(&self, definition: &ProcessDefinition) -> Result<()> {
        for node in &definition.nodes {
            if let NodeType::Custom { handler: Some(name), params, .. } = &node.kind {
                let handler = self.handler(name).ok_or_else(|| EngineError::Validation(
                    format!("node '{}' uses unknown handler '{}'", node.name, name)
                ))?;
                let params = serde_json::to_value(params)
                    .map_err(|e| EngineError::Validation(e.to_string()))?;
                handler.validate(&params)
                    .map_err(|e| EngineError::Validation(format!("node '{}': {}", node.name, e)))?;
            }
        }
        Ok(())
    }

    // --- Orders ---

    pub async fn start_instance_by_id(&self, id: &str, operator: Option<&str>, args: Args) -> Result<Order> {
        let (order_id, tasks) = self.transactional("start_instance", async move {
            let process = self.registry.resolve(id)?;
            let start = process.model.start().ok_or_else(|| EngineError::Validation(
                format!("process [id={}] has no start node", id)
            ))?;

            let order = Order::new(&process.id, process.version, operator.map(str::to_string), args.clone());
            self.store.create_order(&order).await?;
            info!(order_id = %order.id, process_id = %process.id, version = process.version, "Order started");

            let mut execution = Execution::new(self.clone(), process.clone(), order, args)
                .with_operator(operator);
            start.execute(&mut execution).await?;
            Ok((execution.order.id, execution.into_tasks()))
        }).await?;

        self.intercept(&tasks).await;
        // Re-read: routing may already have finished the order.
        self.get_order(order_id).await
    }

    /// Starts a sub-process order linked to its parent.
    ///
    /// Called from inside a routing call, so it runs in the caller's
    /// transaction. Returns the child order and the tasks it produced.
    pub async fn start_instance_by_execution(&self, child: ChildExecution) -> Result<(Order, Vec<Task>)> {
        let process = child.process.clone();
        let start = process.model.start().ok_or_else(|| EngineError::Validation(
            format!("process [id={}] has no start node", process.id)
        ))?;

        let mut order = Order::new(&process.id, process.version, child.operator.clone(), child.args.clone());
        order.parent_order_id = Some(child.parent_order.id);
        order.parent_node_name = Some(child.parent_node_name.clone());
        self.store.create_order(&order).await?;

        let mut execution = Execution::new(self.clone(), process.clone(), order, child.args)
            .with_operator(child.operator.as_deref());
        execution.parent_order = Some(child.parent_order);
        execution.parent_node_name = Some(child.parent_node_name);
        start.execute(&mut execution).await?;

        let order = self.get_order(execution.order.id).await?;
        Ok((order, execution.into_tasks()))
    }

    /// Marks the execution's order finished; for a sub-process order, resumes
    /// the parent from the node that spawned it.
    pub async fn finish_by_execution(&self, execution: &mut Execution) -> Result<()> {
        for task in self.store.get_active_tasks(execution.order.id).await? {
            debug!(task_id = %task.id, "Closing task left open at end");
            self.task_service.archive_task(&task, execution.operator.as_deref(), TaskState::Terminated).await?;
        }

        let variables = execution.args.clone();
        let operator = execution.operator.clone();
        let mut already_closed = false;
        let order = self.modify_order(execution.order.id, |order| {
            already_closed = !order.is_active();
            if !already_closed {
                order.state = OrderState::Finished;
                order.finish_time = Some(Utc::now());
                order.variables = variables.clone();
                order.touch(operator.as_deref());
            }
            Ok(())
        }).await?;
        if already_closed {
            // Another branch reached an end first.
            debug!(order_id = %order.id, state = ?order.state, "Order already closed");
            execution.order = order;
            return Ok(());
        }
        self.store.clear_join_counts(order.id).await?;
        info!(order_id = %order.id, "Order finished");
        execution.order = order;

        let (Some(parent_id), Some(node_name)) = (execution.order.parent_order_id, execution.order.parent_node_name.clone()) else {
            return Ok(());
        };
        let child_order_id = execution.order.id;

        let mut parent_active = true;
        let parent = self.modify_order(parent_id, |parent| {
            parent_active = parent.is_active();
            if parent_active {
                parent.touch(operator.as_deref());
            }
            Ok(())
        }).await?;
        if !parent_active {
            warn!(order_id = %parent_id, state = ?parent.state, "Parent order no longer active; not resuming");
            return Ok(());
        }
        let process = self.registry.resolve_version(&parent.process_id, parent.process_version)?;
        let node = process.model.require_node(&node_name)?;

        let mut args = parent.variables.clone();
        args.extend(execution.args.clone());

        info!(order_id = %parent_id, child_order_id = %child_order_id, node = %node_name, "Resuming parent order");
        let mut parent_execution = Execution::new(self.clone(), process.clone(), parent, args)
            .with_operator(execution.operator.as_deref());
        parent_execution.child_order_id = Some(child_order_id);
        node.resume(&mut parent_execution).await?;
        execution.add_tasks(parent_execution.into_tasks());
        Ok(())
    }

    /// Finishes an active order directly, closing its open tasks.
    pub async fn finish_instance_by_id(&self, order_id: Uuid, operator: Option<&str>) -> Result<Vec<Task>> {
        let tasks = self.transactional("finish_instance", async move {
            let order = self.active_order(order_id).await?;
            let process = self.registry.resolve_version(&order.process_id, order.process_version)?;
            for task in self.store.get_active_tasks(order_id).await? {
                self.task_service.archive_task(&task, operator, TaskState::Finished).await?;
            }
            let args = order.variables.clone();
            let mut execution = Execution::new(self.clone(), process, order, args).with_operator(operator);
            self.finish_by_execution(&mut execution).await?;
            Ok(execution.into_tasks())
        }).await?;
        self.intercept(&tasks).await;
        Ok(tasks)
    }

    /// Closes every live task of the order and marks it terminated.
    pub async fn terminate_by_id(&self, order_id: Uuid, operator: Option<&str>) -> Result<()> {
        self.transactional("terminate", async move {
            self.active_order(order_id).await?;
            for task in self.store.get_active_tasks(order_id).await? {
                self.task_service.archive_task(&task, operator, TaskState::Terminated).await?;
            }
            self.store.clear_join_counts(order_id).await?;

            self.modify_order(order_id, |order| {
                if !order.is_active() {
                    return Err(EngineError::IllegalState(format!("order {} is {:?}", order_id, order.state)));
                }
                order.state = OrderState::Terminated;
                order.finish_time = Some(Utc::now());
                order.touch(operator);
                Ok(())
            }).await?;
            info!(order_id = %order_id, "Order terminated");
            Ok(())
        }).await
    }

    // --- Tasks ---

    /// Completes a task and routes on from its node.
    pub async fn execute_task(&self, task_id: Uuid, operator: &str, args: Args) -> Result<Vec<Task>> {
        let tasks = self.transactional("execute_task", self.route_task(task_id, operator, args, Routing::Default)).await?;
        self.intercept(&tasks).await;
        Ok(tasks)
    }

    /// Completes a task, then either rejects back to the previous task node
    /// (`node_name` is `None` or empty) or jumps to `node_name`.
    pub async fn execute_and_jump_task(&self, task_id: Uuid, operator: &str, args: Args, node_name: Option<&str>) -> Result<Vec<Task>> {
        let routing = match node_name {
            Some(name) if !name.is_empty() => Routing::Jump(name),
            _ => Routing::Reject,
        };
        let tasks = self.transactional("execute_and_jump_task", self.route_task(task_id, operator, args, routing)).await?;
        self.intercept(&tasks).await;
        Ok(tasks)
    }

    async fn route_task(&self, task_id: Uuid, operator: &str, args: Args, routing: Routing<'_>) -> Result<Vec<Task>> {
        let task = self.live_task(task_id).await?;
        let order = self.active_order(task.order_id).await?;
        if !self.task_service.is_allowed(&task, operator).await? {
            return Err(EngineError::forbidden(operator, task_id));
        }
        let process = self.registry.resolve_version(&order.process_id, order.process_version)?;

        // Check the routing target before anything is written.
        match routing {
            Routing::Jump(target) if process.model.node(target).is_none() => {
                return Err(EngineError::Validation(format!("jump target '{}' does not exist", target)));
            }
            Routing::Reject if process.model.previous_task_nodes(&task.task_name).is_empty() => {
                return Err(EngineError::IllegalState(format!(
                    "node '{}' has no previous task node to reject to", task.task_name
                )));
            }
            _ => {}
        }

        self.task_service.complete_task(&task, Some(operator)).await?;
        info!(task_id = %task_id, operator = %operator, node = %task.task_name, "Task completed");

        // Merge into the current row; other branches may have written since it was read.
        let order = self.modify_order(order.id, |order| {
            if !order.is_active() {
                return Err(EngineError::IllegalState(format!("order {} is {:?}", order.id, order.state)));
            }
            order.variables.extend(args.iter().map(|(k, v)| (k.clone(), v.clone())));
            order.touch(Some(operator));
            Ok(())
        }).await?;
        let merged = order.variables.clone();

        let node_name = task.task_name.clone();
        let mut execution = Execution::new(self.clone(), process.clone(), order, merged)
            .with_operator(Some(operator))
            .with_task(task);

        match routing {
            Routing::Default => match process.model.node(&node_name) {
                Some(node) => node.resume(&mut execution).await?,
                None => debug!(task_id = %task_id, node = %node_name, "Ad hoc task; nothing to route"),
            },
            Routing::Reject => flow::reject(&node_name, &mut execution).await?,
            Routing::Jump(target) => flow::jump(&node_name, target, &mut execution).await?,
        }
        if !execution.arrivals().is_empty() {
            self.task_service.record_arrivals(task_id, execution.arrivals()).await?;
        }
        Ok(execution.into_tasks())
    }

    /// Attaches a work item to a running order outside normal traversal.
    pub async fn create_free_task(&self, order_id: Uuid, operator: &str, args: Args, model: &WorkModel) -> Result<Vec<Task>> {
        let tasks = self.transactional("create_free_task", async move {
            let order = self.active_order(order_id).await?;
            let process = self.registry.resolve_version(&order.process_id, order.process_version)?;
            let mut merged = order.variables.clone();
            merged.extend(args);
            let execution = Execution::new(self.clone(), process, order, merged).with_operator(Some(operator));

            match model {
                WorkModel::Task { model, .. } if model.perform_type == PerformType::All => {
                    Err(EngineError::Validation("ad hoc tasks cannot use perform type All".to_string()))
                }
                WorkModel::Task { name, display_name, model } => {
                    let node = NodeModel {
                        name: name.clone(),
                        display_name: display_name.clone(),
                        kind: NodeKind::Task(model.clone()),
                        inputs: Vec::new(),
                        outputs: Vec::new(),
                    };
                    self.task_service.create_task(&node, model, &execution).await
                }
                WorkModel::Custom { name, display_name } => {
                    let task = self.task_service.create_custom_task(order_id, name, display_name).await?;
                    Ok(vec![task])
                }
            }
        }).await?;
        self.intercept(&tasks).await;
        Ok(tasks)
    }

    pub async fn take_task(&self, task_id: Uuid, operator: &str) -> Result<Task> {
        self.transactional("take_task", async move {
            let task = self.live_task(task_id).await?;
            self.active_order(task.order_id).await?;
            if !self.task_service.is_allowed(&task, operator).await? {
                return Err(EngineError::forbidden(operator, task_id));
            }
            self.task_service.take_task(&task, operator).await
        }).await
    }

    /// Restores a completed task. Tasks already produced downstream stay as they are.
    pub async fn withdraw_task(&self, task_id: Uuid, operator: &str) -> Result<Task> {
        let task = self.transactional("withdraw_task", async move {
            if let Some(history) = self.store.get_history(task_id).await? {
                self.active_order(history.order_id).await?;
            }
            self.task_service.withdraw_task(task_id, operator).await
        }).await?;
        self.intercept(std::slice::from_ref(&task)).await;
        Ok(task)
    }

    /// Adds participants to a human task.
    pub async fn add_task_actor(&self, task_id: Uuid, actor_ids: &[String]) -> Result<()> {
        self.transactional("add_task_actor", async move {
            let mut task = self.live_task(task_id).await?;
            self.active_order(task.order_id).await?;
            if task.task_type == TaskType::Custom {
                return Err(EngineError::Validation(format!("task {} is a custom task and takes no actors", task_id)));
            }
            self.task_service.assign_task(task_id, actor_ids).await?;
            for actor_id in actor_ids {
                if !task.actor_ids.contains(actor_id) {
                    task.actor_ids.push(actor_id.clone());
                }
            }
            self.store.update_task(&task).await?;
            Ok(())
        }).await
    }

    // --- Queries ---

    pub async fn get_order(&self, order_id: Uuid) -> Result<Order> {
        self.store.get_order(order_id).await?
            .ok_or_else(|| EngineError::not_found("order", order_id))
    }

    pub async fn get_task(&self, task_id: Uuid) -> Result<Task> {
        self.store.get_task(task_id).await?
            .ok_or_else(|| EngineError::not_found("task", task_id))
    }

    pub async fn get_history_task(&self, task_id: Uuid) -> Result<HistoryTask> {
        self.store.get_history(task_id).await?
            .ok_or_else(|| EngineError::not_found("history task", task_id))
    }

    pub async fn active_tasks(&self, order_id: Uuid) -> Result<Vec<Task>> {
        Ok(self.store.get_active_tasks(order_id).await?)
    }

    pub async fn history_tasks(&self, order_id: Uuid) -> Result<Vec<HistoryTask>> {
        Ok(self.store.get_history_tasks(order_id).await?)
    }

    // --- Plumbing ---

    async fn active_order(&self, order_id: Uuid) -> Result<Order> {
        let order = self.get_order(order_id).await?;
        if !order.is_active() {
            return Err(EngineError::IllegalState(format!("order {} is {:?}", order_id, order.state)));
        }
        Ok(order)
    }

    /// Like `get_task`, but a task already closed by terminating or finishing
    /// its order reports IllegalState instead of NotFound.
    async fn live_task(&self, task_id: Uuid) -> Result<Task> {
        if let Some(task) = self.store.get_task(task_id).await? {
            return Ok(task);
        }
        if let Some(history) = self.store.get_history(task_id).await? {
            let order = self.get_order(history.order_id).await?;
            if !order.is_active() {
                return Err(EngineError::IllegalState(format!("order {} is {:?}", order.id, order.state)));
            }
        }
        Err(EngineError::not_found("task", task_id))
    }

    /// Applies `change` to the stored order and writes it back, re-reading
    /// and retrying when another call wrote the row in between.
    async fn modify_order(&self, order_id: Uuid, mut change: impl FnMut(&mut Order) -> Result<()> + Send) -> Result<Order> {
        loop {
            let mut order = self.get_order(order_id).await?;
            change(&mut order)?;
            if self.store.update_order(&order).await? {
                order.revision += 1;
                return Ok(order);
            }
            debug!(order_id = %order_id, "Order changed concurrently; retrying");
        }
    }

    async fn transactional<T>(&self, operation: &'static str, work: impl Future<Output = Result<T>>) -> Result<T> {
        self.transaction.begin().await?;
        match work.await {
            Ok(value) => {
                self.transaction.commit().await?;
                Ok(value)
            }
            Err(e) => {
                warn!(operation = operation, error = %e, "Operation failed; rolling back");
                if let Err(rollback_err) = self.transaction.rollback().await {
                    error!(operation = operation, error = %rollback_err, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn intercept(&self, tasks: &[Task]) {
        if tasks.is_empty() {
            return;
        }
        for interceptor in self.interceptors.iter() {
            if let Err(e) = interceptor.intercept(tasks).await {
                warn!(error = %e, "Task interceptor failed");
            }
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::in_memory()
    }
}
