use std::collections::HashMap;
use std::sync::Arc;
use serde_json::Value;
use uuid::Uuid;
use crate::runtime::engine::Engine;
use crate::runtime::model::Process;
use crate::runtime::order::Order;
use crate::runtime::task::{Arrival, Task};

pub type Args = HashMap<String, Value>;

/// 执行上下文 (Execution Context)
/// Carries one routing call: the process being walked, its order, the call's
/// arguments, who is acting, and every task produced along the way.
/// Never shared between concurrent calls.
pub struct Execution {
    pub engine: Engine,
    pub process: Arc<Process>,
    pub order: Order,
    pub parent_order: Option<Order>,
    pub parent_node_name: Option<String>,
    pub child_order_id: Option<Uuid>,
    pub args: Args,
    pub operator: Option<String>,
    /// The task whose completion triggered this call, if any.
    pub task: Option<Task>,
    tasks: Vec<Task>,
    merged: bool,
    arrivals: Vec<Arrival>,
}

impl Execution {
    pub fn new(engine: Engine, process: Arc<Process>, order: Order, args: Args) -> Self {
        Self {
            engine,
            process,
            order,
            parent_order: None,
            parent_node_name: None,
            child_order_id: None,
            args,
            operator: None,
            task: None,
            tasks: Vec::new(),
            merged: false,
            arrivals: Vec::new(),
        }
    }

    pub fn with_operator(mut self, operator: Option<&str>) -> Self {
        self.operator = operator.map(str::to_string);
        self
    }

    pub fn with_task(mut self, task: Task) -> Self {
        self.task = Some(task);
        self
    }

    /// Prepares the context a sub-process order will be started from.
    /// The child shares operator and arguments but accumulates its own tasks.
    pub fn create_sub_execution(&self, process: Arc<Process>, parent_node_name: &str) -> ChildExecution {
        ChildExecution {
            process,
            parent_order: self.order.clone(),
            parent_node_name: parent_node_name.to_string(),
            args: self.args.clone(),
            operator: self.operator.clone(),
        }
    }

    pub fn add_task(&mut self, task: Task) {
        self.tasks.push(task);
    }

    pub fn add_tasks(&mut self, tasks: Vec<Task>) {
        self.tasks.extend(tasks);
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn into_tasks(self) -> Vec<Task> {
        self.tasks
    }

    /// Outcome of the latest join evaluation in this call.
    pub fn is_merged(&self) -> bool {
        self.merged
    }

    pub fn set_merged(&mut self, merged: bool) {
        self.merged = merged;
    }

    /// Notes an arrival on a persisted counter and whether it merged.
    pub fn record_arrival(&mut self, key: String, merged: bool) {
        self.merged = merged;
        self.arrivals.push(Arrival { key, merged });
    }

    pub fn arrivals(&self) -> &[Arrival] {
        &self.arrivals
    }
}

/// A sub-process start request: linked to its parent, no order yet.
#[derive(Clone)]
pub struct ChildExecution {
    pub process: Arc<Process>,
    pub parent_order: Order,
    pub parent_node_name: String,
    pub args: Args,
    pub operator: Option<String>,
}
