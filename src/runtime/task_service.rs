use std::sync::Arc;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;
use crate::dsl::PerformType;
use crate::error::{EngineError, Result};
use crate::nodes::all_key;
use crate::runtime::context::{Args, Execution};
use crate::runtime::model::{NodeKind, NodeModel, TaskModel};
use crate::runtime::storage::StateStore;
use crate::runtime::task::{Arrival, HistoryTask, Task, TaskActor, TaskState, TaskType};

/// 任务服务: creates, authorizes, completes, claims and restores tasks.
#[derive(Clone)]
pub struct TaskService {
    store: Arc<dyn StateStore>,
}

impl TaskService {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Creates the work items for a human task node.
    ///
    /// ANY yields one task carrying every actor; ALL yields one task per actor
    /// and opens a sibling counter so only the last completion moves on.
    pub async fn create_task(&self, node: &NodeModel, model: &TaskModel, execution: &Execution) -> Result<Vec<Task>> {
        let actors = match &model.assignee {
            Some(key) => resolve_actors(execution.args.get(key), key)?,
            None => Vec::new(),
        };
        let expire_time = resolve_expire_time(model, &execution.args)?;
        let order_id = execution.order.id;

        let template = Task {
            id: Uuid::nil(),
            order_id,
            task_name: node.name.clone(),
            display_name: node.display_name.clone(),
            task_type: TaskType::Task,
            perform_type: model.perform_type,
            operator: None,
            create_time: Utc::now(),
            take_time: None,
            expire_time,
            action_url: model.action_url.clone(),
            actor_ids: Vec::new(),
        };

        match model.perform_type {
            PerformType::Any => {
                let task = Task { id: Uuid::new_v4(), actor_ids: actors, ..template };
                self.save_task(&task).await?;
                Ok(vec![task])
            }
            PerformType::All => {
                if actors.is_empty() {
                    return Err(EngineError::Validation(format!(
                        "node '{}' needs at least one actor for perform type ALL", node.name
                    )));
                }
                let mut tasks = Vec::with_capacity(actors.len());
                for actor in actors {
                    let task = Task {
                        id: Uuid::new_v4(),
                        actor_ids: vec![actor],
                        ..template.clone()
                    };
                    self.save_task(&task).await?;
                    tasks.push(task);
                }
                self.store.init_join_count(order_id, &all_key(&node.name), tasks.len()).await?;
                Ok(tasks)
            }
        }
    }

    /// Unassigned work item of type Custom; anyone may complete it.
    pub async fn create_custom_task(&self, order_id: Uuid, name: &str, display_name: &str) -> Result<Task> {
        let task = Task {
            id: Uuid::new_v4(),
            order_id,
            task_name: name.to_string(),
            display_name: display_name.to_string(),
            task_type: TaskType::Custom,
            perform_type: PerformType::Any,
            operator: None,
            create_time: Utc::now(),
            take_time: None,
            expire_time: None,
            action_url: None,
            actor_ids: Vec::new(),
        };
        self.store.save_task(&task).await?;
        Ok(task)
    }

    async fn save_task(&self, task: &Task) -> Result<()> {
        self.store.save_task(task).await?;
        self.assign_task(task.id, &task.actor_ids).await
    }

    /// Adds one actor edge per id. Existing edges are left as they are.
    pub async fn assign_task(&self, task_id: Uuid, actor_ids: &[String]) -> Result<()> {
        for actor_id in actor_ids {
            self.store.save_task_actor(&TaskActor { task_id, actor_id: actor_id.clone() }).await?;
        }
        Ok(())
    }

    pub async fn actor_ids(&self, task_id: Uuid) -> Result<Vec<String>> {
        Ok(self.store.get_task_actors_by_task_id(task_id).await?
            .into_iter()
            .map(|a| a.actor_id)
            .collect())
    }

    /// A claimed task admits only its claimant; an actorless task admits anyone.
    pub async fn is_allowed(&self, task: &Task, operator: &str) -> Result<bool> {
        if let Some(claimant) = &task.operator {
            return Ok(claimant == operator);
        }
        let actors = self.actor_ids(task.id).await?;
        Ok(actors.is_empty() || actors.iter().any(|a| a == operator))
    }

    /// Archives the task and removes the live row. Authorization is the caller's job.
    pub async fn complete_task(&self, task: &Task, operator: Option<&str>) -> Result<HistoryTask> {
        self.archive_task(task, operator, TaskState::Finished).await
    }

    pub async fn archive_task(&self, task: &Task, operator: Option<&str>, state: TaskState) -> Result<HistoryTask> {
        let mut actor_ids = self.actor_ids(task.id).await?;
        if actor_ids.is_empty() {
            actor_ids = task.actor_ids.clone();
        }

        let claimed = self.store.delete_task(task.id).await?
            .ok_or_else(|| EngineError::not_found("task", task.id))?;

        let history = HistoryTask::archive(&claimed, actor_ids, operator, state);
        self.store.save_history(&history).await?;
        debug!(task_id = %task.id, node = %task.task_name, state = ?state, "Task archived");
        Ok(history)
    }

    /// Claims without finishing; afterwards only `operator` may act on it.
    pub async fn take_task(&self, task: &Task, operator: &str) -> Result<Task> {
        let mut task = task.clone();
        task.operator = Some(operator.to_string());
        task.take_time = Some(Utc::now());
        self.store.update_task(&task).await?;
        info!(task_id = %task.id, operator = %operator, "Task taken");
        Ok(task)
    }

    /// Brings an archived task back to life with its original id and actors.
    ///
    /// Arrivals the completion counted at joins or ALL siblings are given
    /// back. Once one of those counters has merged, the flow has moved past
    /// this task and it can no longer be withdrawn.
    pub async fn withdraw_task(&self, task_id: Uuid, operator: &str) -> Result<Task> {
        if self.store.get_task(task_id).await?.is_some() {
            return Err(EngineError::IllegalState(format!("task {} is still active", task_id)));
        }
        let history = self.store.get_history(task_id).await?
            .ok_or_else(|| EngineError::not_found("history task", task_id))?;

        let entitled = history.operator.as_deref() == Some(operator)
            || history.actor_ids.iter().any(|a| a == operator);
        if !entitled {
            return Err(EngineError::forbidden(operator, task_id));
        }
        if let Some(arrival) = history.arrivals.iter().find(|a| a.merged) {
            return Err(EngineError::IllegalState(format!(
                "task {} already merged at [{}]", task_id, arrival.key
            )));
        }

        let history = self.store.delete_history(task_id).await?
            .ok_or_else(|| EngineError::not_found("history task", task_id))?;

        let mut returned: Vec<&str> = Vec::new();
        for arrival in &history.arrivals {
            if self.store.increment_join_count(history.order_id, &arrival.key).await? {
                returned.push(&arrival.key);
                continue;
            }
            // The other branches drained the counter in the meantime.
            for key in returned {
                self.store.decrement_join_count(history.order_id, key, 1).await?;
            }
            self.store.save_history(&history).await?;
            return Err(EngineError::IllegalState(format!(
                "task {} already merged at [{}]", task_id, arrival.key
            )));
        }

        let task = history.restore();
        self.save_task(&task).await?;
        info!(task_id = %task_id, operator = %operator, "Task withdrawn");
        Ok(task)
    }

    /// Stores the counter arrivals a completion made, so a withdraw can undo them.
    pub async fn record_arrivals(&self, task_id: Uuid, arrivals: &[Arrival]) -> Result<()> {
        let Some(mut history) = self.store.get_history(task_id).await? else {
            return Err(EngineError::not_found("history task", task_id));
        };
        history.arrivals.extend_from_slice(arrivals);
        self.store.save_history(&history).await?;
        Ok(())
    }

    /// Recreates work at the human task node right before `current`'s node,
    /// assigned by that node's own rule.
    pub async fn reject_task(&self, current: &Task, execution: &Execution) -> Result<Vec<Task>> {
        let model = &execution.process.model;
        let previous = model.previous_task_nodes(&current.task_name);
        let Some(node) = previous.first() else {
            return Err(EngineError::IllegalState(format!(
                "node '{}' has no previous task node to reject to", current.task_name
            )));
        };
        let NodeKind::Task(task_model) = &node.kind else {
            return Err(EngineError::IllegalState(format!("node '{}' is not a task node", node.name)));
        };
        self.create_task(node, task_model, execution).await
    }
}

/// Reads participant ids from an argument value.
///
/// Accepts `"a,b"`, a single number, or an array of strings/numbers.
/// A missing or null value means no actors.
pub fn resolve_actors(value: Option<&Value>, key: &str) -> Result<Vec<String>> {
    let invalid = || EngineError::Validation(format!(
        "unsupported actor value for [{}]; expected \"1,2\", a number or an array of ids", key
    ));

    let raw: Vec<String> = match value {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::String(s)) => {
            let mut ids = Vec::new();
            for part in s.split(',') {
                let part = part.trim();
                if part.is_empty() {
                    return Err(invalid());
                }
                ids.push(part.to_string());
            }
            ids
        }
        Some(Value::Number(n)) => vec![n.to_string()],
        Some(Value::Array(items)) => {
            let mut ids = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) if !s.trim().is_empty() => ids.push(s.trim().to_string()),
                    Value::Number(n) => ids.push(n.to_string()),
                    _ => return Err(invalid()),
                }
            }
            ids
        }
        Some(_) => return Err(invalid()),
    };

    let mut unique = Vec::with_capacity(raw.len());
    for id in raw {
        if !unique.contains(&id) {
            unique.push(id);
        }
    }
    Ok(unique)
}

fn resolve_expire_time(model: &TaskModel, args: &Args) -> Result<Option<DateTime<Utc>>> {
    let Some(key) = &model.expire_time else {
        return Ok(None);
    };
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| EngineError::Validation(format!("invalid expire time [{}]: {}", key, e))),
        Some(other) => Err(EngineError::Validation(format!("invalid expire time [{}]: {}", key, other))),
    }
}
