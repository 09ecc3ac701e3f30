use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use uuid::Uuid;
use crate::dsl::PerformType;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskType {
    /// Human task with participants.
    Task,
    /// Unassigned work item any operator may complete.
    Custom,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskState {
    Finished,
    Terminated,
}

/// 待办任务
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: Uuid,
    pub order_id: Uuid,
    /// Name of the model node this task blocks.
    pub task_name: String,
    pub display_name: String,
    pub task_type: TaskType,
    pub perform_type: PerformType,
    /// Set once the task is taken.
    pub operator: Option<String>,
    pub create_time: DateTime<Utc>,
    pub take_time: Option<DateTime<Utc>>,
    pub expire_time: Option<DateTime<Utc>>,
    pub action_url: Option<String>,
    #[serde(default)]
    pub actor_ids: Vec<String>,
}

/// Edge between a live task and one participant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskActor {
    pub task_id: Uuid,
    pub actor_id: String,
}

/// 历史任务: archived copy of a completed task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryTask {
    pub id: Uuid,
    pub order_id: Uuid,
    pub task_name: String,
    pub display_name: String,
    pub task_type: TaskType,
    pub perform_type: PerformType,
    /// Who completed it.
    pub operator: Option<String>,
    pub create_time: DateTime<Utc>,
    pub take_time: Option<DateTime<Utc>>,
    pub expire_time: Option<DateTime<Utc>>,
    pub finish_time: DateTime<Utc>,
    pub task_state: TaskState,
    pub action_url: Option<String>,
    pub actor_ids: Vec<String>,
    /// Counters this completion counted an arrival on while routing.
    #[serde(default)]
    pub arrivals: Vec<Arrival>,
}

/// One arrival at a join or ALL sibling counter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Arrival {
    pub key: String,
    /// This arrival drained the counter and moved the flow on.
    pub merged: bool,
}

impl HistoryTask {
    pub fn archive(task: &Task, actor_ids: Vec<String>, operator: Option<&str>, state: TaskState) -> Self {
        Self {
            id: task.id,
            order_id: task.order_id,
            task_name: task.task_name.clone(),
            display_name: task.display_name.clone(),
            task_type: task.task_type,
            perform_type: task.perform_type,
            operator: operator.map(str::to_string),
            create_time: task.create_time,
            take_time: task.take_time,
            expire_time: task.expire_time,
            finish_time: Utc::now(),
            task_state: state,
            action_url: task.action_url.clone(),
            actor_ids,
            arrivals: Vec::new(),
        }
    }

    /// Rebuilds the live task this record was archived from.
    ///
    /// The claim is dropped: a withdrawn task goes back to its actors, not
    /// to whoever finished it.
    pub fn restore(&self) -> Task {
        Task {
            id: self.id,
            order_id: self.order_id,
            task_name: self.task_name.clone(),
            display_name: self.display_name.clone(),
            task_type: self.task_type,
            perform_type: self.perform_type,
            operator: None,
            create_time: self.create_time,
            take_time: None,
            expire_time: self.expire_time,
            action_url: self.action_url.clone(),
            actor_ids: self.actor_ids.clone(),
        }
    }
}
