use async_trait::async_trait;
use uuid::Uuid;
use crate::runtime::model::ProcessRecord;
use crate::runtime::order::Order;
use crate::runtime::task::{HistoryTask, Task, TaskActor};
use anyhow::{Result, anyhow};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

// --- Interfaces ---

/// Storage capability the engine routes against.
///
/// Implementations only need per-call atomicity; grouping calls into one
/// unit of work is the job of the `Transaction` boundary.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn save_process(&self, record: &ProcessRecord) -> Result<()>;
    async fn get_all_process(&self) -> Result<Vec<ProcessRecord>>;

    async fn create_order(&self, order: &Order) -> Result<()>;
    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>>;
    /// Writes `order` only if the stored row still has `order.revision`,
    /// bumping the stored revision. Returns false when another write got there first.
    async fn update_order(&self, order: &Order) -> Result<bool>;

    async fn save_task(&self, task: &Task) -> Result<()>;
    async fn get_task(&self, task_id: Uuid) -> Result<Option<Task>>;
    async fn update_task(&self, task: &Task) -> Result<()>;
    /// Removes a live task and its actor edges.
    /// Returns `None` when the row was already gone, so only one caller can claim it.
    async fn delete_task(&self, task_id: Uuid) -> Result<Option<Task>>;
    async fn get_active_tasks(&self, order_id: Uuid) -> Result<Vec<Task>>;

    async fn save_task_actor(&self, actor: &TaskActor) -> Result<()>;
    async fn get_task_actors_by_task_id(&self, task_id: Uuid) -> Result<Vec<TaskActor>>;

    async fn save_history(&self, history: &HistoryTask) -> Result<()>;
    async fn get_history(&self, task_id: Uuid) -> Result<Option<HistoryTask>>;
    /// Same claim semantics as `delete_task`.
    async fn delete_history(&self, task_id: Uuid) -> Result<Option<HistoryTask>>;
    async fn get_history_tasks(&self, order_id: Uuid) -> Result<Vec<HistoryTask>>;

    /// Opens (or reopens) an arrival counter expecting `count` arrivals.
    async fn init_join_count(&self, order_id: Uuid, key: &str, count: usize) -> Result<()>;
    /// Atomically decrement a join counter, creating it with `initial_count` if absent.
    /// Returns the NEW value after decrement; the counter is dropped when it reaches zero.
    async fn decrement_join_count(&self, order_id: Uuid, key: &str, initial_count: usize) -> Result<usize>;
    /// Gives one arrival back. Returns false if no counter is open.
    async fn increment_join_count(&self, order_id: Uuid, key: &str) -> Result<bool>;
    async fn clear_join_counts(&self, order_id: Uuid) -> Result<()>;
}

// --- In-Memory Implementation ---

pub struct InMemoryStateStore {
    // Map<ProcessId, Vec<Record>>
    processes: DashMap<String, Vec<ProcessRecord>>,
    orders: DashMap<Uuid, Order>,
    tasks: DashMap<Uuid, Task>,
    // Map<TaskId, Vec<ActorId>>
    actors: DashMap<Uuid, Vec<String>>,
    histories: DashMap<Uuid, HistoryTask>,
    // Map<(OrderId, Key), Remaining>
    joins: DashMap<(Uuid, String), usize>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self {
            processes: DashMap::new(),
            orders: DashMap::new(),
            tasks: DashMap::new(),
            actors: DashMap::new(),
            histories: DashMap::new(),
            joins: DashMap::new(),
        }
    }

    /// Remaining arrivals for a counter, if it is open.
    pub fn join_count(&self, order_id: Uuid, key: &str) -> Option<usize> {
        self.joins.get(&(order_id, key.to_string())).map(|v| *v)
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn save_process(&self, record: &ProcessRecord) -> Result<()> {
        let mut versions = self.processes.entry(record.definition.id.clone()).or_default();
        versions.retain(|r| r.version != record.version);
        versions.push(record.clone());
        Ok(())
    }

    async fn get_all_process(&self) -> Result<Vec<ProcessRecord>> {
        Ok(self.processes.iter().flat_map(|e| e.value().clone()).collect())
    }

    async fn create_order(&self, order: &Order) -> Result<()> {
        match self.orders.entry(order.id) {
            Entry::Occupied(_) => Err(anyhow!("Order already exists: {}", order.id)),
            Entry::Vacant(v) => {
                v.insert(order.clone());
                Ok(())
            }
        }
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>> {
        Ok(self.orders.get(&order_id).map(|o| o.value().clone()))
    }

    async fn update_order(&self, order: &Order) -> Result<bool> {
        let mut stored = self.orders.get_mut(&order.id)
            .ok_or_else(|| anyhow!("Order not found: {}", order.id))?;
        if stored.revision != order.revision {
            return Ok(false);
        }
        *stored = Order { revision: order.revision + 1, ..order.clone() };
        Ok(true)
    }

    async fn save_task(&self, task: &Task) -> Result<()> {
        self.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn get_task(&self, task_id: Uuid) -> Result<Option<Task>> {
        Ok(self.tasks.get(&task_id).map(|t| t.value().clone()))
    }

    async fn update_task(&self, task: &Task) -> Result<()> {
        let mut stored = self.tasks.get_mut(&task.id)
            .ok_or_else(|| anyhow!("Task not found: {}", task.id))?;
        *stored = task.clone();
        Ok(())
    }

    async fn delete_task(&self, task_id: Uuid) -> Result<Option<Task>> {
        let removed = self.tasks.remove(&task_id).map(|(_, t)| t);
        if removed.is_some() {
            self.actors.remove(&task_id);
        }
        Ok(removed)
    }

    async fn get_active_tasks(&self, order_id: Uuid) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self.tasks.iter()
            .filter(|t| t.order_id == order_id)
            .map(|t| t.value().clone())
            .collect();
        tasks.sort_by_key(|t| t.create_time);
        Ok(tasks)
    }

    async fn save_task_actor(&self, actor: &TaskActor) -> Result<()> {
        let mut ids = self.actors.entry(actor.task_id).or_default();
        if !ids.contains(&actor.actor_id) {
            ids.push(actor.actor_id.clone());
        }
        Ok(())
    }

    async fn get_task_actors_by_task_id(&self, task_id: Uuid) -> Result<Vec<TaskActor>> {
        Ok(self.actors.get(&task_id)
            .map(|ids| ids.iter()
                .map(|actor_id| TaskActor { task_id, actor_id: actor_id.clone() })
                .collect())
            .unwrap_or_default())
    }

    async fn save_history(&self, history: &HistoryTask) -> Result<()> {
        self.histories.insert(history.id, history.clone());
        Ok(())
    }

    async fn get_history(&self, task_id: Uuid) -> Result<Option<HistoryTask>> {
        Ok(self.histories.get(&task_id).map(|h| h.value().clone()))
    }

    async fn delete_history(&self, task_id: Uuid) -> Result<Option<HistoryTask>> {
        Ok(self.histories.remove(&task_id).map(|(_, h)| h))
    }

    async fn get_history_tasks(&self, order_id: Uuid) -> Result<Vec<HistoryTask>> {
        let mut histories: Vec<HistoryTask> = self.histories.iter()
            .filter(|h| h.order_id == order_id)
            .map(|h| h.value().clone())
            .collect();
        histories.sort_by_key(|h| h.finish_time);
        Ok(histories)
    }

    async fn init_join_count(&self, order_id: Uuid, key: &str, count: usize) -> Result<()> {
        if count == 0 {
            self.joins.remove(&(order_id, key.to_string()));
        } else {
            self.joins.insert((order_id, key.to_string()), count);
        }
        Ok(())
    }

    async fn decrement_join_count(&self, order_id: Uuid, key: &str, initial_count: usize) -> Result<usize> {
        // The entry guard holds the shard lock, so read-decrement-remove is one step.
        match self.joins.entry((order_id, key.to_string())) {
            Entry::Occupied(mut o) => {
                let remaining = o.get().saturating_sub(1);
                if remaining == 0 {
                    o.remove();
                } else {
                    *o.get_mut() = remaining;
                }
                Ok(remaining)
            }
            Entry::Vacant(v) => {
                let remaining = initial_count.saturating_sub(1);
                if remaining > 0 {
                    v.insert(remaining);
                }
                Ok(remaining)
            }
        }
    }

    async fn increment_join_count(&self, order_id: Uuid, key: &str) -> Result<bool> {
        match self.joins.get_mut(&(order_id, key.to_string())) {
            Some(mut remaining) => {
                *remaining += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn clear_join_counts(&self, order_id: Uuid) -> Result<()> {
        self.joins.retain(|(id, _), _| *id != order_id);
        Ok(())
    }
}
