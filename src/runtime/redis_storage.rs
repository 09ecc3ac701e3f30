use async_trait::async_trait;
use uuid::Uuid;
use crate::runtime::model::ProcessRecord;
use crate::runtime::order::Order;
use crate::runtime::storage::StateStore;
use crate::runtime::task::{HistoryTask, Task, TaskActor};
use anyhow::Result;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use std::collections::HashMap;

/// Redis-backed store.
///
/// Rows are JSON strings; per-order sets index live and archived tasks, and
/// join counters live in one hash per order updated by Lua scripts.
pub struct RedisStateStore {
    client: redis::Client,
    prefix: String,
}

impl RedisStateStore {
    pub fn new(client: redis::Client) -> Self {
        Self::with_prefix(client, "flowline")
    }

    pub fn with_prefix(client: redis::Client, prefix: &str) -> Self {
        Self {
            client,
            prefix: prefix.to_string(),
        }
    }

    async fn conn(&self) -> Result<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    fn processes_key(&self) -> String {
        format!("{}:processes", self.prefix)
    }

    fn order_key(&self, order_id: Uuid) -> String {
        format!("{}:order:{}", self.prefix, order_id)
    }

    fn order_tasks_key(&self, order_id: Uuid) -> String {
        format!("{}:order:{}:tasks", self.prefix, order_id)
    }

    fn order_history_key(&self, order_id: Uuid) -> String {
        format!("{}:order:{}:history", self.prefix, order_id)
    }

    fn join_key(&self, order_id: Uuid) -> String {
        format!("{}:order:{}:joins", self.prefix, order_id)
    }

    fn task_key(&self, task_id: Uuid) -> String {
        format!("{}:task:{}", self.prefix, task_id)
    }

    fn actors_key(&self, task_id: Uuid) -> String {
        format!("{}:task:{}:actors", self.prefix, task_id)
    }

    fn history_key(&self, task_id: Uuid) -> String {
        format!("{}:history:{}", self.prefix, task_id)
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.conn().await?;
        let raw: Option<String> = conn.get(key).await?;
        match raw {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    async fn load_all<T: DeserializeOwned>(&self, ids: Vec<String>, key_of: impl Fn(Uuid) -> String) -> Result<Vec<T>> {
        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            let Ok(id) = Uuid::parse_str(&id) else { continue };
            if let Some(row) = self.get_json(&key_of(id)).await? {
                rows.push(row);
            }
        }
        Ok(rows)
    }
}

// Deletes a row and unlinks it from its order index in one step.
// KEYS[1] = row key, KEYS[2] = order index set, KEYS[3] = extra key to drop (may repeat KEYS[1])
// ARGV[1] = row id
const CLAIM_SCRIPT: &str = r#"
    local row = redis.call("GET", KEYS[1])
    if row == false then
        return false
    end
    redis.call("DEL", KEYS[1])
    redis.call("DEL", KEYS[3])
    redis.call("SREM", KEYS[2], ARGV[1])
    return row
"#;

// Compare-and-set on an order row.
// KEYS[1] = order key, ARGV[1] = expected revision, ARGV[2] = new row
const UPDATE_ORDER_SCRIPT: &str = r#"
    local row = redis.call("GET", KEYS[1])
    if row == false then
        return redis.error_reply("order not found")
    end
    local current = cjson.decode(row).revision or 0
    if current ~= tonumber(ARGV[1]) then
        return 0
    end
    redis.call("SET", KEYS[1], ARGV[2])
    return 1
"#;

// KEYS[1] = join hash, ARGV[1] = field, ARGV[2] = initial count
const DECREMENT_SCRIPT: &str = r#"
    local current = redis.call("HGET", KEYS[1], ARGV[1])
    local val
    if current == false then
        val = tonumber(ARGV[2]) - 1
    else
        val = tonumber(current) - 1
    end
    if val <= 0 then
        redis.call("HDEL", KEYS[1], ARGV[1])
        return 0
    end
    redis.call("HSET", KEYS[1], ARGV[1], val)
    return val
"#;

// KEYS[1] = join hash, ARGV[1] = field
const INCREMENT_SCRIPT: &str = r#"
    if redis.call("HEXISTS", KEYS[1], ARGV[1]) == 0 then
        return 0
    end
    redis.call("HINCRBY", KEYS[1], ARGV[1], 1)
    return 1
"#;

#[async_trait]
impl StateStore for RedisStateStore {
    async fn save_process(&self, record: &ProcessRecord) -> Result<()> {
        let mut conn = self.conn().await?;
        let field = format!("{}@{}", record.definition.id, record.version);
        let _: () = conn.hset(self.processes_key(), field, serde_json::to_string(record)?).await?;
        Ok(())
    }

    async fn get_all_process(&self) -> Result<Vec<ProcessRecord>> {
        let mut conn = self.conn().await?;
        let raw: HashMap<String, String> = conn.hgetall(self.processes_key()).await?;
        let mut records = Vec::with_capacity(raw.len());
        for (_, json) in raw {
            records.push(serde_json::from_str(&json)?);
        }
        Ok(records)
    }

    async fn create_order(&self, order: &Order) -> Result<()> {
        let mut conn = self.conn().await?;
        let created: bool = conn.set_nx(self.order_key(order.id), serde_json::to_string(order)?).await?;
        if !created {
            anyhow::bail!("Order already exists: {}", order.id);
        }
        Ok(())
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>> {
        self.get_json(&self.order_key(order_id)).await
    }

    async fn update_order(&self, order: &Order) -> Result<bool> {
        let mut conn = self.conn().await?;
        let next = Order { revision: order.revision + 1, ..order.clone() };
        let script = redis::Script::new(UPDATE_ORDER_SCRIPT);
        let written: i64 = script
            .key(self.order_key(order.id))
            .arg(order.revision)
            .arg(serde_json::to_string(&next)?)
            .invoke_async(&mut conn)
            .await?;
        Ok(written == 1)
    }

    async fn save_task(&self, task: &Task) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.set(self.task_key(task.id), serde_json::to_string(task)?).await?;
        let _: () = conn.sadd(self.order_tasks_key(task.order_id), task.id.to_string()).await?;
        Ok(())
    }

    async fn get_task(&self, task_id: Uuid) -> Result<Option<Task>> {
        self.get_json(&self.task_key(task_id)).await
    }

    async fn update_task(&self, task: &Task) -> Result<()> {
        let mut conn = self.conn().await?;
        let updated: Option<String> = conn.set_options(
            self.task_key(task.id),
            serde_json::to_string(task)?,
            redis::SetOptions::default().conditional_set(redis::ExistenceCheck::XX),
        ).await?;
        if updated.is_none() {
            anyhow::bail!("Task not found: {}", task.id);
        }
        Ok(())
    }

    async fn delete_task(&self, task_id: Uuid) -> Result<Option<Task>> {
        let mut conn = self.conn().await?;
        // The order id is only known from the row itself; read it first.
        let Some(task) = self.get_task(task_id).await? else {
            return Ok(None);
        };
        let script = redis::Script::new(CLAIM_SCRIPT);
        let claimed: Option<String> = script
            .key(self.task_key(task_id))
            .key(self.order_tasks_key(task.order_id))
            .key(self.actors_key(task_id))
            .arg(task_id.to_string())
            .invoke_async(&mut conn)
            .await?;
        match claimed {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn get_active_tasks(&self, order_id: Uuid) -> Result<Vec<Task>> {
        let mut conn = self.conn().await?;
        let ids: Vec<String> = conn.smembers(self.order_tasks_key(order_id)).await?;
        let mut tasks: Vec<Task> = self.load_all(ids, |id| self.task_key(id)).await?;
        tasks.sort_by_key(|t| t.create_time);
        Ok(tasks)
    }

    async fn save_task_actor(&self, actor: &TaskActor) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.sadd(self.actors_key(actor.task_id), &actor.actor_id).await?;
        Ok(())
    }

    async fn get_task_actors_by_task_id(&self, task_id: Uuid) -> Result<Vec<TaskActor>> {
        let mut conn = self.conn().await?;
        let mut ids: Vec<String> = conn.smembers(self.actors_key(task_id)).await?;
        ids.sort();
        Ok(ids.into_iter().map(|actor_id| TaskActor { task_id, actor_id }).collect())
    }

    async fn save_history(&self, history: &HistoryTask) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.set(self.history_key(history.id), serde_json::to_string(history)?).await?;
        let _: () = conn.sadd(self.order_history_key(history.order_id), history.id.to_string()).await?;
        Ok(())
    }

    async fn get_history(&self, task_id: Uuid) -> Result<Option<HistoryTask>> {
        self.get_json(&self.history_key(task_id)).await
    }

    async fn delete_history(&self, task_id: Uuid) -> Result<Option<HistoryTask>> {
        let mut conn = self.conn().await?;
        let Some(history) = self.get_history(task_id).await? else {
            return Ok(None);
        };
        let key = self.history_key(task_id);
        let script = redis::Script::new(CLAIM_SCRIPT);
        let claimed: Option<String> = script
            .key(&key)
            .key(self.order_history_key(history.order_id))
            .key(&key)
            .arg(task_id.to_string())
            .invoke_async(&mut conn)
            .await?;
        match claimed {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn get_history_tasks(&self, order_id: Uuid) -> Result<Vec<HistoryTask>> {
        let mut conn = self.conn().await?;
        let ids: Vec<String> = conn.smembers(self.order_history_key(order_id)).await?;
        let mut histories: Vec<HistoryTask> = self.load_all(ids, |id| self.history_key(id)).await?;
        histories.sort_by_key(|h| h.finish_time);
        Ok(histories)
    }

    async fn init_join_count(&self, order_id: Uuid, key: &str, count: usize) -> Result<()> {
        let mut conn = self.conn().await?;
        if count == 0 {
            let _: () = conn.hdel(self.join_key(order_id), key).await?;
        } else {
            let _: () = conn.hset(self.join_key(order_id), key, count).await?;
        }
        Ok(())
    }

    async fn decrement_join_count(&self, order_id: Uuid, key: &str, initial_count: usize) -> Result<usize> {
        let mut conn = self.conn().await?;
        let script = redis::Script::new(DECREMENT_SCRIPT);
        let remaining: usize = script
            .key(self.join_key(order_id))
            .arg(key)
            .arg(initial_count)
            .invoke_async(&mut conn)
            .await?;
        Ok(remaining)
    }

    async fn increment_join_count(&self, order_id: Uuid, key: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        let script = redis::Script::new(INCREMENT_SCRIPT);
        let reopened: i64 = script
            .key(self.join_key(order_id))
            .arg(key)
            .invoke_async(&mut conn)
            .await?;
        Ok(reopened == 1)
    }

    async fn clear_join_counts(&self, order_id: Uuid) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.del(self.join_key(order_id)).await?;
        Ok(())
    }
}
