use std::collections::HashMap;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderState {
    Active,
    Finished,
    Terminated,
}

/// 流程实例
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub process_id: String,
    /// Version the order started on; routing keeps using it after redeploys.
    pub process_version: u32,
    pub creator: Option<String>,
    pub create_time: DateTime<Utc>,
    pub last_updator: Option<String>,
    pub last_update_time: DateTime<Utc>,
    pub finish_time: Option<DateTime<Utc>>,
    pub parent_order_id: Option<Uuid>,
    pub parent_node_name: Option<String>,
    pub state: OrderState,
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    /// Bumped by the store on every write; guards against lost updates.
    #[serde(default)]
    pub revision: u64,
}

impl Order {
    pub fn new(process_id: &str, process_version: u32, creator: Option<String>, variables: HashMap<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            process_id: process_id.to_string(),
            process_version,
            last_updator: creator.clone(),
            creator,
            create_time: now,
            last_update_time: now,
            finish_time: None,
            parent_order_id: None,
            parent_node_name: None,
            state: OrderState::Active,
            variables,
            revision: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == OrderState::Active
    }

    pub fn touch(&mut self, operator: Option<&str>) {
        self.last_updator = operator.map(str::to_string);
        self.last_update_time = Utc::now();
    }
}
