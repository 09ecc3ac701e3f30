pub mod builder;

use std::collections::HashMap;
use serde::{Serialize, Deserialize};
use serde_json::Value;

/// 流程定义 (序列化形式)
/// The serialized model graph: every node plus the transitions between them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub nodes: Vec<NodeDef>,
    #[serde(default)]
    pub transitions: Vec<TransitionDef>,
}

/// How many participants must act before a human task node passes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PerformType {
    /// One task shared by all actors; any one of them completes it.
    #[default]
    Any,
    /// One task per actor; every one must be completed.
    All,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum NodeType {
    Start,
    End,
    /// Human task. Traversal stops here until a produced task is executed.
    Task {
        /// Argument key holding the participant ids.
        #[serde(default)]
        assignee: Option<String>,
        #[serde(default)]
        perform_type: PerformType,
        /// Argument key holding an RFC 3339 expiry timestamp.
        #[serde(default)]
        expire_time: Option<String>,
        #[serde(default)]
        action_url: Option<String>,
    },
    /// Automatic step, optionally running a registered handler.
    Custom {
        #[serde(default)]
        handler: Option<String>,
        #[serde(default)]
        params: HashMap<String, Value>,
        #[serde(default)]
        output: Option<String>,
    },
    Fork,
    Join,
    SubProcess {
        process_id: String,
        #[serde(default)]
        version: Option<u32>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeDef {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(flatten)]
    pub kind: NodeType,
}

/// 节点之间的连线
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransitionDef {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub name: Option<String>,
    /// evalexpr predicate over the routing arguments; absent means always enabled.
    #[serde(default)]
    pub condition: Option<String>,
}
