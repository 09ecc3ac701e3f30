use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use chrono::{DateTime, Utc};
use evalexpr::{ContextWithMutableVariables, DefaultNumericTypes, HashMapContext, Node as EvalNode};
use serde::{Serialize, Deserialize};
use serde_json::Value;
use crate::dsl::{PerformType, ProcessDefinition};
use crate::error::{EngineError, Result};

pub type NodeIndex = usize;

/// 已部署的流程 (不可变)
/// A deployed, immutable process version.
#[derive(Debug)]
pub struct Process {
    pub id: String,
    pub name: String,
    pub display_name: Option<String>,
    pub version: u32,
    pub model: ProcessModel,
    pub definition: ProcessDefinition,
}

/// What the store keeps for a deployed version; recompiled on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub version: u32,
    pub deployed_at: DateTime<Utc>,
    pub definition: ProcessDefinition,
}

/// 编译后的流程图
#[derive(Debug, Default)]
pub struct ProcessModel {
    pub nodes: Vec<NodeModel>,
    pub index: HashMap<String, NodeIndex>,
    pub start: Option<NodeIndex>,
}

impl ProcessModel {
    pub fn node(&self, name: &str) -> Option<&NodeModel> {
        self.index.get(name).map(|idx| &self.nodes[*idx])
    }

    pub fn require_node(&self, name: &str) -> Result<&NodeModel> {
        self.node(name).ok_or_else(|| EngineError::not_found("node", name))
    }

    pub fn start(&self) -> Option<&NodeModel> {
        self.start.map(|idx| &self.nodes[idx])
    }

    /// Human task nodes that lead straight into `name`.
    pub fn previous_task_nodes(&self, name: &str) -> Vec<&NodeModel> {
        let Some(node) = self.node(name) else {
            return Vec::new();
        };
        node.inputs
            .iter()
            .filter_map(|t| self.node(&t.source))
            .filter(|n| matches!(n.kind, NodeKind::Task(_)))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct NodeModel {
    pub name: String,
    pub display_name: String,
    pub kind: NodeKind,
    pub inputs: Vec<TransitionModel>,
    pub outputs: Vec<TransitionModel>,
}

impl NodeModel {
    /// Static indegree: how many branches a join waits for.
    pub fn indegree(&self) -> usize {
        self.inputs.len()
    }
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Start,
    End,
    Task(TaskModel),
    Custom(CustomModel),
    Fork,
    Join,
    SubProcess(SubProcessModel),
}

#[derive(Debug, Clone, Default)]
pub struct TaskModel {
    pub assignee: Option<String>,
    pub perform_type: PerformType,
    pub expire_time: Option<String>,
    pub action_url: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CustomModel {
    pub handler: Option<String>,
    pub params: HashMap<String, Value>,
    pub output: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SubProcessModel {
    pub process_id: String,
    pub version: Option<u32>,
}

/// Node templates accepted by `Engine::create_free_task`.
#[derive(Debug, Clone)]
pub enum WorkModel {
    Task {
        name: String,
        display_name: String,
        model: TaskModel,
    },
    Custom {
        name: String,
        display_name: String,
    },
}

#[derive(Debug, Clone)]
pub struct TransitionModel {
    pub name: Option<String>,
    pub source: String,
    pub target: String,
    pub condition: Option<Arc<Condition>>,
}

impl TransitionModel {
    /// A one-off, always enabled transition used by dynamic jumps.
    pub fn synthetic(source: &str, target: &str) -> Self {
        Self {
            name: None,
            source: source.to_string(),
            target: target.to_string(),
            condition: None,
        }
    }

    pub fn is_enabled(&self, args: &HashMap<String, Value>) -> Result<bool> {
        match &self.condition {
            Some(condition) => condition.eval(args),
            None => Ok(true),
        }
    }
}

/// Pre-compiled transition predicate.
pub struct Condition {
    pub raw: String,
    pub tree: EvalNode<DefaultNumericTypes>,
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Condition").field(&self.raw).finish()
    }
}

impl Condition {
    pub fn compile(raw: &str) -> Result<Self> {
        let clean = raw.replace("${", "").replace('}', "");
        let tree = evalexpr::build_operator_tree::<DefaultNumericTypes>(&clean)
            .map_err(|e| EngineError::Validation(format!("invalid condition '{}': {}", raw, e)))?;
        Ok(Self { raw: clean, tree })
    }

    pub fn eval(&self, args: &HashMap<String, Value>) -> Result<bool> {
        let ctx = eval_context(args);
        self.tree
            .eval_boolean_with_context(&ctx)
            .map_err(|e| EngineError::Validation(format!("condition '{}' failed: {}", self.raw, e)))
    }
}

/// Builds an evalexpr context from the scalar entries of `args`.
pub fn eval_context(args: &HashMap<String, Value>) -> HashMapContext<DefaultNumericTypes> {
    let mut ctx = HashMapContext::<DefaultNumericTypes>::new();
    for (k, v) in args {
        if let Some(ev) = to_eval_value(v) {
            let _ = ctx.set_value(k.clone(), ev);
        }
    }
    ctx
}

pub fn to_eval_value(v: &Value) -> Option<evalexpr::Value<DefaultNumericTypes>> {
    match v {
        Value::String(s) => Some(evalexpr::Value::String(s.clone())),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() { Some(evalexpr::Value::Int(i)) }
            else { n.as_f64().map(evalexpr::Value::Float) }
        }
        Value::Bool(b) => Some(evalexpr::Value::Boolean(*b)),
        _ => None,
    }
}

pub fn from_eval_value(v: evalexpr::Value<DefaultNumericTypes>) -> Option<Value> {
    match v {
        evalexpr::Value::String(s) => Some(Value::String(s)),
        evalexpr::Value::Int(i) => Some(Value::from(i)),
        evalexpr::Value::Float(f) => Some(Value::from(f)),
        evalexpr::Value::Boolean(b) => Some(Value::Bool(b)),
        _ => None,
    }
}
