use crate::dsl::{ProcessDefinition, NodeDef, NodeType, PerformType, TransitionDef};
use std::collections::HashMap;
use serde_json::Value;

pub struct ProcessBuilder {
    id: String,
    name: String,
    display_name: Option<String>,
    pub nodes: Vec<NodeDef>,
    transitions: Vec<TransitionDef>,
}

impl ProcessBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            display_name: None,
            nodes: Vec::new(),
            transitions: Vec::new(),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn display_name(mut self, display_name: &str) -> Self {
        self.display_name = Some(display_name.to_string());
        self
    }

    fn node(mut self, name: &str, kind: NodeType) -> Self {
        self.nodes.push(NodeDef {
            name: name.to_string(),
            display_name: None,
            kind,
        });
        self
    }

    pub fn start(self, name: &str) -> Self {
        self.node(name, NodeType::Start)
    }

    pub fn end(self, name: &str) -> Self {
        self.node(name, NodeType::End)
    }

    pub fn fork(self, name: &str) -> Self {
        self.node(name, NodeType::Fork)
    }

    pub fn join(self, name: &str) -> Self {
        self.node(name, NodeType::Join)
    }

    /// Automatic node with no handler: it only follows its outputs.
    pub fn automatic(self, name: &str) -> Self {
        self.node(name, NodeType::Custom {
            handler: None,
            params: HashMap::new(),
            output: None,
        })
    }

    pub fn sub_process(self, name: &str, process_id: &str) -> Self {
        self.node(name, NodeType::SubProcess {
            process_id: process_id.to_string(),
            version: None,
        })
    }

    pub fn task(self, name: &str) -> TaskBuilder {
        TaskBuilder {
            process_builder: self,
            name: name.to_string(),
            display_name: None,
            assignee: None,
            perform_type: PerformType::Any,
            expire_time: None,
            action_url: None,
        }
    }

    pub fn custom(self, name: &str, handler: &str) -> CustomBuilder {
        CustomBuilder {
            process_builder: self,
            name: name.to_string(),
            handler: handler.to_string(),
            params: HashMap::new(),
            output: None,
        }
    }

    pub fn connect(mut self, source: &str, target: &str) -> Self {
        self.transitions.push(TransitionDef {
            source: source.to_string(),
            target: target.to_string(),
            name: None,
            condition: None,
        });
        self
    }

    pub fn connect_if(mut self, source: &str, target: &str, condition: &str) -> Self {
        self.transitions.push(TransitionDef {
            source: source.to_string(),
            target: target.to_string(),
            name: None,
            condition: Some(condition.to_string()),
        });
        self
    }

    pub fn build(self) -> ProcessDefinition {
        ProcessDefinition {
            id: self.id,
            name: self.name,
            display_name: self.display_name,
            nodes: self.nodes,
            transitions: self.transitions,
        }
    }
}

pub struct TaskBuilder {
    process_builder: ProcessBuilder,
    name: String,
    display_name: Option<String>,
    assignee: Option<String>,
    perform_type: PerformType,
    expire_time: Option<String>,
    action_url: Option<String>,
}

impl TaskBuilder {
    pub fn display_name(mut self, display_name: &str) -> Self {
        self.display_name = Some(display_name.to_string());
        self
    }

    /// Argument key that carries the participant ids.
    pub fn assignee(mut self, key: &str) -> Self {
        self.assignee = Some(key.to_string());
        self
    }

    pub fn perform_type(mut self, perform_type: PerformType) -> Self {
        self.perform_type = perform_type;
        self
    }

    pub fn expire_time(mut self, key: &str) -> Self {
        self.expire_time = Some(key.to_string());
        self
    }

    pub fn action_url(mut self, url: &str) -> Self {
        self.action_url = Some(url.to_string());
        self
    }

    pub fn build(mut self) -> ProcessBuilder {
        self.process_builder.nodes.push(NodeDef {
            name: self.name,
            display_name: self.display_name,
            kind: NodeType::Task {
                assignee: self.assignee,
                perform_type: self.perform_type,
                expire_time: self.expire_time,
                action_url: self.action_url,
            },
        });
        self.process_builder
    }
}

pub struct CustomBuilder {
    process_builder: ProcessBuilder,
    name: String,
    handler: String,
    params: HashMap<String, Value>,
    output: Option<String>,
}

impl CustomBuilder {
    pub fn param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn output(mut self, var_name: &str) -> Self {
        self.output = Some(var_name.to_string());
        self
    }

    pub fn build(mut self) -> ProcessBuilder {
        self.process_builder.nodes.push(NodeDef {
            name: self.name,
            display_name: None,
            kind: NodeType::Custom {
                handler: Some(self.handler),
                params: self.params,
                output: self.output,
            },
        });
        self.process_builder
    }
}
