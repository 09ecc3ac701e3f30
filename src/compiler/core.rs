use std::collections::HashMap;
use std::sync::Arc;
use crate::dsl::{NodeDef, NodeType, ProcessDefinition};
use crate::error::{EngineError, Result};
use crate::runtime::model::{
    Condition, CustomModel, NodeIndex, NodeKind, NodeModel, ProcessModel, SubProcessModel, TaskModel, TransitionModel,
};

/// Turns a process definition into the linked node graph the engine walks.
pub struct Compiler {
    id_map: HashMap<String, NodeIndex>,
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            id_map: HashMap::new(),
        }
    }

    pub fn compile(&mut self, definition: &ProcessDefinition) -> Result<ProcessModel> {
        self.id_map.clear();

        // 1. Pass 1: Indexing
        for (idx, node) in definition.nodes.iter().enumerate() {
            if node.name.trim().is_empty() {
                return Err(EngineError::Validation(format!("process '{}' has a node without a name", definition.id)));
            }
            if self.id_map.insert(node.name.clone(), idx).is_some() {
                return Err(EngineError::Validation(format!("duplicate node name: {}", node.name)));
            }
        }

        // 2. Pass 2: Transform
        let mut nodes = definition.nodes.iter()
            .map(transform_node)
            .collect::<Result<Vec<_>>>()?;

        // 3. Pass 3: Link transitions
        for def in &definition.transitions {
            let source = self.resolve(&def.source)?;
            let target = self.resolve(&def.target)?;
            let condition = match def.condition.as_deref().map(str::trim) {
                Some(raw) if !raw.is_empty() => Some(Arc::new(Condition::compile(raw)?)),
                _ => None,
            };
            let transition = TransitionModel {
                name: def.name.clone(),
                source: def.source.clone(),
                target: def.target.clone(),
                condition,
            };
            nodes[target].inputs.push(transition.clone());
            nodes[source].outputs.push(transition);
        }

        // 4. Start node; a process without one compiles but cannot be started
        let mut starts = nodes.iter().enumerate()
            .filter(|(_, n)| matches!(n.kind, NodeKind::Start))
            .map(|(idx, _)| idx);
        let start = starts.next();
        if starts.next().is_some() {
            return Err(EngineError::Validation(format!("process '{}' has more than one start node", definition.id)));
        }

        Ok(ProcessModel {
            nodes,
            index: self.id_map.clone(),
            start,
        })
    }

    fn resolve(&self, name: &str) -> Result<NodeIndex> {
        self.id_map.get(name)
            .copied()
            .ok_or_else(|| EngineError::Validation(format!("transition refers to unknown node: {}", name)))
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

fn transform_node(node: &NodeDef) -> Result<NodeModel> {
    let kind = match &node.kind {
        NodeType::Start => NodeKind::Start,
        NodeType::End => NodeKind::End,
        NodeType::Task { assignee, perform_type, expire_time, action_url } => NodeKind::Task(TaskModel {
            assignee: assignee.clone(),
            perform_type: *perform_type,
            expire_time: expire_time.clone(),
            action_url: action_url.clone(),
        }),
        NodeType::Custom { handler, params, output } => NodeKind::Custom(CustomModel {
            handler: handler.clone(),
            params: params.clone(),
            output: output.clone(),
        }),
        NodeType::Fork => NodeKind::Fork,
        NodeType::Join => NodeKind::Join,
        NodeType::SubProcess { process_id, version } => {
            if process_id.trim().is_empty() {
                return Err(EngineError::Validation(format!("sub-process node '{}' has no process id", node.name)));
            }
            NodeKind::SubProcess(SubProcessModel {
                process_id: process_id.clone(),
                version: *version,
            })
        }
    };

    Ok(NodeModel {
        name: node.name.clone(),
        display_name: node.display_name.clone().unwrap_or_else(|| node.name.clone()),
        kind,
        inputs: Vec::new(),
        outputs: Vec::new(),
    })
}
