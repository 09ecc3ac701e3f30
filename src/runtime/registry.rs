use std::sync::Arc;
use chrono::Utc;
use dashmap::DashMap;
use tracing::{info, warn};
use crate::compiler::core::Compiler;
use crate::dsl::{NodeType, ProcessDefinition};
use crate::error::{EngineError, Result};
use crate::runtime::model::{Process, ProcessRecord};
use crate::runtime::storage::StateStore;

/// 流程注册表
/// Every deployed version of every process, keyed by process id.
///
/// Writers take the entry lock of the id they redeploy, so readers of that
/// id wait for the new version while other ids stay readable.
pub struct ProcessRegistry {
    processes: DashMap<String, Vec<Arc<Process>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self {
            processes: DashMap::new(),
        }
    }

    /// Compiles `definition` and stores it as the next version of its id.
    pub fn register(&self, definition: ProcessDefinition) -> Result<(Arc<Process>, ProcessRecord)> {
        let mut versions = self.processes.entry(definition.id.clone()).or_default();
        let version = versions.last().map(|p| p.version + 1).unwrap_or(1);
        let record = ProcessRecord {
            version,
            deployed_at: Utc::now(),
            definition,
        };
        let process = Arc::new(compile(&record)?);
        versions.push(process.clone());
        info!(process_id = %process.id, version, "Process registered");
        Ok((process, record))
    }

    /// Puts back a version read from storage, keeping versions ordered.
    pub fn insert(&self, record: &ProcessRecord) -> Result<Arc<Process>> {
        let process = Arc::new(compile(record)?);
        let mut versions = self.processes.entry(process.id.clone()).or_default();
        versions.retain(|p| p.version != process.version);
        versions.push(process.clone());
        versions.sort_by_key(|p| p.version);
        Ok(process)
    }

    /// Latest version.
    pub fn resolve(&self, id: &str) -> Result<Arc<Process>> {
        self.processes.get(id)
            .and_then(|versions| versions.last().cloned())
            .ok_or_else(|| EngineError::not_found("process", id))
    }

    pub fn resolve_version(&self, id: &str, version: u32) -> Result<Arc<Process>> {
        self.processes.get(id)
            .and_then(|versions| versions.iter().find(|p| p.version == version).cloned())
            .ok_or_else(|| EngineError::not_found("process", format!("{}@{}", id, version)))
    }

    /// Repopulates from storage. Returns how many versions were loaded.
    pub async fn load(&self, store: &dyn StateStore) -> Result<usize> {
        let records = store.get_all_process().await?;
        if records.is_empty() {
            warn!("No process deployed yet");
            return Ok(0);
        }
        for record in &records {
            self.insert(record)?;
        }
        for (process_id, reference) in self.unresolved_references() {
            warn!(process_id = %process_id, reference = %reference, "Sub-process reference does not resolve");
        }
        Ok(records.len())
    }

    /// (process id, referenced id) pairs for sub-process nodes whose target is not registered.
    pub fn unresolved_references(&self) -> Vec<(String, String)> {
        // Snapshot first: lookups below must not run under an iterator's shard lock.
        let latest: Vec<Arc<Process>> = self.processes.iter()
            .filter_map(|entry| entry.value().last().cloned())
            .collect();

        let mut missing = Vec::new();
        for latest in latest {
            for node in &latest.definition.nodes {
                if let NodeType::SubProcess { process_id, version } = &node.kind {
                    let found = match version {
                        Some(v) => self.resolve_version(process_id, *v).is_ok(),
                        None => self.processes.contains_key(process_id),
                    };
                    if !found {
                        missing.push((latest.id.clone(), process_id.clone()));
                    }
                }
            }
        }
        missing
    }
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn compile(record: &ProcessRecord) -> Result<Process> {
    let definition = record.definition.clone();
    let model = Compiler::new().compile(&definition)?;
    Ok(Process {
        id: definition.id.clone(),
        name: definition.name.clone(),
        display_name: definition.display_name.clone(),
        version: record.version,
        model,
        definition,
    })
}
