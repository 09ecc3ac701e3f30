use std::fs;
use std::path::Path;
use anyhow::{Result, Context as AnyhowContext};
use tracing::debug;
use crate::dsl::ProcessDefinition;

pub fn load_process_from_yaml(file_path: impl AsRef<Path>) -> Result<ProcessDefinition> {
    let file_path = file_path.as_ref();
    let yaml_content = fs::read_to_string(file_path)
        .with_context(|| format!("Failed to read YAML file from {}", file_path.display()))?;

    let definition: ProcessDefinition = serde_yaml::from_str(&yaml_content)
        .with_context(|| format!("Failed to deserialize YAML content from {}", file_path.display()))?;

    Ok(definition)
}

/// Every `*.yaml` / `*.yml` file directly under `dir`, sorted by file name.
pub fn load_processes_from_dir(dir: impl AsRef<Path>) -> Result<Vec<ProcessDefinition>> {
    let dir = dir.as_ref();
    let mut paths = fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && matches!(p.extension().and_then(|e| e.to_str()), Some("yaml" | "yml")))
        .collect::<Vec<_>>();
    paths.sort();

    let mut definitions = Vec::with_capacity(paths.len());
    for path in paths {
        debug!(path = %path.display(), "Loading process definition");
        definitions.push(load_process_from_yaml(&path)?);
    }
    Ok(definitions)
}
