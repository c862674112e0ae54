//! SH-013: Deployed workflow descriptors: load, save (atomic), list.
//!
//! ```text
//! <state>/workflows/<name>/<version_label>/workflow.yaml
//! <state>/workflows/<name>/latest.yaml
//! ```

use super::error::{BuildError, Result};
use super::types::Workflow;
use std::path::{Path, PathBuf};

pub fn workflows_dir(state_dir: &Path) -> PathBuf {
    state_dir.join("workflows")
}

pub fn descriptor_path(state_dir: &Path, name: &str, version_label: &str) -> PathBuf {
    workflows_dir(state_dir)
        .join(name)
        .join(version_label)
        .join("workflow.yaml")
}

pub fn latest_path(state_dir: &Path, name: &str) -> PathBuf {
    workflows_dir(state_dir).join(name).join("latest.yaml")
}

fn write_atomic(path: &Path, body: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
    }
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, body).map_err(|e| BuildError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| BuildError::io(path, e))
}

/// Write the versioned descriptor and point `latest.yaml` at the same content.
pub fn save_workflow(state_dir: &Path, workflow: &Workflow) -> Result<PathBuf> {
    let yaml = serde_yaml_ng::to_string(workflow)
        .map_err(|e| BuildError::Config(format!("cannot encode workflow descriptor: {}", e)))?;
    let path = descriptor_path(state_dir, &workflow.name, &workflow.version_label);
    write_atomic(&path, &yaml)?;
    write_atomic(&latest_path(state_dir, &workflow.name), &yaml)?;
    Ok(path)
}

fn load(path: &Path) -> Result<Option<Workflow>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path).map_err(|e| BuildError::io(path, e))?;
    let workflow = serde_yaml_ng::from_str(&content).map_err(|e| {
        BuildError::Config(format!("invalid workflow descriptor {}: {}", path.display(), e))
    })?;
    Ok(Some(workflow))
}

/// The most recent descriptor for a workflow, if one was ever saved.
pub fn load_latest(state_dir: &Path, name: &str) -> Result<Option<Workflow>> {
    load(&latest_path(state_dir, name))
}

pub fn load_version(state_dir: &Path, name: &str, version_label: &str) -> Result<Option<Workflow>> {
    load(&descriptor_path(state_dir, name, version_label))
}

/// Latest descriptor of every workflow under the state directory, by name.
pub fn list_latest(state_dir: &Path) -> Result<Vec<Workflow>> {
    let dir = workflows_dir(state_dir);
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut names: Vec<String> = std::fs::read_dir(&dir)
        .map_err(|e| BuildError::io(&dir, e))?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    names.sort();

    let mut out = Vec::new();
    for name in names {
        if let Some(wf) = load_latest(state_dir, &name)? {
            out.push(wf);
        }
    }
    Ok(out)
}
