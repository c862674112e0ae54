//! SH-003: Path template rendering and stage-link ordering.
//!
//! Renders `{{var}}` templates in deploy paths. Checks the workflow DAG:
//! a stage may only link to stages with a strictly smaller index, so
//! binding stages in ascending index order always finds its producers bound.

use super::error::{BuildError, Result};
use super::types::*;
use std::collections::{HashMap, HashSet};

/// Render all `{{var}}` occurrences in a template.
pub fn render_template(template: &str, vars: &HashMap<&str, String>) -> Result<String> {
    let mut result = template.to_string();
    let mut start = 0;

    while let Some(open) = result[start..].find("{{") {
        let open = start + open;
        let close = result[open..].find("}}").ok_or_else(|| {
            BuildError::Config(format!(
                "unclosed template in '{}' at position {}",
                template, open
            ))
        })?;
        let close = open + close + 2;
        let key = result[open + 2..close - 2].trim();

        let value = vars.get(key).cloned().ok_or_else(|| {
            BuildError::Config(format!(
                "unknown template variable '{}' in '{}'",
                key, template
            ))
        })?;

        result.replace_range(open..close, &value);
        start = open + value.len();
    }

    Ok(result)
}

/// Variables available to deploy path templates.
pub fn path_variables(
    environment: &Environment,
    vcs: &VcsInfo,
    version_label: &str,
) -> HashMap<&'static str, String> {
    let mut vars = HashMap::new();
    vars.insert("environment", environment.key.to_string());
    vars.insert("branch", vcs.branch.clone());
    vars.insert("revision", vcs.revision.clone());
    vars.insert("label", version_label.to_string());
    if let Some(ref release) = vcs.release {
        vars.insert("release", release.clone());
    }
    vars
}

/// Stages sorted by ascending index.
pub fn binding_order(template: &WorkflowTemplate) -> Vec<&StageSpec> {
    let mut stages: Vec<&StageSpec> = template.stages.iter().collect();
    stages.sort_by_key(|s| s.index);
    stages
}

/// Verify the ordering invariant for every linked input.
///
/// Fails on the first link (in binding order) that references its own stage,
/// a later stage, or a stage that does not exist.
pub fn check_link_order(template: &WorkflowTemplate) -> Result<()> {
    let indices: HashSet<u32> = template.stages.iter().map(|s| s.index).collect();

    for stage in binding_order(template) {
        for (field, target) in &stage.linked_input {
            for link in target.refs() {
                if !indices.contains(&link.stage) {
                    return Err(BuildError::Resolution(format!(
                        "workflow '{}' stage {} input '{}' links to missing stage {}",
                        template.name, stage.index, field, link.stage
                    )));
                }
                if link.stage >= stage.index {
                    return Err(BuildError::Resolution(format!(
                        "workflow '{}' stage {} input '{}' links to stage {} which is not bound before it",
                        template.name, stage.index, field, link.stage
                    )));
                }
            }
        }
    }

    Ok(())
}

/// Resolve one linked input against the stages bound so far.
pub fn resolve_link_target(
    stage_index: u32,
    field: &str,
    target: &LinkTarget,
    bound: &HashMap<u32, String>,
) -> Result<StageInput> {
    let resolve = |link: &LinkRef| -> Result<ResolvedLink> {
        if link.stage >= stage_index {
            return Err(BuildError::Resolution(format!(
                "stage {} input '{}' references stage {} out of order",
                stage_index, field, link.stage
            )));
        }
        let stage_id = bound.get(&link.stage).ok_or_else(|| {
            BuildError::Resolution(format!(
                "stage {} input '{}' references unbound stage {}",
                stage_index, field, link.stage
            ))
        })?;
        Ok(ResolvedLink {
            stage_id: stage_id.clone(),
            field: link.field.clone(),
        })
    };

    match target {
        LinkTarget::Single(link) => Ok(StageInput::Link(resolve(link)?)),
        LinkTarget::Fan(links) => {
            let resolved = links.iter().map(resolve).collect::<Result<Vec<_>>>()?;
            Ok(StageInput::Links(resolved))
        }
    }
}
