//! SH-016: Workflow linking: bind built applets to stages and rewrite
//! symbolic stage inputs into platform-native links.

use super::error::{BuildError, Result};
use super::resolver;
use super::types::*;
use crate::platform::{ObjectClass, ObjectHandle, ObjectQuery, Platform};
use crate::provenance::eventlog;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};

pub const WORKFLOW_SCHEMA: &str = "1.0";

/// Result of a link run.
#[derive(Debug, Clone)]
pub struct Linked {
    pub workflow: Workflow,
    /// Ids of same-named workflows deleted before creation
    pub replaced: Vec<String>,
}

/// Unique stage indices and backward-only links.
pub fn check_structure(template: &WorkflowTemplate) -> Result<()> {
    let mut seen = HashSet::new();
    for stage in &template.stages {
        if !seen.insert(stage.index) {
            return Err(BuildError::Resolution(format!(
                "workflow '{}' declares stage index {} twice",
                template.name, stage.index
            )));
        }
    }
    resolver::check_link_order(template)
}

/// Structural checks plus: every applet a stage needs was built. Runs
/// before any remote mutation.
pub fn check_template(
    template: &WorkflowTemplate,
    applets: &IndexMap<String, BuiltApplet>,
) -> Result<()> {
    check_structure(template)?;

    for stage in &template.stages {
        if !applets.contains_key(&stage.applet) {
            return Err(BuildError::Resolution(format!(
                "workflow '{}' stage {} uses applet '{}' which was not built",
                template.name, stage.index, stage.applet
            )));
        }
        for (field, value) in stage.context_inputs() {
            if let ContextRef::Applet { applet } = value {
                if !applets.contains_key(&applet) {
                    return Err(BuildError::Resolution(format!(
                        "workflow '{}' stage {} input '{}' refers to applet '{}' which was not built",
                        template.name, stage.index, field, applet
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Same-named workflows at the target folder, or a policy error when the
/// environment is protected and one exists.
pub fn check_replaceable(
    name: &str,
    ctx: &BuildContext,
    platform: &dyn Platform,
) -> Result<Vec<ObjectHandle>> {
    let folder = ctx.workflow_path(name);
    let existing = platform.find(&ObjectQuery {
        namespace: ctx.namespace(),
        folder: &folder,
        name,
        class: ObjectClass::Workflow,
    })?;

    if !existing.is_empty() && ctx.environment.key.is_protected() {
        return Err(BuildError::Policy(format!(
            "workflow '{}' already exists at {}:{} and {} workflows are never replaced",
            name,
            ctx.namespace(),
            folder,
            ctx.environment.key
        )));
    }
    Ok(existing)
}

/// Value of a context reference for this build.
pub fn resolve_context(
    value: &ContextRef,
    ctx: &BuildContext,
    build_path: &str,
    applets: &IndexMap<String, BuiltApplet>,
) -> Result<serde_json::Value> {
    let s = match value {
        ContextRef::Value(ContextValue::Namespace) => ctx.namespace().to_string(),
        ContextRef::Value(ContextValue::BuildPath) => build_path.to_string(),
        ContextRef::Value(ContextValue::VersionLabel) => ctx.version_label.clone(),
        ContextRef::Value(ContextValue::Release) => ctx.vcs.release.clone().ok_or_else(|| {
            BuildError::Resolution("context input 'release' used but no release tag exists".into())
        })?,
        ContextRef::Applet { applet } => applets
            .get(applet)
            .map(|a| a.remote_id.clone())
            .ok_or_else(|| {
                BuildError::Resolution(format!("context input refers to unbuilt applet '{}'", applet))
            })?,
    };
    Ok(serde_json::Value::String(s))
}

/// Static, then context, then linked inputs for one stage.
pub fn stage_inputs(
    stage: &StageSpec,
    ctx: &BuildContext,
    build_path: &str,
    applets: &IndexMap<String, BuiltApplet>,
    bound: &HashMap<u32, String>,
) -> Result<IndexMap<String, StageInput>> {
    let mut input = IndexMap::new();
    for (field, value) in &stage.input {
        input.insert(field.clone(), StageInput::Value(value.clone()));
    }
    for (field, value) in stage.context_inputs() {
        let v = resolve_context(&value, ctx, build_path, applets)?;
        input.insert(field, StageInput::Value(v));
    }
    for (field, target) in &stage.linked_input {
        let v = resolver::resolve_link_target(stage.index, field, target, bound)?;
        input.insert(field.clone(), v);
    }
    Ok(input)
}

/// Create the workflow for `template` from already published applets.
pub fn link(
    template: &WorkflowTemplate,
    applets: &IndexMap<String, BuiltApplet>,
    ctx: &BuildContext,
    platform: &dyn Platform,
) -> Result<Linked> {
    check_template(template, applets)?;
    let existing = check_replaceable(&template.name, ctx, platform)?;
    let folder = ctx.workflow_path(&template.name);
    let namespace = ctx.namespace();

    let replaced: Vec<String> = existing.into_iter().map(|h| h.id).collect();
    if !replaced.is_empty() {
        tracing::warn!(
            workflow = %template.name,
            environment = %ctx.environment.key,
            ids = ?replaced,
            "removing existing workflow"
        );
        platform.remove(namespace, &replaced)?;
    }

    platform.make_folder(namespace, &folder)?;
    let details = WorkflowDetails {
        name: template.name.clone(),
        branch: ctx.vcs.branch.clone(),
        revision: ctx.vcs.revision.clone(),
        release: ctx.vcs.release.clone(),
        version_label: ctx.version_label.clone(),
        date_created: ctx.date.clone(),
    };
    let workflow_id = platform.create_workflow(namespace, &folder, &template.name, &details)?;
    tracing::info!(workflow = %template.name, id = %workflow_id, folder = %folder, "created workflow");

    let mut bound: HashMap<u32, String> = HashMap::new();
    let mut stages = Vec::with_capacity(template.stages.len());
    for stage in resolver::binding_order(template) {
        let applet = applets.get(&stage.applet).ok_or_else(|| {
            BuildError::Resolution(format!("applet '{}' was not built", stage.applet))
        })?;
        let stage_id = platform.add_stage(&workflow_id, &applet.remote_id, &stage.folder)?;
        bound.insert(stage.index, stage_id.clone());

        let input = stage_inputs(stage, ctx, &folder, applets, &bound)?;
        platform.update_stage_input(&workflow_id, &stage_id, &input)?;
        tracing::info!(
            workflow = %template.name,
            index = stage.index,
            stage = %stage_id,
            applet = %applet.name,
            "bound stage"
        );

        stages.push(BoundStage {
            index: stage.index,
            stage_id,
            folder: stage.folder.clone(),
            applet: applet.clone(),
            input,
        });
    }

    platform.close_workflow(&workflow_id)?;

    Ok(Linked {
        workflow: Workflow {
            schema: WORKFLOW_SCHEMA.to_string(),
            name: template.name.clone(),
            remote_id: workflow_id,
            namespace: namespace.to_string(),
            folder,
            environment: ctx.environment.key,
            version_label: ctx.version_label.clone(),
            generated_at: eventlog::now_rfc3339(),
            generator: format!("stagehand {}", env!("CARGO_PKG_VERSION")),
            stages,
        },
        replaced,
    })
}
