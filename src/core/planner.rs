//! SH-019: Build plans: what a build would stage, publish and link.
//!
//! Planning resolves sources and resources locally and only reads from the
//! platform, so it surfaces configuration and policy errors without side
//! effects.

use super::assembler;
use super::error::{BuildError, Result};
use super::linker;
use super::project::{BuildTarget, Project};
use super::types::*;
use crate::platform::{ObjectClass, ObjectQuery, Platform};
use crate::resources::ResourceResolver;
use std::fmt::Write as _;
use std::path::PathBuf;

/// What happens to the workflow object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowAction {
    Create,
    /// Existing same-named workflows are deleted first
    Replace(usize),
    /// Protected environment already has one
    Refused,
}

#[derive(Debug, Clone)]
pub struct PlannedApplet {
    pub name: String,
    pub source: PathBuf,
    pub remote_path: String,
    pub internal_files: usize,
    pub external: Vec<String>,
    /// Already published at `remote_path` (will be overwritten)
    pub exists: bool,
}

#[derive(Debug, Clone)]
pub struct PlannedStage {
    pub index: u32,
    pub applet: String,
    pub folder: String,
    /// `field <- stage N.field` lines
    pub links: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PlannedWorkflow {
    pub name: String,
    pub folder: String,
    pub action: WorkflowAction,
    pub stages: Vec<PlannedStage>,
}

#[derive(Debug, Clone)]
pub struct BuildPlan {
    pub target: BuildTarget,
    pub environment: EnvironmentKey,
    pub namespace: String,
    pub version_label: String,
    pub applets: Vec<PlannedApplet>,
    pub workflow: Option<PlannedWorkflow>,
}

/// Where an applet is published for a target.
pub fn applet_remote_path(target: &BuildTarget, ctx: &BuildContext) -> String {
    match target {
        BuildTarget::Applet(_) => ctx.deploy_path.clone(),
        BuildTarget::Workflow(name) => ctx.workflow_path(name),
    }
}

fn plan_applet(
    project: &Project,
    resolver: &ResourceResolver,
    template: Option<&WorkflowTemplate>,
    name: &str,
    remote_path: &str,
    ctx: &BuildContext,
    platform: &dyn Platform,
) -> Result<PlannedApplet> {
    let source = assembler::find_source(&project.layout.applets_source, name)?;
    let decl = project.decl(name, template)?;
    let resolved = resolver.resolve_decl(name, &decl)?;
    let exists = !platform
        .find(&ObjectQuery {
            namespace: ctx.namespace(),
            folder: remote_path,
            name,
            class: ObjectClass::Applet,
        })?
        .is_empty();
    Ok(PlannedApplet {
        name: name.to_string(),
        source,
        remote_path: remote_path.to_string(),
        internal_files: resolved.internal.len(),
        external: resolved.external.into_iter().map(|d| d.name).collect(),
        exists,
    })
}

fn plan_stages(template: &WorkflowTemplate) -> Vec<PlannedStage> {
    super::resolver::binding_order(template)
        .into_iter()
        .map(|stage| PlannedStage {
            index: stage.index,
            applet: stage.applet.clone(),
            folder: stage.folder.clone(),
            links: stage
                .linked_input
                .iter()
                .flat_map(|(field, target)| {
                    target
                        .refs()
                        .into_iter()
                        .map(move |r| format!("{} <- stage {}.{}", field, r.stage, r.field))
                })
                .collect(),
        })
        .collect()
}

/// Plan a build of `target` without mutating anything.
pub fn plan(
    project: &Project,
    target: &BuildTarget,
    ctx: &BuildContext,
    platform: &dyn Platform,
) -> Result<BuildPlan> {
    let (names, template) = project.applets_for(target)?;
    if let Some(ref t) = template {
        linker::check_structure(t)?;
    }

    let resolver = project.resources()?;
    let remote_path = applet_remote_path(target, ctx);
    let applets = names
        .iter()
        .map(|name| {
            plan_applet(
                project,
                &resolver,
                template.as_ref(),
                name,
                &remote_path,
                ctx,
                platform,
            )
        })
        .collect::<Result<Vec<_>>>()?;

    let workflow = match template {
        Some(t) => {
            let action = match linker::check_replaceable(&t.name, ctx, platform) {
                Ok(existing) if existing.is_empty() => WorkflowAction::Create,
                Ok(existing) => WorkflowAction::Replace(existing.len()),
                Err(BuildError::Policy(_)) => WorkflowAction::Refused,
                Err(e) => return Err(e),
            };
            Some(PlannedWorkflow {
                name: t.name.clone(),
                folder: ctx.workflow_path(&t.name),
                action,
                stages: plan_stages(&t),
            })
        }
        None => None,
    };

    Ok(BuildPlan {
        target: target.clone(),
        environment: ctx.environment.key,
        namespace: ctx.namespace().to_string(),
        version_label: ctx.version_label.clone(),
        applets,
        workflow,
    })
}

/// Human-readable rendering for the `plan` command.
pub fn render(plan: &BuildPlan) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Build plan for {} ({} -> {}, {})",
        plan.target, plan.environment, plan.namespace, plan.version_label
    );
    for a in &plan.applets {
        let verb = if a.exists { "replace" } else { "publish" };
        let _ = writeln!(
            out,
            "  applet {}: {} at {} ({} internal file(s), {} external)",
            a.name,
            verb,
            a.remote_path,
            a.internal_files,
            a.external.len()
        );
    }
    if let Some(ref w) = plan.workflow {
        let action = match w.action {
            WorkflowAction::Create => "create".to_string(),
            WorkflowAction::Replace(n) => format!("replace {} existing", n),
            WorkflowAction::Refused => "REFUSED (exists in protected environment)".to_string(),
        };
        let _ = writeln!(out, "  workflow {}: {} at {}", w.name, action, w.folder);
        for s in &w.stages {
            let _ = writeln!(out, "    stage {} [{}] -> {}", s.index, s.applet, s.folder);
            for link in &s.links {
                let _ = writeln!(out, "      {}", link);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::local::LocalPlatform;
    use std::path::Path;

    fn repo(dir: &Path) -> Project {
        std::fs::write(
            dir.join("builder.yaml"),
            r#"
version: "1.0"
environments:
  production:
    namespace: project-prod
  develop:
    namespace: project-dev
    path: "/{{release}}/{{branch}}"
applets:
  bwa:
    internal:
      scripts: [align.sh]
  merge: {}
"#,
        )
        .unwrap();
        let src = dir.join("applets_source");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("bwa.py"), "").unwrap();
        std::fs::write(src.join("merge.py"), "").unwrap();
        let internal = dir.join("internal_resources");
        std::fs::create_dir_all(internal.join("scripts")).unwrap();
        std::fs::write(internal.join("scripts/align.sh"), "").unwrap();
        std::fs::write(
            internal.join("internal_resources.yaml"),
            r#"
mounts: { bin: /usr/local/bin }
resources:
  scripts:
    align.sh: { type: file, local_path: scripts/align.sh, mount: bin }
"#,
        )
        .unwrap();
        let templates = dir.join("workflow_config_templates");
        std::fs::create_dir_all(&templates).unwrap();
        std::fs::write(
            templates.join("align.yaml"),
            r#"
name: align
stages:
  - { index: 0, applet: bwa }
  - index: 1
    applet: merge
    linked_input:
      bams: [{ stage: 0, field: bam }]
"#,
        )
        .unwrap();
        Project::load(&dir.join("builder.yaml")).unwrap()
    }

    fn ctx(key: EnvironmentKey, namespace: &str) -> BuildContext {
        BuildContext {
            environment: Environment {
                key,
                remote_namespace: namespace.into(),
                deploy_path_template: String::new(),
            },
            vcs: VcsInfo {
                branch: "develop".into(),
                revision: "abc".into(),
                release: Some("1.0".into()),
            },
            version_label: "2026-10-16_abc".into(),
            deploy_path: "/1.0/develop".into(),
            date: "2026-10-16".into(),
        }
    }

    #[test]
    fn test_sh019_plan_workflow() {
        let dir = tempfile::tempdir().unwrap();
        let project = repo(dir.path());
        let platform = LocalPlatform::open(&dir.path().join("store")).unwrap();
        let c = ctx(EnvironmentKey::Develop, "project-dev");
        let plan = plan(
            &project,
            &BuildTarget::Workflow("align".into()),
            &c,
            &platform,
        )
        .unwrap();

        assert_eq!(plan.applets.len(), 2);
        assert_eq!(plan.applets[0].remote_path, "/1.0/develop/align");
        assert_eq!(plan.applets[0].internal_files, 1);
        let wf = plan.workflow.as_ref().unwrap();
        assert_eq!(wf.action, WorkflowAction::Create);
        assert_eq!(wf.stages[1].links, vec!["bams <- stage 0.bam"]);

        let text = render(&plan);
        assert!(text.contains("workflow align: create at /1.0/develop/align"));
        assert!(platform.load_index().unwrap().objects.is_empty());
    }

    #[test]
    fn test_sh019_plan_standalone_applet_path() {
        let dir = tempfile::tempdir().unwrap();
        let project = repo(dir.path());
        let platform = LocalPlatform::open(&dir.path().join("store")).unwrap();
        let c = ctx(EnvironmentKey::Develop, "project-dev");
        let plan = plan(&project, &BuildTarget::Applet("merge".into()), &c, &platform).unwrap();
        assert_eq!(plan.applets[0].remote_path, "/1.0/develop");
        assert!(plan.workflow.is_none());
    }

    #[test]
    fn test_sh019_plan_reports_refusal() {
        let dir = tempfile::tempdir().unwrap();
        let project = repo(dir.path());
        let platform = LocalPlatform::open(&dir.path().join("store")).unwrap();
        let c = ctx(EnvironmentKey::Production, "project-prod");
        let folder = c.workflow_path("align");
        platform.make_folder("project-prod", &folder).unwrap();
        let details = WorkflowDetails {
            name: "align".into(),
            branch: "master".into(),
            revision: "old".into(),
            release: None,
            version_label: "old".into(),
            date_created: "2026-01-01".into(),
        };
        platform
            .create_workflow("project-prod", &folder, "align", &details)
            .unwrap();

        let plan = plan(&project, &BuildTarget::Workflow("align".into()), &c, &platform).unwrap();
        assert_eq!(plan.workflow.unwrap().action, WorkflowAction::Refused);
    }

    #[test]
    fn test_sh019_plan_surfaces_missing_resource() {
        let dir = tempfile::tempdir().unwrap();
        let project = repo(dir.path());
        std::fs::remove_file(dir.path().join("internal_resources/scripts/align.sh")).unwrap();
        let platform = LocalPlatform::open(&dir.path().join("store")).unwrap();
        let c = ctx(EnvironmentKey::Develop, "project-dev");
        let err = plan(&project, &BuildTarget::Applet("bwa".into()), &c, &platform).unwrap_err();
        assert!(matches!(err, BuildError::Config(_)));
    }
}
