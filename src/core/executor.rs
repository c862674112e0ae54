//! SH-020: Executor: orchestration of a build run.
//!
//! resolve (all applets) → session check → protection check →
//! per applet: assemble → attach → package → upload → link → state → events
//!
//! Everything that can fail locally is resolved before the first remote
//! mutation.

use super::assembler;
use super::error::Result;
use super::linker;
use super::planner::applet_remote_path;
use super::project::{BuildTarget, Project};
use super::state;
use super::types::*;
use crate::platform::Platform;
use crate::provenance::eventlog::EventRecorder;
use crate::resources::ResolvedResources;
use indexmap::IndexMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Inputs of one build run.
pub struct BuildRequest<'a> {
    pub project: &'a Project,
    pub ctx: &'a BuildContext,
    pub platform: &'a dyn Platform,
    pub target: &'a BuildTarget,
}

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub run_id: String,
    pub applets: Vec<BuiltApplet>,
    pub workflow: Option<Workflow>,
    /// Saved workflow descriptor
    pub descriptor: Option<PathBuf>,
    pub replaced: Vec<String>,
    pub duration: Duration,
}

/// An applet whose source and resources resolved.
struct PreparedApplet {
    name: String,
    resources: ResolvedResources,
}

/// Run a build, recording start, outcome and every mutation in the event log.
pub fn build(req: &BuildRequest) -> Result<BuildOutcome> {
    let start = Instant::now();
    let recorder = EventRecorder::new(req.project.state_dir());
    let run_id = recorder.run_id().to_string();
    tracing::info!(
        run = %run_id,
        target = %req.target,
        environment = %req.ctx.environment.key,
        namespace = %req.ctx.namespace(),
        label = %req.ctx.version_label,
        backend = req.platform.name(),
        "starting build"
    );
    recorder.record(BuildEvent::BuildStarted {
        run_id: run_id.clone(),
        target: req.target.to_string(),
        environment: req.ctx.environment.key,
        version_label: req.ctx.version_label.clone(),
        stagehand_version: env!("CARGO_PKG_VERSION").to_string(),
    });

    match run(req, &recorder) {
        Ok(mut outcome) => {
            outcome.duration = start.elapsed();
            recorder.record(BuildEvent::BuildCompleted {
                run_id,
                target: req.target.to_string(),
                applets_published: outcome.applets.len() as u32,
                total_seconds: outcome.duration.as_secs_f64(),
            });
            Ok(outcome)
        }
        Err(e) => {
            recorder.record(BuildEvent::BuildFailed {
                run_id,
                target: req.target.to_string(),
                category: e.category().to_string(),
                error: e.to_string(),
            });
            Err(e)
        }
    }
}

fn prepare(
    project: &Project,
    names: &[String],
    template: Option<&WorkflowTemplate>,
) -> Result<Vec<PreparedApplet>> {
    let resolver = project.resources()?;
    names
        .iter()
        .map(|name| {
            assembler::find_source(&project.layout.applets_source, name)?;
            let decl = project.decl(name, template)?;
            Ok(PreparedApplet {
                name: name.clone(),
                resources: resolver.resolve_decl(name, &decl)?,
            })
        })
        .collect()
}

/// Stage, package and publish one applet at `remote_path`.
pub fn build_applet(
    project: &Project,
    ctx: &BuildContext,
    platform: &dyn Platform,
    name: &str,
    resources: ResolvedResources,
    remote_path: &str,
) -> Result<BuiltApplet> {
    let mut build = assembler::assemble(&project.layout, name, &ctx.version_label)?;
    assembler::attach_internal(&mut build, resources.internal)?;
    assembler::attach_external(&mut build, resources.external);
    let packaged = assembler::package(&build, ctx, &project.layout, remote_path, platform)?;
    assembler::upload(&build, &packaged, ctx, remote_path, platform)
}

fn run(req: &BuildRequest, recorder: &EventRecorder) -> Result<BuildOutcome> {
    let BuildRequest {
        project,
        ctx,
        platform,
        target,
    } = *req;

    let (names, template) = project.applets_for(target)?;
    if let Some(ref t) = template {
        linker::check_structure(t)?;
    }
    let prepared = prepare(project, &names, template.as_ref())?;

    platform.check_session()?;
    if let Some(ref t) = template {
        linker::check_replaceable(&t.name, ctx, platform)?;
    }

    let remote_path = applet_remote_path(target, ctx);
    let mut built: IndexMap<String, BuiltApplet> = IndexMap::new();
    for applet in prepared {
        let result = build_applet(
            project,
            ctx,
            platform,
            &applet.name,
            applet.resources,
            &remote_path,
        )?;
        recorder.record(BuildEvent::AppletPublished {
            run_id: recorder.run_id().to_string(),
            applet: result.name.clone(),
            remote_id: result.remote_id.clone(),
            remote_path: result.remote_path.clone(),
            digest: result.digest.clone(),
        });
        built.insert(applet.name, result);
    }

    let mut outcome = BuildOutcome {
        run_id: recorder.run_id().to_string(),
        applets: built.values().cloned().collect(),
        workflow: None,
        descriptor: None,
        replaced: Vec::new(),
        duration: Duration::ZERO,
    };

    let Some(template) = template else {
        return Ok(outcome);
    };

    let linked = linker::link(&template, &built, ctx, platform)?;
    let workflow = linked.workflow;
    for id in &linked.replaced {
        recorder.record(BuildEvent::WorkflowReplaced {
            run_id: recorder.run_id().to_string(),
            workflow: workflow.name.clone(),
            remote_id: id.clone(),
            folder: workflow.folder.clone(),
        });
    }
    recorder.record(BuildEvent::WorkflowCreated {
        run_id: recorder.run_id().to_string(),
        workflow: workflow.name.clone(),
        remote_id: workflow.remote_id.clone(),
        folder: workflow.folder.clone(),
    });
    for stage in &workflow.stages {
        recorder.record(BuildEvent::StageBound {
            run_id: recorder.run_id().to_string(),
            workflow: workflow.name.clone(),
            index: stage.index,
            stage_id: stage.stage_id.clone(),
            applet: stage.applet.name.clone(),
        });
    }

    let path = state::save_workflow(project.state_dir(), &workflow)?;
    tracing::info!(workflow = %workflow.name, descriptor = %path.display(), "saved workflow descriptor");

    outcome.descriptor = Some(path);
    outcome.replaced = linked.replaced;
    outcome.workflow = Some(workflow);
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::BuildError;
    use crate::platform::local::LocalPlatform;
    use crate::provenance::eventlog;
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
  fastqc: {}
"#,
        )
        .unwrap();
        let src = dir.join("applets_source");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("fastqc.py"), "print('qc')").unwrap();
        let templates = dir.join("applet_config_templates");
        std::fs::create_dir_all(&templates).unwrap();
        std::fs::write(
            templates.join("fastqc.template.json"),
            r#"{"name": "fastqc", "runSpec": {"file": "src/fastqc.py"}}"#,
        )
        .unwrap();
        Project::load(&dir.join("builder.yaml")).unwrap()
    }

    fn ctx(key: EnvironmentKey) -> BuildContext {
        BuildContext {
            environment: Environment {
                key,
                remote_namespace: "project-dev".into(),
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
    fn test_sh020_build_standalone_applet() {
        let dir = tempfile::tempdir().unwrap();
        let project = repo(dir.path());
        let platform = LocalPlatform::open(&dir.path().join("store")).unwrap();
        let c = ctx(EnvironmentKey::Develop);
        let target = BuildTarget::Applet("fastqc".into());
        let outcome = build(&BuildRequest {
            project: &project,
            ctx: &c,
            platform: &platform,
            target: &target,
        })
        .unwrap();

        assert_eq!(outcome.applets.len(), 1);
        assert_eq!(outcome.applets[0].remote_path, "/1.0/develop");
        assert!(outcome.workflow.is_none());
        assert!(dir
            .path()
            .join("launchpad/fastqc/2026-10-16_abc/dxapp.json")
            .is_file());

        let events = eventlog::read_events(project.state_dir()).unwrap();
        assert!(matches!(events[0].event, BuildEvent::BuildStarted { .. }));
        assert!(matches!(events[1].event, BuildEvent::AppletPublished { .. }));
        assert!(matches!(
            events.last().unwrap().event,
            BuildEvent::BuildCompleted { applets_published: 1, .. }
        ));
    }

    #[test]
    fn test_sh020_failure_is_logged() {
        let dir = tempfile::tempdir().unwrap();
        let project = repo(dir.path());
        let platform = LocalPlatform::open(&dir.path().join("store")).unwrap();
        let c = ctx(EnvironmentKey::Develop);
        let target = BuildTarget::Applet("missing".into());
        let err = build(&BuildRequest {
            project: &project,
            ctx: &c,
            platform: &platform,
            target: &target,
        })
        .unwrap_err();
        assert!(matches!(err, BuildError::Config(_)));

        let events = eventlog::read_events(project.state_dir()).unwrap();
        match &events.last().unwrap().event {
            BuildEvent::BuildFailed { category, .. } => assert_eq!(category, "config"),
            other => panic!("expected build_failed, got {:?}", other),
        }
        assert!(platform.load_index().unwrap().objects.is_empty());
    }
}
