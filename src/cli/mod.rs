//! SH-021: CLI subcommands: build, plan, validate, status.

use crate::core::error::{BuildError, Result};
use crate::core::executor::{self, BuildRequest};
use crate::core::project::{BuildTarget, Project};
use crate::core::types::{BuildContext, BuildEvent};
use crate::core::{environment, linker, parser, planner, state};
use crate::platform::{self, Platform};
use crate::provenance::eventlog;
use crate::vcs;
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct GlobalOpts {
    /// Path to builder.yaml
    #[arg(long, global = true, env = "STAGEHAND_CONFIG", default_value = "builder.yaml")]
    pub config: PathBuf,

    /// Remote platform backend: dx or local
    #[arg(long, global = true, default_value = "dx")]
    pub backend: String,

    /// Object store directory for the local backend (default: <state>/store)
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    /// Deploy as if this branch were checked out
    #[arg(long, global = true, env = "STAGEHAND_BRANCH")]
    pub branch: Option<String>,
}

/// Exactly one build target.
#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct TargetArgs {
    /// Build a standalone applet
    #[arg(long)]
    pub applet: Option<String>,

    /// Build a workflow and every applet it uses
    #[arg(long)]
    pub workflow: Option<String>,
}

impl TargetArgs {
    pub fn target(&self) -> Result<BuildTarget> {
        match (&self.applet, &self.workflow) {
            (Some(a), None) => Ok(BuildTarget::Applet(a.clone())),
            (None, Some(w)) => Ok(BuildTarget::Workflow(w.clone())),
            _ => Err(BuildError::Config(
                "exactly one of --applet or --workflow is required".into(),
            )),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Assemble, publish and (for workflows) link a build target
    Build {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Show what a build would publish and link, without changing anything
    Plan {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Validate builder.yaml, resource references and workflow templates
    Validate,

    /// Show deployed workflows and recent build events
    Status {
        /// Number of recent events to show
        #[arg(long, default_value_t = 10)]
        events: usize,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands, opts: &GlobalOpts) -> Result<()> {
    match cmd {
        Commands::Build { target } => cmd_build(opts, &target.target()?),
        Commands::Plan { target } => cmd_plan(opts, &target.target()?),
        Commands::Validate => cmd_validate(&opts.config),
        Commands::Status { events } => cmd_status(&opts.config, events),
    }
}

/// Branch, revision and date of this run, resolved to a deployment target.
fn context(project: &Project, opts: &GlobalOpts) -> Result<BuildContext> {
    let info = vcs::inspect(&project.home, opts.branch.as_deref())?;
    let today = chrono::Local::now().date_naive();
    environment::build_context(&project.config.environments, info, today)
}

fn open_platform(project: &Project, opts: &GlobalOpts) -> Result<Box<dyn Platform>> {
    let store = opts
        .store
        .clone()
        .unwrap_or_else(|| project.state_dir().join("store"));
    platform::backend(&opts.backend, &store)
}

fn cmd_build(opts: &GlobalOpts, target: &BuildTarget) -> Result<()> {
    let project = Project::load(&opts.config)?;
    let ctx = context(&project, opts)?;
    let platform = open_platform(&project, opts)?;

    let outcome = executor::build(&BuildRequest {
        project: &project,
        ctx: &ctx,
        platform: platform.as_ref(),
        target,
    })?;

    for applet in &outcome.applets {
        println!(
            "applet {}: {} at {}:{}",
            applet.name, applet.remote_id, applet.namespace, applet.remote_path
        );
    }
    if let Some(ref wf) = outcome.workflow {
        if !outcome.replaced.is_empty() {
            println!("replaced {} existing workflow(s)", outcome.replaced.len());
        }
        println!(
            "workflow {}: {} at {}:{} ({} stages)",
            wf.name,
            wf.remote_id,
            wf.namespace,
            wf.folder,
            wf.stages.len()
        );
    }
    if let Some(ref path) = outcome.descriptor {
        println!("  Descriptor: {}", path.display());
    }
    println!(
        "Build complete: {} ({} -> {}, {}) in {:.1}s [run {}]",
        target,
        ctx.environment.key,
        ctx.namespace(),
        ctx.version_label,
        outcome.duration.as_secs_f64(),
        outcome.run_id
    );
    Ok(())
}

fn cmd_plan(opts: &GlobalOpts, target: &BuildTarget) -> Result<()> {
    let project = Project::load(&opts.config)?;
    let ctx = context(&project, opts)?;
    let platform = open_platform(&project, opts)?;
    let plan = planner::plan(&project, target, &ctx, platform.as_ref())?;
    print!("{}", planner::render(&plan));
    Ok(())
}

/// Workflow template names under `dir`, sorted.
fn template_names(dir: &Path) -> Result<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map_err(|e| BuildError::io(dir, e))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|x| x == "yaml"))
        .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().to_string()))
        .collect();
    names.sort();
    Ok(names)
}

/// Every problem found in the repository, without touching the platform.
pub fn validation_errors(project: &Project) -> Result<(Vec<String>, usize)> {
    let manifest = project.internal_manifest()?;
    let resolver = project.resources()?;
    let mut errors = Vec::new();

    let mut check_decl = |applet: &str, decl: &crate::core::types::AppletDecl| {
        for e in parser::validate_internal_refs(applet, decl, &manifest) {
            errors.push(e.message);
        }
        for ext in &decl.external {
            if let Err(e) = resolver
                .external
                .resolve_external(&ext.name, ext.version.as_deref())
            {
                errors.push(format!("applet '{}': {}", applet, e));
            }
        }
    };

    for (name, decl) in &project.config.applets {
        check_decl(name, decl);
    }

    let names = template_names(&project.layout.workflow_templates)?;
    let mut template_errors = Vec::new();
    for name in &names {
        match project
            .template(name)
            .and_then(|t| linker::check_structure(&t).map(|_| t))
        {
            Ok(t) => {
                for (applet, decl) in &t.applets {
                    check_decl(applet, decl);
                }
            }
            Err(e) => template_errors.push(format!("workflow '{}': {}", name, e)),
        }
    }
    errors.extend(template_errors);
    Ok((errors, names.len()))
}

fn cmd_validate(config: &Path) -> Result<()> {
    let project = Project::load(config)?;
    let (errors, workflows) = validation_errors(&project)?;

    if errors.is_empty() {
        println!(
            "OK: {} ({} applets, {} workflows)",
            config.display(),
            project.config.applets.len(),
            workflows
        );
        Ok(())
    } else {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        Err(BuildError::Config(format!(
            "{} validation error(s)",
            errors.len()
        )))
    }
}

/// One-line summary of a logged event.
pub fn describe_event(event: &BuildEvent) -> String {
    match event {
        BuildEvent::BuildStarted {
            run_id,
            target,
            environment,
            version_label,
            ..
        } => format!("{} started {} ({}, {})", run_id, target, environment, version_label),
        BuildEvent::AppletPublished {
            run_id,
            applet,
            remote_id,
            ..
        } => format!("{} published {} as {}", run_id, applet, remote_id),
        BuildEvent::WorkflowReplaced {
            run_id,
            workflow,
            remote_id,
            ..
        } => format!("{} removed {} ({})", run_id, workflow, remote_id),
        BuildEvent::WorkflowCreated {
            run_id,
            workflow,
            remote_id,
            ..
        } => format!("{} created {} as {}", run_id, workflow, remote_id),
        BuildEvent::StageBound {
            run_id,
            workflow,
            index,
            applet,
            ..
        } => format!("{} bound {} stage {} to {}", run_id, workflow, index, applet),
        BuildEvent::BuildCompleted {
            run_id,
            target,
            total_seconds,
            ..
        } => format!("{} completed {} in {:.1}s", run_id, target, total_seconds),
        BuildEvent::BuildFailed {
            run_id,
            target,
            error,
            ..
        } => format!("{} FAILED {}: {}", run_id, target, error),
    }
}

fn cmd_status(config: &Path, recent: usize) -> Result<()> {
    let project = Project::load(config)?;
    let state_dir = project.state_dir();

    let workflows = state::list_latest(state_dir)?;
    if workflows.is_empty() {
        println!("No deployed workflows recorded in {}", state_dir.display());
    }
    for wf in &workflows {
        println!("Workflow: {} ({})", wf.name, wf.remote_id);
        println!("  Location:    {}:{}", wf.namespace, wf.folder);
        println!("  Environment: {}", wf.environment);
        println!("  Version:     {}", wf.version_label);
        println!("  Generated:   {}", wf.generated_at);
        for stage in &wf.stages {
            println!(
                "    stage {}: {} [{}]",
                stage.index, stage.applet.name, stage.applet.remote_id
            );
        }
    }

    let events = eventlog::read_events(state_dir)?;
    if !events.is_empty() {
        println!();
        println!("Recent events:");
        let skip = events.len().saturating_sub(recent);
        for e in &events[skip..] {
            println!("  {} {}", e.ts, describe_event(&e.event));
        }
    }
    Ok(())
}
