//! SH-001: Builder configuration, resource manifests, workflow templates and
//! the records produced by a build.
//!
//! All on-disk types derive Serialize/Deserialize for YAML roundtripping.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

// ============================================================================
// Top-level builder.yaml
// ============================================================================

/// Root configuration, read once per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuilderConfig {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Runtime image the applets target; scopes the external manifest
    #[serde(default = "default_runtime_image")]
    pub runtime_image: String,

    /// Deployment targets per environment key
    pub environments: EnvironmentTable,

    /// Repository layout, relative to the directory holding builder.yaml
    #[serde(default)]
    pub paths: Layout,

    /// Resource declarations for standalone applet builds
    #[serde(default)]
    pub applets: IndexMap<String, AppletDecl>,
}

fn default_runtime_image() -> String {
    "Ubuntu-12.04".to_string()
}

/// Namespace and path template for each environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentTable {
    #[serde(default)]
    pub production: Option<EnvironmentTarget>,
    #[serde(default)]
    pub develop: Option<EnvironmentTarget>,
    #[serde(default)]
    pub hotfix: Option<EnvironmentTarget>,
}

impl EnvironmentTable {
    pub fn get(&self, key: EnvironmentKey) -> Option<&EnvironmentTarget> {
        match key {
            EnvironmentKey::Production => self.production.as_ref(),
            EnvironmentKey::Develop => self.develop.as_ref(),
            EnvironmentKey::Hotfix => self.hotfix.as_ref(),
        }
    }
}

/// Where one environment deploys to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentTarget {
    /// Remote namespace (platform project id)
    pub namespace: String,

    /// Deploy path template, e.g. `/{{release}}/{{branch}}`
    #[serde(default = "default_path_template")]
    pub path: String,
}

fn default_path_template() -> String {
    "/{{release}}".to_string()
}

/// Repository layout. Relative entries are resolved against the repo home.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Layout {
    pub applets_source: PathBuf,
    pub applet_templates: PathBuf,
    pub internal_resources: PathBuf,
    pub external_resources: PathBuf,
    pub workflow_templates: PathBuf,
    pub launchpad: PathBuf,
    pub state: PathBuf,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            applets_source: PathBuf::from("applets_source"),
            applet_templates: PathBuf::from("applet_config_templates"),
            internal_resources: PathBuf::from("internal_resources"),
            external_resources: PathBuf::from("external_resources"),
            workflow_templates: PathBuf::from("workflow_config_templates"),
            launchpad: PathBuf::from("launchpad"),
            state: PathBuf::from("state"),
        }
    }
}

impl Layout {
    /// Resolve every relative path against `home`.
    pub fn rooted(&self, home: &Path) -> Layout {
        let join = |p: &PathBuf| {
            if p.is_absolute() {
                p.clone()
            } else {
                home.join(p)
            }
        };
        Layout {
            applets_source: join(&self.applets_source),
            applet_templates: join(&self.applet_templates),
            internal_resources: join(&self.internal_resources),
            external_resources: join(&self.external_resources),
            workflow_templates: join(&self.workflow_templates),
            launchpad: join(&self.launchpad),
            state: join(&self.state),
        }
    }

    pub fn internal_manifest(&self) -> PathBuf {
        self.internal_resources.join("internal_resources.yaml")
    }

    pub fn external_manifest(&self, runtime_image: &str) -> PathBuf {
        self.external_resources
            .join(runtime_image)
            .join("external_resources.yaml")
    }

    pub fn workflow_template(&self, name: &str) -> PathBuf {
        self.workflow_templates.join(format!("{}.yaml", name))
    }

    pub fn applet_template(&self, name: &str) -> PathBuf {
        self.applet_templates.join(format!("{}.template.json", name))
    }
}

// ============================================================================
// Applet declarations and resources
// ============================================================================

/// Resources an applet needs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppletDecl {
    /// Internal resources: category -> resource names
    #[serde(default)]
    pub internal: IndexMap<String, Vec<String>>,

    /// External (pre-published) resources
    #[serde(default)]
    pub external: Vec<ExternalRef>,
}

impl AppletDecl {
    /// Flatten the declaration into resource requests, internal first.
    pub fn resource_specs(&self) -> Vec<ResourceSpec> {
        let mut specs = Vec::new();
        for (category, names) in &self.internal {
            for name in names {
                specs.push(ResourceSpec::Internal {
                    category: category.clone(),
                    name: name.clone(),
                });
            }
        }
        for ext in &self.external {
            specs.push(ResourceSpec::External {
                name: ext.name.clone(),
                version: ext.version.clone(),
            });
        }
        specs
    }
}

/// A pinned external resource request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalRef {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// A single resource request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceSpec {
    Internal { category: String, name: String },
    External { name: String, version: Option<String> },
}

impl fmt::Display for ResourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal { category, name } => write!(f, "internal {}/{}", category, name),
            Self::External {
                name,
                version: Some(v),
            } => write!(f, "external {}@{}", name, v),
            Self::External {
                name,
                version: None,
            } => write!(f, "external {}", name),
        }
    }
}

/// internal_resources.yaml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InternalManifest {
    /// Mount name -> absolute directory on the execution host
    #[serde(default)]
    pub mounts: IndexMap<String, String>,

    /// Category -> resource name -> entry
    #[serde(default)]
    pub resources: IndexMap<String, IndexMap<String, InternalResource>>,
}

/// An internal resource: one file, or a bundle of files copied individually.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InternalResource {
    File {
        local_path: String,
        mount: String,
    },
    Bundle {
        local_path: String,
        mount: String,
        files: Vec<String>,
    },
}

/// One file to copy into an applet's resources tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedFile {
    pub local_path: PathBuf,
    /// Path under `resources/`, always starting with `/`
    pub remote_relative_path: String,
}

/// external_resources.yaml for one runtime image
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExternalManifest {
    #[serde(default)]
    pub date_created: Option<String>,
    #[serde(default)]
    pub artifacts: IndexMap<String, ExternalArtifact>,
}

/// A published artifact with its current and historical versions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalArtifact {
    pub filename: String,
    pub id: String,
    #[serde(default)]
    pub versions: IndexMap<String, ArtifactVersion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactVersion {
    pub filename: String,
    pub id: String,
}

/// A resolved external dependency; bytes stay remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalDependency {
    pub name: String,
    pub artifact_id: String,
}

// ============================================================================
// Environment
// ============================================================================

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentKey {
    Production,
    Develop,
    Hotfix,
}

impl EnvironmentKey {
    /// Production workflows are never replaced.
    pub fn is_protected(self) -> bool {
        matches!(self, Self::Production)
    }
}

impl fmt::Display for EnvironmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Develop => write!(f, "develop"),
            Self::Hotfix => write!(f, "hotfix"),
        }
    }
}

/// The resolved deployment target for this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    pub key: EnvironmentKey,
    pub remote_namespace: String,
    pub deploy_path_template: String,
}

/// What version control reports about the working tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VcsInfo {
    pub branch: String,
    /// Short revision (`git describe --always`)
    pub revision: String,
    /// Latest release tag without the leading `v`
    #[serde(default)]
    pub release: Option<String>,
}

/// Everything derived once per run and shared by every build step.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub environment: Environment,
    pub vcs: VcsInfo,
    pub version_label: String,
    /// Rendered deploy path template
    pub deploy_path: String,
    /// Build date, `YYYY-MM-DD`
    pub date: String,
}

impl BuildContext {
    pub fn namespace(&self) -> &str {
        &self.environment.remote_namespace
    }

    /// Folder a workflow (and its applets) deploys into.
    pub fn workflow_path(&self, workflow: &str) -> String {
        join_remote(&self.deploy_path, workflow)
    }

    /// Version stamped into package descriptors.
    pub fn package_version(&self) -> &str {
        self.vcs.release.as_deref().unwrap_or(&self.version_label)
    }
}

/// Join remote folder paths with exactly one `/` between segments.
pub fn join_remote(base: &str, child: &str) -> String {
    let base = base.trim_end_matches('/');
    let child = child.trim_start_matches('/');
    if child.is_empty() {
        if base.is_empty() {
            "/".to_string()
        } else {
            base.to_string()
        }
    } else {
        format!("{}/{}", base, child)
    }
}

// ============================================================================
// Builds
// ============================================================================

/// A staged, not yet uploaded applet.
#[derive(Debug, Clone)]
pub struct AppletBuild {
    pub name: String,
    pub version_label: String,
    /// `<launchpad>/<name>/<version_label>`
    pub build_dir: PathBuf,
    pub source_file: PathBuf,
    pub internal_resources: Vec<StagedFile>,
    pub external_dependencies: Vec<ExternalDependency>,
}

impl AppletBuild {
    pub fn src_dir(&self) -> PathBuf {
        self.build_dir.join("src")
    }

    pub fn resources_dir(&self) -> PathBuf {
        self.build_dir.join("resources")
    }
}

/// A published applet; the handle stages bind to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuiltApplet {
    pub name: String,
    pub remote_id: String,
    pub namespace: String,
    pub remote_path: String,
    /// BLAKE3 digest of the staged build directory
    pub digest: String,
}

// ============================================================================
// Workflow templates
// ============================================================================

/// `<workflow_templates>/<name>.yaml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Per-workflow applet declarations; override builder.yaml entries
    #[serde(default)]
    pub applets: IndexMap<String, AppletDecl>,

    pub stages: Vec<StageSpec>,
}

impl WorkflowTemplate {
    /// Every applet the workflow needs, in first-appearance order.
    pub fn applet_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        let mut push = |n: &str| {
            if !names.iter().any(|existing| existing == n) {
                names.push(n.to_string());
            }
        };
        for stage in &self.stages {
            push(&stage.applet);
            for ctx in stage.context_inputs().values() {
                if let ContextRef::Applet { applet } = ctx {
                    push(applet);
                }
            }
        }
        names
    }
}

/// One stage of a workflow template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSpec {
    pub index: u32,

    /// Applet bound as this stage's executable
    pub applet: String,

    /// Output folder for the stage's results
    #[serde(default = "default_stage_folder")]
    pub folder: String,

    /// Static inputs
    #[serde(default)]
    pub input: IndexMap<String, serde_json::Value>,

    /// Inputs wired to upstream stage outputs
    #[serde(default)]
    pub linked_input: IndexMap<String, LinkTarget>,

    /// Inputs substituted from the build context
    #[serde(default)]
    pub context_input: IndexMap<String, ContextRef>,

    /// Controller stages: the worker applet they launch
    #[serde(default)]
    pub worker: Option<String>,
}

fn default_stage_folder() -> String {
    "/".to_string()
}

impl StageSpec {
    /// Context inputs with the `worker` shorthand expanded.
    pub fn context_inputs(&self) -> IndexMap<String, ContextRef> {
        let mut inputs = self.context_input.clone();
        if let Some(ref worker) = self.worker {
            inputs
                .entry("worker_id".to_string())
                .or_insert_with(|| ContextRef::Applet {
                    applet: worker.clone(),
                });
            inputs
                .entry("worker_project".to_string())
                .or_insert(ContextRef::Value(ContextValue::Namespace));
        }
        inputs
    }
}

/// Symbolic reference to an upstream stage's output field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRef {
    pub stage: u32,
    pub field: String,
}

/// A linked input: one reference, or an ordered fan-in list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LinkTarget {
    Single(LinkRef),
    Fan(Vec<LinkRef>),
}

impl LinkTarget {
    pub fn refs(&self) -> Vec<&LinkRef> {
        match self {
            Self::Single(r) => vec![r],
            Self::Fan(v) => v.iter().collect(),
        }
    }
}

/// Value substituted from the build context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextRef {
    Value(ContextValue),
    Applet { applet: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextValue {
    /// Namespace that owns this build
    Namespace,
    /// Folder the applets of this build live under
    BuildPath,
    VersionLabel,
    Release,
}

// ============================================================================
// Deployed workflows
// ============================================================================

/// A LinkRef after its upstream stage was bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedLink {
    pub stage_id: String,
    pub field: String,
}

/// A stage input in resolved form. Tagged so a static value never reads
/// back as a link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum StageInput {
    Link(ResolvedLink),
    Links(Vec<ResolvedLink>),
    Value(serde_json::Value),
}

impl StageInput {
    /// Platform-native JSON: links become `$dnanexus_link` objects.
    pub fn to_native(&self) -> serde_json::Value {
        fn link(l: &ResolvedLink) -> serde_json::Value {
            serde_json::json!({
                "$dnanexus_link": {
                    "stage": l.stage_id,
                    "outputField": l.field,
                }
            })
        }
        match self {
            Self::Link(l) => link(l),
            Self::Links(v) => serde_json::Value::Array(v.iter().map(link).collect()),
            Self::Value(v) => v.clone(),
        }
    }
}

/// A stage bound on the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundStage {
    pub index: u32,
    pub stage_id: String,
    pub folder: String,
    pub applet: BuiltApplet,
    pub input: IndexMap<String, StageInput>,
}

/// Descriptor of a deployed workflow, written back after each build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub schema: String,
    pub name: String,
    pub remote_id: String,
    pub namespace: String,
    pub folder: String,
    pub environment: EnvironmentKey,
    pub version_label: String,
    pub generated_at: String,
    pub generator: String,
    pub stages: Vec<BoundStage>,
}

/// Metadata attached to the remote workflow object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDetails {
    pub name: String,
    pub branch: String,
    pub revision: String,
    #[serde(default)]
    pub release: Option<String>,
    pub version_label: String,
    pub date_created: String,
}

// ============================================================================
// Provenance events
// ============================================================================

/// Event for the JSONL build log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BuildEvent {
    BuildStarted {
        run_id: String,
        target: String,
        environment: EnvironmentKey,
        version_label: String,
        stagehand_version: String,
    },
    AppletPublished {
        run_id: String,
        applet: String,
        remote_id: String,
        remote_path: String,
        digest: String,
    },
    WorkflowReplaced {
        run_id: String,
        workflow: String,
        remote_id: String,
        folder: String,
    },
    WorkflowCreated {
        run_id: String,
        workflow: String,
        remote_id: String,
        folder: String,
    },
    StageBound {
        run_id: String,
        workflow: String,
        index: u32,
        stage_id: String,
        applet: String,
    },
    BuildCompleted {
        run_id: String,
        target: String,
        applets_published: u32,
        total_seconds: f64,
    },
    BuildFailed {
        run_id: String,
        target: String,
        category: String,
        error: String,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: BuildEvent,
}

// ============================================================================
// Tests
// ============================================================================
