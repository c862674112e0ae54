//! SH-017: A loaded repository: builder config, rooted layout, manifests.

use super::error::{BuildError, Result};
use super::parser;
use super::types::*;
use crate::resources::{ExternalResolver, InternalResolver, ResourceResolver};
use std::fmt;
use std::path::{Path, PathBuf};

/// What a build run produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildTarget {
    Applet(String),
    Workflow(String),
}

impl BuildTarget {
    pub fn name(&self) -> &str {
        match self {
            Self::Applet(n) | Self::Workflow(n) => n,
        }
    }
}

impl fmt::Display for BuildTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Applet(n) => write!(f, "applet:{}", n),
            Self::Workflow(n) => write!(f, "workflow:{}", n),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Project {
    pub config_path: PathBuf,
    /// Directory holding builder.yaml; relative layout paths start here
    pub home: PathBuf,
    pub config: BuilderConfig,
    pub layout: Layout,
}

impl Project {
    /// Parse and validate builder.yaml.
    pub fn load(config_path: &Path) -> Result<Self> {
        let config = parser::parse_config_file(config_path)?;
        parser::into_result(parser::validate_config(&config))?;

        let home = match config_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let layout = config.paths.rooted(&home);
        Ok(Self {
            config_path: config_path.to_path_buf(),
            home,
            config,
            layout,
        })
    }

    pub fn state_dir(&self) -> &Path {
        &self.layout.state
    }

    pub fn internal_manifest(&self) -> Result<InternalManifest> {
        let path = self.layout.internal_manifest();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no internal resource manifest");
            return Ok(InternalManifest::default());
        }
        parser::parse_internal_manifest(&path)
    }

    pub fn external_manifest(&self) -> Result<ExternalManifest> {
        let path = self.layout.external_manifest(&self.config.runtime_image);
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no external resource manifest");
            return Ok(ExternalManifest::default());
        }
        parser::parse_external_manifest(&path)
    }

    /// Resolver over both manifests. Internal `local_path`s are relative to
    /// the internal resources directory.
    pub fn resources(&self) -> Result<ResourceResolver> {
        Ok(ResourceResolver::new(
            InternalResolver::new(&self.layout.internal_resources, self.internal_manifest()?),
            ExternalResolver::new(&self.config.runtime_image, self.external_manifest()?),
        ))
    }

    /// Parse and validate a workflow template.
    pub fn template(&self, name: &str) -> Result<WorkflowTemplate> {
        let path = self.layout.workflow_template(name);
        let template = parser::parse_template_file(&path)?;
        if template.name != name {
            return Err(BuildError::Config(format!(
                "workflow template {} is named '{}', expected '{}'",
                path.display(),
                template.name,
                name
            )));
        }
        parser::into_result(parser::validate_template(&template, &self.config))?;
        Ok(template)
    }

    /// Resource declaration for an applet; a workflow's own entry wins.
    pub fn decl(&self, applet: &str, template: Option<&WorkflowTemplate>) -> Result<AppletDecl> {
        template
            .and_then(|t| t.applets.get(applet))
            .or_else(|| self.config.applets.get(applet))
            .cloned()
            .ok_or_else(|| {
                BuildError::Config(format!(
                    "applet '{}' has no resource declaration in {}",
                    applet,
                    self.config_path.display()
                ))
            })
    }

    /// Applets a target needs, in build order.
    pub fn applets_for(&self, target: &BuildTarget) -> Result<(Vec<String>, Option<WorkflowTemplate>)> {
        match target {
            BuildTarget::Applet(name) => Ok((vec![name.clone()], None)),
            BuildTarget::Workflow(name) => {
                let template = self.template(name)?;
                Ok((template.applet_names(), Some(template)))
            }
        }
    }
}
