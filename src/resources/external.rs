//! SH-007: External resources: artifacts published ahead of time, pinned
//! per runtime image.

use crate::core::error::{BuildError, Result};
use crate::core::types::{ExternalDependency, ExternalManifest};

/// Looks up published artifacts in the manifest for one runtime image.
#[derive(Debug, Clone)]
pub struct ExternalResolver {
    runtime_image: String,
    manifest: ExternalManifest,
}

impl ExternalResolver {
    pub fn new(runtime_image: &str, manifest: ExternalManifest) -> Self {
        Self {
            runtime_image: runtime_image.to_string(),
            manifest,
        }
    }

    pub fn runtime_image(&self) -> &str {
        &self.runtime_image
    }

    /// Resolve a named artifact; `version` selects a pinned version,
    /// otherwise the current one.
    pub fn resolve_external(&self, name: &str, version: Option<&str>) -> Result<ExternalDependency> {
        let artifact = self.manifest.artifacts.get(name).ok_or_else(|| {
            BuildError::Config(format!(
                "external resource '{}' is not published for {}",
                name, self.runtime_image
            ))
        })?;

        match version {
            None => Ok(ExternalDependency {
                name: artifact.filename.clone(),
                artifact_id: artifact.id.clone(),
            }),
            Some(v) => {
                let pinned = artifact.versions.get(v).ok_or_else(|| {
                    BuildError::Config(format!(
                        "external resource '{}' has no version '{}' for {}",
                        name, v, self.runtime_image
                    ))
                })?;
                Ok(ExternalDependency {
                    name: pinned.filename.clone(),
                    artifact_id: pinned.id.clone(),
                })
            }
        }
    }
}
