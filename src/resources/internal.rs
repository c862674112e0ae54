//! SH-006: Internal resources: files and file bundles from the repository.

use crate::core::error::{BuildError, Result};
use crate::core::types::{InternalManifest, InternalResource, StagedFile};
use std::path::{Path, PathBuf};

/// Looks up internal resources in the manifest and maps them to staged files.
#[derive(Debug, Clone)]
pub struct InternalResolver {
    root: PathBuf,
    manifest: InternalManifest,
}

impl InternalResolver {
    /// `root` is the directory manifest `local_path`s are relative to.
    pub fn new(root: &Path, manifest: InternalManifest) -> Self {
        Self {
            root: root.to_path_buf(),
            manifest,
        }
    }

    pub fn manifest(&self) -> &InternalManifest {
        &self.manifest
    }

    /// Resolve (category, name) to the files it stages.
    ///
    /// A `File` yields one entry at `<mount>/<name>`; a `Bundle` yields one
    /// entry per listed file at `<mount>/<name>/<file>`. Every local path must
    /// exist.
    pub fn resolve_internal(&self, category: &str, name: &str) -> Result<Vec<StagedFile>> {
        let entry = self
            .manifest
            .resources
            .get(category)
            .and_then(|entries| entries.get(name))
            .ok_or_else(|| {
                BuildError::Config(format!(
                    "internal resource '{}/{}' is not in the manifest",
                    category, name
                ))
            })?;

        match entry {
            InternalResource::File { local_path, mount } => {
                let local = self.existing_path(local_path, category, name)?;
                let remote = remote_path(&self.mount_dir(mount, category, name)?, name);
                Ok(vec![StagedFile {
                    local_path: local,
                    remote_relative_path: remote,
                }])
            }
            InternalResource::Bundle {
                local_path,
                mount,
                files,
            } => {
                let base = self.existing_path(local_path, category, name)?;
                let remote_base = remote_path(&self.mount_dir(mount, category, name)?, name);
                files
                    .iter()
                    .map(|file| {
                        let local = base.join(file);
                        if !local.is_file() {
                            return Err(BuildError::Config(format!(
                                "bundle '{}/{}' lists missing file {}",
                                category,
                                name,
                                local.display()
                            )));
                        }
                        Ok(StagedFile {
                            local_path: local,
                            remote_relative_path: remote_path(&remote_base, file),
                        })
                    })
                    .collect()
            }
        }
    }

    fn existing_path(&self, relative: &str, category: &str, name: &str) -> Result<PathBuf> {
        let full = self.root.join(relative);
        if full.exists() {
            Ok(full)
        } else {
            Err(BuildError::Config(format!(
                "internal resource '{}/{}' not found at {}",
                category,
                name,
                full.display()
            )))
        }
    }

    fn mount_dir(&self, mount: &str, category: &str, name: &str) -> Result<String> {
        self.manifest.mounts.get(mount).cloned().ok_or_else(|| {
            BuildError::Config(format!(
                "internal resource '{}/{}' uses unknown mount '{}'",
                category, name, mount
            ))
        })
    }
}

fn remote_path(base: &str, child: &str) -> String {
    let joined = format!(
        "{}/{}",
        base.trim_end_matches('/'),
        child.trim_start_matches('/')
    );
    if joined.starts_with('/') {
        joined
    } else {
        format!("/{}", joined)
    }
}
