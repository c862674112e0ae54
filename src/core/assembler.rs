//! SH-009: Applet assembly: stage, package, upload.
//!
//! ```text
//! <launchpad>/<name>/<version_label>/
//!     src/<source file>
//!     resources/<remote relative path>...
//!     dxapp.json
//! <launchpad>/<name>/<version_label>.bundle/<name>_resources.tar.gz
//! ```
//!
//! The build directory is recreated on every run and left on disk after
//! upload.

use super::descriptor::{self, PackageDescriptor};
use super::error::{BuildError, Result};
use super::types::*;
use crate::platform::{ObjectClass, ObjectQuery, Platform};
use crate::provenance::hasher;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::path::{Path, PathBuf};

/// Remote folder holding the resource bundles of the applet published at
/// `remote_path`. Never shared between publish paths.
pub fn bundle_folder(remote_path: &str, applet: &str) -> String {
    join_remote(remote_path, &format!(".resources/{}", applet))
}

/// The single file in `source_dir` whose name starts with `name`.
pub fn find_source(source_dir: &Path, name: &str) -> Result<PathBuf> {
    let dir = source_dir.to_str().ok_or_else(|| {
        BuildError::Config(format!(
            "applet source directory {} is not valid UTF-8",
            source_dir.display()
        ))
    })?;
    let pattern = format!(
        "{}/{}*",
        glob::Pattern::escape(dir),
        glob::Pattern::escape(name)
    );
    let entries = glob::glob(&pattern)
        .map_err(|e| BuildError::Config(format!("bad source pattern {}: {}", pattern, e)))?;

    let mut matches = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| {
            BuildError::Config(format!("cannot scan {}: {}", source_dir.display(), e))
        })?;
        if path.is_file() {
            matches.push(path);
        }
    }

    match matches.len() {
        1 => Ok(matches.remove(0)),
        0 => Err(BuildError::Config(format!(
            "no source file for applet '{}' in {}",
            name,
            source_dir.display()
        ))),
        _ => {
            let names: Vec<String> = matches
                .iter()
                .filter_map(|p| p.file_name())
                .map(|n| n.to_string_lossy().to_string())
                .collect();
            Err(BuildError::Config(format!(
                "ambiguous source for applet '{}': {}",
                name,
                names.join(", ")
            )))
        }
    }
}

/// Create a fresh build directory and copy the applet source into `src/`.
pub fn assemble(layout: &Layout, name: &str, version_label: &str) -> Result<AppletBuild> {
    let source_file = find_source(&layout.applets_source, name)?;
    let build_dir = layout.launchpad.join(name).join(version_label);

    if build_dir.exists() {
        std::fs::remove_dir_all(&build_dir).map_err(|e| BuildError::io(&build_dir, e))?;
    }
    let build = AppletBuild {
        name: name.to_string(),
        version_label: version_label.to_string(),
        build_dir,
        source_file,
        internal_resources: Vec::new(),
        external_dependencies: Vec::new(),
    };
    for dir in [build.src_dir(), build.resources_dir()] {
        std::fs::create_dir_all(&dir).map_err(|e| BuildError::io(&dir, e))?;
    }

    let file_name = build.source_file.file_name().ok_or_else(|| {
        BuildError::Config(format!("source {} has no file name", build.source_file.display()))
    })?;
    let target = build.src_dir().join(file_name);
    std::fs::copy(&build.source_file, &target).map_err(|e| BuildError::io(&build.source_file, e))?;

    tracing::debug!(applet = name, dir = %build.build_dir.display(), "assembled build directory");
    Ok(build)
}

/// Copy internal files into `resources/`, keyed by remote path.
pub fn attach_internal(build: &mut AppletBuild, files: Vec<StagedFile>) -> Result<()> {
    let resources = build.resources_dir();
    for file in &files {
        if !file.local_path.is_file() {
            return Err(BuildError::Config(format!(
                "internal resource {} for applet '{}' does not exist",
                file.local_path.display(),
                build.name
            )));
        }
        let target = resources.join(file.remote_relative_path.trim_start_matches('/'));
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
        }
        std::fs::copy(&file.local_path, &target).map_err(|e| BuildError::io(&file.local_path, e))?;
    }
    build.internal_resources.extend(files);
    Ok(())
}

/// External dependencies are recorded, never copied.
pub fn attach_external(build: &mut AppletBuild, deps: Vec<ExternalDependency>) {
    build.external_dependencies.extend(deps);
}

/// Path of the resource bundle archive for a build.
pub fn bundle_path(build: &AppletBuild) -> PathBuf {
    let label_dir = format!("{}.bundle", build.version_label);
    let parent = build
        .build_dir
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| build.build_dir.clone());
    parent
        .join(label_dir)
        .join(format!("{}_resources.tar.gz", build.name))
}

/// tar.gz of `resources/`, entries relative to the filesystem root of the
/// execution host. Headers are deterministic.
pub fn archive_resources(build: &AppletBuild) -> Result<PathBuf> {
    let resources = build.resources_dir();
    let archive = bundle_path(build);
    if let Some(parent) = archive.parent() {
        std::fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
    }

    let file = std::fs::File::create(&archive).map_err(|e| BuildError::io(&archive, e))?;
    let mut tar = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    tar.mode(tar::HeaderMode::Deterministic);
    for rel in hasher::relative_files(&resources)? {
        let path = resources.join(&rel);
        tar.append_path_with_name(&path, &rel)
            .map_err(|e| BuildError::io(&path, e))?;
    }
    tar.into_inner()
        .and_then(|gz| gz.finish())
        .map_err(|e| BuildError::io(&archive, e))?;
    Ok(archive)
}

/// A written descriptor plus the bundles it supersedes.
#[derive(Debug, Clone)]
pub struct Packaged {
    pub descriptor: PackageDescriptor,
    /// Earlier bundles of the applet at the same publish path; removed only
    /// after the new applet replaced the one referencing them
    pub stale_bundles: Vec<String>,
}

/// Write the descriptor; when internal resources are attached, upload their
/// bundle first and reference it.
pub fn package(
    build: &AppletBuild,
    ctx: &BuildContext,
    layout: &Layout,
    remote_path: &str,
    platform: &dyn Platform,
) -> Result<Packaged> {
    let template = descriptor::load_template(&layout.applet_template(&build.name))?;

    let (bundle, stale_bundles) = if build.internal_resources.is_empty() {
        tracing::debug!(applet = %build.name, "no internal resources, skipping bundle");
        (None, Vec::new())
    } else {
        let (bundle, stale) = upload_bundle(build, ctx, remote_path, platform)?;
        (Some(bundle), stale)
    };

    let descriptor = PackageDescriptor::from_template(
        template,
        ctx,
        &build.external_dependencies,
        bundle.as_ref(),
    )?;
    descriptor.write(build)?;
    Ok(Packaged {
        descriptor,
        stale_bundles,
    })
}

fn upload_bundle(
    build: &AppletBuild,
    ctx: &BuildContext,
    remote_path: &str,
    platform: &dyn Platform,
) -> Result<(ExternalDependency, Vec<String>)> {
    let archive = archive_resources(build)?;
    let file_name = format!("{}_resources.tar.gz", build.name);
    let folder = bundle_folder(remote_path, &build.name);

    platform.make_folder(ctx.namespace(), &folder)?;
    let stale: Vec<String> = platform
        .find(&ObjectQuery {
            namespace: ctx.namespace(),
            folder: &folder,
            name: &file_name,
            class: ObjectClass::File,
        })?
        .into_iter()
        .map(|h| h.id)
        .collect();

    let id = platform.upload_bundle(&archive, ctx.namespace(), &folder)?;
    tracing::info!(applet = %build.name, file = %id, folder = %folder, "uploaded resource bundle");
    Ok((
        ExternalDependency {
            name: file_name,
            artifact_id: id,
        },
        stale,
    ))
}

/// Publish the build directory at `remote_path` and look the result up.
/// Bundles superseded by this publish are removed afterwards.
pub fn upload(
    build: &AppletBuild,
    packaged: &Packaged,
    ctx: &BuildContext,
    remote_path: &str,
    platform: &dyn Platform,
) -> Result<BuiltApplet> {
    let digest = hasher::build_digest(&build.build_dir, &build.external_dependencies)?;

    platform.make_folder(ctx.namespace(), remote_path)?;
    platform.publish_package(&build.build_dir, ctx.namespace(), remote_path, &build.name)?;
    let handle = platform.find_one(&ObjectQuery {
        namespace: ctx.namespace(),
        folder: remote_path,
        name: &build.name,
        class: ObjectClass::Applet,
    })?;

    tracing::info!(
        applet = %build.name,
        id = %handle.id,
        path = %remote_path,
        namespace = %ctx.namespace(),
        "published applet"
    );

    if !packaged.stale_bundles.is_empty() {
        tracing::info!(
            applet = %build.name,
            count = packaged.stale_bundles.len(),
            "removing superseded resource bundles"
        );
        platform.remove(ctx.namespace(), &packaged.stale_bundles)?;
    }

    Ok(BuiltApplet {
        name: build.name.clone(),
        remote_id: handle.id,
        namespace: ctx.namespace().to_string(),
        remote_path: remote_path.to_string(),
        digest,
    })
}
