//! SH-008: Package descriptor (`dxapp.json`) from the applet template.
//!
//! The template is copied as-is except for `version` and
//! `runSpec.bundledDepends`, which gets one entry per external dependency
//! and, when internal resources were attached, one entry for the bundle.

use super::error::{BuildError, Result};
use super::types::{AppletBuild, BuildContext, ExternalDependency};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};

pub const DESCRIPTOR_FILE: &str = "dxapp.json";

/// The descriptor document for one applet build.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageDescriptor {
    pub document: Value,
}

/// A `bundledDepends` entry pointing at a remote file.
pub fn bundled_depend(name: &str, artifact_id: &str) -> Value {
    json!({
        "name": name,
        "id": {"$dnanexus_link": artifact_id},
    })
}

/// Load `<name>.template.json`.
pub fn load_template(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        BuildError::Config(format!("cannot read applet template {}: {}", path.display(), e))
    })?;
    let doc: Value = serde_json::from_str(&content).map_err(|e| {
        BuildError::Config(format!("invalid applet template {}: {}", path.display(), e))
    })?;
    if !doc.is_object() {
        return Err(BuildError::Config(format!(
            "applet template {} is not a JSON object",
            path.display()
        )));
    }
    Ok(doc)
}

impl PackageDescriptor {
    /// Stamp the template for this build.
    ///
    /// `bundle` is the uploaded resource bundle (file name, id), present iff
    /// internal resources were attached.
    pub fn from_template(
        template: Value,
        ctx: &BuildContext,
        external: &[ExternalDependency],
        bundle: Option<&ExternalDependency>,
    ) -> Result<Self> {
        let mut document = template;
        let root = document
            .as_object_mut()
            .ok_or_else(|| BuildError::Config("applet template is not a JSON object".into()))?;
        root.insert("version".into(), Value::String(ctx.package_version().to_string()));

        let run_spec = root
            .entry("runSpec")
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
            .ok_or_else(|| BuildError::Config("applet template runSpec is not an object".into()))?;
        let depends = run_spec
            .entry("bundledDepends")
            .or_insert_with(|| Value::Array(Vec::new()))
            .as_array_mut()
            .ok_or_else(|| {
                BuildError::Config("applet template runSpec.bundledDepends is not a list".into())
            })?;

        for dep in external.iter().chain(bundle) {
            depends.push(bundled_depend(&dep.name, &dep.artifact_id));
        }

        Ok(Self { document })
    }

    pub fn bundled_depends(&self) -> &[Value] {
        self.document["runSpec"]["bundledDepends"]
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Write `<build_dir>/dxapp.json`.
    pub fn write(&self, build: &AppletBuild) -> Result<PathBuf> {
        let path = build.build_dir.join(DESCRIPTOR_FILE);
        let body = serde_json::to_string_pretty(&self.document)
            .map_err(|e| BuildError::Config(format!("cannot encode descriptor: {}", e)))?;
        std::fs::write(&path, body).map_err(|e| BuildError::io(&path, e))?;
        Ok(path)
    }
}
