//! SH-010: Remote execution platform abstraction.
//!
//! Two backends: `dx` drives the platform's command-line client, `local`
//! keeps objects in a directory and is used for dry deployments and tests.

pub mod dx;
pub mod local;

use crate::core::error::{BuildError, Result};
use crate::core::types::{StageInput, WorkflowDetails};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Kinds of remote data object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectClass {
    Applet,
    File,
    Workflow,
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Applet => write!(f, "applet"),
            Self::File => write!(f, "file"),
            Self::Workflow => write!(f, "workflow"),
        }
    }
}

/// A remote object as returned by a lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectHandle {
    pub id: String,
    pub class: ObjectClass,
    pub name: String,
    pub namespace: String,
    pub folder: String,
}

/// Lookup by exact name within one folder (not recursive).
#[derive(Debug, Clone, Copy)]
pub struct ObjectQuery<'a> {
    pub namespace: &'a str,
    pub folder: &'a str,
    pub name: &'a str,
    pub class: ObjectClass,
}

impl fmt::Display for ObjectQuery<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} '{}' in {}:{}",
            self.class, self.name, self.namespace, self.folder
        )
    }
}

/// Operations the build needs from the remote platform.
///
/// Every call is synchronous and is attempted once.
pub trait Platform {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Verify credentials before touching anything.
    fn check_session(&self) -> Result<()> {
        Ok(())
    }

    /// Create `folder` and any missing parents.
    fn make_folder(&self, namespace: &str, folder: &str) -> Result<()>;

    fn find(&self, query: &ObjectQuery<'_>) -> Result<Vec<ObjectHandle>>;

    /// Exactly one match; zero or several is a platform error.
    fn find_one(&self, query: &ObjectQuery<'_>) -> Result<ObjectHandle> {
        let mut found = self.find(query)?;
        match found.len() {
            1 => Ok(found.remove(0)),
            0 => Err(BuildError::Platform(format!("no {} found", query))),
            n => Err(BuildError::Platform(format!(
                "{} matches for {}, expected exactly one",
                n, query
            ))),
        }
    }

    fn remove(&self, namespace: &str, ids: &[String]) -> Result<()>;

    /// Publish a staged build directory as applet `name` in `folder`,
    /// replacing a same-named applet there.
    fn publish_package(
        &self,
        build_dir: &Path,
        namespace: &str,
        folder: &str,
        name: &str,
    ) -> Result<()>;

    /// Upload one file into `folder`; returns the new file id.
    fn upload_bundle(&self, archive: &Path, namespace: &str, folder: &str) -> Result<String>;

    /// Create an open workflow; returns its id.
    fn create_workflow(
        &self,
        namespace: &str,
        folder: &str,
        name: &str,
        details: &WorkflowDetails,
    ) -> Result<String>;

    /// Append a stage running `executable`; returns the stage id.
    fn add_stage(&self, workflow_id: &str, executable: &str, folder: &str) -> Result<String>;

    fn update_stage_input(
        &self,
        workflow_id: &str,
        stage_id: &str,
        input: &IndexMap<String, StageInput>,
    ) -> Result<()>;

    fn close_workflow(&self, workflow_id: &str) -> Result<()>;
}

/// Platform-native JSON for a stage's inputs.
pub fn native_input(input: &IndexMap<String, StageInput>) -> serde_json::Map<String, serde_json::Value> {
    input
        .iter()
        .map(|(k, v)| (k.clone(), v.to_native()))
        .collect()
}

/// Select a backend by name.
pub fn backend(kind: &str, store: &Path) -> Result<Box<dyn Platform>> {
    match kind {
        "dx" => Ok(Box::new(dx::DxPlatform::new())),
        "local" => Ok(Box::new(local::LocalPlatform::open(store)?)),
        other => Err(BuildError::Config(format!(
            "unknown backend '{}' (expected dx or local)",
            other
        ))),
    }
}
