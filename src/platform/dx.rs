//! SH-012: Platform backend driving the `dx` command-line client.
//!
//! API routes go through `dx api <object> <method> <json>`; publishing and
//! file upload use `dx build` and `dx upload`. Request bodies are built by
//! plain functions so they can be checked without a session.

use super::{ObjectClass, ObjectHandle, ObjectQuery, Platform};
use crate::core::error::{BuildError, Result};
use crate::core::types::{StageInput, WorkflowDetails};
use indexmap::IndexMap;
use serde_json::{json, Value};
use std::path::Path;
use std::process::{Command, Output};

/// Runs the `dx` binary found on PATH (or `STAGEHAND_DX`).
#[derive(Debug, Clone)]
pub struct DxPlatform {
    program: String,
}

impl Default for DxPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl DxPlatform {
    pub fn new() -> Self {
        Self {
            program: std::env::var("STAGEHAND_DX").unwrap_or_else(|_| "dx".to_string()),
        }
    }

    pub fn with_program(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        tracing::debug!(program = %self.program, ?args, "invoking dx");
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|e| BuildError::Platform(format!("cannot run {}: {}", self.program, e)))?;
        if !output.status.success() {
            return Err(BuildError::Platform(format!(
                "{} {} exited with {}: {}",
                self.program,
                args.first().copied().unwrap_or_default(),
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output)
    }

    /// One API call; returns the parsed response body.
    fn api(&self, object: &str, method: &str, body: &Value) -> Result<Value> {
        let payload = body.to_string();
        let output = self.run(&["api", object, method, &payload])?;
        serde_json::from_slice(&output.stdout).map_err(|e| {
            BuildError::Platform(format!("{}/{} returned invalid JSON: {}", object, method, e))
        })
    }

    fn edit_version(&self, workflow_id: &str) -> Result<u64> {
        let desc = self.api(workflow_id, "describe", &json!({"fields": {"editVersion": true}}))?;
        desc["editVersion"].as_u64().ok_or_else(|| {
            BuildError::Platform(format!("describe {} returned no editVersion", workflow_id))
        })
    }
}

/// `<namespace>:<folder>` destination syntax.
pub fn destination(namespace: &str, folder: &str) -> String {
    format!("{}:{}", namespace, folder)
}

pub fn find_request(query: &ObjectQuery<'_>) -> Value {
    json!({
        "class": query.class.to_string(),
        "name": query.name,
        "scope": {
            "project": query.namespace,
            "folder": query.folder,
            "recurse": false,
        },
        "describe": {"fields": {"name": true, "folder": true}},
    })
}

/// Parse a `findDataObjects` response into handles.
pub fn parse_find_response(query: &ObjectQuery<'_>, response: &Value) -> Result<Vec<ObjectHandle>> {
    let results = response["results"].as_array().ok_or_else(|| {
        BuildError::Platform(format!("findDataObjects for {} returned no results", query))
    })?;
    results
        .iter()
        .map(|r| {
            let id = r["id"].as_str().ok_or_else(|| {
                BuildError::Platform(format!("findDataObjects for {} returned an entry without id", query))
            })?;
            Ok(ObjectHandle {
                id: id.to_string(),
                class: query.class,
                name: r["describe"]["name"]
                    .as_str()
                    .unwrap_or(query.name)
                    .to_string(),
                namespace: r["project"]
                    .as_str()
                    .unwrap_or(query.namespace)
                    .to_string(),
                folder: r["describe"]["folder"]
                    .as_str()
                    .unwrap_or(query.folder)
                    .to_string(),
            })
        })
        .collect()
}

pub fn new_workflow_request(
    namespace: &str,
    folder: &str,
    name: &str,
    details: &WorkflowDetails,
) -> Result<Value> {
    let details = serde_json::to_value(details)
        .map_err(|e| BuildError::Platform(format!("cannot encode workflow details: {}", e)))?;
    Ok(json!({
        "project": namespace,
        "folder": folder,
        "name": name,
        "details": details,
    }))
}

pub fn add_stage_request(edit_version: u64, executable: &str, folder: &str) -> Value {
    json!({
        "editVersion": edit_version,
        "executable": executable,
        "folder": folder,
    })
}

pub fn stage_input_request(
    edit_version: u64,
    stage_id: &str,
    input: &IndexMap<String, StageInput>,
) -> Value {
    json!({
        "editVersion": edit_version,
        "stages": {
            stage_id: {"input": super::native_input(input)},
        },
    })
}

impl Platform for DxPlatform {
    fn name(&self) -> &'static str {
        "dx"
    }

    fn check_session(&self) -> Result<()> {
        self.run(&["whoami"]).map(|_| ()).map_err(|e| {
            BuildError::Platform(format!("not logged in to the platform (run `dx login`): {}", e))
        })
    }

    fn make_folder(&self, namespace: &str, folder: &str) -> Result<()> {
        self.api(namespace, "newFolder", &json!({"folder": folder, "parents": true}))
            .map(|_| ())
    }

    fn find(&self, query: &ObjectQuery<'_>) -> Result<Vec<ObjectHandle>> {
        let response = self.api("system", "findDataObjects", &find_request(query))?;
        parse_find_response(query, &response)
    }

    fn remove(&self, namespace: &str, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.api(namespace, "removeObjects", &json!({"objects": ids}))
            .map(|_| ())
    }

    fn publish_package(
        &self,
        build_dir: &Path,
        namespace: &str,
        folder: &str,
        name: &str,
    ) -> Result<()> {
        let dir = build_dir.to_string_lossy();
        let dest = destination(namespace, &crate::core::types::join_remote(folder, name));
        self.run(&["build", &dir, "--overwrite", "--destination", &dest])
            .map(|_| ())
    }

    fn upload_bundle(&self, archive: &Path, namespace: &str, folder: &str) -> Result<String> {
        let file = archive.to_string_lossy();
        let dest = format!("{}/", destination(namespace, folder.trim_end_matches('/')));
        let output = self.run(&["upload", &file, "--brief", "--path", &dest])?;
        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            return Err(BuildError::Platform(format!(
                "upload of {} returned no file id",
                archive.display()
            )));
        }
        Ok(id)
    }

    fn create_workflow(
        &self,
        namespace: &str,
        folder: &str,
        name: &str,
        details: &WorkflowDetails,
    ) -> Result<String> {
        let response = self.api(
            "workflow",
            "new",
            &new_workflow_request(namespace, folder, name, details)?,
        )?;
        response["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| BuildError::Platform("workflow/new returned no id".to_string()))
    }

    fn add_stage(&self, workflow_id: &str, executable: &str, folder: &str) -> Result<String> {
        let version = self.edit_version(workflow_id)?;
        let response = self.api(
            workflow_id,
            "addStage",
            &add_stage_request(version, executable, folder),
        )?;
        response["stage"].as_str().map(str::to_string).ok_or_else(|| {
            BuildError::Platform(format!("addStage on {} returned no stage id", workflow_id))
        })
    }

    fn update_stage_input(
        &self,
        workflow_id: &str,
        stage_id: &str,
        input: &IndexMap<String, StageInput>,
    ) -> Result<()> {
        if input.is_empty() {
            return Ok(());
        }
        let version = self.edit_version(workflow_id)?;
        self.api(
            workflow_id,
            "update",
            &stage_input_request(version, stage_id, input),
        )
        .map(|_| ())
    }

    fn close_workflow(&self, workflow_id: &str) -> Result<()> {
        self.api(workflow_id, "close", &json!({})).map(|_| ())
    }
}
