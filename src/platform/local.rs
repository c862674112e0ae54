//! SH-011: Filesystem-backed object store.
//!
//! Layout under the store root:
//!
//! ```text
//! index.yaml          folders, objects, workflow stages
//! blobs/<id>/...      published applet trees and uploaded files
//! ```
//!
//! The index is rewritten atomically after every mutation.

use super::{ObjectClass, ObjectHandle, ObjectQuery, Platform};
use crate::core::error::{BuildError, Result};
use crate::core::types::{join_remote, StageInput, WorkflowDetails};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Persistent state of the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreIndex {
    #[serde(default)]
    pub next_id: u64,
    /// Namespace -> existing folders
    #[serde(default)]
    pub folders: BTreeMap<String, BTreeSet<String>>,
    #[serde(default)]
    pub objects: IndexMap<String, StoredObject>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredObject {
    pub handle: ObjectHandle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<WorkflowDetails>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stages: Vec<StoredStage>,
    #[serde(default)]
    pub closed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredStage {
    pub id: String,
    pub executable: String,
    pub folder: String,
    #[serde(default)]
    pub input: serde_json::Map<String, serde_json::Value>,
}

/// Local platform rooted at a directory.
#[derive(Debug, Clone)]
pub struct LocalPlatform {
    root: PathBuf,
}

impl LocalPlatform {
    /// Open (or initialise) a store.
    pub fn open(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root.join("blobs")).map_err(|e| BuildError::io(root, e))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("index.yaml")
    }

    pub fn blob_dir(&self, id: &str) -> PathBuf {
        self.root.join("blobs").join(id)
    }

    pub fn load_index(&self) -> Result<StoreIndex> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(StoreIndex::default());
        }
        let content = std::fs::read_to_string(&path).map_err(|e| BuildError::io(&path, e))?;
        serde_yaml_ng::from_str(&content).map_err(|e| {
            BuildError::Platform(format!("corrupt store index {}: {}", path.display(), e))
        })
    }

    fn save_index(&self, index: &StoreIndex) -> Result<()> {
        let path = self.index_path();
        let yaml = serde_yaml_ng::to_string(index)
            .map_err(|e| BuildError::Platform(format!("cannot encode store index: {}", e)))?;
        let tmp = path.with_extension("yaml.tmp");
        std::fs::write(&tmp, yaml).map_err(|e| BuildError::io(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| BuildError::io(&path, e))
    }

    /// Load, mutate, save.
    fn update<T>(&self, f: impl FnOnce(&mut StoreIndex) -> Result<T>) -> Result<T> {
        let mut index = self.load_index()?;
        let out = f(&mut index)?;
        self.save_index(&index)?;
        Ok(out)
    }

    /// Full record of one object.
    pub fn describe(&self, id: &str) -> Result<StoredObject> {
        self.load_index()?
            .objects
            .get(id)
            .cloned()
            .ok_or_else(|| BuildError::Platform(format!("no such object {}", id)))
    }
}

fn allocate(index: &mut StoreIndex, prefix: &str) -> String {
    index.next_id += 1;
    format!("{}-{:08}", prefix, index.next_id)
}

fn normalize(folder: &str) -> String {
    join_remote("/", folder)
}

fn require_folder(index: &StoreIndex, namespace: &str, folder: &str) -> Result<()> {
    let exists = index
        .folders
        .get(namespace)
        .is_some_and(|set| set.contains(folder));
    if exists || folder == "/" {
        Ok(())
    } else {
        Err(BuildError::Platform(format!(
            "folder {}:{} does not exist",
            namespace, folder
        )))
    }
}

fn insert_object(
    index: &mut StoreIndex,
    class: ObjectClass,
    namespace: &str,
    folder: &str,
    name: &str,
) -> String {
    let id = allocate(index, &class.to_string());
    index.objects.insert(
        id.clone(),
        StoredObject {
            handle: ObjectHandle {
                id: id.clone(),
                class,
                name: name.to_string(),
                namespace: namespace.to_string(),
                folder: folder.to_string(),
            },
            details: None,
            stages: Vec::new(),
            closed: false,
        },
    );
    id
}

fn open_workflow<'a>(index: &'a mut StoreIndex, id: &str) -> Result<&'a mut StoredObject> {
    let obj = index
        .objects
        .get_mut(id)
        .filter(|o| o.handle.class == ObjectClass::Workflow)
        .ok_or_else(|| BuildError::Platform(format!("no such workflow {}", id)))?;
    if obj.closed {
        return Err(BuildError::Platform(format!("workflow {} is closed", id)));
    }
    Ok(obj)
}

fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    std::fs::create_dir_all(to).map_err(|e| BuildError::io(to, e))?;
    for entry in std::fs::read_dir(from).map_err(|e| BuildError::io(from, e))? {
        let entry = entry.map_err(|e| BuildError::io(from, e))?;
        let src = entry.path();
        let dst = to.join(entry.file_name());
        let kind = entry.file_type().map_err(|e| BuildError::io(&src, e))?;
        if kind.is_dir() {
            copy_tree(&src, &dst)?;
        } else if kind.is_file() {
            std::fs::copy(&src, &dst).map_err(|e| BuildError::io(&src, e))?;
        }
    }
    Ok(())
}

impl Platform for LocalPlatform {
    fn name(&self) -> &'static str {
        "local"
    }

    fn make_folder(&self, namespace: &str, folder: &str) -> Result<()> {
        let folder = normalize(folder);
        self.update(|index| {
            let set = index.folders.entry(namespace.to_string()).or_default();
            let mut current = String::new();
            for part in folder.split('/').filter(|p| !p.is_empty()) {
                current.push('/');
                current.push_str(part);
                set.insert(current.clone());
            }
            Ok(())
        })
    }

    fn find(&self, query: &ObjectQuery<'_>) -> Result<Vec<ObjectHandle>> {
        let folder = normalize(query.folder);
        Ok(self
            .load_index()?
            .objects
            .values()
            .map(|o| &o.handle)
            .filter(|h| {
                h.class == query.class
                    && h.namespace == query.namespace
                    && h.folder == folder
                    && h.name == query.name
            })
            .cloned()
            .collect())
    }

    fn remove(&self, namespace: &str, ids: &[String]) -> Result<()> {
        self.update(|index| {
            for id in ids {
                let owned = index
                    .objects
                    .get(id)
                    .is_some_and(|o| o.handle.namespace == namespace);
                if !owned {
                    return Err(BuildError::Platform(format!(
                        "cannot remove {}: not found in {}",
                        id, namespace
                    )));
                }
                index.objects.shift_remove(id);
            }
            Ok(())
        })?;
        for id in ids {
            let blob = self.blob_dir(id);
            if blob.exists() {
                std::fs::remove_dir_all(&blob).map_err(|e| BuildError::io(&blob, e))?;
            }
        }
        Ok(())
    }

    fn publish_package(
        &self,
        build_dir: &Path,
        namespace: &str,
        folder: &str,
        name: &str,
    ) -> Result<()> {
        let folder = normalize(folder);
        let (id, replaced) = self.update(|index| {
            require_folder(index, namespace, &folder)?;
            let replaced: Vec<String> = index
                .objects
                .values()
                .filter(|o| {
                    o.handle.class == ObjectClass::Applet
                        && o.handle.namespace == namespace
                        && o.handle.folder == folder
                        && o.handle.name == name
                })
                .map(|o| o.handle.id.clone())
                .collect();
            for old in &replaced {
                index.objects.shift_remove(old);
            }
            Ok((
                insert_object(index, ObjectClass::Applet, namespace, &folder, name),
                replaced,
            ))
        })?;
        for old in replaced {
            let blob = self.blob_dir(&old);
            if blob.exists() {
                std::fs::remove_dir_all(&blob).map_err(|e| BuildError::io(&blob, e))?;
            }
        }
        copy_tree(build_dir, &self.blob_dir(&id))
    }

    fn upload_bundle(&self, archive: &Path, namespace: &str, folder: &str) -> Result<String> {
        let folder = normalize(folder);
        let name = archive
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                BuildError::Platform(format!("bundle path {} has no file name", archive.display()))
            })?;
        let id = self.update(|index| {
            require_folder(index, namespace, &folder)?;
            Ok(insert_object(index, ObjectClass::File, namespace, &folder, &name))
        })?;
        let blob = self.blob_dir(&id);
        std::fs::create_dir_all(&blob).map_err(|e| BuildError::io(&blob, e))?;
        std::fs::copy(archive, blob.join(&name)).map_err(|e| BuildError::io(archive, e))?;
        Ok(id)
    }

    fn create_workflow(
        &self,
        namespace: &str,
        folder: &str,
        name: &str,
        details: &WorkflowDetails,
    ) -> Result<String> {
        let folder = normalize(folder);
        self.update(|index| {
            require_folder(index, namespace, &folder)?;
            let id = insert_object(index, ObjectClass::Workflow, namespace, &folder, name);
            if let Some(obj) = index.objects.get_mut(&id) {
                obj.details = Some(details.clone());
            }
            Ok(id)
        })
    }

    fn add_stage(&self, workflow_id: &str, executable: &str, folder: &str) -> Result<String> {
        self.update(|index| {
            let is_applet = index
                .objects
                .get(executable)
                .is_some_and(|o| o.handle.class == ObjectClass::Applet);
            if !is_applet {
                return Err(BuildError::Platform(format!(
                    "executable {} is not a published applet",
                    executable
                )));
            }
            let stage_id = allocate(index, "stage");
            open_workflow(index, workflow_id)?.stages.push(StoredStage {
                id: stage_id.clone(),
                executable: executable.to_string(),
                folder: folder.to_string(),
                input: serde_json::Map::new(),
            });
            Ok(stage_id)
        })
    }

    fn update_stage_input(
        &self,
        workflow_id: &str,
        stage_id: &str,
        input: &IndexMap<String, StageInput>,
    ) -> Result<()> {
        self.update(|index| {
            let workflow = open_workflow(index, workflow_id)?;
            let stage = workflow
                .stages
                .iter_mut()
                .find(|s| s.id == stage_id)
                .ok_or_else(|| {
                    BuildError::Platform(format!(
                        "workflow {} has no stage {}",
                        workflow_id, stage_id
                    ))
                })?;
            stage.input.extend(super::native_input(input));
            Ok(())
        })
    }

    fn close_workflow(&self, workflow_id: &str) -> Result<()> {
        self.update(|index| {
            open_workflow(index, workflow_id)?.closed = true;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ResolvedLink;

    fn store() -> (tempfile::TempDir, LocalPlatform) {
        let dir = tempfile::tempdir().unwrap();
        let p = LocalPlatform::open(&dir.path().join("store")).unwrap();
        (dir, p)
    }

    fn build_dir(root: &Path, body: &str) -> PathBuf {
        let dir = root.join("build");
        std::fs::create_dir_all(dir.join("src")).unwrap();
        std::fs::write(dir.join("src/qc.py"), body).unwrap();
        std::fs::write(dir.join("dxapp.json"), "{}").unwrap();
        dir
    }

    fn details() -> WorkflowDetails {
        WorkflowDetails {
            name: "qc".into(),
            branch: "develop".into(),
            revision: "abc1234".into(),
            release: Some("1.0.0".into()),
            version_label: "2026-10-16_abc1234".into(),
            date_created: "2026-10-16".into(),
        }
    }

    fn query<'a>(folder: &'a str, name: &'a str, class: ObjectClass) -> ObjectQuery<'a> {
        ObjectQuery {
            namespace: "project-dev",
            folder,
            name,
            class,
        }
    }

    #[test]
    fn test_sh011_make_folder_parents() {
        let (_d, p) = store();
        p.make_folder("project-dev", "/1.0/develop/qc").unwrap();
        let index = p.load_index().unwrap();
        let set = &index.folders["project-dev"];
        assert!(set.contains("/1.0"));
        assert!(set.contains("/1.0/develop"));
        assert!(set.contains("/1.0/develop/qc"));
    }

    #[test]
    fn test_sh011_publish_requires_folder() {
        let (d, p) = store();
        let dir = build_dir(d.path(), "v1");
        let err = p
            .publish_package(&dir, "project-dev", "/missing", "qc")
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_sh011_publish_overwrites_same_name() {
        let (d, p) = store();
        p.make_folder("project-dev", "/1.0").unwrap();
        let dir = build_dir(d.path(), "v1");
        p.publish_package(&dir, "project-dev", "/1.0", "qc").unwrap();
        let first = p.find_one(&query("/1.0", "qc", ObjectClass::Applet)).unwrap();

        std::fs::write(dir.join("src/qc.py"), "v2").unwrap();
        p.publish_package(&dir, "project-dev", "/1.0", "qc").unwrap();
        let second = p.find_one(&query("/1.0", "qc", ObjectClass::Applet)).unwrap();

        assert_ne!(first.id, second.id);
        assert!(!p.blob_dir(&first.id).exists());
        let body = std::fs::read_to_string(p.blob_dir(&second.id).join("src/qc.py")).unwrap();
        assert_eq!(body, "v2");
    }

    #[test]
    fn test_sh011_upload_bundle() {
        let (d, p) = store();
        p.make_folder("project-dev", "/1.0/.resources/qc").unwrap();
        let archive = d.path().join("qc_resources.tar.gz");
        std::fs::write(&archive, b"gz").unwrap();
        let id = p
            .upload_bundle(&archive, "project-dev", "/1.0/.resources/qc")
            .unwrap();
        assert!(id.starts_with("file-"));
        assert!(p.blob_dir(&id).join("qc_resources.tar.gz").exists());
        let found = p
            .find(&query("/1.0/.resources/qc", "qc_resources.tar.gz", ObjectClass::File))
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_sh011_workflow_lifecycle() {
        let (d, p) = store();
        p.make_folder("project-dev", "/1.0/qc").unwrap();
        let dir = build_dir(d.path(), "v1");
        p.publish_package(&dir, "project-dev", "/1.0/qc", "qc").unwrap();
        let applet = p.find_one(&query("/1.0/qc", "qc", ObjectClass::Applet)).unwrap();

        let wf = p
            .create_workflow("project-dev", "/1.0/qc", "qc", &details())
            .unwrap();
        let s0 = p.add_stage(&wf, &applet.id, "/out").unwrap();
        let s1 = p.add_stage(&wf, &applet.id, "/out2").unwrap();

        let mut input = IndexMap::new();
        input.insert(
            "reads".to_string(),
            StageInput::Link(ResolvedLink {
                stage_id: s0.clone(),
                field: "fastq".into(),
            }),
        );
        p.update_stage_input(&wf, &s1, &input).unwrap();
        p.close_workflow(&wf).unwrap();

        let stored = p.describe(&wf).unwrap();
        assert!(stored.closed);
        assert_eq!(stored.details.unwrap().revision, "abc1234");
        assert_eq!(stored.stages.len(), 2);
        assert_eq!(stored.stages[1].input["reads"]["$dnanexus_link"]["stage"], s0);

        // closed workflows reject edits
        assert!(p.add_stage(&wf, &applet.id, "/").is_err());
    }

    #[test]
    fn test_sh011_add_stage_requires_applet() {
        let (_d, p) = store();
        p.make_folder("project-dev", "/wf").unwrap();
        let wf = p.create_workflow("project-dev", "/wf", "qc", &details()).unwrap();
        let err = p.add_stage(&wf, "applet-99999999", "/").unwrap_err();
        assert!(matches!(err, BuildError::Platform(_)));
    }

    #[test]
    fn test_sh011_remove() {
        let (_d, p) = store();
        p.make_folder("project-dev", "/wf").unwrap();
        let wf = p.create_workflow("project-dev", "/wf", "qc", &details()).unwrap();
        p.remove("project-dev", std::slice::from_ref(&wf)).unwrap();
        assert!(p.find(&query("/wf", "qc", ObjectClass::Workflow)).unwrap().is_empty());
        assert!(p.remove("project-dev", &[wf]).is_err());
    }

    #[test]
    fn test_sh011_index_survives_reopen() {
        let (d, p) = store();
        p.make_folder("project-dev", "/wf").unwrap();
        p.create_workflow("project-dev", "/wf", "qc", &details()).unwrap();
        let reopened = LocalPlatform::open(&d.path().join("store")).unwrap();
        assert_eq!(
            reopened
                .find(&query("/wf", "qc", ObjectClass::Workflow))
                .unwrap()
                .len(),
            1
        );
    }
}
