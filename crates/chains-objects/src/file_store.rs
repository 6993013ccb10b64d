//! Directory-backed object store.
//!
//! Every `*.json` file under the root holding a TaskRun or PipelineRun
//! document is one object. Reads always go to disk so the files stay
//! authoritative; patches rewrite the file through a temp file + rename.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::StoreError;
use crate::meta::{ObjectKind, ObjectRef};
use crate::patch::AnnotationPatch;
use crate::store::ObjectStore;
use crate::tracked::{TektonObject, TrackedObject};

pub struct FileStore {
    root: PathBuf,
    index: Mutex<BTreeMap<ObjectRef, PathBuf>>,
    tracked: Mutex<BTreeMap<ObjectRef, BTreeSet<ObjectRef>>>,
    /// Serializes read-modify-write of individual files.
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open a store rooted at `root`, indexing every object document.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self {
            root: root.into(),
            index: Mutex::new(BTreeMap::new()),
            tracked: Mutex::new(BTreeMap::new()),
            write_lock: Mutex::new(()),
        };
        store.rescan()?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Rebuild the name → file index from disk.
    pub fn rescan(&self) -> Result<usize, StoreError> {
        let mut found = BTreeMap::new();

        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = entry.map_err(|e| StoreError::Unavailable(e.to_string()))?;
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|e| e.to_str()) != Some("json")
            {
                continue;
            }

            let obj = match read_object(path) {
                Ok(obj) => obj,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "skipping non-object file");
                    continue;
                }
            };
            let obj_ref = obj.object_ref();
            if let Some(previous) = found.insert(obj_ref.clone(), path.to_path_buf()) {
                warn!(
                    object = %obj_ref,
                    kept = %path.display(),
                    dropped = %previous.display(),
                    "duplicate object document"
                );
            }
        }

        let count = found.len();
        if let Ok(mut index) = self.index.lock() {
            *index = found;
        }
        Ok(count)
    }

    fn path_of(&self, target: &ObjectRef) -> Result<PathBuf, StoreError> {
        self.index
            .lock()
            .map_err(|_| StoreError::Unavailable("index lock poisoned".to_string()))?
            .get(target)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(target.clone()))
    }
}

fn read_document(path: &Path) -> Result<serde_json::Value, StoreError> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn read_object(path: &Path) -> Result<TektonObject, StoreError> {
    Ok(TektonObject::from_value(read_document(path)?)?)
}

fn write_document(path: &Path, doc: &serde_json::Value) -> Result<(), StoreError> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(doc)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

impl ObjectStore for FileStore {
    fn get(
        &self,
        kind: ObjectKind,
        namespace: &str,
        name: &str,
    ) -> Result<TektonObject, StoreError> {
        let target = ObjectRef::new(kind, namespace, name);
        let path = self.path_of(&target)?;
        match read_object(&path) {
            Err(StoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(target))
            }
            other => other,
        }
    }

    fn patch(&self, target: &ObjectRef, patch: &[u8]) -> Result<(), StoreError> {
        let patch = AnnotationPatch::from_slice(patch)?;
        if patch.metadata.name != target.name
            || patch.metadata.namespace != target.namespace
            || patch.kind != target.kind.as_str()
        {
            return Err(StoreError::InvalidPatch {
                target: target.clone(),
                reason: format!(
                    "patch addresses {} {}/{}",
                    patch.kind, patch.metadata.namespace, patch.metadata.name
                ),
            });
        }

        let path = self.path_of(target)?;
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StoreError::Unavailable("write lock poisoned".to_string()))?;

        let mut doc = read_document(&path)?;
        patch.apply_to_value(&mut doc)?;
        write_document(&path, &doc)?;

        debug!(
            object = %target,
            keys = patch.metadata.annotations.len(),
            "patched annotations"
        );
        Ok(())
    }

    fn track(&self, dependency: &ObjectRef, dependent: &ObjectRef) -> Result<(), StoreError> {
        let mut tracked = self
            .tracked
            .lock()
            .map_err(|_| StoreError::Unavailable("tracker lock poisoned".to_string()))?;
        tracked
            .entry(dependency.clone())
            .or_default()
            .insert(dependent.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<ObjectRef>, StoreError> {
        self.rescan()?;
        let index = self
            .index
            .lock()
            .map_err(|_| StoreError::Unavailable("index lock poisoned".to_string()))?;
        Ok(index.keys().cloned().collect())
    }

    fn dependents(&self, dependency: &ObjectRef) -> Vec<ObjectRef> {
        self.tracked
            .lock()
            .ok()
            .and_then(|t| t.get(dependency).map(|d| d.iter().cloned().collect()))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::GroupVersionKind;
    use serde_json::json;
    use tempfile::TempDir;

    fn write_task_run(dir: &Path, file: &str, name: &str) {
        let doc = json!({
            "apiVersion": "tekton.dev/v1",
            "kind": "TaskRun",
            "metadata": {
                "name": name,
                "namespace": "ci",
                "uid": format!("uid-{name}"),
                "annotations": {"team": "infra"}
            },
            "status": {"conditions": [{"type": "Succeeded", "status": "True"}]}
        });
        fs::write(dir.join(file), serde_json::to_vec_pretty(&doc).unwrap()).unwrap();
    }

    #[test]
    fn test_open_indexes_objects() {
        let dir = TempDir::new().unwrap();
        write_task_run(dir.path(), "a.json", "build");
        fs::create_dir(dir.path().join("nested")).unwrap();
        write_task_run(&dir.path().join("nested"), "b.json", "test");
        fs::write(dir.path().join("notes.json"), r#"{"hello": "world"}"#).unwrap();
        fs::write(dir.path().join("README.md"), "ignored").unwrap();

        let store = FileStore::open(dir.path()).unwrap();
        let refs = store.list().unwrap();
        assert_eq!(refs.len(), 2);

        let obj = store.get(ObjectKind::TaskRun, "ci", "test").unwrap();
        assert_eq!(obj.uid(), "uid-test");
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let err = store.get(ObjectKind::TaskRun, "ci", "nope").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_patch_writes_through() {
        let dir = TempDir::new().unwrap();
        write_task_run(dir.path(), "a.json", "build");
        let store = FileStore::open(dir.path()).unwrap();

        let gvk = GroupVersionKind::parse("tekton.dev/v1", "TaskRun").unwrap();
        let mut ann = BTreeMap::new();
        ann.insert("chains.tekton.dev/signed".to_string(), "true".to_string());
        let patch = AnnotationPatch::new(&gvk, "build", "ci", ann);
        let target = ObjectRef::new(ObjectKind::TaskRun, "ci", "build");
        store.patch(&target, &patch.to_bytes().unwrap()).unwrap();

        let reopened = FileStore::open(dir.path()).unwrap();
        let obj = reopened.get(ObjectKind::TaskRun, "ci", "build").unwrap();
        assert_eq!(obj.annotation("chains.tekton.dev/signed"), Some("true"));
        assert_eq!(obj.annotation("team"), Some("infra"));
    }

    #[test]
    fn test_patch_rejects_mismatched_identity() {
        let dir = TempDir::new().unwrap();
        write_task_run(dir.path(), "a.json", "build");
        let store = FileStore::open(dir.path()).unwrap();

        let gvk = GroupVersionKind::parse("tekton.dev/v1", "TaskRun").unwrap();
        let patch = AnnotationPatch::new(&gvk, "other", "ci", BTreeMap::new());
        let target = ObjectRef::new(ObjectKind::TaskRun, "ci", "build");
        let err = store.patch(&target, &patch.to_bytes().unwrap()).unwrap_err();
        assert!(matches!(err, StoreError::InvalidPatch { .. }));
    }

    #[test]
    fn test_track_and_dependents() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let child = ObjectRef::new(ObjectKind::TaskRun, "ci", "build");
        let parent = ObjectRef::new(ObjectKind::PipelineRun, "ci", "release");
        store.track(&child, &parent).unwrap();
        store.track(&child, &parent).unwrap();
        assert_eq!(store.dependents(&child), vec![parent]);
        assert!(store.dependents(&ObjectRef::new(ObjectKind::TaskRun, "ci", "x")).is_empty());
    }
}
