//! In-process object store with call recording and failure injection.
//!
//! Used by the controller's tests and by anything embedding the signing
//! core without a directory of documents.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use tracing::debug;

use crate::error::StoreError;
use crate::meta::{ObjectKind, ObjectRef};
use crate::patch::AnnotationPatch;
use crate::store::ObjectStore;
use crate::tracked::{TektonObject, TrackedObject};

/// Store operation a fault can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get,
    Patch,
    Track,
}

/// Injected failure for a store operation.
#[derive(Debug, Clone)]
pub struct StoreFault {
    pub message: String,
    /// Number of calls to fail before succeeding (None = always fail)
    pub fail_count: Option<u32>,
}

impl StoreFault {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fail_count: None,
        }
    }

    pub fn with_fail_count(mut self, count: u32) -> Self {
        self.fail_count = Some(count);
        self
    }
}

#[derive(Debug, Default)]
struct Faults {
    configs: HashMap<StoreOp, StoreFault>,
    call_counts: HashMap<StoreOp, u32>,
}

impl Faults {
    fn check(&mut self, op: StoreOp) -> Option<String> {
        let fault = self.configs.get(&op)?;
        let count = self.call_counts.entry(op).or_insert(0);
        *count += 1;
        if let Some(limit) = fault.fail_count {
            if *count > limit {
                return None;
            }
        }
        Some(fault.message.clone())
    }
}

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<ObjectRef, TektonObject>,
    tracked: BTreeMap<ObjectRef, BTreeSet<ObjectRef>>,
    patches: Vec<(ObjectRef, AnnotationPatch)>,
    gets: u32,
    faults: Faults,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    /// Insert or replace an object.
    pub fn insert(&self, obj: impl Into<TektonObject>) {
        let obj = obj.into();
        if let Ok(mut inner) = self.lock() {
            inner.objects.insert(obj.object_ref(), obj);
        }
    }

    pub fn remove(&self, target: &ObjectRef) -> Option<TektonObject> {
        self.lock().ok()?.objects.remove(target)
    }

    /// Mutate a stored object in place without recording a patch.
    pub fn update<F>(&self, target: &ObjectRef, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut TektonObject),
    {
        let mut inner = self.lock()?;
        let obj = inner
            .objects
            .get_mut(target)
            .ok_or_else(|| StoreError::NotFound(target.clone()))?;
        f(obj);
        Ok(())
    }

    pub fn inject_failure(&self, op: StoreOp, fault: StoreFault) {
        if let Ok(mut inner) = self.lock() {
            inner.faults.configs.insert(op, fault);
            inner.faults.call_counts.insert(op, 0);
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut inner) = self.lock() {
            inner.faults = Faults::default();
        }
    }

    /// Every patch applied so far, in order.
    pub fn patches(&self) -> Vec<(ObjectRef, AnnotationPatch)> {
        self.lock().map(|i| i.patches.clone()).unwrap_or_default()
    }

    pub fn patch_count(&self) -> usize {
        self.lock().map(|i| i.patches.len()).unwrap_or_default()
    }

    pub fn get_count(&self) -> u32 {
        self.lock().map(|i| i.gets).unwrap_or_default()
    }
}

impl ObjectStore for MemoryStore {
    fn get(
        &self,
        kind: ObjectKind,
        namespace: &str,
        name: &str,
    ) -> Result<TektonObject, StoreError> {
        let mut inner = self.lock()?;
        inner.gets += 1;
        if let Some(message) = inner.faults.check(StoreOp::Get) {
            return Err(StoreError::Unavailable(message));
        }
        let target = ObjectRef::new(kind, namespace, name);
        inner
            .objects
            .get(&target)
            .cloned()
            .ok_or(StoreError::NotFound(target))
    }

    fn patch(&self, target: &ObjectRef, patch: &[u8]) -> Result<(), StoreError> {
        let patch = AnnotationPatch::from_slice(patch)?;
        let mut inner = self.lock()?;
        if let Some(message) = inner.faults.check(StoreOp::Patch) {
            return Err(StoreError::Unavailable(message));
        }
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

        let obj = inner
            .objects
            .get_mut(target)
            .ok_or_else(|| StoreError::NotFound(target.clone()))?;
        patch.apply(obj.metadata_mut());
        debug!(object = %target, keys = patch.metadata.annotations.len(), "patched annotations");
        inner.patches.push((target.clone(), patch));
        Ok(())
    }

    fn track(&self, dependency: &ObjectRef, dependent: &ObjectRef) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if let Some(message) = inner.faults.check(StoreOp::Track) {
            return Err(StoreError::Unavailable(message));
        }
        inner
            .tracked
            .entry(dependency.clone())
            .or_default()
            .insert(dependent.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<ObjectRef>, StoreError> {
        Ok(self.lock()?.objects.keys().cloned().collect())
    }

    fn dependents(&self, dependency: &ObjectRef) -> Vec<ObjectRef> {
        self.lock()
            .ok()
            .and_then(|i| i.tracked.get(dependency).map(|d| d.iter().cloned().collect()))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::GroupVersionKind;
    use crate::taskrun::TaskRun;
    use serde_json::json;

    fn task_run(name: &str) -> TaskRun {
        serde_json::from_value(json!({
            "apiVersion": "tekton.dev/v1",
            "kind": "TaskRun",
            "metadata": {
                "name": name,
                "namespace": "ci",
                "uid": format!("{name}-uid"),
                "annotations": {"team.example/owner": "build"}
            }
        }))
        .unwrap()
    }

    fn patch_bytes(name: &str, key: &str, value: &str) -> Vec<u8> {
        let gvk = GroupVersionKind::parse("tekton.dev/v1", "TaskRun").unwrap();
        let mut annotations = BTreeMap::new();
        annotations.insert(key.to_string(), value.to_string());
        AnnotationPatch::new(&gvk, name, "ci", annotations)
            .to_bytes()
            .unwrap()
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store.get(ObjectKind::TaskRun, "ci", "nope").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_patch_merges_and_records() {
        let store = MemoryStore::new();
        store.insert(task_run("build"));
        let target = ObjectRef::new(ObjectKind::TaskRun, "ci", "build");

        store
            .patch(&target, &patch_bytes("build", "chains.tekton.dev/signed", "true"))
            .unwrap();

        let obj = store.get_ref(&target).unwrap();
        assert_eq!(obj.annotation("chains.tekton.dev/signed"), Some("true"));
        assert_eq!(obj.annotation("team.example/owner"), Some("build"));
        assert_eq!(store.patch_count(), 1);
    }

    #[test]
    fn test_patch_identity_mismatch_rejected() {
        let store = MemoryStore::new();
        store.insert(task_run("build"));
        let target = ObjectRef::new(ObjectKind::TaskRun, "ci", "build");

        let err = store
            .patch(&target, &patch_bytes("other", "chains.tekton.dev/signed", "true"))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidPatch { .. }));
        assert_eq!(store.patch_count(), 0);
    }

    #[test]
    fn test_fault_with_fail_count() {
        let store = MemoryStore::new();
        store.insert(task_run("build"));
        store.inject_failure(StoreOp::Get, StoreFault::unavailable("boom").with_fail_count(1));

        assert!(matches!(
            store.get(ObjectKind::TaskRun, "ci", "build"),
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.get(ObjectKind::TaskRun, "ci", "build").is_ok());
        assert_eq!(store.get_count(), 2);
    }

    #[test]
    fn test_track_and_dependents() {
        let store = MemoryStore::new();
        let child = ObjectRef::new(ObjectKind::TaskRun, "ci", "child");
        let parent = ObjectRef::new(ObjectKind::PipelineRun, "ci", "parent");
        store.track(&child, &parent).unwrap();
        store.track(&child, &parent).unwrap();
        assert_eq!(store.dependents(&child), vec![parent]);
        assert!(store.dependents(&ObjectRef::new(ObjectKind::TaskRun, "ci", "x")).is_empty());
    }
}
