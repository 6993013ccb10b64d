//! Object store interface.
//!
//! Stands in for the Kubernetes API server plus informer machinery: the
//! store is authoritative, `get` always returns its latest state, and
//! `track` records that a dependent must be re-queued when a dependency
//! changes.

use crate::error::StoreError;
use crate::meta::{ObjectKind, ObjectRef};
use crate::tracked::TektonObject;

pub trait ObjectStore: Send + Sync {
    /// Fetch the latest state of an object. Missing objects yield
    /// `StoreError::NotFound`.
    fn get(&self, kind: ObjectKind, namespace: &str, name: &str)
        -> Result<TektonObject, StoreError>;

    /// Apply an `AnnotationPatch` document to the target object.
    fn patch(&self, target: &ObjectRef, patch: &[u8]) -> Result<(), StoreError>;

    /// Re-queue `dependent` whenever `dependency` changes.
    fn track(&self, dependency: &ObjectRef, dependent: &ObjectRef) -> Result<(), StoreError>;

    /// Every object currently in the store.
    fn list(&self) -> Result<Vec<ObjectRef>, StoreError>;

    /// Objects registered as dependents of `dependency`.
    fn dependents(&self, dependency: &ObjectRef) -> Vec<ObjectRef>;

    /// Fetch by reference.
    fn get_ref(&self, target: &ObjectRef) -> Result<TektonObject, StoreError> {
        self.get(target.kind, &target.namespace, &target.name)
    }
}
