//! Reconciliation coordinator
//!
//! Decides, per observed object, whether to do nothing, wait, or sign.
//! TaskRuns are signed as soon as they finish. PipelineRuns wait until
//! every child TaskRun has finished and been reconciled, so the pipeline
//! provenance can embed the children; the wait is driven by store
//! dependency tracking rather than polling.

use std::fmt;

use chains_objects::{
    ChildTaskRuns, ObjectKind, ObjectRef, ObjectStore, PipelineRun, StoreError, TektonObject,
    TrackedObject,
};
use thiserror::Error;
use tracing::{debug, info};

use crate::context::SignContext;
use crate::ledger::AnnotationLedger;
use crate::signer::{ObjectSigner, SignError};

/// What a reconcile pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Still executing.
    Running,
    /// Already signed or permanently failed.
    AlreadyReconciled,
    /// A child TaskRun is not ready; the parent is tracked on it.
    Waiting { child: String },
    /// A child TaskRun no longer exists; the parent will never be signed.
    Abandoned { child: String },
    /// The object itself is gone.
    Gone,
    Signed,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Running => f.write_str("running"),
            Outcome::AlreadyReconciled => f.write_str("already reconciled"),
            Outcome::Waiting { child } => write!(f, "waiting on {child}"),
            Outcome::Abandoned { child } => write!(f, "abandoned ({child} not found)"),
            Outcome::Gone => f.write_str("gone"),
            Outcome::Signed => f.write_str("signed"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("fetching {target}: {source}")]
    Fetch {
        target: ObjectRef,
        #[source]
        source: StoreError,
    },

    #[error("tracking {dependency}: {source}")]
    Track {
        dependency: ObjectRef,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Sign(#[from] SignError),
}

#[derive(Clone)]
pub struct Coordinator {
    signer: ObjectSigner,
}

impl Coordinator {
    pub fn new(signer: ObjectSigner) -> Self {
        Self { signer }
    }

    pub fn signer(&self) -> &ObjectSigner {
        &self.signer
    }

    fn ledger(&self) -> &AnnotationLedger {
        self.signer.ledger()
    }

    fn store(&self) -> &dyn ObjectStore {
        self.ledger().store().as_ref()
    }

    /// Fetch `target` and reconcile it.
    pub fn reconcile_ref(
        &self,
        ctx: &SignContext,
        target: &ObjectRef,
    ) -> Result<Outcome, ReconcileError> {
        match self.store().get_ref(target) {
            Ok(obj) => self.reconcile(ctx, &obj),
            Err(e) if e.is_not_found() => {
                debug!(object = %target, "object deleted before reconcile");
                Ok(Outcome::Gone)
            }
            Err(source) => Err(ReconcileError::Fetch {
                target: target.clone(),
                source,
            }),
        }
    }

    pub fn reconcile(
        &self,
        ctx: &SignContext,
        obj: &TektonObject,
    ) -> Result<Outcome, ReconcileError> {
        if !obj.is_done() {
            return Ok(Outcome::Running);
        }
        if self.ledger().is_reconciled(ctx, obj) {
            debug!(object = %obj.object_ref(), "already reconciled");
            return Ok(Outcome::AlreadyReconciled);
        }

        match obj {
            TektonObject::TaskRun(tr) => {
                self.signer.sign(ctx, tr)?;
                Ok(Outcome::Signed)
            }
            TektonObject::PipelineRun(pr) => self.reconcile_pipeline_run(ctx, pr),
        }
    }

    fn reconcile_pipeline_run(
        &self,
        ctx: &SignContext,
        pr: &PipelineRun,
    ) -> Result<Outcome, ReconcileError> {
        let parent = pr.object_ref();
        let names = match pr.child_task_runs() {
            ChildTaskRuns::Listed(names) => names,
            ChildTaskRuns::Unfinalized(child) => {
                info!(object = %parent, child = %child, "embedded child status not finalized");
                self.track(&child, &parent)?;
                return Ok(Outcome::Waiting { child });
            }
        };

        let mut children = Vec::with_capacity(names.len());
        for name in names {
            let child = match self.store().get(ObjectKind::TaskRun, &parent.namespace, &name) {
                Ok(child) => child,
                Err(e) if e.is_not_found() => {
                    info!(object = %parent, child = %name, "child TaskRun not found; abandoning");
                    return Ok(Outcome::Abandoned { child: name });
                }
                Err(source) => {
                    return Err(ReconcileError::Fetch {
                        target: ObjectRef::new(ObjectKind::TaskRun, &parent.namespace, &name),
                        source,
                    })
                }
            };

            if !child.is_done() || !self.ledger().is_reconciled(ctx, &child) {
                debug!(object = %parent, child = %name, "child TaskRun not ready");
                self.track(&name, &parent)?;
                return Ok(Outcome::Waiting { child: name });
            }
            if let Some(tr) = child.into_task_run() {
                children.push(tr);
            }
        }

        let attached = pr.clone().with_task_runs(children);
        self.signer.sign(ctx, &attached)?;
        Ok(Outcome::Signed)
    }

    fn track(&self, child: &str, parent: &ObjectRef) -> Result<(), ReconcileError> {
        let dependency = ObjectRef::new(ObjectKind::TaskRun, &parent.namespace, child);
        self.store()
            .track(&dependency, parent)
            .map_err(|source| ReconcileError::Track { dependency, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainsConfig;
    use crate::formats::TektonFormatter;
    use crate::ledger::{RETRIES_ANNOTATION, SIGNED_ANNOTATION};
    use crate::mock::{FailurePlan, MockBackend, MockSigner};
    use crate::registry::Registry;
    use chains_objects::{MemoryStore, StoreFault, StoreOp};
    use serde_json::json;
    use std::sync::Arc;

    fn task_run(name: &str, done: bool, annotations: serde_json::Value) -> TektonObject {
        let status = if done {
            json!({"conditions": [{"type": "Succeeded", "status": "True"}],
                   "completionTime": "2024-05-01T10:00:00Z"})
        } else {
            json!({"conditions": [{"type": "Succeeded", "status": "Unknown"}]})
        };
        TektonObject::from_value(json!({
            "apiVersion": "tekton.dev/v1",
            "kind": "TaskRun",
            "metadata": {"name": name, "namespace": "ci", "uid": format!("uid-{name}"),
                         "annotations": annotations},
            "status": status
        }))
        .unwrap()
    }

    fn pipeline_run(children: &[&str]) -> TektonObject {
        let refs: Vec<_> = children
            .iter()
            .map(|c| json!({"kind": "TaskRun", "name": c, "pipelineTaskName": c}))
            .collect();
        TektonObject::from_value(json!({
            "apiVersion": "tekton.dev/v1",
            "kind": "PipelineRun",
            "metadata": {"name": "release", "namespace": "ci", "uid": "uid-release"},
            "status": {
                "conditions": [{"type": "Succeeded", "status": "True"}],
                "childReferences": refs
            }
        }))
        .unwrap()
    }

    fn coordinator(store: &Arc<MemoryStore>) -> (Coordinator, Arc<MockBackend>) {
        let ledger = AnnotationLedger::new(store.clone());
        let backend = Arc::new(MockBackend::new("tekton"));
        let registry = Registry::new()
            .with_formatter(Arc::new(TektonFormatter))
            .with_signer(Arc::new(MockSigner::new()))
            .with_backend(backend.clone());
        let mut config = ChainsConfig::default();
        config.artifacts.taskrun.format = "tekton".to_string();
        config.artifacts.pipelinerun.format = "tekton".to_string();
        config.artifacts.oci.storage.clear();
        let signer = ObjectSigner::new(Arc::new(registry), Arc::new(config), ledger);
        (Coordinator::new(signer), backend)
    }

    fn signed(store: &MemoryStore, target: &ObjectRef) -> Option<String> {
        store
            .get_ref(target)
            .unwrap()
            .annotation(SIGNED_ANNOTATION)
            .map(str::to_string)
    }

    #[test]
    fn test_running_and_reconciled_are_noops() {
        let store = Arc::new(MemoryStore::new());
        let (coordinator, backend) = coordinator(&store);
        let ctx = SignContext::background();

        let running = task_run("build", false, json!({}));
        assert_eq!(coordinator.reconcile(&ctx, &running).unwrap(), Outcome::Running);

        let done = task_run("build", true, json!({"chains.tekton.dev/signed": "failed"}));
        assert_eq!(
            coordinator.reconcile(&ctx, &done).unwrap(),
            Outcome::AlreadyReconciled
        );
        assert!(backend.stored().is_empty());
    }

    #[test]
    fn test_task_run_signed_once() {
        let store = Arc::new(MemoryStore::new());
        store.insert(task_run("build", true, json!({})));
        let (coordinator, backend) = coordinator(&store);
        let ctx = SignContext::background();
        let target = ObjectRef::new(ObjectKind::TaskRun, "ci", "build");

        assert_eq!(coordinator.reconcile_ref(&ctx, &target).unwrap(), Outcome::Signed);
        assert_eq!(
            coordinator.reconcile_ref(&ctx, &target).unwrap(),
            Outcome::AlreadyReconciled
        );
        assert_eq!(backend.stored().len(), 1);
        assert_eq!(signed(&store, &target).as_deref(), Some("true"));
    }

    #[test]
    fn test_parent_waits_for_unreconciled_child() {
        let store = Arc::new(MemoryStore::new());
        store.insert(task_run("release-build", true, json!({})));
        store.insert(pipeline_run(&["release-build"]));
        let (coordinator, _) = coordinator(&store);
        let ctx = SignContext::background();
        let parent = ObjectRef::new(ObjectKind::PipelineRun, "ci", "release");
        let child = ObjectRef::new(ObjectKind::TaskRun, "ci", "release-build");

        assert_eq!(
            coordinator.reconcile_ref(&ctx, &parent).unwrap(),
            Outcome::Waiting { child: "release-build".to_string() }
        );
        assert_eq!(store.dependents(&child), vec![parent.clone()]);
        assert_eq!(signed(&store, &parent), None);

        assert_eq!(coordinator.reconcile_ref(&ctx, &child).unwrap(), Outcome::Signed);
        assert_eq!(coordinator.reconcile_ref(&ctx, &parent).unwrap(), Outcome::Signed);
        assert_eq!(signed(&store, &parent).as_deref(), Some("true"));
    }

    fn embedded_pipeline_run(push_done: bool) -> TektonObject {
        let finished = json!({"completionTime": "2024-05-01T10:00:00Z"});
        let push = if push_done {
            finished.clone()
        } else {
            json!({"conditions": [{"type": "Succeeded", "status": "Unknown"}]})
        };
        TektonObject::from_value(json!({
            "apiVersion": "tekton.dev/v1",
            "kind": "PipelineRun",
            "metadata": {"name": "release", "namespace": "ci", "uid": "uid-release"},
            "status": {
                "conditions": [{"type": "Succeeded", "status": "True"}],
                "taskRuns": {
                    "release-build": {"pipelineTaskName": "build", "status": finished},
                    "release-push": {"pipelineTaskName": "push", "status": push}
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_parent_waits_for_unfinalized_embedded_child() {
        let store = Arc::new(MemoryStore::new());
        store.insert(task_run("release-build", true, json!({SIGNED_ANNOTATION: "true"})));
        store.insert(task_run("release-push", false, json!({})));
        store.insert(embedded_pipeline_run(false));
        let (coordinator, backend) = coordinator(&store);
        let ctx = SignContext::background();
        let parent = ObjectRef::new(ObjectKind::PipelineRun, "ci", "release");
        let push = ObjectRef::new(ObjectKind::TaskRun, "ci", "release-push");

        assert_eq!(
            coordinator.reconcile_ref(&ctx, &parent).unwrap(),
            Outcome::Waiting { child: "release-push".to_string() }
        );
        assert_eq!(store.dependents(&push), vec![parent.clone()]);
        assert!(backend.stored().is_empty());
        assert_eq!(signed(&store, &parent), None);

        store.insert(task_run("release-push", true, json!({})));
        store.insert(embedded_pipeline_run(true));
        assert_eq!(coordinator.reconcile_ref(&ctx, &push).unwrap(), Outcome::Signed);
        assert_eq!(coordinator.reconcile_ref(&ctx, &parent).unwrap(), Outcome::Signed);
        assert_eq!(signed(&store, &parent).as_deref(), Some("true"));
        assert!(backend
            .stored()
            .iter()
            .any(|(key, _)| key == "pipelinerun-uid-release"));
    }

    #[test]
    fn test_missing_child_abandons_parent() {
        let store = Arc::new(MemoryStore::new());
        store.insert(pipeline_run(&["release-build"]));
        let (coordinator, backend) = coordinator(&store);
        let parent = ObjectRef::new(ObjectKind::PipelineRun, "ci", "release");

        assert_eq!(
            coordinator
                .reconcile_ref(&SignContext::background(), &parent)
                .unwrap(),
            Outcome::Abandoned { child: "release-build".to_string() }
        );
        assert!(backend.stored().is_empty());
        assert_eq!(signed(&store, &parent), None);
    }

    #[test]
    fn test_child_fetch_error_propagates() {
        let store = Arc::new(MemoryStore::new());
        store.insert(task_run("release-build", true, json!({})));
        let parent_obj = pipeline_run(&["release-build"]);
        store.insert(parent_obj.clone());
        let (coordinator, _) = coordinator(&store);

        store.inject_failure(StoreOp::Get, StoreFault::unavailable("api down"));
        assert!(matches!(
            coordinator.reconcile(&SignContext::background(), &parent_obj),
            Err(ReconcileError::Fetch { .. })
        ));
    }

    #[test]
    fn test_sign_error_returned_as_is() {
        let store = Arc::new(MemoryStore::new());
        store.insert(task_run("build", true, json!({})));
        let ledger = AnnotationLedger::new(store.clone());
        let registry = Registry::new()
            .with_formatter(Arc::new(TektonFormatter))
            .with_signer(Arc::new(MockSigner::new()))
            .with_backend(Arc::new(
                MockBackend::new("tekton").with_failure(FailurePlan::always("down")),
            ));
        let mut config = ChainsConfig::default();
        config.artifacts.taskrun.format = "tekton".to_string();
        config.artifacts.oci.storage.clear();
        let coordinator = Coordinator::new(ObjectSigner::new(
            Arc::new(registry),
            Arc::new(config),
            ledger,
        ));
        let target = ObjectRef::new(ObjectKind::TaskRun, "ci", "build");

        let err = coordinator
            .reconcile_ref(&SignContext::background(), &target)
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Sign(SignError::Signables(_))));
        let latest = store.get_ref(&target).unwrap();
        assert_eq!(latest.annotation(RETRIES_ANNOTATION), Some("0"));
    }

    #[test]
    fn test_deleted_object_is_gone() {
        let store = Arc::new(MemoryStore::new());
        let (coordinator, _) = coordinator(&store);
        let target = ObjectRef::new(ObjectKind::TaskRun, "ci", "nope");
        assert_eq!(
            coordinator
                .reconcile_ref(&SignContext::background(), &target)
                .unwrap(),
            Outcome::Gone
        );
    }
}
