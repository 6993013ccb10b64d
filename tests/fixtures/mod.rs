//! Shared builders for the scenario tests.
//!
//! Objects are built from JSON documents the way they arrive from the API
//! server; the signing stack is wired from mock doubles over a `MemoryStore`.

#![allow(dead_code)]

use std::sync::Arc;

use chains_controller::config::{ChainsConfig, TransparencyMode};
use chains_controller::formats::{SimpleSigningFormatter, TektonFormatter};
use chains_controller::ledger::AnnotationLedger;
use chains_controller::mock::{MockBackend, MockSigner, MockTransparencyLog};
use chains_controller::{Coordinator, ObjectSigner, Registry};
use chains_objects::{MemoryStore, ObjectRef, ObjectStore, TektonObject, TrackedObject};
use serde_json::{json, Value};

pub const LOG_URL: &str = "https://log.example";

/// 64 lowercase hex chars built from one repeated digit.
pub fn hex64(c: char) -> String {
    c.to_string().repeat(64)
}

/// A finished TaskRun in namespace `ci`.
pub fn task_run(name: &str, annotations: Value, results: Value) -> TektonObject {
    TektonObject::from_value(json!({
        "apiVersion": "tekton.dev/v1",
        "kind": "TaskRun",
        "metadata": {
            "name": name,
            "namespace": "ci",
            "uid": format!("uid-{name}"),
            "annotations": annotations
        },
        "status": {
            "conditions": [{"type": "Succeeded", "status": "True"}],
            "completionTime": "2026-01-01T00:00:00Z",
            "results": results
        }
    }))
    .unwrap()
}

pub fn running_task_run(name: &str) -> TektonObject {
    TektonObject::from_value(json!({
        "apiVersion": "tekton.dev/v1",
        "kind": "TaskRun",
        "metadata": {"name": name, "namespace": "ci", "uid": format!("uid-{name}")},
        "status": {"conditions": [{"type": "Succeeded", "status": "Unknown"}]}
    }))
    .unwrap()
}

/// A finished PipelineRun listing `children` as child references.
pub fn pipeline_run(name: &str, children: &[&str]) -> TektonObject {
    let refs: Vec<Value> = children
        .iter()
        .map(|c| json!({"apiVersion": "tekton.dev/v1", "kind": "TaskRun", "name": c, "pipelineTaskName": c}))
        .collect();
    TektonObject::from_value(json!({
        "apiVersion": "tekton.dev/v1",
        "kind": "PipelineRun",
        "metadata": {"name": name, "namespace": "ci", "uid": format!("uid-{name}")},
        "status": {
            "conditions": [{"type": "Succeeded", "status": "True"}],
            "completionTime": "2026-01-01T00:00:00Z",
            "childReferences": refs
        }
    }))
    .unwrap()
}

/// Records signed with the `tekton` format into `storage`; OCI disabled.
pub fn tekton_config(storage: &[&str]) -> ChainsConfig {
    let mut config = ChainsConfig::default();
    for section in [&mut config.artifacts.taskrun, &mut config.artifacts.pipelinerun] {
        section.format = "tekton".to_string();
        section.storage = storage.iter().map(|s| s.to_string()).collect();
    }
    config.artifacts.oci.storage.clear();
    config
}

pub fn with_transparency(mut config: ChainsConfig, mode: TransparencyMode) -> ChainsConfig {
    config.transparency.enabled = mode;
    config
}

/// Mock signing stack over an in-memory store.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub ledger: AnnotationLedger,
    pub signer: Arc<MockSigner>,
    pub backends: Vec<Arc<MockBackend>>,
    pub tlog: Arc<MockTransparencyLog>,
    pub object_signer: ObjectSigner,
}

impl Harness {
    pub fn new(config: ChainsConfig, backends: Vec<MockBackend>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let ledger = AnnotationLedger::new(store.clone());
        let signer = Arc::new(MockSigner::new());
        let tlog = Arc::new(MockTransparencyLog::new(LOG_URL));
        let backends: Vec<Arc<MockBackend>> = backends.into_iter().map(Arc::new).collect();

        let mut registry = Registry::new()
            .with_formatter(Arc::new(TektonFormatter))
            .with_formatter(Arc::new(SimpleSigningFormatter))
            .with_signer(signer.clone())
            .with_transparency_log(tlog.clone());
        for backend in &backends {
            registry = registry.with_backend(backend.clone());
        }
        let object_signer = ObjectSigner::new(Arc::new(registry), Arc::new(config), ledger.clone());

        Self {
            store,
            ledger,
            signer,
            backends,
            tlog,
            object_signer,
        }
    }

    pub fn coordinator(&self) -> Coordinator {
        Coordinator::new(self.object_signer.clone())
    }

    pub fn insert(&self, obj: TektonObject) -> ObjectRef {
        let target = obj.object_ref();
        self.store.insert(obj);
        target
    }

    pub fn latest(&self, target: &ObjectRef) -> TektonObject {
        self.store.get_ref(target).unwrap()
    }

    pub fn annotation(&self, target: &ObjectRef, key: &str) -> Option<String> {
        self.latest(target).annotation(key).map(str::to_string)
    }
}
