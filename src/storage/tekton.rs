//! `tekton` backend: payloads and signatures as annotations on the run.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chains_artifacts::Signable;
use chains_objects::TrackedObject;
use tracing::debug;

use super::{Backend, StorageError, StoredSignature, BACKEND_TEKTON};
use crate::context::SignContext;
use crate::ledger::{keyed_annotation, AnnotationLedger};

pub struct TektonBackend {
    ledger: AnnotationLedger,
}

impl TektonBackend {
    pub fn new(ledger: AnnotationLedger) -> Self {
        Self { ledger }
    }

    fn latest_annotation(
        &self,
        ctx: &SignContext,
        obj: &dyn TrackedObject,
        field: &str,
        short_key: &str,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        ctx.check()?;
        let latest = self
            .ledger
            .store()
            .get(obj.kind(), obj.namespace(), obj.name())?;
        latest
            .annotation(&keyed_annotation(field, short_key))
            .map(|encoded| STANDARD.decode(encoded))
            .transpose()
            .map_err(StorageError::from)
    }
}

impl Backend for TektonBackend {
    fn name(&self) -> &'static str {
        BACKEND_TEKTON
    }

    fn store_payload(
        &self,
        ctx: &SignContext,
        obj: &dyn TrackedObject,
        signable: &Signable,
        stored: &StoredSignature,
    ) -> Result<(), StorageError> {
        let key = &signable.short_key;
        let mut annotations = BTreeMap::new();
        annotations.insert(keyed_annotation("payload", key), STANDARD.encode(&stored.payload));
        annotations.insert(
            keyed_annotation("signature", key),
            STANDARD.encode(&stored.signature),
        );
        if let Some(cert) = &stored.cert {
            annotations.insert(keyed_annotation("cert", key), STANDARD.encode(cert));
        }
        if let Some(chain) = &stored.chain {
            annotations.insert(keyed_annotation("chain", key), STANDARD.encode(chain));
        }

        self.ledger.add_annotations(ctx, obj, annotations)?;
        debug!(object = %obj.object_ref(), key = %key, "stored payload in annotations");
        Ok(())
    }

    fn retrieve_payloads(
        &self,
        ctx: &SignContext,
        obj: &dyn TrackedObject,
        signable: &Signable,
    ) -> Result<BTreeMap<String, Vec<u8>>, StorageError> {
        let mut out = BTreeMap::new();
        if let Some(payload) = self.latest_annotation(ctx, obj, "payload", &signable.short_key)? {
            out.insert(signable.full_key.clone(), payload);
        }
        Ok(out)
    }

    fn retrieve_signatures(
        &self,
        ctx: &SignContext,
        obj: &dyn TrackedObject,
        signable: &Signable,
    ) -> Result<BTreeMap<String, Vec<Vec<u8>>>, StorageError> {
        let mut out = BTreeMap::new();
        if let Some(sig) = self.latest_annotation(ctx, obj, "signature", &signable.short_key)? {
            out.insert(signable.full_key.clone(), vec![sig]);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chains_objects::{MemoryStore, ObjectStore, TaskRun};
    use serde_json::json;
    use std::sync::Arc;

    fn setup() -> (Arc<MemoryStore>, TektonBackend, TaskRun) {
        let store = Arc::new(MemoryStore::new());
        let tr: TaskRun = serde_json::from_value(json!({
            "apiVersion": "tekton.dev/v1",
            "kind": "TaskRun",
            "metadata": {"name": "build", "namespace": "ci", "uid": "uid-1"}
        }))
        .unwrap();
        store.insert(tr.clone());
        let backend = TektonBackend::new(AnnotationLedger::new(store.clone()));
        (store, backend, tr)
    }

    fn stored() -> StoredSignature {
        StoredSignature {
            payload: b"{\"a\":1}".to_vec(),
            signature: vec![1, 2, 3],
            cert: Some("-----BEGIN CERTIFICATE-----".to_string()),
            chain: None,
            format: "tekton".to_string(),
        }
    }

    #[test]
    fn test_store_writes_keyed_annotations() {
        let (store, backend, tr) = setup();
        let signable = Signable::object(tr.object_ref(), tr.object_key());
        let ctx = SignContext::background();

        backend.store_payload(&ctx, &tr, &signable, &stored()).unwrap();

        let latest = store.get_ref(&tr.object_ref()).unwrap();
        assert_eq!(
            latest.annotation("chains.tekton.dev/payload-taskrun-uid-1"),
            Some(STANDARD.encode(b"{\"a\":1}").as_str())
        );
        assert!(latest.annotation("chains.tekton.dev/cert-taskrun-uid-1").is_some());
        assert!(latest.annotation("chains.tekton.dev/chain-taskrun-uid-1").is_none());
    }

    #[test]
    fn test_retrieve_roundtrip() {
        let (_store, backend, tr) = setup();
        let signable = Signable::object(tr.object_ref(), tr.object_key());
        let ctx = SignContext::background();

        assert!(backend.retrieve_payloads(&ctx, &tr, &signable).unwrap().is_empty());

        backend.store_payload(&ctx, &tr, &signable, &stored()).unwrap();
        let payloads = backend.retrieve_payloads(&ctx, &tr, &signable).unwrap();
        let signatures = backend.retrieve_signatures(&ctx, &tr, &signable).unwrap();
        assert_eq!(payloads[&signable.full_key], b"{\"a\":1}".to_vec());
        assert_eq!(signatures[&signable.full_key], vec![vec![1, 2, 3]]);
    }
}
