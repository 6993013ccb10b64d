//! Object signer
//!
//! Extract → format → sign → store → upload → mark, for one completed run.
//! Configuration gaps (unknown formatter, signer or backend; a payload the
//! format cannot express) skip the signable with a warning. Signing,
//! storage and upload failures are collected across every signable; any of
//! them leaves the object unsigned and advances its retry counter.

mod errors;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chains_artifacts::{extract, ExtractOptions, Signable, SignableType};
use chains_objects::TrackedObject;
use tracing::{debug, error, info, warn};

use crate::config::{ChainsConfig, TransparencyMode};
use crate::context::SignContext;
use crate::formats::dsse::Envelope;
use crate::formats::{canonical_bytes, PayloadFormatter};
use crate::ledger::{
    keyed_annotation, AnnotationLedger, TRANSPARENCY_ANNOTATION, TRANSPARENCY_UPLOAD_ANNOTATION,
};
use crate::registry::Registry;
use crate::signing::{Signer, SignerError};
use crate::storage::StoredSignature;

pub use errors::{SignError, SignErrors, SignableError};

/// Budget for recording a retry after the signing attempt itself failed.
const BOOKKEEPING_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct ObjectSigner {
    registry: Arc<Registry>,
    config: Arc<ChainsConfig>,
    ledger: AnnotationLedger,
}

impl ObjectSigner {
    pub fn new(registry: Arc<Registry>, config: Arc<ChainsConfig>, ledger: AnnotationLedger) -> Self {
        Self {
            registry,
            config,
            ledger,
        }
    }

    pub fn ledger(&self) -> &AnnotationLedger {
        &self.ledger
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Sign every enabled signable of `obj` and record the outcome.
    ///
    /// `obj` is not updated; callers re-fetch to observe the new annotations.
    pub fn sign(&self, ctx: &SignContext, obj: &dyn TrackedObject) -> Result<(), SignError> {
        let object_type = SignableType::for_object(obj.kind());
        let opts = ExtractOptions {
            deep_inspection: self
                .config
                .artifacts
                .for_type(object_type)
                .enable_deep_inspection,
        };
        let extraction = extract(obj, &opts);
        debug!(
            object = %obj.object_ref(),
            signables = extraction.signables.len(),
            skipped = extraction.skipped.len(),
            "extracted signables"
        );

        let upload = self.should_upload(obj);
        let mut extra = BTreeMap::new();
        let mut errors = SignErrors::default();

        for signable in &extraction.signables {
            self.sign_one(ctx, obj, signable, upload, &mut extra, &mut errors);
        }

        if !errors.is_empty() {
            warn!(object = %obj.object_ref(), errors = %errors, "signing failed");
            let bookkeeping = SignContext::detached(BOOKKEEPING_TIMEOUT);
            if let Err(e) = self.ledger.handle_retry(&bookkeeping, obj, extra) {
                error!(object = %obj.object_ref(), error = %e, "could not record retry");
            }
            return Err(SignError::Signables(errors));
        }

        self.ledger.mark_signed(ctx, obj, extra)?;
        info!(
            object = %obj.object_ref(),
            signables = extraction.signables.len(),
            "signed"
        );
        Ok(())
    }

    fn sign_one(
        &self,
        ctx: &SignContext,
        obj: &dyn TrackedObject,
        signable: &Signable,
        upload: bool,
        extra: &mut BTreeMap<String, String>,
        errors: &mut SignErrors,
    ) {
        let section = self.config.artifacts.for_type(signable.signable_type);
        let key = &signable.full_key;
        if !section.enabled() {
            debug!(key = %key, section = %signable.signable_type, "artifact type disabled");
            return;
        }

        let Some(formatter) = self.registry.formatter(&section.format) else {
            warn!(key = %key, format = %section.format, "unknown payload format; skipping");
            return;
        };
        let payload = match formatter.create_payload(obj, signable) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(key = %key, format = %section.format, error = %e, "payload not created; skipping");
                return;
            }
        };
        let Some(signer) = self.registry.signer(&section.signer) else {
            warn!(key = %key, signer = %section.signer, "no such signer; skipping");
            return;
        };
        let body = match canonical_bytes(&payload) {
            Ok(body) => body,
            Err(e) => {
                warn!(key = %key, error = %e, "payload not canonicalisable; skipping");
                return;
            }
        };

        let signature = match self.signature(ctx, formatter.as_ref(), signer.as_ref(), &body, key) {
            Ok(signature) => signature,
            Err(e) => {
                errors.push(e);
                return;
            }
        };

        let stored = StoredSignature {
            payload: body,
            signature,
            cert: signer.cert(),
            chain: signer.chain(),
            format: formatter.name().to_string(),
        };
        for backend_name in &section.storage {
            let Some(backend) = self.registry.backend(backend_name) else {
                warn!(key = %key, backend = %backend_name, "unknown storage backend; skipping");
                continue;
            };
            match backend.store_payload(ctx, obj, signable, &stored) {
                Ok(()) => debug!(key = %key, backend = %backend_name, "stored"),
                Err(e) => errors.push(SignableError::Store {
                    key: key.clone(),
                    backend: backend_name.clone(),
                    source: e,
                }),
            }
        }

        if !upload {
            return;
        }
        let Some(log) = self.registry.transparency_log() else {
            warn!(key = %key, "transparency requested but no log is configured");
            return;
        };
        match log.upload(ctx, &stored.signature, &stored.payload) {
            Ok(entry) => {
                extra.insert(TRANSPARENCY_ANNOTATION.to_string(), entry.url.clone());
                extra.insert(keyed_annotation("transparency", &signable.short_key), entry.url);
            }
            Err(e) => errors.push(SignableError::Transparency {
                key: key.clone(),
                source: e,
            }),
        }
    }

    fn signature(
        &self,
        ctx: &SignContext,
        formatter: &dyn PayloadFormatter,
        signer: &dyn Signer,
        body: &[u8],
        key: &str,
    ) -> Result<Vec<u8>, SignableError> {
        let sign_err = |source: SignerError| SignableError::Sign {
            key: key.to_string(),
            source,
        };
        if !formatter.wrap() {
            return signer.sign(ctx, body).map_err(sign_err);
        }
        let envelope = Envelope::sign(ctx, signer, formatter.payload_type(), body).map_err(sign_err)?;
        envelope.to_bytes().map_err(|source| SignableError::Envelope {
            key: key.to_string(),
            source,
        })
    }

    /// Transparency gate for this attempt.
    fn should_upload(&self, obj: &dyn TrackedObject) -> bool {
        if obj.annotation(TRANSPARENCY_ANNOTATION).is_some() {
            return false;
        }
        match self.config.transparency.enabled {
            TransparencyMode::Disabled => false,
            TransparencyMode::Enabled => true,
            TransparencyMode::Manual => {
                obj.annotation(TRANSPARENCY_UPLOAD_ANNOTATION) == Some("true")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::TektonFormatter;
    use crate::ledger::{RETRIES_ANNOTATION, SIGNED_ANNOTATION};
    use crate::mock::{FailurePlan, MockBackend, MockSigner, MockTransparencyLog};
    use crate::signing::{generate_keypair, X509Signer};
    use crate::storage::TektonBackend;
    use chains_objects::{MemoryStore, ObjectStore, TaskRun};
    use serde_json::json;

    fn task_run(annotations: serde_json::Value) -> TaskRun {
        serde_json::from_value(json!({
            "apiVersion": "tekton.dev/v1",
            "kind": "TaskRun",
            "metadata": {"name": "build", "namespace": "ci", "uid": "uid-1", "annotations": annotations},
            "status": {
                "conditions": [{"type": "Succeeded", "status": "True"}],
                "results": [
                    {"name": "IMAGE_URL", "value": "registry.example/app"},
                    {"name": "IMAGE_DIGEST", "value": format!("sha256:{}", "a".repeat(64))}
                ]
            }
        }))
        .unwrap()
    }

    fn tekton_config() -> ChainsConfig {
        let mut config = ChainsConfig::default();
        config.artifacts.taskrun.format = "tekton".to_string();
        config.artifacts.oci.storage.clear();
        config
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        ledger: AnnotationLedger,
        tr: TaskRun,
    }

    fn fixture(annotations: serde_json::Value) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let tr = task_run(annotations);
        store.insert(tr.clone());
        let ledger = AnnotationLedger::new(store.clone());
        Fixture { store, ledger, tr }
    }

    impl Fixture {
        fn latest(&self, key: &str) -> Option<String> {
            self.store
                .get_ref(&self.tr.object_ref())
                .unwrap()
                .annotation(key)
                .map(str::to_string)
        }
    }

    #[test]
    fn test_signs_and_marks_object() {
        let fx = fixture(json!({}));
        let registry = Registry::new()
            .with_formatter(Arc::new(TektonFormatter))
            .with_signer(Arc::new(X509Signer::new(generate_keypair())))
            .with_backend(Arc::new(TektonBackend::new(fx.ledger.clone())));
        let signer = ObjectSigner::new(Arc::new(registry), Arc::new(tekton_config()), fx.ledger.clone());

        signer.sign(&SignContext::background(), &fx.tr).unwrap();

        assert_eq!(fx.latest(SIGNED_ANNOTATION).as_deref(), Some("true"));
        assert!(fx.latest("chains.tekton.dev/payload-taskrun-uid-1").is_some());
        assert!(fx.latest("chains.tekton.dev/signature-taskrun-uid-1").is_some());
        assert!(fx.latest(RETRIES_ANNOTATION).is_none());
    }

    #[test]
    fn test_unknown_names_skip_without_error() {
        let fx = fixture(json!({}));
        let mut config = tekton_config();
        config.artifacts.taskrun.format = "no-such-format".to_string();
        let registry = Registry::new()
            .with_signer(Arc::new(X509Signer::new(generate_keypair())))
            .with_backend(Arc::new(TektonBackend::new(fx.ledger.clone())));
        let signer = ObjectSigner::new(Arc::new(registry), Arc::new(config), fx.ledger.clone());

        signer.sign(&SignContext::background(), &fx.tr).unwrap();
        assert_eq!(fx.latest(SIGNED_ANNOTATION).as_deref(), Some("true"));
        assert!(fx.latest("chains.tekton.dev/payload-taskrun-uid-1").is_none());
    }

    #[test]
    fn test_errors_accumulate_and_advance_retry() {
        let fx = fixture(json!({}));
        let broken = Arc::new(MockBackend::new("docdb").with_failure(FailurePlan::always("disk full")));
        let also_broken = Arc::new(MockSigner::new().with_failure(FailurePlan::always("hsm offline")));
        let mut config = tekton_config();
        config.artifacts.taskrun.storage = ["docdb".to_string()].into_iter().collect();

        let registry = Registry::new()
            .with_formatter(Arc::new(TektonFormatter))
            .with_signer(also_broken.clone())
            .with_backend(broken.clone());
        let signer = ObjectSigner::new(Arc::new(registry), Arc::new(config), fx.ledger.clone());

        let err = signer.sign(&SignContext::background(), &fx.tr).unwrap_err();
        assert_eq!(err.signable_errors().unwrap().len(), 1);
        assert_eq!(fx.latest(SIGNED_ANNOTATION), None);
        assert_eq!(fx.latest(RETRIES_ANNOTATION).as_deref(), Some("0"));
        assert_eq!(broken.stored().len(), 0);
    }

    #[test]
    fn test_store_failure_in_one_backend_still_stores_in_others() {
        let fx = fixture(json!({}));
        let good = Arc::new(MockBackend::new("tekton"));
        let bad = Arc::new(MockBackend::new("docdb").with_failure(FailurePlan::always("down")));
        let mut config = tekton_config();
        config.artifacts.taskrun.storage =
            ["tekton".to_string(), "docdb".to_string()].into_iter().collect();

        let registry = Registry::new()
            .with_formatter(Arc::new(TektonFormatter))
            .with_signer(Arc::new(MockSigner::new()))
            .with_backend(good.clone())
            .with_backend(bad.clone());
        let signer = ObjectSigner::new(Arc::new(registry), Arc::new(config), fx.ledger.clone());

        let err = signer.sign(&SignContext::background(), &fx.tr).unwrap_err();
        let errors = err.signable_errors().unwrap();
        assert!(matches!(&errors.0[0], SignableError::Store { backend, .. } if backend == "docdb"));
        assert_eq!(good.stored().len(), 1);
    }

    #[test]
    fn test_cancelled_attempt_still_records_retry() {
        let fx = fixture(json!({}));
        let registry = Registry::new()
            .with_formatter(Arc::new(TektonFormatter))
            .with_signer(Arc::new(X509Signer::new(generate_keypair())))
            .with_backend(Arc::new(MockBackend::new("tekton")));
        let signer = ObjectSigner::new(Arc::new(registry), Arc::new(tekton_config()), fx.ledger.clone());

        let ctx = SignContext::background();
        ctx.cancel();
        assert!(signer.sign(&ctx, &fx.tr).is_err());
        assert_eq!(fx.latest(RETRIES_ANNOTATION).as_deref(), Some("0"));
    }

    fn transparency_signer(fx: &Fixture, mode: TransparencyMode) -> (ObjectSigner, Arc<MockTransparencyLog>) {
        let log = Arc::new(MockTransparencyLog::new("https://rekor.example"));
        let mut config = tekton_config();
        config.transparency.enabled = mode;
        let registry = Registry::new()
            .with_formatter(Arc::new(TektonFormatter))
            .with_signer(Arc::new(MockSigner::new()))
            .with_backend(Arc::new(MockBackend::new("tekton")))
            .with_transparency_log(log.clone());
        (
            ObjectSigner::new(Arc::new(registry), Arc::new(config), fx.ledger.clone()),
            log,
        )
    }

    #[test]
    fn test_transparency_enabled_records_refs() {
        let fx = fixture(json!({}));
        let (signer, log) = transparency_signer(&fx, TransparencyMode::Enabled);

        signer.sign(&SignContext::background(), &fx.tr).unwrap();

        assert_eq!(log.uploads().len(), 1);
        let url = "https://rekor.example/api/v1/log/entries?logIndex=0";
        assert_eq!(fx.latest(TRANSPARENCY_ANNOTATION).as_deref(), Some(url));
        assert_eq!(
            fx.latest("chains.tekton.dev/transparency-taskrun-uid-1").as_deref(),
            Some(url)
        );
    }

    #[test]
    fn test_manual_transparency_needs_request() {
        let fx = fixture(json!({}));
        let (signer, log) = transparency_signer(&fx, TransparencyMode::Manual);
        signer.sign(&SignContext::background(), &fx.tr).unwrap();
        assert!(log.uploads().is_empty());

        let fx = fixture(json!({"chains.tekton.dev/transparency-upload": "true"}));
        let (signer, log) = transparency_signer(&fx, TransparencyMode::Manual);
        signer.sign(&SignContext::background(), &fx.tr).unwrap();
        assert_eq!(log.uploads().len(), 1);
    }

    #[test]
    fn test_existing_transparency_ref_is_not_uploaded_again() {
        let fx = fixture(json!({"chains.tekton.dev/transparency": "https://rekor.example/x"}));
        let (signer, log) = transparency_signer(&fx, TransparencyMode::Enabled);
        signer.sign(&SignContext::background(), &fx.tr).unwrap();
        assert!(log.uploads().is_empty());
    }

    #[test]
    fn test_wrapping_formatter_stores_envelope() {
        let fx = fixture(json!({}));
        let backend = Arc::new(MockBackend::new("tekton"));
        let key = X509Signer::new(generate_keypair());
        let public = key.public_key().unwrap();
        let registry = Registry::new()
            .with_formatter(Arc::new(crate::formats::InTotoFormatter::default()))
            .with_signer(Arc::new(key))
            .with_backend(backend.clone());
        let mut config = ChainsConfig::default();
        config.artifacts.oci.storage.clear();
        let signer = ObjectSigner::new(Arc::new(registry), Arc::new(config), fx.ledger.clone());

        signer.sign(&SignContext::background(), &fx.tr).unwrap();

        let stored = backend.stored();
        let (_, record) = &stored[0];
        let envelope = Envelope::from_slice(&record.signature).unwrap();
        assert_eq!(envelope.open(&public).unwrap(), record.payload);
        assert_eq!(record.format, "in-toto");
    }
}
