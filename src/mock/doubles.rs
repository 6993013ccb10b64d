//! Recording doubles for the registry's collaborator traits.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};
use std::thread;

use chains_artifacts::{Signable, SignableType};
use chains_objects::TrackedObject;
use ed25519_dalek::{Signer as _, SigningKey};
use serde_json::{json, Value};

use super::failure::{FailureInjector, FailurePlan};
use crate::context::SignContext;
use crate::formats::{FormatError, PayloadFormatter};
use crate::signing::{generate_keypair, PublicKey, Signer, SignerError, SignerKind};
use crate::storage::{Backend, StorageError, StoredSignature};
use crate::transparency::{LogEntryRef, TransparencyError, TransparencyLog};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Run the injector for one call: sleep if asked, honour the context, then
/// return the failure message if this call should fail.
fn misbehave(injector: &Mutex<FailureInjector>, ctx: &SignContext) -> Option<String> {
    let plan = lock(injector).check()?;
    if let Some(delay) = plan.delay {
        thread::sleep(delay);
    }
    if let Err(cancelled) = ctx.check() {
        return Some(cancelled.to_string());
    }
    plan.message
}

/// Formatter producing `{"object": .., "key": ..}`.
pub struct MockFormatter {
    name: &'static str,
    wrap: bool,
    unsupported: BTreeSet<SignableType>,
    calls: Mutex<Vec<String>>,
}

impl MockFormatter {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            wrap: false,
            unsupported: BTreeSet::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn wrapping(mut self) -> Self {
        self.wrap = true;
        self
    }

    /// Refuse signables of `signable_type`.
    pub fn rejecting(mut self, signable_type: SignableType) -> Self {
        self.unsupported.insert(signable_type);
        self
    }

    /// Full keys of every signable formatted so far.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

impl PayloadFormatter for MockFormatter {
    fn name(&self) -> &'static str {
        self.name
    }

    fn create_payload(
        &self,
        obj: &dyn TrackedObject,
        signable: &Signable,
    ) -> Result<Value, FormatError> {
        lock(&self.calls).push(signable.full_key.clone());
        if self.unsupported.contains(&signable.signable_type) {
            return Err(FormatError::Unsupported {
                format: self.name,
                signable_type: signable.signable_type,
            });
        }
        Ok(json!({
            "object": obj.object_ref().to_string(),
            "key": signable.full_key,
        }))
    }

    fn wrap(&self) -> bool {
        self.wrap
    }
}

/// Ed25519 signer that records what it signed.
pub struct MockSigner {
    key: SigningKey,
    failures: Mutex<FailureInjector>,
    signed: Mutex<Vec<Vec<u8>>>,
}

impl Default for MockSigner {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSigner {
    pub fn new() -> Self {
        Self {
            key: generate_keypair(),
            failures: Mutex::new(FailureInjector::new()),
            signed: Mutex::new(Vec::new()),
        }
    }

    pub fn with_failure(self, plan: FailurePlan) -> Self {
        lock(&self.failures).inject(plan);
        self
    }

    pub fn signed(&self) -> Vec<Vec<u8>> {
        lock(&self.signed).clone()
    }
}

impl Signer for MockSigner {
    fn kind(&self) -> SignerKind {
        SignerKind::X509
    }

    fn sign(&self, ctx: &SignContext, payload: &[u8]) -> Result<Vec<u8>, SignerError> {
        ctx.check()?;
        if let Some(message) = misbehave(&self.failures, ctx) {
            return Err(SignerError::Unavailable(message));
        }
        lock(&self.signed).push(payload.to_vec());
        Ok(self.key.sign(payload).to_bytes().to_vec())
    }

    fn public_key(&self) -> Result<PublicKey, SignerError> {
        Ok(PublicKey::ed25519(self.key.verifying_key()))
    }
}

/// Backend keeping everything in a list, in store order.
pub struct MockBackend {
    name: &'static str,
    failures: Mutex<FailureInjector>,
    stored: Mutex<Vec<(String, StoredSignature)>>,
}

impl MockBackend {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            failures: Mutex::new(FailureInjector::new()),
            stored: Mutex::new(Vec::new()),
        }
    }

    pub fn with_failure(self, plan: FailurePlan) -> Self {
        lock(&self.failures).inject(plan);
        self
    }

    pub fn clear_failures(&self) {
        lock(&self.failures).clear();
    }

    /// `(full key, record)` for every successful store.
    pub fn stored(&self) -> Vec<(String, StoredSignature)> {
        lock(&self.stored).clone()
    }

    fn latest(&self, full_key: &str) -> Option<StoredSignature> {
        lock(&self.stored)
            .iter()
            .rev()
            .find(|(k, _)| k == full_key)
            .map(|(_, s)| s.clone())
    }
}

impl Backend for MockBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    fn store_payload(
        &self,
        ctx: &SignContext,
        _obj: &dyn TrackedObject,
        signable: &Signable,
        stored: &StoredSignature,
    ) -> Result<(), StorageError> {
        ctx.check()?;
        if let Some(message) = misbehave(&self.failures, ctx) {
            return Err(StorageError::Unavailable(message));
        }
        lock(&self.stored).push((signable.full_key.clone(), stored.clone()));
        Ok(())
    }

    fn retrieve_payloads(
        &self,
        ctx: &SignContext,
        _obj: &dyn TrackedObject,
        signable: &Signable,
    ) -> Result<BTreeMap<String, Vec<u8>>, StorageError> {
        ctx.check()?;
        Ok(self
            .latest(&signable.full_key)
            .map(|s| (signable.full_key.clone(), s.payload))
            .into_iter()
            .collect())
    }

    fn retrieve_signatures(
        &self,
        ctx: &SignContext,
        _obj: &dyn TrackedObject,
        signable: &Signable,
    ) -> Result<BTreeMap<String, Vec<Vec<u8>>>, StorageError> {
        ctx.check()?;
        Ok(self
            .latest(&signable.full_key)
            .map(|s| (signable.full_key.clone(), vec![s.signature]))
            .into_iter()
            .collect())
    }
}

/// Transparency log that numbers uploads from zero.
pub struct MockTransparencyLog {
    base_url: String,
    failures: Mutex<FailureInjector>,
    uploads: Mutex<Vec<(Vec<u8>, Vec<u8>)>>,
}

impl MockTransparencyLog {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            failures: Mutex::new(FailureInjector::new()),
            uploads: Mutex::new(Vec::new()),
        }
    }

    pub fn with_failure(self, plan: FailurePlan) -> Self {
        lock(&self.failures).inject(plan);
        self
    }

    /// `(signature, payload)` per upload.
    pub fn uploads(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        lock(&self.uploads).clone()
    }
}

impl TransparencyLog for MockTransparencyLog {
    fn upload(
        &self,
        ctx: &SignContext,
        signature: &[u8],
        payload: &[u8],
    ) -> Result<LogEntryRef, TransparencyError> {
        ctx.check()?;
        if let Some(message) = misbehave(&self.failures, ctx) {
            return Err(TransparencyError::Unavailable(message));
        }
        let mut uploads = lock(&self.uploads);
        let index = uploads.len() as u64;
        uploads.push((signature.to_vec(), payload.to_vec()));
        Ok(LogEntryRef::new(&self.base_url, index, format!("mock-{index}")))
    }
}
