//! Annotation ledger
//!
//! The only durable record of signing progress is a handful of annotations
//! under `chains.tekton.dev/` on the run object itself. Every write is a
//! read-modify-write against the store's latest copy of the object, and
//! only keys under the prefix are ever named in a patch, so annotations
//! owned by other controllers are never touched.

mod state;

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use chains_objects::{AnnotationPatch, ObjectError, ObjectStore, StoreError, TrackedObject};
use regex_lite::Regex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::context::{Cancelled, SignContext};

pub use state::{RetryCount, SigningState, SIGNED_FAILED, SIGNED_TRUE};

/// Prefix of every annotation this controller owns.
pub const ANNOTATION_PREFIX: &str = "chains.tekton.dev/";

pub const SIGNED_ANNOTATION: &str = "chains.tekton.dev/signed";
pub const RETRIES_ANNOTATION: &str = "chains.tekton.dev/retries";
pub const TRANSPARENCY_ANNOTATION: &str = "chains.tekton.dev/transparency";

/// Set to `"true"` by users to request an upload in manual transparency mode.
pub const TRANSPARENCY_UPLOAD_ANNOTATION: &str = "chains.tekton.dev/transparency-upload";

/// Failed attempts allowed before an object is marked failed.
pub const MAX_RETRIES: u32 = 3;

/// Per-signable annotation key, e.g. `chains.tekton.dev/payload-<key>`.
pub fn keyed_annotation(field: &str, short_key: &str) -> String {
    format!("{ANNOTATION_PREFIX}{field}-{short_key}")
}

fn name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?$").expect("static regex")
    })
}

/// Whether `key` is a well-formed annotation under our prefix.
pub fn is_owned_key(key: &str) -> bool {
    key.strip_prefix(ANNOTATION_PREFIX)
        .is_some_and(|name| name_re().is_match(name))
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("annotation key '{0}' is not a valid {ANNOTATION_PREFIX} key")]
    InvalidAnnotationKey(String),

    #[error(transparent)]
    Object(#[from] ObjectError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl LedgerError {
    /// Structurally wrong input; retrying cannot help.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            LedgerError::InvalidAnnotationKey(_) | LedgerError::Object(_)
        )
    }
}

#[derive(Clone)]
pub struct AnnotationLedger {
    store: Arc<dyn ObjectStore>,
}

impl AnnotationLedger {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Whether the object is signed or permanently failed.
    ///
    /// Checks the given snapshot first, then the store's latest copy in case
    /// another worker finished after the snapshot was taken. A fetch error
    /// reads as "not reconciled"; marking is idempotent so re-signing is safe.
    pub fn is_reconciled(&self, ctx: &SignContext, obj: &dyn TrackedObject) -> bool {
        if SigningState::of(obj).is_terminal() {
            return true;
        }
        if ctx.check().is_err() {
            return false;
        }
        match self.store.get(obj.kind(), obj.namespace(), obj.name()) {
            Ok(latest) => SigningState::of(latest.as_tracked()).is_terminal(),
            Err(e) => {
                debug!(
                    namespace = %obj.namespace(),
                    name = %obj.name(),
                    error = %e,
                    "could not fetch latest copy; treating as not reconciled"
                );
                false
            }
        }
    }

    /// Set `signed="true"` plus `extra`. Already-signed objects only get
    /// `extra` merged.
    pub fn mark_signed(
        &self,
        ctx: &SignContext,
        obj: &dyn TrackedObject,
        extra: BTreeMap<String, String>,
    ) -> Result<(), LedgerError> {
        if SigningState::of(obj) == SigningState::Signed {
            if extra.is_empty() {
                return Ok(());
            }
            return self.add_annotations(ctx, obj, extra);
        }
        let mut annotations = extra;
        annotations.insert(SIGNED_ANNOTATION.to_string(), SIGNED_TRUE.to_string());
        self.add_annotations(ctx, obj, annotations)?;
        info!(object = %obj.object_ref(), "marked signed");
        Ok(())
    }

    pub fn mark_failed(
        &self,
        ctx: &SignContext,
        obj: &dyn TrackedObject,
        extra: BTreeMap<String, String>,
    ) -> Result<(), LedgerError> {
        let mut annotations = extra;
        annotations.insert(SIGNED_ANNOTATION.to_string(), SIGNED_FAILED.to_string());
        self.add_annotations(ctx, obj, annotations)?;
        warn!(object = %obj.object_ref(), "marked failed");
        Ok(())
    }

    pub fn retry_available(&self, obj: &dyn TrackedObject) -> bool {
        RetryCount::of(obj).available()
    }

    /// Record one more failed attempt against the latest copy of the
    /// object, or mark it failed once retries are exhausted.
    pub fn handle_retry(
        &self,
        ctx: &SignContext,
        obj: &dyn TrackedObject,
        extra: BTreeMap<String, String>,
    ) -> Result<(), LedgerError> {
        ctx.check()?;
        let latest = self.store.get(obj.kind(), obj.namespace(), obj.name())?;
        let latest = latest.as_tracked();

        match RetryCount::of(latest).next() {
            Some(next) => {
                debug!(object = %obj.object_ref(), retries = %next, "recording retry");
                let mut annotations = extra;
                annotations.insert(RETRIES_ANNOTATION.to_string(), next);
                self.add_annotations(ctx, latest, annotations)
            }
            None => self.mark_failed(ctx, latest, extra),
        }
    }

    /// Merge `new` into the object's owned annotations and apply the result.
    ///
    /// Every key in `new` must be under the prefix; the check happens before
    /// any store call. The patch names the object's currently stored owned
    /// annotations plus `new`, and nothing else.
    pub fn add_annotations(
        &self,
        ctx: &SignContext,
        obj: &dyn TrackedObject,
        new: BTreeMap<String, String>,
    ) -> Result<(), LedgerError> {
        if let Some(bad) = new.keys().find(|k| !is_owned_key(k)) {
            return Err(LedgerError::InvalidAnnotationKey(bad.clone()));
        }
        let gvk = obj.gvk()?;
        ctx.check()?;

        let latest = self.store.get(obj.kind(), obj.namespace(), obj.name())?;
        let mut merged: BTreeMap<String, String> = latest
            .annotations()
            .iter()
            .filter(|(k, _)| k.starts_with(ANNOTATION_PREFIX))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        merged.extend(new);

        let patch = AnnotationPatch::new(&gvk, obj.name(), obj.namespace(), merged);
        let bytes = patch.to_bytes()?;

        ctx.check()?;
        self.store.patch(&obj.object_ref(), &bytes)?;
        Ok(())
    }
}
