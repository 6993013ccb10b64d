//! Storage backends for signed payloads.

mod docdb;
mod tekton;

use std::collections::BTreeMap;
use std::io;

use chains_artifacts::Signable;
use chains_objects::{StoreError, TrackedObject};
use thiserror::Error;

use crate::context::{Cancelled, SignContext};
use crate::ledger::LedgerError;

pub use docdb::{DocDbBackend, SignatureDocument};
pub use tekton::TektonBackend;

pub const BACKEND_TEKTON: &str = "tekton";
pub const BACKEND_DOCDB: &str = "docdb";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),

    #[error("object store: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("unsupported document store url '{0}'")]
    UnsupportedUrl(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// Everything a backend persists for one signable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSignature {
    /// Canonical payload bytes.
    pub payload: Vec<u8>,
    /// Raw signature, or a serialized DSSE envelope for wrapping formats.
    pub signature: Vec<u8>,
    pub cert: Option<String>,
    pub chain: Option<String>,
    /// Name of the format that produced the payload.
    pub format: String,
}

pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    fn store_payload(
        &self,
        ctx: &SignContext,
        obj: &dyn TrackedObject,
        signable: &Signable,
        stored: &StoredSignature,
    ) -> Result<(), StorageError>;

    /// Payloads stored for `signable`, keyed by its full key.
    fn retrieve_payloads(
        &self,
        ctx: &SignContext,
        obj: &dyn TrackedObject,
        signable: &Signable,
    ) -> Result<BTreeMap<String, Vec<u8>>, StorageError>;

    /// Signatures stored for `signable`, keyed by its full key.
    fn retrieve_signatures(
        &self,
        ctx: &SignContext,
        obj: &dyn TrackedObject,
        signable: &Signable,
    ) -> Result<BTreeMap<String, Vec<Vec<u8>>>, StorageError>;
}
