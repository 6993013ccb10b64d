//! `docdb` backend: one JSON document per stored signature.
//!
//! `mem://<collection>` keeps documents in process; `file:///<dir>` writes
//! each document to `<dir>/<sha256(key)>.json`. Documents are keyed by
//! `<object uid>/<full key>`.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chains_artifacts::{Signable, SignableType};
use chains_objects::{ObjectRef, TrackedObject};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{Backend, StorageError, StoredSignature, BACKEND_DOCDB};
use crate::context::SignContext;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureDocument {
    pub key: String,
    pub object: ObjectRef,
    pub signable_type: SignableType,
    pub format: String,
    /// Base64
    pub payload: String,
    /// Base64
    pub signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,
    pub stored_at: DateTime<Utc>,
}

enum Collection {
    Memory {
        name: String,
        docs: Mutex<BTreeMap<String, SignatureDocument>>,
    },
    Files(PathBuf),
}

pub struct DocDbBackend {
    collection: Collection,
}

impl DocDbBackend {
    pub fn open(url: &str) -> Result<Self, StorageError> {
        let collection = if let Some(name) = url.strip_prefix("mem://") {
            Collection::Memory {
                name: name.to_string(),
                docs: Mutex::new(BTreeMap::new()),
            }
        } else if let Some(path) = url.strip_prefix("file://") {
            if path.is_empty() {
                return Err(StorageError::UnsupportedUrl(url.to_string()));
            }
            let dir = PathBuf::from(path);
            fs::create_dir_all(&dir)?;
            Collection::Files(dir)
        } else {
            return Err(StorageError::UnsupportedUrl(url.to_string()));
        };
        Ok(Self { collection })
    }

    fn document_key(obj: &dyn TrackedObject, signable: &Signable) -> String {
        format!("{}/{}", obj.uid(), signable.full_key)
    }

    fn file_for(dir: &std::path::Path, key: &str) -> PathBuf {
        dir.join(format!("{}.json", hex::encode(Sha256::digest(key.as_bytes()))))
    }

    fn put(&self, doc: SignatureDocument) -> Result<(), StorageError> {
        match &self.collection {
            Collection::Memory { docs, .. } => {
                docs.lock()
                    .map_err(|_| StorageError::Unavailable("collection lock poisoned".to_string()))?
                    .insert(doc.key.clone(), doc);
            }
            Collection::Files(dir) => {
                let path = Self::file_for(dir, &doc.key);
                let tmp = path.with_extension("json.tmp");
                fs::write(&tmp, serde_json::to_vec_pretty(&doc)?)?;
                fs::rename(&tmp, &path)?;
            }
        }
        Ok(())
    }

    /// Fetch one document by key.
    pub fn get(&self, key: &str) -> Result<Option<SignatureDocument>, StorageError> {
        match &self.collection {
            Collection::Memory { docs, .. } => Ok(docs
                .lock()
                .map_err(|_| StorageError::Unavailable("collection lock poisoned".to_string()))?
                .get(key)
                .cloned()),
            Collection::Files(dir) => {
                let path = Self::file_for(dir, key);
                match fs::read(&path) {
                    Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                    Err(e) => Err(e.into()),
                }
            }
        }
    }

    fn describe(&self) -> String {
        match &self.collection {
            Collection::Memory { name, .. } => format!("mem://{name}"),
            Collection::Files(dir) => format!("file://{}", dir.display()),
        }
    }
}

impl Backend for DocDbBackend {
    fn name(&self) -> &'static str {
        BACKEND_DOCDB
    }

    fn store_payload(
        &self,
        ctx: &SignContext,
        obj: &dyn TrackedObject,
        signable: &Signable,
        stored: &StoredSignature,
    ) -> Result<(), StorageError> {
        ctx.check()?;
        let key = Self::document_key(obj, signable);
        self.put(SignatureDocument {
            key: key.clone(),
            object: obj.object_ref(),
            signable_type: signable.signable_type,
            format: stored.format.clone(),
            payload: STANDARD.encode(&stored.payload),
            signature: STANDARD.encode(&stored.signature),
            cert: stored.cert.clone(),
            chain: stored.chain.clone(),
            stored_at: Utc::now(),
        })?;
        debug!(collection = %self.describe(), key = %key, "stored signature document");
        Ok(())
    }

    fn retrieve_payloads(
        &self,
        ctx: &SignContext,
        obj: &dyn TrackedObject,
        signable: &Signable,
    ) -> Result<BTreeMap<String, Vec<u8>>, StorageError> {
        ctx.check()?;
        let mut out = BTreeMap::new();
        if let Some(doc) = self.get(&Self::document_key(obj, signable))? {
            out.insert(signable.full_key.clone(), STANDARD.decode(&doc.payload)?);
        }
        Ok(out)
    }

    fn retrieve_signatures(
        &self,
        ctx: &SignContext,
        obj: &dyn TrackedObject,
        signable: &Signable,
    ) -> Result<BTreeMap<String, Vec<Vec<u8>>>, StorageError> {
        ctx.check()?;
        let mut out = BTreeMap::new();
        if let Some(doc) = self.get(&Self::document_key(obj, signable))? {
            out.insert(signable.full_key.clone(), vec![STANDARD.decode(&doc.signature)?]);
        }
        Ok(out)
    }
}
