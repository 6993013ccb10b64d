//! Signature verification
//!
//! Re-extracts an object's signables and checks what every configured
//! backend holds for them against the configured signer's public key.
//! Wrapping formats store a DSSE envelope; its body must equal the stored
//! payload.

use std::fmt;
use std::sync::Arc;

use chains_artifacts::{extract, ExtractOptions, Signable, SignableType};
use chains_objects::TrackedObject;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ChainsConfig;
use crate::context::SignContext;
use crate::formats::dsse::Envelope;
use crate::registry::Registry;
use crate::signing::{PublicKey, SignerError};
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("{key}: no signer named '{signer}'")]
    UnknownSigner { key: String, signer: String },

    #[error("{key}: public key unavailable: {source}")]
    PublicKey {
        key: String,
        #[source]
        source: SignerError,
    },

    #[error("{key}: no payload format named '{format}'")]
    UnknownFormat { key: String, format: String },

    #[error("{key}: nothing stored in {backend}")]
    Missing { key: String, backend: String },

    #[error("{key} in {backend}: {source}")]
    Retrieve {
        key: String,
        backend: String,
        #[source]
        source: StorageError,
    },

    #[error("{key} in {backend}: {source}")]
    BadSignature {
        key: String,
        backend: String,
        #[source]
        source: SignerError,
    },

    #[error("{key} in {backend}: envelope body does not match stored payload")]
    PayloadMismatch { key: String, backend: String },
}

/// One verified (signable, backend) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verified {
    pub key: String,
    pub signable_type: SignableType,
    pub backend: String,
}

#[derive(Debug, Default)]
pub struct VerifyReport {
    pub verified: Vec<Verified>,
    pub errors: Vec<VerifyError>,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for VerifyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} verified, {} failed",
            self.verified.len(),
            self.errors.len()
        )
    }
}

pub struct Verifier {
    registry: Arc<Registry>,
    config: Arc<ChainsConfig>,
}

impl Verifier {
    pub fn new(registry: Arc<Registry>, config: Arc<ChainsConfig>) -> Self {
        Self { registry, config }
    }

    /// Verify every enabled signable of `obj` in every configured backend.
    pub fn verify(&self, ctx: &SignContext, obj: &dyn TrackedObject) -> VerifyReport {
        let object_type = SignableType::for_object(obj.kind());
        let opts = ExtractOptions {
            deep_inspection: self
                .config
                .artifacts
                .for_type(object_type)
                .enable_deep_inspection,
        };

        let mut report = VerifyReport::default();
        for signable in extract(obj, &opts).signables {
            self.verify_one(ctx, obj, &signable, &mut report);
        }
        debug!(object = %obj.object_ref(), "{report}");
        report
    }

    fn verify_one(
        &self,
        ctx: &SignContext,
        obj: &dyn TrackedObject,
        signable: &Signable,
        report: &mut VerifyReport,
    ) {
        let section = self.config.artifacts.for_type(signable.signable_type);
        if !section.enabled() {
            return;
        }
        let key = signable.full_key.clone();

        let Some(formatter) = self.registry.formatter(&section.format) else {
            report.errors.push(VerifyError::UnknownFormat {
                key,
                format: section.format.clone(),
            });
            return;
        };
        let public_key = match self.registry.signer(&section.signer).map(|s| s.public_key()) {
            Some(Ok(public_key)) => public_key,
            Some(Err(source)) => {
                report.errors.push(VerifyError::PublicKey { key, source });
                return;
            }
            None => {
                report.errors.push(VerifyError::UnknownSigner {
                    key,
                    signer: section.signer.clone(),
                });
                return;
            }
        };

        for backend_name in &section.storage {
            let Some(backend) = self.registry.backend(backend_name) else {
                warn!(key = %key, backend = %backend_name, "unknown storage backend; not verified");
                continue;
            };
            let retrieved = backend
                .retrieve_payloads(ctx, obj, signable)
                .and_then(|p| Ok((p, backend.retrieve_signatures(ctx, obj, signable)?)));
            let (payloads, signatures) = match retrieved {
                Ok(found) => found,
                Err(source) => {
                    report.errors.push(VerifyError::Retrieve {
                        key: key.clone(),
                        backend: backend_name.clone(),
                        source,
                    });
                    continue;
                }
            };
            let (Some(payload), Some(signatures)) = (payloads.get(&key), signatures.get(&key))
            else {
                report.errors.push(VerifyError::Missing {
                    key: key.clone(),
                    backend: backend_name.clone(),
                });
                continue;
            };

            let outcome = signatures.iter().try_fold((), |_, signature| {
                check(&public_key, formatter.wrap(), payload, signature, &key, backend_name)
            });
            match outcome {
                Ok(()) if !signatures.is_empty() => report.verified.push(Verified {
                    key: key.clone(),
                    signable_type: signable.signable_type,
                    backend: backend_name.clone(),
                }),
                Ok(()) => report.errors.push(VerifyError::Missing {
                    key: key.clone(),
                    backend: backend_name.clone(),
                }),
                Err(e) => report.errors.push(e),
            }
        }
    }
}

fn check(
    public_key: &PublicKey,
    wrapped: bool,
    payload: &[u8],
    signature: &[u8],
    key: &str,
    backend: &str,
) -> Result<(), VerifyError> {
    let bad = |source: SignerError| VerifyError::BadSignature {
        key: key.to_string(),
        backend: backend.to_string(),
        source,
    };
    if !wrapped {
        return public_key.verify(payload, signature).map_err(bad);
    }
    let envelope = Envelope::from_slice(signature)
        .map_err(|e| bad(SignerError::InvalidSignature(e.to_string())))?;
    let body = envelope.open(public_key).map_err(bad)?;
    if body != payload {
        return Err(VerifyError::PayloadMismatch {
            key: key.to_string(),
            backend: backend.to_string(),
        });
    }
    Ok(())
}
