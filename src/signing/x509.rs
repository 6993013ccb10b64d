//! `x509` signer backed by a local Ed25519 key.

use std::fs;
use std::path::Path;

use ed25519_dalek::{Signer as _, SigningKey};
use tracing::debug;

use super::{
    decode_signing_key, encode_signing_key, generate_keypair, PublicKey, Signer, SignerError,
    SignerKind,
};
use crate::context::SignContext;

pub struct X509Signer {
    key: SigningKey,
}

impl X509Signer {
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }

    /// Load a base64 seed from `path`.
    pub fn from_file(path: &Path) -> Result<Self, SignerError> {
        let encoded = fs::read_to_string(path)?;
        let key = decode_signing_key(&encoded)?;
        debug!(path = %path.display(), "loaded x509 signing key");
        Ok(Self { key })
    }

    /// Generate a fresh key and write its base64 seed to `path`.
    pub fn generate_to_file(path: &Path) -> Result<Self, SignerError> {
        let key = generate_keypair();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, encode_signing_key(&key))?;
        Ok(Self { key })
    }
}

impl Signer for X509Signer {
    fn kind(&self) -> SignerKind {
        SignerKind::X509
    }

    fn sign(&self, ctx: &SignContext, payload: &[u8]) -> Result<Vec<u8>, SignerError> {
        ctx.check()?;
        Ok(self.key.sign(payload).to_bytes().to_vec())
    }

    fn public_key(&self) -> Result<PublicKey, SignerError> {
        Ok(PublicKey::ed25519(self.key.verifying_key()))
    }
}
