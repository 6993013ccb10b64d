//! Signers
//!
//! A signer turns canonical payload bytes into a signature and exposes the
//! public half of its key for verification. Signer kinds are a closed set;
//! a configured name that does not parse to a kind resolves to no signer.

mod x509;

use std::fmt;
use std::io;

use ed25519_dalek::{Signature, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::context::{Cancelled, SignContext};

pub use x509::X509Signer;

/// Signature algorithm identifier
pub const SIGNATURE_ALGORITHM: &str = "Ed25519";

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("signature does not verify")]
    VerificationFailed,

    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("signer unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// Known signer implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SignerKind {
    X509,
}

impl SignerKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "x509" => Some(SignerKind::X509),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignerKind::X509 => "x509",
        }
    }
}

impl fmt::Display for SignerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Public half of a signing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    pub algorithm: &'static str,
    pub key: VerifyingKey,
}

impl PublicKey {
    pub fn ed25519(key: VerifyingKey) -> Self {
        Self {
            algorithm: SIGNATURE_ALGORITHM,
            key,
        }
    }

    /// SHA-256 fingerprint of the key bytes, hex encoded.
    pub fn fingerprint(&self) -> String {
        compute_key_fingerprint(&self.key)
    }

    pub fn verify(&self, payload: &[u8], signature: &[u8]) -> Result<(), SignerError> {
        let signature = Signature::from_slice(signature)
            .map_err(|e| SignerError::InvalidSignature(e.to_string()))?;
        self.key
            .verify(payload, &signature)
            .map_err(|_| SignerError::VerificationFailed)
    }
}

pub trait Signer: Send + Sync {
    fn kind(&self) -> SignerKind;

    /// Sign canonical payload bytes; returns the raw signature.
    fn sign(&self, ctx: &SignContext, payload: &[u8]) -> Result<Vec<u8>, SignerError>;

    fn public_key(&self) -> Result<PublicKey, SignerError>;

    /// Identifier recorded alongside signatures (key fingerprint).
    fn key_id(&self) -> String {
        self.public_key()
            .map(|k| k.fingerprint())
            .unwrap_or_default()
    }

    /// PEM certificate, when the signer has one.
    fn cert(&self) -> Option<String> {
        None
    }

    /// PEM certificate chain, when the signer has one.
    fn chain(&self) -> Option<String> {
        None
    }
}

/// Compute SHA-256 fingerprint of an Ed25519 public key
pub fn compute_key_fingerprint(key: &VerifyingKey) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Generate a new Ed25519 keypair
pub fn generate_keypair() -> SigningKey {
    SigningKey::generate(&mut rand::thread_rng())
}

/// Encode a signing key seed to base64 for storage
pub fn encode_signing_key(key: &SigningKey) -> String {
    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, key.to_bytes())
}

/// Decode a signing key seed from base64
pub fn decode_signing_key(encoded: &str) -> Result<SigningKey, SignerError> {
    let bytes =
        base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded.trim())?;
    let seed: [u8; 32] = bytes
        .try_into()
        .map_err(|_| SignerError::InvalidKey("key must be 32 bytes".to_string()))?;
    Ok(SigningKey::from_bytes(&seed))
}

/// Encode a verifying key to base64
pub fn encode_verifying_key(key: &VerifyingKey) -> String {
    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, key.as_bytes())
}

/// Decode a verifying key from base64
pub fn decode_verifying_key(encoded: &str) -> Result<VerifyingKey, SignerError> {
    let bytes =
        base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded.trim())?;
    let raw: [u8; 32] = bytes
        .try_into()
        .map_err(|_| SignerError::InvalidKey("public key must be 32 bytes".to_string()))?;
    VerifyingKey::from_bytes(&raw).map_err(|e| SignerError::InvalidKey(e.to_string()))
}
