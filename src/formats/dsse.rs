//! DSSE envelopes.
//!
//! The signature covers the pre-authentication encoding
//! `"DSSEv1" SP len(type) SP type SP len(body) SP body`, never the raw body.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::context::SignContext;
use crate::signing::{PublicKey, Signer, SignerError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub payload_type: String,
    /// Base64 body.
    pub payload: String,
    pub signatures: Vec<EnvelopeSignature>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeSignature {
    #[serde(default)]
    pub keyid: String,
    /// Base64 signature over the PAE.
    pub sig: String,
}

/// Pre-authentication encoding.
pub fn pae(payload_type: &str, body: &[u8]) -> Vec<u8> {
    let header = format!(
        "DSSEv1 {} {} {} ",
        payload_type.len(),
        payload_type,
        body.len()
    );
    let mut out = Vec::with_capacity(header.len() + body.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(body);
    out
}

impl Envelope {
    /// Sign `body` and wrap it.
    pub fn sign(
        ctx: &SignContext,
        signer: &dyn Signer,
        payload_type: &str,
        body: &[u8],
    ) -> Result<Self, SignerError> {
        let sig = signer.sign(ctx, &pae(payload_type, body))?;
        Ok(Self {
            payload_type: payload_type.to_string(),
            payload: STANDARD.encode(body),
            signatures: vec![EnvelopeSignature {
                keyid: signer.key_id(),
                sig: STANDARD.encode(sig),
            }],
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn body(&self) -> Result<Vec<u8>, SignerError> {
        Ok(STANDARD.decode(&self.payload)?)
    }

    /// Verify at least one signature against `key`; returns the body.
    pub fn open(&self, key: &PublicKey) -> Result<Vec<u8>, SignerError> {
        let body = self.body()?;
        let message = pae(&self.payload_type, &body);
        let mut last = SignerError::InvalidSignature("envelope has no signatures".to_string());
        for signature in &self.signatures {
            let raw = STANDARD.decode(&signature.sig)?;
            match key.verify(&message, &raw) {
                Ok(()) => return Ok(body),
                Err(e) => last = e,
            }
        }
        Err(last)
    }
}
