//! Payload formats
//!
//! A formatter turns a signable (and its owning run) into a JSON payload.
//! The object signer canonicalises the payload (RFC 8785) before signing;
//! formatters that `wrap` have the canonical bytes signed inside a DSSE
//! envelope instead of directly.

pub mod dsse;
mod intoto;
mod simplesigning;
mod tekton;

use chains_artifacts::{Signable, SignableType};
use chains_objects::TrackedObject;
use serde_json::Value;
use thiserror::Error;

pub use intoto::{InTotoFormatter, IN_TOTO_PAYLOAD_TYPE, SLSA_PREDICATE_TYPE, STATEMENT_TYPE};
pub use simplesigning::SimpleSigningFormatter;
pub use tekton::TektonFormatter;

/// Canonical format names.
pub const FORMAT_TEKTON: &str = "tekton";
pub const FORMAT_IN_TOTO: &str = "in-toto";
pub const FORMAT_SLSA_V1: &str = "slsa/v1";
pub const FORMAT_SIMPLE_SIGNING: &str = "simplesigning";

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("format '{format}' cannot describe {signable_type} artifacts")]
    Unsupported {
        format: &'static str,
        signable_type: SignableType,
    },

    #[error("payload could not be canonicalised: {0}")]
    Canonical(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub trait PayloadFormatter: Send + Sync {
    fn name(&self) -> &'static str;

    fn create_payload(
        &self,
        obj: &dyn TrackedObject,
        signable: &Signable,
    ) -> Result<Value, FormatError>;

    /// Sign the payload inside a DSSE envelope.
    fn wrap(&self) -> bool {
        false
    }

    /// DSSE payload type, used when `wrap` is set.
    fn payload_type(&self) -> &'static str {
        "application/json"
    }
}

/// RFC 8785 canonical bytes of a payload.
pub fn canonical_bytes(payload: &Value) -> Result<Vec<u8>, FormatError> {
    serde_json_canonicalizer::to_vec(payload).map_err(|e| FormatError::Canonical(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_bytes_sorted_and_compact() {
        let payload = json!({"b": 1, "a": {"d": [1, 2], "c": "x"}});
        let bytes = canonical_bytes(&payload).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"a":{"c":"x","d":[1,2]},"b":1}"#
        );
    }
}
