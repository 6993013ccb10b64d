//! Reasons a candidate artifact was dropped during extraction.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "detail")]
pub enum SkipReason {
    /// The digest failed validation.
    #[serde(rename = "MALFORMED_DIGEST")]
    MalformedDigest { source: String, value: String },

    /// The reference could not be parsed as `<name>@sha256:<hex>`.
    #[serde(rename = "MALFORMED_REFERENCE")]
    MalformedReference { source: String, value: String },
}

impl SkipReason {
    pub fn to_code(&self) -> String {
        match self {
            SkipReason::MalformedDigest { source, value } => {
                format!("MALFORMED_DIGEST:{}={}", source, value)
            }
            SkipReason::MalformedReference { source, value } => {
                format!("MALFORMED_REFERENCE:{}={}", source, value)
            }
        }
    }
}
