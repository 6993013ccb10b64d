//! `simplesigning` format: cosign's container image signature payload.

use chains_artifacts::{Artifact, Signable};
use chains_objects::TrackedObject;
use serde_json::{json, Value};

use super::{FormatError, PayloadFormatter, FORMAT_SIMPLE_SIGNING};

const SIGNATURE_TYPE: &str = "cosign container image signature";

#[derive(Debug, Default)]
pub struct SimpleSigningFormatter;

impl PayloadFormatter for SimpleSigningFormatter {
    fn name(&self) -> &'static str {
        FORMAT_SIMPLE_SIGNING
    }

    fn create_payload(
        &self,
        _obj: &dyn TrackedObject,
        signable: &Signable,
    ) -> Result<Value, FormatError> {
        let Artifact::Image(image) = &signable.artifact else {
            return Err(FormatError::Unsupported {
                format: FORMAT_SIMPLE_SIGNING,
                signable_type: signable.signable_type,
            });
        };
        Ok(json!({
            "critical": {
                "identity": {"docker-reference": image.repository},
                "image": {"docker-manifest-digest": image.digest.to_string()},
                "type": SIGNATURE_TYPE
            },
            "optional": null
        }))
    }
}
