//! `tekton` format: the run's own status record.

use chains_artifacts::Signable;
use chains_objects::TrackedObject;
use serde_json::Value;

use super::{FormatError, PayloadFormatter, FORMAT_TEKTON};

#[derive(Debug, Default)]
pub struct TektonFormatter;

impl PayloadFormatter for TektonFormatter {
    fn name(&self) -> &'static str {
        FORMAT_TEKTON
    }

    fn create_payload(
        &self,
        obj: &dyn TrackedObject,
        signable: &Signable,
    ) -> Result<Value, FormatError> {
        if !signable.is_object() {
            return Err(FormatError::Unsupported {
                format: FORMAT_TEKTON,
                signable_type: signable.signable_type,
            });
        }
        Ok(obj.status_record())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chains_artifacts::ImageRef;
    use chains_objects::TaskRun;
    use serde_json::json;

    fn task_run() -> TaskRun {
        serde_json::from_value(json!({
            "apiVersion": "tekton.dev/v1",
            "kind": "TaskRun",
            "metadata": {"name": "build", "namespace": "ci", "uid": "uid-1"},
            "status": {
                "conditions": [{"type": "Succeeded", "status": "True"}],
                "podName": "build-pod"
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_record_payload_is_status() {
        let tr = task_run();
        let signable = Signable::object(tr.object_ref(), tr.object_key());
        let payload = TektonFormatter.create_payload(&tr, &signable).unwrap();
        assert_eq!(payload["podName"], "build-pod");
        assert!(!TektonFormatter.wrap());
    }

    #[test]
    fn test_images_unsupported() {
        let tr = task_run();
        let image = ImageRef::parse(
            "gcr.io/app@sha256:05f95b26ed10668b7183c1e2da98610e91372fa9f510046d4ce5812addad86b5",
        )
        .unwrap();
        let signable = Signable::image(tr.object_ref(), image);
        assert!(matches!(
            TektonFormatter.create_payload(&tr, &signable),
            Err(FormatError::Unsupported { .. })
        ));
    }
}
