//! Apply-style annotation patch document.
//!
//! Wire shape:
//!
//! ```json
//! {"apiVersion":"tekton.dev/v1","kind":"TaskRun",
//!  "metadata":{"name":"...","namespace":"...","annotations":{...}}}
//! ```
//!
//! `annotations` is omitted entirely when empty. Only the keys named in the
//! document are written by a store; every other annotation is left alone.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ObjectError;
use crate::meta::{GroupVersionKind, ObjectMeta};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationPatch {
    pub api_version: String,
    pub kind: String,
    pub metadata: PatchMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchMetadata {
    pub name: String,
    pub namespace: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl AnnotationPatch {
    /// Build a patch for the given object identity.
    pub fn new(
        gvk: &GroupVersionKind,
        name: impl Into<String>,
        namespace: impl Into<String>,
        annotations: BTreeMap<String, String>,
    ) -> Self {
        Self {
            api_version: gvk.api_version(),
            kind: gvk.kind.clone(),
            metadata: PatchMetadata {
                name: name.into(),
                namespace: namespace.into(),
                annotations,
            },
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ObjectError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, ObjectError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Write the patch's annotations onto `meta`.
    pub fn apply(&self, meta: &mut ObjectMeta) {
        for (k, v) in &self.metadata.annotations {
            meta.annotations.insert(k.clone(), v.clone());
        }
    }

    /// Write the patch's annotations onto a raw JSON object document.
    pub fn apply_to_value(&self, doc: &mut serde_json::Value) -> Result<(), ObjectError> {
        let metadata = doc
            .get_mut("metadata")
            .and_then(|m| m.as_object_mut())
            .ok_or(ObjectError::MissingField("metadata"))?;
        if self.metadata.annotations.is_empty() {
            return Ok(());
        }
        let annotations = metadata
            .entry("annotations")
            .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
        if !annotations.is_object() {
            *annotations = serde_json::Value::Object(serde_json::Map::new());
        }
        if let Some(map) = annotations.as_object_mut() {
            for (k, v) in &self.metadata.annotations {
                map.insert(k.clone(), serde_json::Value::String(v.clone()));
            }
        }
        Ok(())
    }
}
