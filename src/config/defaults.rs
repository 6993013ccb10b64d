//! Built-in defaults (layer 1)
//!
//! Hardcoded defaults for all configuration values.

use serde::{Deserialize, Serialize};

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Format for TaskRun and PipelineRun records (default: "in-toto")
    pub record_format: String,

    /// Storage backends for run records (default: ["tekton"])
    pub record_storage: Vec<String>,

    /// Format for OCI images (default: "simplesigning")
    pub oci_format: String,

    /// Storage backends for OCI images (default: ["tekton"])
    pub oci_storage: Vec<String>,

    /// Signer for every artifact type (default: "x509")
    pub signer: String,

    /// Transparency mode (default: "false")
    pub transparency_enabled: String,

    /// Transparency log base url
    pub transparency_url: String,

    /// Document store url (default: "mem://chains")
    pub docdb_url: String,

    /// Builder id recorded in provenance
    pub builder_id: String,

    /// Worker threads (default: 2)
    pub threads_per_controller: u64,

    /// Requeues of one object per controller pass (default: 5)
    pub max_requeues: u64,

    /// Per-reconcile deadline in seconds (default: 300)
    pub reconcile_timeout_seconds: u64,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            record_format: "in-toto".to_string(),
            record_storage: vec!["tekton".to_string()],
            oci_format: "simplesigning".to_string(),
            oci_storage: vec!["tekton".to_string()],
            signer: "x509".to_string(),
            transparency_enabled: "false".to_string(),
            transparency_url: "https://rekor.sigstore.dev".to_string(),
            docdb_url: "mem://chains".to_string(),
            builder_id: "https://tekton.dev/chains/v2".to_string(),
            threads_per_controller: 2,
            max_requeues: 5,
            reconcile_timeout_seconds: 300,
        }
    }
}

impl BuiltinDefaults {
    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "artifacts": {
                "taskrun": {
                    "format": self.record_format,
                    "storage": self.record_storage,
                    "signer": self.signer
                },
                "pipelinerun": {
                    "format": self.record_format,
                    "storage": self.record_storage,
                    "signer": self.signer,
                    "enable_deep_inspection": false
                },
                "oci": {
                    "format": self.oci_format,
                    "storage": self.oci_storage,
                    "signer": self.signer
                },
                "sbom": {
                    "format": "in-toto",
                    "storage": [],
                    "signer": self.signer
                },
                "maven": {
                    "format": "in-toto",
                    "storage": [],
                    "signer": self.signer
                }
            },
            "transparency": {
                "enabled": self.transparency_enabled,
                "url": self.transparency_url
            },
            "storage": {
                "docdb": {
                    "url": self.docdb_url
                }
            },
            "signers": {
                "x509": {}
            },
            "builder": {
                "id": self.builder_id
            },
            "controller": {
                "threads_per_controller": self.threads_per_controller,
                "max_requeues": self.max_requeues,
                "reconcile_timeout_seconds": self.reconcile_timeout_seconds
            }
        })
    }
}
