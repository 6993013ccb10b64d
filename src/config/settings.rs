//! Typed view of the merged configuration.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use chains_artifacts::SignableType;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use super::defaults::BuiltinDefaults;
use super::effective::ConfigError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainsConfig {
    pub artifacts: ArtifactsConfig,
    pub transparency: TransparencyConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub signers: SignersConfig,
    pub builder: BuilderConfig,
    pub controller: ControllerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    pub taskrun: ArtifactConfig,
    pub pipelinerun: ArtifactConfig,
    pub oci: ArtifactConfig,
    pub sbom: ArtifactConfig,
    pub maven: ArtifactConfig,
}

impl ArtifactsConfig {
    pub fn for_type(&self, signable_type: SignableType) -> &ArtifactConfig {
        match signable_type {
            SignableType::TaskRun => &self.taskrun,
            SignableType::PipelineRun => &self.pipelinerun,
            SignableType::Oci => &self.oci,
            SignableType::Sbom => &self.sbom,
            SignableType::Maven => &self.maven,
        }
    }
}

/// Per artifact type: how to format, sign and store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactConfig {
    #[serde(default)]
    pub format: String,

    /// Backend names; an empty set disables the artifact type.
    #[serde(default)]
    pub storage: BTreeSet<String>,

    #[serde(default)]
    pub signer: String,

    /// PipelineRuns only: also scan child TaskRun results.
    #[serde(default)]
    pub enable_deep_inspection: bool,
}

impl ArtifactConfig {
    pub fn enabled(&self) -> bool {
        !self.storage.is_empty()
    }
}

/// When signed payloads are uploaded to the transparency log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransparencyMode {
    #[default]
    Disabled,
    Enabled,
    /// Only objects annotated `transparency-upload: "true"`.
    Manual,
}

impl TransparencyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransparencyMode::Disabled => "false",
            TransparencyMode::Enabled => "true",
            TransparencyMode::Manual => "manual",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "false" | "" => Some(TransparencyMode::Disabled),
            "true" => Some(TransparencyMode::Enabled),
            "manual" => Some(TransparencyMode::Manual),
            _ => None,
        }
    }
}

impl fmt::Display for TransparencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for TransparencyMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TransparencyMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // TOML files commonly write a bare boolean.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bool(bool),
            Str(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Bool(true) => Ok(TransparencyMode::Enabled),
            Raw::Bool(false) => Ok(TransparencyMode::Disabled),
            Raw::Str(s) => TransparencyMode::parse(&s).ok_or_else(|| {
                serde::de::Error::custom(format!(
                    "transparency.enabled must be \"false\", \"true\" or \"manual\", got \"{s}\""
                ))
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransparencyConfig {
    #[serde(default)]
    pub enabled: TransparencyMode,

    #[serde(default)]
    pub url: String,

    /// Optional JSON-lines mirror of the local log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub docdb: DocDbConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocDbConfig {
    /// `mem://<collection>` or `file:///<directory>`
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignersConfig {
    #[serde(default)]
    pub x509: X509Config,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct X509Config {
    /// File holding a base64 Ed25519 seed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuilderConfig {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub threads_per_controller: usize,
    pub max_requeues: u32,
    pub reconcile_timeout_seconds: u64,
}

impl From<&BuiltinDefaults> for ChainsConfig {
    fn from(d: &BuiltinDefaults) -> Self {
        let record = |deep: bool| ArtifactConfig {
            format: d.record_format.clone(),
            storage: d.record_storage.iter().cloned().collect(),
            signer: d.signer.clone(),
            enable_deep_inspection: deep,
        };
        let disabled = ArtifactConfig {
            format: "in-toto".to_string(),
            storage: BTreeSet::new(),
            signer: d.signer.clone(),
            enable_deep_inspection: false,
        };
        Self {
            artifacts: ArtifactsConfig {
                taskrun: record(false),
                pipelinerun: record(false),
                oci: ArtifactConfig {
                    format: d.oci_format.clone(),
                    storage: d.oci_storage.iter().cloned().collect(),
                    signer: d.signer.clone(),
                    enable_deep_inspection: false,
                },
                sbom: disabled.clone(),
                maven: disabled,
            },
            transparency: TransparencyConfig {
                enabled: TransparencyMode::parse(&d.transparency_enabled).unwrap_or_default(),
                url: d.transparency_url.clone(),
                log_path: None,
            },
            storage: StorageConfig {
                docdb: DocDbConfig {
                    url: d.docdb_url.clone(),
                },
            },
            signers: SignersConfig::default(),
            builder: BuilderConfig {
                id: d.builder_id.clone(),
            },
            controller: ControllerConfig {
                threads_per_controller: d.threads_per_controller as usize,
                max_requeues: d.max_requeues as u32,
                reconcile_timeout_seconds: d.reconcile_timeout_seconds,
            },
        }
    }
}

impl Default for ChainsConfig {
    fn default() -> Self {
        Self::from(&BuiltinDefaults::default())
    }
}

impl ChainsConfig {
    /// Deserialize a merged configuration value and validate it.
    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        let config: ChainsConfig = serde_json::from_value(value.clone())
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let threads = self.controller.threads_per_controller;
        if threads == 0 || threads > 64 {
            return Err(ConfigError::ValidationError(format!(
                "controller.threads_per_controller must be in [1, 64], got {threads}"
            )));
        }

        let timeout = self.controller.reconcile_timeout_seconds;
        if timeout == 0 || timeout > 86400 {
            return Err(ConfigError::ValidationError(format!(
                "controller.reconcile_timeout_seconds must be in (0, 86400], got {timeout}"
            )));
        }

        let url = &self.storage.docdb.url;
        if !(url.starts_with("mem://") || url.starts_with("file://")) {
            return Err(ConfigError::ValidationError(format!(
                "storage.docdb.url must start with mem:// or file://, got \"{url}\""
            )));
        }

        if self.transparency.enabled != TransparencyMode::Disabled
            && self.transparency.url.trim().is_empty()
        {
            return Err(ConfigError::ValidationError(
                "transparency.url is required when transparency is enabled".to_string(),
            ));
        }

        Ok(())
    }
}
