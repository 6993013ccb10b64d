//! Formatter, signer and backend registry.
//!
//! Built once at startup and passed by reference to everything that signs
//! or verifies. Lookups by configured name return `None` for unknown names;
//! callers decide whether that is a skip or an error.

use std::collections::BTreeMap;
use std::sync::Arc;

use chains_artifacts::ExtractOptions;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{ChainsConfig, TransparencyMode};
use crate::formats::{
    InTotoFormatter, PayloadFormatter, SimpleSigningFormatter, TektonFormatter, FORMAT_IN_TOTO,
    FORMAT_SLSA_V1,
};
use crate::ledger::AnnotationLedger;
use crate::signing::{Signer, SignerError, SignerKind, X509Signer};
use crate::storage::{Backend, DocDbBackend, StorageError, TektonBackend};
use crate::transparency::{LocalTransparencyLog, TransparencyError, TransparencyLog};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("signer setup failed: {0}")]
    Signer(#[from] SignerError),

    #[error("storage setup failed: {0}")]
    Storage(#[from] StorageError),

    #[error("transparency log setup failed: {0}")]
    Transparency(#[from] TransparencyError),
}

#[derive(Default)]
pub struct Registry {
    formatters: BTreeMap<String, Arc<dyn PayloadFormatter>>,
    signers: BTreeMap<SignerKind, Arc<dyn Signer>>,
    backends: BTreeMap<String, Arc<dyn Backend>>,
    transparency: Option<Arc<dyn TransparencyLog>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every built-in implementation the configuration asks for.
    pub fn from_config(
        config: &ChainsConfig,
        ledger: &AnnotationLedger,
    ) -> Result<Self, RegistryError> {
        let extract = ExtractOptions {
            deep_inspection: config.artifacts.pipelinerun.enable_deep_inspection,
        };
        let builder_id = config.builder.id.as_str();

        let mut registry = Self::new()
            .with_formatter(Arc::new(TektonFormatter))
            .with_formatter(Arc::new(InTotoFormatter::new(
                FORMAT_IN_TOTO,
                builder_id,
                extract.clone(),
            )))
            .with_formatter(Arc::new(InTotoFormatter::new(
                FORMAT_SLSA_V1,
                builder_id,
                extract,
            )))
            .with_formatter(Arc::new(SimpleSigningFormatter))
            .with_backend(Arc::new(TektonBackend::new(ledger.clone())))
            .with_backend(Arc::new(DocDbBackend::open(&config.storage.docdb.url)?));

        match &config.signers.x509.key_path {
            Some(path) => {
                registry = registry.with_signer(Arc::new(X509Signer::from_file(path)?));
            }
            None => warn!("signers.x509.key_path is not set; x509 signing is unavailable"),
        }

        let transparency = &config.transparency;
        if transparency.enabled != TransparencyMode::Disabled {
            let log = match &transparency.log_path {
                Some(path) => LocalTransparencyLog::open(transparency.url.as_str(), path)?,
                None => LocalTransparencyLog::new(transparency.url.as_str()),
            };
            info!(mode = %transparency.enabled, url = %transparency.url, "transparency log enabled");
            registry = registry.with_transparency_log(Arc::new(log));
        }

        Ok(registry)
    }

    pub fn with_formatter(mut self, formatter: Arc<dyn PayloadFormatter>) -> Self {
        self.formatters.insert(formatter.name().to_string(), formatter);
        self
    }

    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signers.insert(signer.kind(), signer);
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backends.insert(backend.name().to_string(), backend);
        self
    }

    pub fn with_transparency_log(mut self, log: Arc<dyn TransparencyLog>) -> Self {
        self.transparency = Some(log);
        self
    }

    pub fn formatter(&self, name: &str) -> Option<&Arc<dyn PayloadFormatter>> {
        self.formatters.get(name)
    }

    pub fn signer(&self, name: &str) -> Option<&Arc<dyn Signer>> {
        SignerKind::parse(name).and_then(|kind| self.signers.get(&kind))
    }

    pub fn backend(&self, name: &str) -> Option<&Arc<dyn Backend>> {
        self.backends.get(name)
    }

    pub fn transparency_log(&self) -> Option<&Arc<dyn TransparencyLog>> {
        self.transparency.as_ref()
    }

    pub fn formatter_names(&self) -> Vec<&str> {
        self.formatters.keys().map(String::as_str).collect()
    }

    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.keys().map(String::as_str).collect()
    }
}
