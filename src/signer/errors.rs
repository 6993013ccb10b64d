//! Errors accumulated while signing one object.

use std::fmt;

use thiserror::Error;

use crate::ledger::LedgerError;
use crate::signing::SignerError;
use crate::storage::StorageError;
use crate::transparency::TransparencyError;

/// A failure tied to one signable. Collected, never returned early.
#[derive(Debug, Error)]
pub enum SignableError {
    #[error("signing {key}: {source}")]
    Sign {
        key: String,
        #[source]
        source: SignerError,
    },

    #[error("encoding envelope for {key}: {source}")]
    Envelope {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("storing {key} in {backend}: {source}")]
    Store {
        key: String,
        backend: String,
        #[source]
        source: StorageError,
    },

    #[error("uploading {key} to transparency log: {source}")]
    Transparency {
        key: String,
        #[source]
        source: TransparencyError,
    },
}

impl SignableError {
    /// Full key of the signable the error belongs to.
    pub fn key(&self) -> &str {
        match self {
            SignableError::Sign { key, .. }
            | SignableError::Envelope { key, .. }
            | SignableError::Store { key, .. }
            | SignableError::Transparency { key, .. } => key,
        }
    }
}

#[derive(Debug, Default)]
pub struct SignErrors(pub Vec<SignableError>);

impl SignErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn push(&mut self, err: SignableError) {
        self.0.push(err);
    }

    pub fn iter(&self) -> impl Iterator<Item = &SignableError> {
        self.0.iter()
    }
}

impl fmt::Display for SignErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let noun = if self.0.len() == 1 { "error" } else { "errors" };
        write!(f, "{} {noun}: ", self.0.len())?;
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for SignErrors {}

#[derive(Debug, Error)]
pub enum SignError {
    /// At least one signable failed; the retry counter was advanced.
    #[error(transparent)]
    Signables(SignErrors),

    /// Everything signed but the object could not be marked.
    #[error("marking object signed: {0}")]
    Ledger(#[from] LedgerError),
}

impl SignError {
    pub fn signable_errors(&self) -> Option<&SignErrors> {
        match self {
            SignError::Signables(errors) => Some(errors),
            SignError::Ledger(_) => None,
        }
    }
}
