//! Transparency log uploads.
//!
//! The signer hands every signature it wants published to a
//! [`TransparencyLog`] and records the returned entry reference on the
//! object. [`LocalTransparencyLog`] is an append-only, hash-chained log
//! kept in memory and optionally mirrored to a JSON-lines file.

mod local;

use std::fmt;
use std::io;

use thiserror::Error;

use crate::context::{Cancelled, SignContext};

pub use local::{LocalTransparencyLog, LogEntry, LOG_ENTRY_SCHEMA_ID};

#[derive(Debug, Error)]
pub enum TransparencyError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("log mirror is corrupt at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    #[error("transparency log unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// Where an uploaded entry lives in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntryRef {
    pub index: u64,
    pub uuid: String,
    /// `<base>/api/v1/log/entries?logIndex=<index>`
    pub url: String,
}

impl LogEntryRef {
    pub fn new(base_url: &str, index: u64, uuid: String) -> Self {
        Self {
            index,
            uuid,
            url: entry_url(base_url, index),
        }
    }
}

impl fmt::Display for LogEntryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// Reference recorded in the `transparency` annotations.
pub fn entry_url(base_url: &str, index: u64) -> String {
    format!(
        "{}/api/v1/log/entries?logIndex={}",
        base_url.trim_end_matches('/'),
        index
    )
}

pub trait TransparencyLog: Send + Sync {
    /// Publish `signature` over `payload`.
    fn upload(
        &self,
        ctx: &SignContext,
        signature: &[u8],
        payload: &[u8],
    ) -> Result<LogEntryRef, TransparencyError>;
}
