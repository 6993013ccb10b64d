//! In-process transparency log.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use uuid::Uuid;

use super::{LogEntryRef, TransparencyError, TransparencyLog};
use crate::context::SignContext;

pub const LOG_ENTRY_SCHEMA_ID: &str = "chains-controller/tlog_entry@1";

const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// One appended entry. `hash` covers every other field plus `prev_hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub schema_id: String,
    pub index: u64,
    pub uuid: String,
    pub integrated_time: DateTime<Utc>,
    pub payload_sha256: String,
    /// Base64
    pub signature: String,
    pub prev_hash: String,
    pub hash: String,
}

impl LogEntry {
    fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.prev_hash.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.index.to_string().as_bytes());
        hasher.update(b"\n");
        hasher.update(self.uuid.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.integrated_time.to_rfc3339().as_bytes());
        hasher.update(b"\n");
        hasher.update(self.payload_sha256.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.signature.as_bytes());
        hex::encode(hasher.finalize())
    }
}

pub struct LocalTransparencyLog {
    base_url: String,
    mirror: Option<PathBuf>,
    entries: Mutex<Vec<LogEntry>>,
}

impl LocalTransparencyLog {
    /// Empty in-memory log.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            mirror: None,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Log mirrored to `path`; existing entries are loaded and checked.
    pub fn open(base_url: impl Into<String>, path: &Path) -> Result<Self, TransparencyError> {
        let entries = if path.exists() {
            load_entries(path)?
        } else {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            Vec::new()
        };
        verify_entries(&entries)?;
        debug!(path = %path.display(), entries = entries.len(), "opened transparency log");
        Ok(Self {
            base_url: base_url.into(),
            mirror: Some(path.to_path_buf()),
            entries: Mutex::new(entries),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn entries(&self) -> Result<Vec<LogEntry>, TransparencyError> {
        Ok(self.lock()?.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Recompute every hash and check each entry links to its predecessor.
    pub fn verify_chain(&self) -> Result<(), TransparencyError> {
        verify_entries(&self.lock()?)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<LogEntry>>, TransparencyError> {
        self.entries
            .lock()
            .map_err(|_| TransparencyError::Unavailable("log lock poisoned".to_string()))
    }
}

impl TransparencyLog for LocalTransparencyLog {
    fn upload(
        &self,
        ctx: &SignContext,
        signature: &[u8],
        payload: &[u8],
    ) -> Result<LogEntryRef, TransparencyError> {
        ctx.check()?;
        let mut entries = self.lock()?;

        let prev_hash = entries
            .last()
            .map(|e| e.hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());
        let mut entry = LogEntry {
            schema_id: LOG_ENTRY_SCHEMA_ID.to_string(),
            index: entries.len() as u64,
            uuid: Uuid::new_v4().to_string(),
            integrated_time: Utc::now(),
            payload_sha256: hex::encode(Sha256::digest(payload)),
            signature: STANDARD.encode(signature),
            prev_hash,
            hash: String::new(),
        };
        entry.hash = entry.compute_hash();

        if let Some(path) = &self.mirror {
            let mut line = serde_json::to_string(&entry)?;
            line.push('\n');
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            file.write_all(line.as_bytes())?;
        }

        let entry_ref = LogEntryRef::new(&self.base_url, entry.index, entry.uuid.clone());
        info!(index = entry.index, uuid = %entry.uuid, "appended transparency log entry");
        entries.push(entry);
        Ok(entry_ref)
    }
}

fn load_entries(path: &Path) -> Result<Vec<LogEntry>, TransparencyError> {
    let content = fs::read_to_string(path)?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|e| TransparencyError::Corrupt {
                line: i + 1,
                reason: e.to_string(),
            })
        })
        .collect()
}

fn verify_entries(entries: &[LogEntry]) -> Result<(), TransparencyError> {
    let mut prev = GENESIS_HASH.to_string();
    for (i, entry) in entries.iter().enumerate() {
        let corrupt = |reason: &str| TransparencyError::Corrupt {
            line: i + 1,
            reason: reason.to_string(),
        };
        if entry.index != i as u64 {
            return Err(corrupt("index out of sequence"));
        }
        if entry.prev_hash != prev {
            return Err(corrupt("broken hash chain"));
        }
        if entry.compute_hash() != entry.hash {
            return Err(corrupt("entry hash mismatch"));
        }
        prev = entry.hash.clone();
    }
    Ok(())
}
