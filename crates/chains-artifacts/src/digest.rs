//! Digest and digested-reference parsing.

use std::fmt;
use std::sync::OnceLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::SHORT_KEY_LEN;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DigestError {
    #[error("malformed sha256 digest '{0}'")]
    Malformed(String),

    #[error("reference '{0}' is not of the form <name>@sha256:<hex>")]
    MalformedReference(String),
}

fn hex64() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-f0-9]{64}$").expect("static regex"))
}

fn repository_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9]+([._-][a-z0-9]+)*(:[0-9]+)?(/[a-z0-9]+([._-]+[a-z0-9]+)*)*$")
            .expect("static regex")
    })
}

/// A validated sha256 digest.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Sha256Digest(String);

impl Sha256Digest {
    /// Parse `sha256:<64 lowercase hex>`; a bare 64-char hex string is
    /// accepted with the algorithm implied.
    pub fn parse(raw: &str) -> Result<Self, DigestError> {
        let trimmed = raw.trim();
        let hex = trimmed.strip_prefix("sha256:").unwrap_or(trimmed);
        if hex64().is_match(hex) {
            Ok(Self(hex.to_string()))
        } else {
            Err(DigestError::Malformed(raw.to_string()))
        }
    }

    pub fn hex(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..SHORT_KEY_LEN]
    }
}

impl fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.0)
    }
}

/// An OCI image pinned by digest.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    pub repository: String,
    pub digest: Sha256Digest,
}

impl ImageRef {
    /// Build from a repository url (a trailing tag is dropped) and a digest.
    pub fn from_parts(url: &str, digest: &str) -> Result<Self, DigestError> {
        let digest = Sha256Digest::parse(digest)?;
        let repository = strip_tag(url.trim());
        if !repository_re().is_match(repository) {
            return Err(DigestError::MalformedReference(url.to_string()));
        }
        Ok(Self {
            repository: repository.to_string(),
            digest,
        })
    }

    /// Parse `<repository>@sha256:<hex>`.
    pub fn parse(reference: &str) -> Result<Self, DigestError> {
        let (url, digest) = reference
            .trim()
            .rsplit_once('@')
            .ok_or_else(|| DigestError::MalformedReference(reference.to_string()))?;
        if !digest.starts_with("sha256:") {
            return Err(DigestError::MalformedReference(reference.to_string()));
        }
        Self::from_parts(url, digest)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.repository, self.digest)
    }
}

/// A non-image artifact pinned by digest (`<uri>@sha256:<hex>`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DigestedRef {
    pub uri: String,
    pub digest: Sha256Digest,
}

impl DigestedRef {
    pub fn parse(reference: &str) -> Result<Self, DigestError> {
        let (uri, digest) = reference
            .trim()
            .rsplit_once('@')
            .ok_or_else(|| DigestError::MalformedReference(reference.to_string()))?;
        if uri.is_empty() {
            return Err(DigestError::MalformedReference(reference.to_string()));
        }
        Ok(Self {
            uri: uri.to_string(),
            digest: Sha256Digest::parse(digest)?,
        })
    }
}

impl fmt::Display for DigestedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.uri, self.digest)
    }
}

/// Drop a `:tag` from the last path segment, keeping any registry port.
fn strip_tag(url: &str) -> &str {
    let last_slash = url.rfind('/').map(|i| i + 1).unwrap_or(0);
    match url[last_slash..].find(':') {
        Some(colon) => &url[..last_slash + colon],
        None => url,
    }
}
