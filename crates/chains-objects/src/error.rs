//! Error types for the object model and object stores.

use thiserror::Error;

use crate::meta::ObjectRef;

/// Errors decoding or validating a run object.
#[derive(Debug, Error)]
pub enum ObjectError {
    #[error("malformed apiVersion '{0}': expected <group>/<version>")]
    MalformedApiVersion(String),

    #[error("unsupported kind '{0}'")]
    UnsupportedKind(String),

    #[error("object is missing metadata.{0}")]
    MissingField(&'static str),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors returned by an `ObjectStore`.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The object does not exist. Callers treat this differently from every
    /// other failure, so it is kept distinct.
    #[error("{0} not found")]
    NotFound(ObjectRef),

    #[error("invalid patch for {target}: {reason}")]
    InvalidPatch { target: ObjectRef, reason: String },

    #[error("object error: {0}")]
    Object(#[from] ObjectError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether this error means the object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}
