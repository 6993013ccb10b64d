//! Signing state machine
//!
//! UNSIGNED → {SIGNED | FAILED}; both outcomes are sinks. Retries keep the
//! object UNSIGNED and only bump the retry counter.

use std::fmt;

use chains_objects::TrackedObject;
use serde::{Deserialize, Serialize};

use super::{MAX_RETRIES, RETRIES_ANNOTATION, SIGNED_ANNOTATION};

/// Value written to the signed marker on success.
pub const SIGNED_TRUE: &str = "true";

/// Value written to the signed marker once retries are exhausted.
pub const SIGNED_FAILED: &str = "failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SigningState {
    /// Marker absent or holding an unrecognised value
    Unsigned,
    Signed,
    Failed,
}

impl SigningState {
    pub fn from_marker(marker: Option<&str>) -> Self {
        match marker {
            Some(SIGNED_TRUE) => SigningState::Signed,
            Some(SIGNED_FAILED) => SigningState::Failed,
            _ => SigningState::Unsigned,
        }
    }

    /// State recorded on an object's annotation snapshot.
    pub fn of(obj: &dyn TrackedObject) -> Self {
        Self::from_marker(obj.annotation(SIGNED_ANNOTATION))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SigningState::Signed | SigningState::Failed)
    }

    pub fn can_transition_to(&self, target: SigningState) -> bool {
        matches!(
            (self, target),
            (SigningState::Unsigned, SigningState::Signed)
                | (SigningState::Unsigned, SigningState::Failed)
        )
    }
}

impl fmt::Display for SigningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SigningState::Unsigned => "UNSIGNED",
            SigningState::Signed => "SIGNED",
            SigningState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Retry counter as recorded on an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCount {
    Absent,
    Count(i64),
    /// Present but not an integer. Treated as exhausted.
    Unparsable,
}

impl RetryCount {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            None => RetryCount::Absent,
            Some(s) => s
                .trim()
                .parse::<i64>()
                .map(RetryCount::Count)
                .unwrap_or(RetryCount::Unparsable),
        }
    }

    pub fn of(obj: &dyn TrackedObject) -> Self {
        Self::parse(obj.annotation(RETRIES_ANNOTATION))
    }

    pub fn available(&self) -> bool {
        match self {
            RetryCount::Absent => true,
            RetryCount::Count(n) => *n < i64::from(MAX_RETRIES),
            RetryCount::Unparsable => false,
        }
    }

    /// Value to record after one more failure. `None` once exhausted.
    pub fn next(&self) -> Option<String> {
        if !self.available() {
            return None;
        }
        match self {
            RetryCount::Absent => Some("0".to_string()),
            RetryCount::Count(n) => Some((n + 1).to_string()),
            RetryCount::Unparsable => None,
        }
    }
}
