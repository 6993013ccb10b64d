//! Deadline and cancellation carried through every blocking call.
//!
//! A `SignContext` is cheap to clone; clones share the cancellation flag.
//! Calls into stores, signers, backends and the transparency log check it
//! before doing work and return `Cancelled` promptly once it trips.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Cancelled {
    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),
}

#[derive(Debug, Clone)]
pub struct SignContext {
    cancel: Arc<AtomicBool>,
    started: Instant,
    deadline: Option<Instant>,
}

impl Default for SignContext {
    fn default() -> Self {
        Self::background()
    }
}

impl SignContext {
    /// A context with no deadline that is never cancelled unless asked.
    pub fn background() -> Self {
        Self {
            cancel: Arc::new(AtomicBool::new(false)),
            started: Instant::now(),
            deadline: None,
        }
    }

    /// Child context sharing this one's cancellation, with a deadline
    /// `timeout` from now (or the parent's, whichever is sooner).
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let now = Instant::now();
        let candidate = now + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            cancel: Arc::clone(&self.cancel),
            started: now,
            deadline: Some(deadline),
        }
    }

    /// Fresh context with its own cancellation flag and a deadline
    /// `timeout` from now. Used for bookkeeping writes that must still run
    /// after the work they record was cancelled.
    pub fn detached(timeout: Duration) -> Self {
        Self::background().with_timeout(timeout)
    }

    /// Trip cancellation for this context and every clone of it.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Fail if cancelled or past the deadline.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            return Err(Cancelled::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Cancelled::DeadlineExceeded(
                    deadline.saturating_duration_since(self.started),
                ));
            }
        }
        Ok(())
    }

    /// Share the cancellation flag, e.g. with a signal handler.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }
}
