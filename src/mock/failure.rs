//! Failure injection for test doubles.

use std::time::Duration;

/// How a double misbehaves.
#[derive(Debug, Clone)]
pub struct FailurePlan {
    /// Error message to return; `None` only delays.
    pub message: Option<String>,
    /// Delay to add before answering
    pub delay: Option<Duration>,
    /// Number of times to fail before succeeding (None = always fail)
    pub fail_count: Option<u32>,
}

impl FailurePlan {
    /// Fail every call with `message`.
    pub fn always(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            delay: None,
            fail_count: None,
        }
    }

    /// Succeed, but only after `duration`.
    pub fn delay(duration: Duration) -> Self {
        Self {
            message: None,
            delay: Some(duration),
            fail_count: None,
        }
    }

    /// Set the number of times to fail before succeeding
    pub fn with_fail_count(mut self, count: u32) -> Self {
        self.fail_count = Some(count);
        self
    }
}

/// Tracks calls against a plan.
#[derive(Debug, Default)]
pub struct FailureInjector {
    plan: Option<FailurePlan>,
    calls: u32,
}

impl FailureInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inject(&mut self, plan: FailurePlan) {
        self.plan = Some(plan);
        self.calls = 0;
    }

    pub fn clear(&mut self) {
        self.plan = None;
        self.calls = 0;
    }

    pub fn calls(&self) -> u32 {
        self.calls
    }

    /// Count one call; returns the active plan if this call should misbehave.
    pub fn check(&mut self) -> Option<FailurePlan> {
        self.calls += 1;
        let plan = self.plan.as_ref()?;
        if let Some(limit) = plan.fail_count {
            if self.calls > limit {
                return None;
            }
        }
        Some(plan.clone())
    }
}
