//! Controller worker pool
//!
//! A fixed number of scoped worker threads pull object references off a
//! shared queue and hand them to the coordinator. Failed reconciles are
//! requeued with exponential backoff until `max_requeues`; signing an object
//! requeues everything tracked on it. Cancelling the context stops workers
//! between items.

mod queue;

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use chains_objects::{ObjectKind, ObjectRef, StoreError};
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::context::SignContext;
use crate::reconciler::{Coordinator, Outcome};

use queue::WorkQueue;

const DEFAULT_BACKOFF_INITIAL: Duration = Duration::from_millis(200);
const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerOptions {
    pub threads: usize,
    pub max_requeues: u32,
    /// Deadline for one reconcile pass.
    pub reconcile_timeout: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

impl From<&ControllerConfig> for ControllerOptions {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            threads: config.threads_per_controller.max(1),
            max_requeues: config.max_requeues,
            reconcile_timeout: Duration::from_secs(config.reconcile_timeout_seconds),
            backoff_initial: DEFAULT_BACKOFF_INITIAL,
            backoff_max: DEFAULT_BACKOFF_MAX,
        }
    }
}

impl ControllerOptions {
    /// Delay before attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_initial
            .saturating_mul(factor)
            .min(self.backoff_max)
    }
}

/// Last thing that happened to an object during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectResult {
    Reconciled(Outcome),
    /// Gave up after `attempts` failed reconciles.
    Failed { attempts: u32, error: String },
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub results: BTreeMap<ObjectRef, ObjectResult>,
    pub requeues: u32,
    pub cancelled: bool,
}

impl RunReport {
    pub fn count(&self, outcome: &Outcome) -> usize {
        self.results
            .values()
            .filter(|r| matches!(r, ObjectResult::Reconciled(o) if o == outcome))
            .count()
    }

    pub fn failed(&self) -> Vec<(&ObjectRef, &str)> {
        self.results
            .iter()
            .filter_map(|(target, result)| match result {
                ObjectResult::Failed { error, .. } => Some((target, error.as_str())),
                ObjectResult::Reconciled(_) => None,
            })
            .collect()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} objects: {} signed, {} already reconciled, {} waiting, {} abandoned, {} running, {} failed",
            self.results.len(),
            self.count(&Outcome::Signed),
            self.count(&Outcome::AlreadyReconciled),
            self.results
                .values()
                .filter(|r| matches!(r, ObjectResult::Reconciled(Outcome::Waiting { .. })))
                .count(),
            self.results
                .values()
                .filter(|r| matches!(r, ObjectResult::Reconciled(Outcome::Abandoned { .. })))
                .count(),
            self.count(&Outcome::Running),
            self.failed().len(),
        )
    }
}

pub struct Controller {
    coordinator: Coordinator,
    options: ControllerOptions,
}

impl Controller {
    pub fn new(coordinator: Coordinator, options: ControllerOptions) -> Self {
        Self {
            coordinator,
            options,
        }
    }

    pub fn options(&self) -> &ControllerOptions {
        &self.options
    }

    /// Reconcile every object the store knows about.
    pub fn run_all(&self, ctx: &SignContext) -> Result<RunReport, StoreError> {
        let targets = self.coordinator.signer().ledger().store().list()?;
        Ok(self.run(ctx, targets))
    }

    /// Reconcile `targets` (and anything they requeue) until the queue drains.
    pub fn run(&self, ctx: &SignContext, targets: Vec<ObjectRef>) -> RunReport {
        let queue = WorkQueue::default();
        for target in targets {
            queue.push(target, 0, Duration::ZERO);
        }
        let report = Mutex::new(RunReport::default());

        info!(threads = self.options.threads, queued = queue.len(), "controller starting");
        thread::scope(|scope| {
            for worker in 0..self.options.threads {
                let queue = &queue;
                let report = &report;
                scope.spawn(move || self.worker(worker, ctx, queue, report));
            }
        });

        let mut report = report.into_inner().unwrap_or_else(PoisonError::into_inner);
        report.cancelled = ctx.is_cancelled();
        info!(cancelled = report.cancelled, "{}", report.summary());
        report
    }

    fn worker(&self, id: usize, ctx: &SignContext, queue: &WorkQueue, report: &Mutex<RunReport>) {
        debug!(worker = id, "worker started");
        while let Some(item) = queue.next(|| ctx.is_cancelled()) {
            let attempt_ctx = ctx.with_timeout(self.options.reconcile_timeout);
            let result = self.coordinator.reconcile_ref(&attempt_ctx, &item.target);

            let mut requeue = None;
            let recorded = match result {
                Ok(Outcome::Signed) => {
                    for dependent in self.coordinator.signer().ledger().store().dependents(&item.target) {
                        debug!(object = %dependent, dependency = %item.target, "requeueing dependent");
                        queue.push(dependent, 0, Duration::ZERO);
                    }
                    ObjectResult::Reconciled(Outcome::Signed)
                }
                Ok(Outcome::Waiting { child }) => {
                    let dependency = ObjectRef::new(ObjectKind::TaskRun, &item.target.namespace, &child);
                    // A child that finished before the dependency was tracked
                    // never wakes the parent, so poll: freely while the child
                    // is still queued, a bounded number of times after.
                    if queue.is_active(&dependency) {
                        requeue = Some(item.attempt);
                    } else if item.attempt < self.options.max_requeues {
                        requeue = Some(item.attempt + 1);
                    }
                    ObjectResult::Reconciled(Outcome::Waiting { child })
                }
                Ok(outcome) => ObjectResult::Reconciled(outcome),
                Err(e) if ctx.is_cancelled() => {
                    debug!(object = %item.target, error = %e, "reconcile interrupted");
                    ObjectResult::Failed {
                        attempts: item.attempt + 1,
                        error: e.to_string(),
                    }
                }
                Err(e) => {
                    let attempts = item.attempt + 1;
                    if item.attempt < self.options.max_requeues {
                        warn!(object = %item.target, attempt = attempts, error = %e, "reconcile failed; requeueing");
                        requeue = Some(attempts);
                    } else {
                        warn!(object = %item.target, attempts, error = %e, "reconcile failed; giving up");
                    }
                    ObjectResult::Failed {
                        attempts,
                        error: e.to_string(),
                    }
                }
            };

            {
                let mut report = report.lock().unwrap_or_else(PoisonError::into_inner);
                report.results.insert(item.target.clone(), recorded);
                if requeue.is_some() {
                    report.requeues += 1;
                }
            }
            if let Some(attempt) = requeue {
                queue.push(item.target.clone(), attempt, self.options.backoff(attempt));
            }
            queue.done(&item.target);
        }
        debug!(worker = id, "worker stopped");
    }
}
