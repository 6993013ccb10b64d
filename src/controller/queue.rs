//! Shared work queue with delayed items.

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chains_objects::ObjectRef;

/// Longest a worker sleeps before re-checking cancellation.
const IDLE_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub(crate) struct WorkItem {
    pub target: ObjectRef,
    pub attempt: u32,
    ready_at: Instant,
}

#[derive(Debug, Default)]
struct State {
    items: VecDeque<WorkItem>,
    pending: BTreeSet<ObjectRef>,
    in_flight: BTreeSet<ObjectRef>,
}

#[derive(Debug, Default)]
pub(crate) struct WorkQueue {
    state: Mutex<State>,
    changed: Condvar,
}

impl WorkQueue {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `target` after `delay`. Already-queued targets are not duplicated.
    pub fn push(&self, target: ObjectRef, attempt: u32, delay: Duration) -> bool {
        let mut state = self.lock();
        if !state.pending.insert(target.clone()) {
            return false;
        }
        state.items.push_back(WorkItem {
            target,
            attempt,
            ready_at: Instant::now() + delay,
        });
        self.changed.notify_all();
        true
    }

    /// Whether `target` is queued or being processed.
    pub fn is_active(&self, target: &ObjectRef) -> bool {
        let state = self.lock();
        state.pending.contains(target) || state.in_flight.contains(target)
    }

    /// Block until an item is ready. `None` once the queue has drained with
    /// nothing in flight, or when `cancelled` reports true.
    pub fn next(&self, cancelled: impl Fn() -> bool) -> Option<WorkItem> {
        let mut state = self.lock();
        loop {
            if cancelled() {
                self.changed.notify_all();
                return None;
            }
            let now = Instant::now();
            let ready = state
                .items
                .iter()
                .position(|item| item.ready_at <= now && !state.in_flight.contains(&item.target));
            if let Some(item) = ready.and_then(|pos| state.items.remove(pos)) {
                state.pending.remove(&item.target);
                state.in_flight.insert(item.target.clone());
                return Some(item);
            }
            if state.items.is_empty() && state.in_flight.is_empty() {
                self.changed.notify_all();
                return None;
            }
            let wait = state
                .items
                .iter()
                .map(|item| item.ready_at.saturating_duration_since(now))
                .min()
                .unwrap_or(IDLE_POLL)
                .clamp(Duration::from_millis(1), IDLE_POLL);
            state = self
                .changed
                .wait_timeout(state, wait)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    /// Mark `target` processed.
    pub fn done(&self, target: &ObjectRef) {
        let mut state = self.lock();
        state.in_flight.remove(target);
        self.changed.notify_all();
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }
}
