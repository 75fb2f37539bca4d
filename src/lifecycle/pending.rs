//! Pending work handles.
//!
//! A [`PendingTask`] represents one unit of in-flight work (an active
//! request, a flush in progress) that must finish before termination hooks
//! run. Shutdown waits for every handle to be completed.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::lifecycle::startup::TaskId;
use crate::lifecycle::state::Lifecycle;

/// Caller-owned token for one unit of in-flight work.
///
/// Completion is exactly-once: the first [`mark_complete`](Self::mark_complete)
/// removes the task and wakes shutdown waiters, later calls do nothing.
/// Dropping an incomplete handle completes it, since it could never be
/// completed afterwards.
pub struct PendingTask {
    id: TaskId,
    lifecycle: Lifecycle,
    completed: AtomicBool,
}

impl PendingTask {
    pub(crate) fn new(id: TaskId, lifecycle: Lifecycle) -> Self {
        tracing::trace!(task_id = %id, "Pending task created");
        Self {
            id,
            lifecycle,
            completed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn is_complete(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Mark this unit of work as finished. Idempotent.
    pub fn mark_complete(&self) {
        if self.completed.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.lifecycle.complete_pending(self.id) {
            tracing::trace!(
                task_id = %self.id,
                remaining = self.lifecycle.pending_count(),
                "Pending task completed"
            );
        }
    }
}

impl Drop for PendingTask {
    fn drop(&mut self) {
        if !self.is_complete() {
            tracing::warn!(task_id = %self.id, "Pending task dropped without mark_complete");
            self.mark_complete();
        }
    }
}

impl fmt::Debug for PendingTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingTask")
            .field("id", &self.id)
            .field("completed", &self.is_complete())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::lifecycle::Lifecycle;

    #[test]
    fn mark_complete_removes_task_once() {
        let lifecycle = Lifecycle::new();
        let mut rx = lifecycle.inner.state.subscribe();

        let task = lifecycle.create_pending_task();
        assert_eq!(lifecycle.pending_count(), 1);
        assert!(rx.has_changed().unwrap());
        let _ = rx.borrow_and_update();

        task.mark_complete();
        assert!(task.is_complete());
        assert_eq!(lifecycle.pending_count(), 0);
        assert!(rx.has_changed().unwrap());
        let _ = rx.borrow_and_update();

        // second completion neither fails nor notifies
        task.mark_complete();
        assert_eq!(lifecycle.pending_count(), 0);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn completing_one_task_leaves_others() {
        let lifecycle = Lifecycle::new();
        let a = lifecycle.create_pending_task();
        let b = lifecycle.create_pending_task();
        assert_ne!(a.id(), b.id());

        a.mark_complete();
        assert_eq!(lifecycle.pending_count(), 1);
        assert!(!b.is_complete());
        b.mark_complete();
        assert_eq!(lifecycle.pending_count(), 0);
    }

    #[test]
    fn dropping_incomplete_task_completes_it() {
        let lifecycle = Lifecycle::new();
        let task = lifecycle.create_pending_task();
        assert_eq!(lifecycle.pending_count(), 1);
        drop(task);
        assert_eq!(lifecycle.pending_count(), 0);
    }

    #[test]
    fn hold_lasts_only_while_handle_is_bound() {
        let lifecycle = Lifecycle::new();
        let _held = lifecycle.create_pending_task();
        assert_eq!(lifecycle.pending_count(), 1);

        // an unbound handle is dropped, and completed, on the spot
        let _ = lifecycle.create_pending_task();
        assert_eq!(lifecycle.pending_count(), 1);
    }
}
