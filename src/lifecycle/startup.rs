//! Startup and readiness gating tasks.
//!
//! # Responsibilities
//! - Run tasks that must finish before the process is live or ready
//! - Release the gate when the task finishes, however it finishes
//!
//! # Design Decisions
//! - A failed task releases its gate exactly like a successful one
//! - The gate is released by a drop guard, so a panicking task cannot wedge
//!   the process in `Pending`

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::lifecycle::state::{Lifecycle, State};
use crate::lifecycle::TaskResult;

static TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a tracked lifecycle task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn next() -> Self {
        Self(TASK_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy)]
enum Gate {
    Startup,
    Readiness,
}

impl Gate {
    fn name(self) -> &'static str {
        match self {
            Gate::Startup => "startup",
            Gate::Readiness => "readiness",
        }
    }

    fn tasks(self, state: &mut State) -> &mut std::collections::HashSet<TaskId> {
        match self {
            Gate::Startup => &mut state.startup_tasks,
            Gate::Readiness => &mut state.readiness_tasks,
        }
    }
}

/// Removes the task from its gate when dropped.
struct GateGuard {
    lifecycle: Lifecycle,
    gate: Gate,
    id: TaskId,
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        let gate = self.gate;
        let id = self.id;
        self.lifecycle
            .inner
            .state
            .send_if_modified(|state| gate.tasks(state).remove(&id));
        tracing::debug!(
            task_id = %id,
            gate = gate.name(),
            status = %self.lifecycle.status(),
            "Gating task finished"
        );
    }
}

impl Lifecycle {
    /// Register a task that must finish before the process is considered live.
    ///
    /// The task starts immediately on the current tokio runtime.
    pub fn register_startup_task<F, Fut>(&self, task: F) -> TaskId
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        self.spawn_gated(Gate::Startup, task)
    }

    /// Register a task that must finish before the process is considered ready.
    ///
    /// The task starts immediately on the current tokio runtime.
    pub fn register_readiness_task<F, Fut>(&self, task: F) -> TaskId
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        self.spawn_gated(Gate::Readiness, task)
    }

    fn spawn_gated<F, Fut>(&self, gate: Gate, task: F) -> TaskId
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        let id = TaskId::next();
        self.inner.state.send_modify(|state| {
            gate.tasks(state).insert(id);
        });
        tracing::debug!(task_id = %id, gate = gate.name(), "Gating task registered");

        let guard = GateGuard {
            lifecycle: self.clone(),
            gate,
            id,
        };
        let fut = task();
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(error) = fut.await {
                tracing::warn!(
                    task_id = %id,
                    gate = gate.name(),
                    error = %error,
                    "Gating task failed; releasing gate anyway"
                );
            }
        });
        id
    }
}
