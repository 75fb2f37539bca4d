//! Liveness/readiness state machine.
//!
//! # States
//! ```text
//! Pending → Live → Ready ⇄ NotReady → Terminating
//! ```
//! `Terminating` is reachable from every state and is never left.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::watch;

use crate::config::LifecycleConfig;
use crate::lifecycle::pending::PendingTask;
use crate::lifecycle::shutdown::{ProcessExit, Terminate, FINAL_TERMINATION_FALLBACK};
use crate::lifecycle::startup::TaskId;
use crate::lifecycle::TaskResult;
use crate::observability::metrics;

/// Overall application status, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Startup tasks are still running.
    Pending,
    /// Live, but readiness tasks are still running.
    Live,
    /// Marked ready with no outstanding readiness tasks.
    Ready,
    /// Live, but not (or no longer) marked ready.
    NotReady,
    /// Shutdown has begun.
    Terminating,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "Pending",
            Status::Live => "Live",
            Status::Ready => "Ready",
            Status::NotReady => "NotReady",
            Status::Terminating => "Terminating",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of everything the state machine tracks.
#[derive(Debug, Default)]
pub(crate) struct State {
    pub(crate) ready: bool,
    pub(crate) terminating: bool,
    pub(crate) terminated: bool,
    pub(crate) startup_tasks: HashSet<TaskId>,
    pub(crate) readiness_tasks: HashSet<TaskId>,
    pub(crate) pending_tasks: HashSet<TaskId>,
}

impl State {
    pub(crate) fn is_live(&self) -> bool {
        !self.terminating && self.startup_tasks.is_empty()
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.ready && self.readiness_tasks.is_empty()
    }

    pub(crate) fn status(&self) -> Status {
        if self.terminating {
            Status::Terminating
        } else if !self.startup_tasks.is_empty() {
            Status::Pending
        } else if !self.readiness_tasks.is_empty() {
            Status::Live
        } else if self.ready {
            Status::Ready
        } else {
            Status::NotReady
        }
    }
}

pub(crate) type TerminationHook = Box<dyn FnOnce() -> BoxFuture<'static, TaskResult> + Send>;

pub(crate) struct Inner {
    pub(crate) state: watch::Sender<State>,
    /// `None` once shutdown has taken the hooks.
    pub(crate) hooks: Mutex<Option<Vec<TerminationHook>>>,
    pub(crate) terminator: Arc<dyn Terminate>,
    pub(crate) shutdown_delay: Option<Duration>,
    pub(crate) termination_grace_period: Option<Duration>,
    pub(crate) final_termination_delay: Duration,
}

/// The process lifecycle: readiness/liveness gating, pending work and the
/// shutdown sequence.
///
/// Cheap to clone; every clone shares the same state. Reads never block on
/// writers for longer than a set insertion.
#[derive(Clone)]
pub struct Lifecycle {
    pub(crate) inner: Arc<Inner>,
}

impl Lifecycle {
    /// Create a lifecycle with default options (5s delay, 30s grace period,
    /// `exit(1)` as the forced-termination action).
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> LifecycleBuilder {
        LifecycleBuilder::default()
    }

    /// Build a lifecycle from the `[lifecycle]` config section.
    pub fn from_config(config: &LifecycleConfig) -> Self {
        Self::builder()
            .shutdown_delay(config.shutdown_delay())
            .termination_grace_period(config.termination_grace_period())
            .terminator(ProcessExit::new(config.forced_exit_code))
            .build()
    }

    /// `true` unless terminating or a startup task is still running.
    pub fn is_live(&self) -> bool {
        self.inner.state.borrow().is_live()
    }

    /// `true` if marked ready and no readiness task is still running.
    pub fn is_ready(&self) -> bool {
        self.inner.state.borrow().is_ready()
    }

    pub fn status(&self) -> Status {
        self.inner.state.borrow().status()
    }

    pub fn is_terminating(&self) -> bool {
        self.inner.state.borrow().terminating
    }

    /// Number of pending tasks not yet marked complete.
    pub fn pending_count(&self) -> usize {
        self.inner.state.borrow().pending_tasks.len()
    }

    /// Mark the application ready. Ignored once terminating.
    pub fn mark_ready(&self) {
        self.set_ready(true);
    }

    /// Mark the application not ready. Ignored once terminating.
    pub fn mark_not_ready(&self) {
        self.set_ready(false);
    }

    fn set_ready(&self, ready: bool) {
        let changed = self.inner.state.send_if_modified(|state| {
            if state.terminating || state.ready == ready {
                return false;
            }
            state.ready = ready;
            true
        });
        if changed {
            tracing::info!(ready, status = %self.status(), "Readiness changed");
        }
    }

    /// Register a hook to run during shutdown, after pending work drains.
    ///
    /// All hooks run concurrently and are awaited together. A failing hook is
    /// logged and does not affect the others.
    pub fn register_termination_hook<F, Fut>(&self, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        let mut hooks = self.inner.hooks.lock().unwrap_or_else(PoisonError::into_inner);
        match hooks.as_mut() {
            Some(hooks) => {
                hooks.push(Box::new(move || Box::pin(hook())));
                tracing::debug!(registered = hooks.len(), "Termination hook registered");
            }
            None => {
                tracing::warn!("Termination hook registered after shutdown started; it will not run");
            }
        }
    }

    /// Create a unit of in-flight work that must complete before termination
    /// hooks run.
    ///
    /// The hold lasts only as long as the returned handle: dropping it
    /// completes the task (with a warning). Keep the handle alive for the
    /// whole of the work it protects; `lifecycle.create_pending_task();` on
    /// its own releases the hold immediately.
    #[must_use = "dropping the handle completes the pending task immediately"]
    pub fn create_pending_task(&self) -> PendingTask {
        let id = TaskId::next();
        let mut pending = 0;
        self.inner.state.send_modify(|state| {
            state.pending_tasks.insert(id);
            pending = state.pending_tasks.len();
        });
        metrics::set_pending_tasks(pending);
        PendingTask::new(id, self.clone())
    }

    /// Removes a pending task. Returns `false` if it was already removed.
    pub(crate) fn complete_pending(&self, id: TaskId) -> bool {
        let mut pending = 0;
        let removed = self.inner.state.send_if_modified(|state| {
            let removed = state.pending_tasks.remove(&id);
            pending = state.pending_tasks.len();
            removed
        });
        if removed {
            metrics::set_pending_tasks(pending);
        }
        removed
    }

    /// Resolves once the process is live (or immediately if it already is).
    ///
    /// Never resolves if shutdown begins before startup completes.
    pub async fn wait_live(&self) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(State::is_live).await;
    }

    /// Resolves once the process is ready (or immediately if it already is).
    pub async fn wait_ready(&self) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(State::is_ready).await;
    }

    /// Resolves once the shutdown sequence has run every termination hook.
    pub async fn terminated(&self) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(|state| state.terminated).await;
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Lifecycle")
            .field("status", &state.status())
            .field("startup_tasks", &state.startup_tasks.len())
            .field("readiness_tasks", &state.readiness_tasks.len())
            .field("pending_tasks", &state.pending_tasks.len())
            .finish()
    }
}

/// Builder for [`Lifecycle`]. Durations of `None` or zero disable the step.
pub struct LifecycleBuilder {
    shutdown_delay: Option<Duration>,
    termination_grace_period: Option<Duration>,
    final_termination_delay: Duration,
    terminator: Arc<dyn Terminate>,
}

impl Default for LifecycleBuilder {
    fn default() -> Self {
        Self {
            shutdown_delay: Some(Duration::from_secs(5)),
            termination_grace_period: Some(Duration::from_secs(30)),
            final_termination_delay: FINAL_TERMINATION_FALLBACK,
            terminator: Arc::new(ProcessExit::default()),
        }
    }
}

impl LifecycleBuilder {
    /// Wait between the shutdown request and draining pending work.
    pub fn shutdown_delay(mut self, delay: Option<Duration>) -> Self {
        self.shutdown_delay = delay.filter(|d| !d.is_zero());
        self
    }

    /// Deadline, measured from the shutdown request, after which the process
    /// is forcibly terminated.
    pub fn termination_grace_period(mut self, grace: Option<Duration>) -> Self {
        self.termination_grace_period = grace.filter(|d| !d.is_zero());
        self
    }

    /// Delay of the last-resort termination timer armed after hooks finish.
    pub fn final_termination_delay(mut self, delay: Duration) -> Self {
        self.final_termination_delay = delay;
        self
    }

    /// Action used to forcibly terminate the process.
    pub fn terminator<T: Terminate>(mut self, terminator: T) -> Self {
        self.terminator = Arc::new(terminator);
        self
    }

    pub fn build(self) -> Lifecycle {
        let (state, _) = watch::channel(State::default());
        Lifecycle {
            inner: Arc::new(Inner {
                state,
                hooks: Mutex::new(Some(Vec::new())),
                terminator: self.terminator,
                shutdown_delay: self.shutdown_delay,
                termination_grace_period: self.termination_grace_period,
                final_termination_delay: self.final_termination_delay,
            }),
        }
    }
}
