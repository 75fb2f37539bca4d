//! Shutdown coordination.
//!
//! # Sequence
//! ```text
//! shutdown()
//!     → terminating gate (first caller wins, later callers return)
//!     → arm dead-man's switch (termination grace period)
//!     → shutdown delay
//!     → wait for pending work
//!     → run termination hooks concurrently, await all
//!     → arm final fallback timer
//! ```
//!
//! # Design Decisions
//! - No step propagates errors; hook failures are logged and counted
//! - Timers are spawned tasks and never cancelled; they do not keep the
//!   runtime alive once `main` returns
//! - The exit guarantee is exactly as strong as the [`Terminate`] action

use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

use futures_util::future::join_all;

use crate::lifecycle::state::Lifecycle;
use crate::observability::metrics;

/// Delay of the last-resort timer armed after termination hooks finish.
pub const FINAL_TERMINATION_FALLBACK: Duration = Duration::from_secs(1);

/// Action invoked when graceful shutdown stalls past a deadline.
///
/// The lifecycle assumes this action really ends the process. If it does not
/// (a test double, an embedded runtime), a stalled shutdown simply stays
/// stalled.
pub trait Terminate: Send + Sync + 'static {
    fn terminate(&self);
}

impl<F> Terminate for F
where
    F: Fn() + Send + Sync + 'static,
{
    fn terminate(&self) {
        self()
    }
}

/// Exits the process with a fixed status code.
#[derive(Debug, Clone, Copy)]
pub struct ProcessExit {
    code: i32,
}

impl ProcessExit {
    pub fn new(code: i32) -> Self {
        Self { code }
    }
}

impl Default for ProcessExit {
    fn default() -> Self {
        Self::new(1)
    }
}

impl Terminate for ProcessExit {
    fn terminate(&self) {
        std::process::exit(self.code);
    }
}

/// Arm a one-shot forced termination. Never cancelled.
fn arm_forced_termination(terminator: Arc<dyn Terminate>, after: Duration, reason: &'static str) {
    tracing::debug!(reason, after_secs = after.as_secs_f64(), "Forced termination armed");
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        tracing::error!(
            reason,
            after_secs = after.as_secs_f64(),
            "Process still running; forcing termination"
        );
        metrics::record_forced_termination(reason);
        terminator.terminate();
    });
}

impl Lifecycle {
    /// Begin shutdown and run the sequence to completion.
    ///
    /// Idempotent: only the first call runs the sequence; every later or
    /// concurrent call returns immediately.
    pub async fn shutdown(&self) {
        let won = self.inner.state.send_if_modified(|state| {
            if state.terminating {
                return false;
            }
            state.terminating = true;
            true
        });
        if !won {
            tracing::debug!("Shutdown already in progress");
            return;
        }

        let started = Instant::now();
        tracing::info!(
            shutdown_delay_secs = self.inner.shutdown_delay.map(|d| d.as_secs_f64()),
            termination_grace_period_secs =
                self.inner.termination_grace_period.map(|d| d.as_secs_f64()),
            "Shutdown initiated"
        );
        metrics::record_shutdown_initiated();

        if let Some(grace) = self.inner.termination_grace_period {
            arm_forced_termination(
                self.inner.terminator.clone(),
                grace,
                "termination_grace_period",
            );
        }

        if let Some(delay) = self.inner.shutdown_delay {
            tracing::info!(delay_secs = delay.as_secs_f64(), "Delaying shutdown");
            tokio::time::sleep(delay).await;
        }

        let pending = self.pending_count();
        if pending > 0 {
            tracing::info!(pending, "Waiting for pending tasks");
            let mut rx = self.inner.state.subscribe();
            let _ = rx.wait_for(|state| state.pending_tasks.is_empty()).await;
        }

        self.run_termination_hooks().await;

        self.inner.state.send_modify(|state| state.terminated = true);
        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Shutdown sequence complete"
        );

        arm_forced_termination(
            self.inner.terminator.clone(),
            self.inner.final_termination_delay,
            "final_fallback",
        );
    }

    async fn run_termination_hooks(&self) {
        let hooks = self
            .inner
            .hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_default();
        if hooks.is_empty() {
            return;
        }

        tracing::info!(hooks = hooks.len(), "Running termination hooks");
        let handles = hooks.into_iter().map(|hook| tokio::spawn(hook()));
        let results = join_all(handles).await;

        let mut failed = 0;
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(Ok(())) => metrics::record_hook_result("ok"),
                Ok(Err(error)) => {
                    failed += 1;
                    metrics::record_hook_result("error");
                    tracing::warn!(hook = index, error = %error, "Termination hook failed");
                }
                Err(error) => {
                    failed += 1;
                    metrics::record_hook_result("panic");
                    tracing::warn!(hook = index, error = %error, "Termination hook panicked");
                }
            }
        }
        tracing::info!(failed, "Termination hooks finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{BoxError, Status};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn quiet_lifecycle(terminations: Arc<AtomicUsize>) -> Lifecycle {
        Lifecycle::builder()
            .shutdown_delay(None)
            .termination_grace_period(None)
            .terminator(move || {
                terminations.fetch_add(1, Ordering::SeqCst);
            })
            .build()
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_marks_terminating_and_blocks_readiness_changes() {
        let lifecycle = quiet_lifecycle(Arc::new(AtomicUsize::new(0)));
        lifecycle.mark_ready();
        lifecycle.shutdown().await;

        assert_eq!(lifecycle.status(), Status::Terminating);
        assert!(!lifecycle.is_live());

        lifecycle.mark_not_ready();
        assert!(lifecycle.is_ready(), "ready flag is frozen once terminating");
        assert_eq!(lifecycle.status(), Status::Terminating);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_and_panicking_hooks_do_not_stop_others() {
        let lifecycle = quiet_lifecycle(Arc::new(AtomicUsize::new(0)));
        let ran = Arc::new(AtomicUsize::new(0));

        lifecycle.register_termination_hook(|| async { Err(BoxError::from("flush failed")) });
        let fail = true;
        lifecycle.register_termination_hook(move || async move {
            if fail {
                panic!("hook panicked");
            }
            Ok(())
        });
        let r = ran.clone();
        lifecycle.register_termination_hook(move || async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        lifecycle.shutdown().await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hook_registered_after_shutdown_never_runs() {
        let lifecycle = quiet_lifecycle(Arc::new(AtomicUsize::new(0)));
        lifecycle.shutdown().await;

        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();
        lifecycle.register_termination_hook(move || async move {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn final_fallback_fires_after_hooks() {
        let terminations = Arc::new(AtomicUsize::new(0));
        let lifecycle = quiet_lifecycle(terminations.clone());

        lifecycle.shutdown().await;
        assert_eq!(terminations.load(Ordering::SeqCst), 0);

        tokio::time::sleep(FINAL_TERMINATION_FALLBACK + Duration::from_millis(10)).await;
        assert_eq!(terminations.load(Ordering::SeqCst), 1);
    }
}
