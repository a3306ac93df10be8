//! The cancellable task state machine.
//!
//! A [`Task`] wraps a [`Job`] and drives it through
//! `Waiting → PreExecute → Executing → PostExecute → Complete`, with the
//! `Canceling → Canceled` branch available until `PostExecute`.
//!
//! # Phases
//!
//! ```text
//!  tier worker                      coordinator
//!  ───────────                      ───────────
//!  start()  ──────────────────────► on_pre_execute()
//!  execute(cancel).await
//!  finish() ──────────────────────► on_post_execute(canceled)
//!                                   state = Complete | Canceled
//! ```
//!
//! Cancellation is cooperative. A task canceled while `Waiting` settles at
//! once; a running task moves to `Canceling`, its cancellation token fires,
//! and it settles to `Canceled` when the current phase returns.

use super::coordinator::Coordinator;
use super::job::Job;
use super::state::TaskState;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

/// Global counter for task IDs.
static TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Task errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// `start()` called on a task that already left `Waiting`
    #[error("task '{key}' cannot start from state {state}")]
    IllegalStart { key: String, state: TaskState },
}

/// Per-task options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskOptions {
    /// Whether `cancel()` is honored. Forced cancellation ignores this.
    pub cancelable: bool,
    /// Force-cancel the task if it is still running this long after start.
    pub timeout: Option<Duration>,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            cancelable: true,
            timeout: None,
        }
    }
}

impl TaskOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancelable(mut self, cancelable: bool) -> Self {
        self.cancelable = cancelable;
        self
    }
}

/// A keyed, cancellable unit of work.
pub struct Task {
    id: u64,
    key: String,
    job: Arc<dyn Job>,
    options: TaskOptions,
    state: Mutex<TaskState>,
    state_tx: watch::Sender<TaskState>,
    token: CancellationToken,
    /// Set once `on_post_execute` has been scheduled
    posted: AtomicBool,
    coordinator: Coordinator,
}

impl Task {
    pub fn new(
        key: impl Into<String>,
        job: Arc<dyn Job>,
        options: TaskOptions,
        coordinator: Coordinator,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(TaskState::Waiting);
        Arc::new(Self {
            id: TASK_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            key: key.into(),
            job,
            options,
            state: Mutex::new(TaskState::Waiting),
            state_tx,
            token: CancellationToken::new(),
            posted: AtomicBool::new(false),
            coordinator,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn options(&self) -> TaskOptions {
        self.options
    }

    pub fn state(&self) -> TaskState {
        *self.lock()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<TaskState> {
        self.state_tx.subscribe()
    }

    /// Returns true if cancellation was requested or completed.
    pub fn is_canceled(&self) -> bool {
        matches!(self.state(), TaskState::Canceling | TaskState::Canceled)
    }

    fn lock(&self) -> MutexGuard<'_, TaskState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn set(&self, guard: &mut MutexGuard<'_, TaskState>, next: TaskState) {
        trace!(task_id = self.id, key = %self.key, from = %**guard, to = %next, "task transition");
        **guard = next;
        self.state_tx.send_replace(next);
    }

    /// Move from `Waiting` to `PreExecute`.
    ///
    /// Returns `Ok(false)` if the task was already canceled.
    ///
    /// # Errors
    ///
    /// [`TaskError::IllegalStart`] from any other state.
    pub fn start(&self) -> Result<bool, TaskError> {
        let mut state = self.lock();
        match *state {
            TaskState::Waiting => {
                self.set(&mut state, TaskState::PreExecute);
                Ok(true)
            }
            TaskState::Canceling | TaskState::Canceled => Ok(false),
            other => Err(TaskError::IllegalStart {
                key: self.key.clone(),
                state: other,
            }),
        }
    }

    /// Request cancellation, honoring the cancelable flag.
    ///
    /// Returns true if the request took effect.
    pub fn cancel(self: &Arc<Self>) -> bool {
        if !self.options.cancelable {
            debug!(task_id = self.id, key = %self.key, "cancel ignored: task not cancelable");
            return false;
        }
        self.request_cancel()
    }

    /// Cancel regardless of the cancelable flag. Used by timeouts and by
    /// queues dropping work.
    pub fn force_cancel(self: &Arc<Self>) -> bool {
        self.request_cancel()
    }

    fn request_cancel(self: &Arc<Self>) -> bool {
        let mut state = self.lock();
        match *state {
            TaskState::Waiting => {
                self.set(&mut state, TaskState::Canceled);
                drop(state);
                self.token.cancel();
                self.post_terminal(true);
                true
            }
            TaskState::PreExecute | TaskState::Executing => {
                self.set(&mut state, TaskState::Canceling);
                drop(state);
                self.token.cancel();
                true
            }
            _ => false,
        }
    }

    /// Drive the full lifecycle. Called by tier workers.
    ///
    /// Returns once `on_post_execute` has run, or immediately if the task was
    /// canceled before it could start.
    pub async fn run(self: Arc<Self>) {
        match self.start() {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                error!(task_id = self.id, error = %e, "refusing to run task");
                return;
            }
        }

        self.arm_timeout();

        let job = Arc::clone(&self.job);
        if self.coordinator.run(move || job.on_pre_execute()).await.is_none() {
            warn!(task_id = self.id, key = %self.key, "pre-execute hook panicked");
        }

        if self.enter_executing() {
            Arc::clone(&self.job).execute(self.token.clone()).await;
        }

        self.finish().await;
    }

    fn enter_executing(&self) -> bool {
        let mut state = self.lock();
        if *state == TaskState::PreExecute {
            self.set(&mut state, TaskState::Executing);
            true
        } else {
            false
        }
    }

    async fn finish(self: &Arc<Self>) {
        let canceled = {
            let mut state = self.lock();
            if *state == TaskState::Canceling {
                true
            } else {
                self.set(&mut state, TaskState::PostExecute);
                false
            }
        };

        if let Some(done) = self.post_terminal(canceled) {
            let _ = done.await;
        }
    }

    /// Schedule `on_post_execute` and the final transition on the
    /// coordinator. Only the first call for a task does anything.
    fn post_terminal(self: &Arc<Self>, canceled: bool) -> Option<oneshot::Receiver<()>> {
        if self.posted.swap(true, Ordering::AcqRel) {
            return None;
        }

        let (done_tx, done_rx) = oneshot::channel();
        let task = Arc::clone(self);
        self.coordinator.post(move || {
            let job = Arc::clone(&task.job);
            if panic::catch_unwind(AssertUnwindSafe(|| job.on_post_execute(canceled))).is_err() {
                error!(task_id = task.id, key = %task.key, "post-execute hook panicked");
            }
            let mut state = task.lock();
            let last = if canceled {
                TaskState::Canceled
            } else {
                TaskState::Complete
            };
            task.set(&mut state, last);
            drop(state);
            let _ = done_tx.send(());
        });
        Some(done_rx)
    }

    fn arm_timeout(self: &Arc<Self>) {
        let Some(timeout) = self.options.timeout else {
            return;
        };

        let task = Arc::clone(self);
        let mut state_rx = self.subscribe();
        tokio::spawn(async move {
            let settled = async {
                while !state_rx.borrow_and_update().is_terminal() {
                    if state_rx.changed().await.is_err() {
                        break;
                    }
                }
            };
            tokio::select! {
                _ = settled => {}
                _ = tokio::time::sleep(timeout) => {
                    if task.force_cancel() {
                        warn!(
                            task_id = task.id,
                            key = %task.key,
                            timeout_ms = timeout.as_millis() as u64,
                            "task timed out, canceling"
                        );
                    }
                }
            }
        });
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("job", &self.job.name())
            .field("state", &self.state())
            .finish()
    }
}
