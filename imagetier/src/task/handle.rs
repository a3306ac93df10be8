//! Task handle for status queries and cancellation.
//!
//! A [`TaskHandle`] is returned when a task is admitted to a
//! [`TaskQueue`](super::TaskQueue).
//!
//! # Example
//!
//! ```ignore
//! use imagetier::task::{TaskQueue, TaskState};
//!
//! let mut handle = queue.put(task).handle();
//!
//! if handle.state() == TaskState::Waiting {
//!     handle.cancel();
//! }
//! let last = handle.wait().await;
//! ```

use super::lifecycle::Task;
use super::state::TaskState;
use std::sync::Arc;
use tokio::sync::watch;

/// Cloneable handle to a queued task. All clones refer to the same task.
#[derive(Clone)]
pub struct TaskHandle {
    task: Arc<Task>,
    state_rx: watch::Receiver<TaskState>,
}

impl TaskHandle {
    pub(crate) fn new(task: Arc<Task>) -> Self {
        let state_rx = task.subscribe();
        Self { task, state_rx }
    }

    pub fn id(&self) -> u64 {
        self.task.id()
    }

    pub fn key(&self) -> &str {
        self.task.key()
    }

    /// Current state, without waiting.
    pub fn state(&self) -> TaskState {
        self.task.state()
    }

    /// Request cancellation. See [`Task::cancel`].
    pub fn cancel(&self) -> bool {
        self.task.cancel()
    }

    /// Wait until the task reaches a terminal state and return it.
    pub async fn wait(&mut self) -> TaskState {
        loop {
            let state = self.task.state();
            if state.is_terminal() {
                return state;
            }
            if self.state_rx.changed().await.is_err() {
                return self.task.state();
            }
        }
    }

    /// Returns true if both handles refer to the same task.
    pub fn same_task(&self, other: &TaskHandle) -> bool {
        Arc::ptr_eq(&self.task, &other.task)
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id())
            .field("key", &self.key())
            .field("state", &self.state())
            .finish()
    }
}
