//! Cancellable tasks and the queues that feed tier workers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐  put   ┌──────────────┐  pull   ┌────────────────┐
//! │  producer   │ ─────► │  TaskQueue   │ ──────► │ Engine worker  │
//! └─────────────┘        │ (lossy, keyed)│        │  Task::run()   │
//!                        └──────────────┘         └───────┬────────┘
//!                                                          │ PRE / POST
//!                                                          ▼
//!                                                  ┌───────────────┐
//!                                                  │  Coordinator  │
//!                                                  └───────────────┘
//! ```
//!
//! - [`Task`] owns the state machine and exactly-once post delivery.
//! - [`TaskQueue`] applies capacity, key conflicts and per-key exclusion.
//! - [`Coordinator`] serializes hooks and consumer callbacks.

mod coordinator;
mod handle;
mod job;
mod lifecycle;
mod queue;
mod state;

pub use coordinator::Coordinator;
pub use handle::TaskHandle;
pub use job::{Job, JobFuture};
pub use lifecycle::{Task, TaskError, TaskOptions};
pub use queue::{Admission, ConflictPolicy, KeyLocks, TaskQueue};
pub use state::TaskState;
