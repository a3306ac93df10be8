//! The work carried by a task.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Future returned by [`Job::execute`].
pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Work driven through the task lifecycle.
///
/// `on_pre_execute` and `on_post_execute` run on the coordinator;
/// `execute` runs on a tier worker. A job keeps its own result and reads it
/// back in `on_post_execute`.
///
/// `on_post_execute` is called exactly once for every task that was created,
/// including tasks canceled before they ever started.
pub trait Job: Send + Sync + 'static {
    /// Short label for logs.
    fn name(&self) -> &str;

    fn on_pre_execute(&self) {}

    /// Do the work. `cancel` fires when the task is canceled; long-running
    /// I/O should race against it.
    fn execute(self: Arc<Self>, cancel: CancellationToken) -> JobFuture;

    /// Called once the task settles. `canceled` is true if the task ended
    /// by cancellation.
    fn on_post_execute(&self, canceled: bool);
}
