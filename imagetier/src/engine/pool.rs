//! Fixed-size worker pool for one tier.
//!
//! ```text
//!                 ignition (Notify)
//!                        │
//!   ┌─────────┐    ┌─────▼─────┐     ┌──────────────┐
//!   │ source A│◄───┤ worker 0  ├────►│ Task::run()  │
//!   │ source B│◄───┤ worker 1  │     └──────────────┘
//!   │   ...   │    │   ...     │
//!   └─────────┘    └───────────┘
//!        round-robin pull
//! ```
//!
//! Workers sleep on the ignition signal while every source is empty and wake
//! whenever a queue admits a task, a task finishes, or a node unfreezes.

use super::tier::Tier;
use crate::task::{Task, TaskQueue};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// Something workers can pull tasks from.
pub trait TaskSource: Send + Sync {
    /// Next runnable task, if any. Returning `None` leaves the worker idle
    /// until the next ignition.
    fn pull(&self) -> Option<Arc<Task>>;

    /// Called once a pulled task has settled.
    fn finish(&self, task: &Arc<Task>);
}

impl TaskSource for TaskQueue {
    fn pull(&self) -> Option<Arc<Task>> {
        TaskQueue::pull(self)
    }

    fn finish(&self, task: &Arc<Task>) {
        TaskQueue::finish(self, task)
    }
}

struct EngineInner {
    tier: Tier,
    sources: Mutex<Vec<Arc<dyn TaskSource>>>,
    cursor: AtomicUsize,
    ignition: Arc<Notify>,
    shutdown: CancellationToken,
    executed: AtomicU64,
}

impl EngineInner {
    fn sources(&self) -> MutexGuard<'_, Vec<Arc<dyn TaskSource>>> {
        match self.sources.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Pull from registered sources round-robin, starting after the source
    /// served last.
    fn next_task(&self) -> Option<(Arc<dyn TaskSource>, Arc<Task>)> {
        let sources: Vec<Arc<dyn TaskSource>> = self.sources().clone();
        if sources.is_empty() {
            return None;
        }

        let start = self.cursor.fetch_add(1, Ordering::Relaxed);
        (0..sources.len()).find_map(|offset| {
            let source = &sources[(start + offset) % sources.len()];
            source.pull().map(|task| (Arc::clone(source), task))
        })
    }
}

/// Worker pool for one [`Tier`].
pub struct Engine {
    inner: Arc<EngineInner>,
    concurrency: usize,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Spawn `concurrency` workers on the current tokio runtime.
    ///
    /// Workers wait on `ignition`; share it with every queue feeding this
    /// engine.
    pub fn start(tier: Tier, concurrency: usize, ignition: Arc<Notify>) -> Self {
        let concurrency = concurrency.max(1);
        let inner = Arc::new(EngineInner {
            tier,
            sources: Mutex::new(Vec::new()),
            cursor: AtomicUsize::new(0),
            ignition,
            shutdown: CancellationToken::new(),
            executed: AtomicU64::new(0),
        });

        let workers = (0..concurrency)
            .map(|worker_id| tokio::spawn(worker_loop(Arc::clone(&inner), worker_id)))
            .collect();

        info!(tier = %tier, concurrency, "engine started");
        Self {
            inner,
            concurrency,
            workers: Mutex::new(workers),
        }
    }

    pub fn tier(&self) -> Tier {
        self.inner.tier
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Number of tasks workers have run to completion or cancellation.
    pub fn executed_count(&self) -> u64 {
        self.inner.executed.load(Ordering::Relaxed)
    }

    pub fn register(&self, source: Arc<dyn TaskSource>) {
        self.inner.sources().push(source);
        self.ignite();
    }

    pub fn unregister(&self, source: &Arc<dyn TaskSource>) {
        let target = Arc::as_ptr(source) as *const ();
        self.inner
            .sources()
            .retain(|s| Arc::as_ptr(s) as *const () != target);
    }

    /// Wake idle workers.
    pub fn ignite(&self) {
        self.inner.ignition.notify_waiters();
    }

    /// Stop the workers. Tasks already running finish first.
    pub fn shutdown(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        self.inner.shutdown.cancel();
        self.inner.sources().clear();
        debug!(tier = %self.inner.tier, "engine shutting down");
    }

    /// Wait for every worker to exit. Call after [`shutdown`](Engine::shutdown).
    pub async fn join(&self) {
        let workers: Vec<JoinHandle<()>> = match self.workers.lock() {
            Ok(mut guard) => guard.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        for worker in workers {
            let _ = worker.await;
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

async fn worker_loop(inner: Arc<EngineInner>, worker_id: usize) {
    trace!(tier = %inner.tier, worker_id, "worker started");
    loop {
        let notified = inner.ignition.notified();
        tokio::pin!(notified);
        // Register interest before looking for work so no wakeup is lost.
        notified.as_mut().enable();

        if inner.shutdown.is_cancelled() {
            break;
        }

        if let Some((source, task)) = inner.next_task() {
            trace!(tier = %inner.tier, worker_id, task_id = task.id(), key = task.key(), "running task");
            Arc::clone(&task).run().await;
            source.finish(&task);
            inner.executed.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        tokio::select! {
            _ = &mut notified => {}
            _ = inner.shutdown.cancelled() => break,
        }
    }
    trace!(tier = %inner.tier, worker_id, "worker stopped");
}
