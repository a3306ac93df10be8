//! Lifecycle-scoped load dispatcher.
//!
//! ```text
//!   load(url) ──► cache hit? ──yes──► callback (inline)
//!                    │ no
//!                    ▼
//!              stub pool (key → StubGroup)
//!                    │ new group
//!                    ▼
//!   ┌──────────┐  ┌──────────┐  ┌──────────┐
//!   │ memory q │  │  disk q  │  │network q │ ◄── pulled by the tier engines
//!   └────┬─────┘  └────┬─────┘  └────┬─────┘
//!        └─────────────┴─────────────┘
//!                      │ StageReport (on the coordinator)
//!                      ▼
//!               dispatch loop ──► promote to next tier | retry | settle group
//! ```
//!
//! A node owns its queues and pending groups. Freezing stops both the
//! engines pulling from its queues and the dispatch loop; destroying it
//! cancels everything and delivers `Canceled` to every waiting consumer.

use super::server::Server;
use super::stage::{StageJob, StageOutcome, StageReport};
use super::stub::{deliver, Stub, StubGroup, Ticket};
use crate::engine::{TaskSource, Tier};
use crate::request::{
    DisplayTarget, FailureReason, ImageRequest, LoadCallback, LoadEvent, LoadResult,
};
use crate::task::{ConflictPolicy, Task, TaskOptions, TaskQueue};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// A node's queue for one tier, as seen by that tier's engine.
struct NodeTier {
    queue: TaskQueue,
    frozen: watch::Receiver<bool>,
}

impl TaskSource for NodeTier {
    fn pull(&self) -> Option<Arc<Task>> {
        if *self.frozen.borrow() {
            return None;
        }
        self.queue.pull()
    }

    fn finish(&self, task: &Arc<Task>) {
        self.queue.finish(task)
    }
}

pub(crate) struct NodeInner {
    id: String,
    server: Arc<Server>,
    /// Indexed by [`Tier::index`]
    tiers: [Arc<NodeTier>; 3],
    stubs: DashMap<String, StubGroup>,
    reports: mpsc::UnboundedSender<StageReport>,
    frozen: watch::Sender<bool>,
    destroyed: AtomicBool,
    shutdown: CancellationToken,
    next_stub: AtomicU64,
}

/// Handle to a node. Clones share the node.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

/// Identifies one `load` call so it can be detached later.
#[derive(Clone)]
pub struct LoadHandle {
    key: String,
    stub_id: u64,
    node: Weak<NodeInner>,
}

impl LoadHandle {
    fn settled(key: String) -> Self {
        Self {
            key,
            stub_id: 0,
            node: Weak::new(),
        }
    }

    /// Cache key of the request.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Withdraw this request. It receives `Canceled` unless its result was
    /// already delivered. Other requests for the same image are unaffected;
    /// if none remain, the load is canceled.
    ///
    /// Returns false if there was nothing to detach.
    pub fn detach(&self) -> bool {
        match self.node.upgrade() {
            Some(node) => node.detach(&self.key, self.stub_id),
            None => false,
        }
    }
}

impl fmt::Debug for LoadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadHandle")
            .field("key", &self.key)
            .field("stub_id", &self.stub_id)
            .finish()
    }
}

impl Node {
    pub(crate) fn new(id: impl Into<String>, server: Arc<Server>) -> Self {
        let id = id.into();
        let (frozen, _) = watch::channel(false);
        let (reports, reports_rx) = mpsc::unbounded_channel();

        let tiers = Tier::ALL.map(|tier| {
            // Duplicate handling happens in the stub pool, so a second task
            // for a key here is always a replacement.
            let queue = TaskQueue::new(
                format!("{}/{}", id, tier),
                server.settings.queue_capacity(tier),
                ConflictPolicy::Cancel,
            )
            .with_key_locks(server.key_locks.clone())
            .with_ignition(Arc::clone(&server.ignition));
            Arc::new(NodeTier {
                queue,
                frozen: frozen.subscribe(),
            })
        });

        let inner = Arc::new(NodeInner {
            id,
            server: Arc::clone(&server),
            tiers,
            stubs: DashMap::new(),
            reports,
            frozen,
            destroyed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            next_stub: AtomicU64::new(1),
        });

        for tier in Tier::ALL {
            let source: Arc<dyn TaskSource> = inner.tiers[tier.index()].clone();
            server.engine(tier).register(source);
        }
        server
            .runtime
            .spawn(dispatch_loop(Arc::clone(&inner), reports_rx));

        info!(node = %inner.id, "node created");
        Self { inner }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Load an image, calling `on_result` exactly once with the outcome.
    ///
    /// A memory cache hit calls `on_result` before this returns. Everything
    /// else is delivered on the loader's coordinator.
    pub fn load<F>(
        &self,
        url: &str,
        width: u32,
        height: u32,
        target: Option<DisplayTarget>,
        on_result: F,
    ) -> LoadHandle
    where
        F: FnOnce(LoadEvent) + Send + Sync + 'static,
    {
        self.inner
            .load(ImageRequest::new(url, width, height), target, Box::new(on_result))
    }

    /// Like [`load`](Node::load), but the outcome arrives on a channel.
    pub fn load_async(
        &self,
        url: &str,
        width: u32,
        height: u32,
        target: Option<DisplayTarget>,
    ) -> (LoadHandle, oneshot::Receiver<LoadEvent>) {
        let (tx, rx) = oneshot::channel();
        let handle = self.load(url, width, height, target, move |event| {
            let _ = tx.send(event);
        });
        (handle, rx)
    }

    /// Detach the oldest request for this image and mark its cached
    /// resource unused.
    pub fn unused(&self, url: &str, width: u32, height: u32) {
        let key = ImageRequest::new(url, width, height).cache_key();
        let oldest = self
            .inner
            .stubs
            .get(&key)
            .and_then(|group| group.members.front().map(|stub| stub.id));
        if let Some(stub_id) = oldest {
            self.inner.detach(&key, stub_id);
        }
        self.inner.server.ctx.cache.mark_unused(&key);
    }

    /// Stop pulling and dispatching. Queued work stays queued.
    pub fn freeze(&self) {
        if !self.inner.frozen.send_replace(true) {
            debug!(node = %self.inner.id, "node frozen");
        }
    }

    pub fn unfreeze(&self) {
        if self.inner.frozen.send_replace(false) {
            debug!(node = %self.inner.id, "node unfrozen");
            self.inner.server.ignition.notify_waiters();
        }
    }

    pub fn is_frozen(&self) -> bool {
        *self.inner.frozen.borrow()
    }

    /// Cancel all work and deliver `Canceled` to every pending request.
    /// Later calls do nothing.
    pub fn destroy(&self) {
        self.inner.destroy();
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }

    /// Number of images with requests still waiting.
    pub fn pending_count(&self) -> usize {
        self.inner.stubs.len()
    }

    /// Waiting tasks in one tier's queue.
    pub fn queued(&self, tier: Tier) -> usize {
        self.inner.tiers[tier.index()].queue.len()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.inner.id)
            .field("frozen", &self.is_frozen())
            .field("destroyed", &self.is_destroyed())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl NodeInner {
    fn load(
        self: &Arc<Self>,
        request: ImageRequest,
        target: Option<DisplayTarget>,
        callback: LoadCallback,
    ) -> LoadHandle {
        let key = request.cache_key();
        let coordinator = &self.server.coordinator;

        if self.destroyed.load(Ordering::Acquire) {
            debug!(node = %self.id, url = %request.url, "load on destroyed node");
            let stub = Stub {
                id: 0,
                target,
                callback,
            };
            deliver(coordinator, request, vec![stub], LoadResult::Canceled);
            return LoadHandle::settled(key);
        }

        if let Some(resource) = self.server.ctx.cache.get(&key) {
            trace!(key = %key, "memory cache hit");
            callback(LoadEvent {
                request,
                target,
                result: LoadResult::Succeeded(resource),
            });
            return LoadHandle::settled(key);
        }

        let stub = Stub {
            id: self.next_stub.fetch_add(1, Ordering::Relaxed),
            target,
            callback,
        };
        let handle = LoadHandle {
            key: key.clone(),
            stub_id: stub.id,
            node: Arc::downgrade(self),
        };

        let policy = self.server.settings.duplicate_policy;
        let ticket = Arc::new(Ticket::new(request.clone()));
        let superseded = match self.stubs.entry(key.clone()) {
            Entry::Occupied(mut entry) => match policy {
                ConflictPolicy::Follow => {
                    entry.get_mut().members.push_back(stub);
                    debug!(key = %key, waiters = entry.get().members.len(), "joined in-flight load");
                    return handle;
                }
                ConflictPolicy::Cancel => {
                    Some(entry.insert(StubGroup::new(Arc::clone(&ticket), stub)))
                }
            },
            Entry::Vacant(entry) => {
                entry.insert(StubGroup::new(Arc::clone(&ticket), stub));
                None
            }
        };

        if let Some(old) = superseded {
            debug!(key = %key, canceled = old.members.len(), "superseding in-flight load");
            old.ticket.cancel();
            deliver(
                coordinator,
                request,
                old.members.into_iter().collect(),
                LoadResult::Canceled,
            );
        }

        // A destroy that ran since the check above may have missed this group.
        if self.destroyed.load(Ordering::Acquire) {
            if let Some((_, group)) = self
                .stubs
                .remove_if(&key, |_, group| Arc::ptr_eq(&group.ticket, &ticket))
            {
                debug!(node = %self.id, key = %key, "node destroyed during load");
                deliver(
                    coordinator,
                    ticket.request().clone(),
                    group.members.into_iter().collect(),
                    LoadResult::Canceled,
                );
            }
            return handle;
        }

        let entry = if self.server.settings.memory_recheck {
            Tier::Memory
        } else {
            Tier::Disk
        };
        self.enqueue(&ticket, entry);
        handle
    }

    fn enqueue(&self, ticket: &Arc<Ticket>, tier: Tier) {
        let job = StageJob::new(
            tier,
            Arc::clone(ticket),
            Arc::clone(&self.server.ctx),
            self.reports.clone(),
        );
        let options = TaskOptions {
            cancelable: true,
            timeout: self.server.settings.task_timeout,
        };
        let task = Task::new(
            ticket.key(),
            Arc::new(job),
            options,
            self.server.coordinator.clone(),
        );
        ticket.set_current(Arc::clone(&task));
        trace!(node = %self.id, key = ticket.key(), tier = %tier, task_id = task.id(), "enqueue stage");
        let queue = &self.tiers[tier.index()].queue;
        queue.put(task);
        if self.destroyed.load(Ordering::Acquire) {
            queue.clear();
        }
    }

    /// Whether `ticket` still backs the group for its key.
    fn is_current(&self, ticket: &Arc<Ticket>) -> bool {
        self.stubs
            .get(ticket.key())
            .is_some_and(|group| Arc::ptr_eq(&group.ticket, ticket))
    }

    fn handle_report(&self, report: StageReport) {
        let StageReport {
            ticket,
            tier,
            outcome,
        } = report;
        let key = ticket.key();

        if !self.is_current(&ticket) {
            // Nobody waits on this load any more.
            if matches!(outcome, StageOutcome::Loaded(_)) && !self.stubs.contains_key(key) {
                self.server.ctx.cache.mark_unused(key);
            }
            trace!(key = key, tier = %tier, "dropping report for abandoned load");
            return;
        }

        match outcome {
            StageOutcome::Failed(FailureReason::Cache(reason)) => {
                // Fatal on any tier: neither promoted nor retried.
                warn!(url = %ticket.request().url, tier = %tier, reason = %reason, "load failed, memory cache overflow");
                self.server.ctx.cache.mark_unused(key);
                self.settle(&ticket, LoadResult::Failed(FailureReason::Cache(reason)));
            }
            StageOutcome::Loaded(resource) => {
                self.settle(&ticket, LoadResult::Succeeded(resource));
            }
            StageOutcome::Canceled => {
                self.settle(&ticket, LoadResult::Canceled);
            }
            StageOutcome::Miss if tier != Tier::Network => self.promote(&ticket, tier),
            StageOutcome::Failed(reason) if tier != Tier::Network => {
                debug!(key = key, tier = %tier, reason = %reason, "stage failed, promoting");
                self.promote(&ticket, tier);
            }
            StageOutcome::Miss => {
                self.settle(
                    &ticket,
                    LoadResult::Failed(FailureReason::Fetch("no data".to_string())),
                );
            }
            StageOutcome::Failed(reason) => {
                let reload_times = self.server.settings.reload_times;
                if ticket.reloads() < reload_times {
                    let attempt = ticket.bump_reloads();
                    debug!(key = key, attempt, reload_times, reason = %reason, "retrying network load");
                    self.enqueue(&ticket, Tier::Network);
                } else {
                    warn!(url = %ticket.request().url, reason = %reason, "load failed");
                    self.settle(&ticket, LoadResult::Failed(reason));
                }
            }
        }
    }

    fn promote(&self, ticket: &Arc<Ticket>, from: Tier) {
        if let Some(next) = from.next() {
            self.enqueue(ticket, next);
        }
    }

    /// Remove the group backed by `ticket` and deliver `result` to it.
    fn settle(&self, ticket: &Arc<Ticket>, result: LoadResult) {
        let Some((_, group)) = self
            .stubs
            .remove_if(ticket.key(), |_, group| Arc::ptr_eq(&group.ticket, ticket))
        else {
            return;
        };

        trace!(key = ticket.key(), waiters = group.members.len(), result = %result, "settling load");
        deliver(
            &self.server.coordinator,
            ticket.request().clone(),
            group.members.into_iter().collect(),
            result,
        );
    }

    fn detach(&self, key: &str, stub_id: u64) -> bool {
        let (stub, request, emptied) = {
            let Some(mut group) = self.stubs.get_mut(key) else {
                return false;
            };
            let Some(pos) = group.members.iter().position(|s| s.id == stub_id) else {
                return false;
            };
            let Some(stub) = group.members.remove(pos) else {
                return false;
            };
            let emptied = group
                .members
                .is_empty()
                .then(|| Arc::clone(&group.ticket));
            (stub, group.ticket.request().clone(), emptied)
        };

        if let Some(ticket) = emptied {
            let removed = self.stubs.remove_if(key, |_, group| {
                group.members.is_empty() && Arc::ptr_eq(&group.ticket, &ticket)
            });
            if removed.is_some() {
                debug!(key = key, "last waiter detached, canceling load");
                ticket.cancel();
            }
        }

        deliver(&self.server.coordinator, request, vec![stub], LoadResult::Canceled);
        true
    }

    fn destroy(&self) {
        if self
            .destroyed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        for tier in Tier::ALL {
            let source: Arc<dyn TaskSource> = self.tiers[tier.index()].clone();
            self.server.engine(tier).unregister(&source);
            self.tiers[tier.index()].queue.clear();
        }

        let keys: Vec<String> = self.stubs.iter().map(|entry| entry.key().clone()).collect();
        let mut canceled = 0;
        for key in keys {
            if let Some((_, group)) = self.stubs.remove(&key) {
                group.ticket.cancel();
                canceled += group.members.len();
                deliver(
                    &self.server.coordinator,
                    group.ticket.request().clone(),
                    group.members.into_iter().collect(),
                    LoadResult::Canceled,
                );
            }
        }

        self.shutdown.cancel();
        info!(node = %self.id, canceled, "node destroyed");
    }
}

async fn dispatch_loop(node: Arc<NodeInner>, mut reports: mpsc::UnboundedReceiver<StageReport>) {
    let mut frozen = node.frozen.subscribe();
    loop {
        tokio::select! {
            biased;
            _ = node.shutdown.cancelled() => break,
            thawed = async { frozen.wait_for(|is_frozen| !*is_frozen).await.is_ok() } => {
                if !thawed {
                    break;
                }
            }
        }

        tokio::select! {
            biased;
            _ = node.shutdown.cancelled() => break,
            report = reports.recv() => match report {
                Some(report) => node.handle_report(report),
                None => break,
            },
        }
    }
    trace!(node = %node.id, "dispatch loop stopped");
}
