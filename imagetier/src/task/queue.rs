//! Bounded, keyed, lossy task queue.
//!
//! ```text
//!   put(k3) on a full queue (capacity 2, k1 running):
//!
//!   running: [k1]      waiting: [k2]         ← in flight = 2 = capacity
//!                              │
//!                     evict oldest waiting → k2 force-canceled
//!   running: [k1]      waiting: [k3]
//! ```
//!
//! Capacity bounds the number of in-flight tasks (running plus waiting);
//! only waiting tasks are ever evicted. A capacity of 0 means unbounded.
//!
//! Key conflicts follow the queue's [`ConflictPolicy`]. Independently of the
//! policy, a waiting task is never pulled while another task with the same
//! key holds the shared [`KeyLocks`], so at most one task per key executes at
//! a time across every queue sharing the lock set.

use super::handle::TaskHandle;
use super::lifecycle::Task;
use super::state::TaskState;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::debug;

/// What to do when a task arrives for a key that already has one in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// The new task supersedes the old one, which is canceled.
    #[default]
    Cancel,
    /// The new request joins the task already in flight.
    Follow,
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictPolicy::Cancel => write!(f, "cancel"),
            ConflictPolicy::Follow => write!(f, "follow"),
        }
    }
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cancel" => Ok(ConflictPolicy::Cancel),
            "follow" => Ok(ConflictPolicy::Follow),
            other => Err(format!("unknown conflict policy '{}'", other)),
        }
    }
}

/// Set of keys currently executing, shareable between queues.
#[derive(Clone, Default)]
pub struct KeyLocks {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Claim `key`. Returns false if it is already held.
    pub fn try_acquire(&self, key: &str) -> bool {
        self.lock().insert(key.to_string())
    }

    pub fn release(&self, key: &str) {
        self.lock().remove(key);
    }

    pub fn is_locked(&self, key: &str) -> bool {
        self.lock().contains(key)
    }
}

/// Result of [`TaskQueue::put`].
#[derive(Debug)]
pub enum Admission {
    /// The task was queued.
    Queued(TaskHandle),
    /// Follow policy: the request joined this task, already in flight.
    Joined(TaskHandle),
}

impl Admission {
    pub fn handle(self) -> TaskHandle {
        match self {
            Admission::Queued(h) | Admission::Joined(h) => h,
        }
    }

    pub fn is_joined(&self) -> bool {
        matches!(self, Admission::Joined(_))
    }
}

#[derive(Default)]
struct QueueInner {
    waiting: VecDeque<Arc<Task>>,
    /// Tasks pulled from this queue and not yet finished, by key
    running: HashMap<String, Arc<Task>>,
}

/// Lossy task queue for one tier.
pub struct TaskQueue {
    name: String,
    capacity: usize,
    policy: ConflictPolicy,
    inner: Mutex<QueueInner>,
    key_locks: KeyLocks,
    ignition: Arc<Notify>,
}

impl TaskQueue {
    /// Create a queue with its own key locks and ignition signal.
    ///
    /// # Arguments
    ///
    /// * `name` - Label for logs
    /// * `capacity` - Maximum in-flight tasks, 0 for unbounded
    /// * `policy` - Key conflict policy
    pub fn new(name: impl Into<String>, capacity: usize, policy: ConflictPolicy) -> Self {
        Self {
            name: name.into(),
            capacity,
            policy,
            inner: Mutex::new(QueueInner::default()),
            key_locks: KeyLocks::new(),
            ignition: Arc::new(Notify::new()),
        }
    }

    /// Share key locks with other queues.
    pub fn with_key_locks(mut self, key_locks: KeyLocks) -> Self {
        self.key_locks = key_locks;
        self
    }

    /// Wake this signal whenever work may have become available.
    pub fn with_ignition(mut self, ignition: Arc<Notify>) -> Self {
        self.ignition = ignition;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Signal fired when work may be available; hand it to an engine.
    pub fn ignition(&self) -> Arc<Notify> {
        Arc::clone(&self.ignition)
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Admit a task, resolving key conflicts and evicting the oldest waiting
    /// task if the queue is full.
    pub fn put(&self, task: Arc<Task>) -> Admission {
        let mut superseded: Vec<Arc<Task>> = Vec::new();
        let mut replaced: Option<Arc<Task>> = None;
        let mut evicted: Vec<Arc<Task>> = Vec::new();

        {
            let mut inner = self.lock();
            inner.waiting.retain(|t| t.state() == TaskState::Waiting);

            let key = task.key();
            let waiting_pos = inner.waiting.iter().position(|t| t.key() == key);
            let running = inner.running.get(key).cloned();

            match self.policy {
                ConflictPolicy::Follow => {
                    let existing = waiting_pos
                        .map(|pos| Arc::clone(&inner.waiting[pos]))
                        .or(running)
                        .filter(|t| t.state().is_cancellable());
                    if let Some(existing) = existing {
                        debug!(queue = %self.name, key = key, task_id = existing.id(), "joined in-flight task");
                        return Admission::Joined(TaskHandle::new(existing));
                    }
                }
                ConflictPolicy::Cancel => {
                    if let Some(pos) = waiting_pos {
                        replaced = inner.waiting.remove(pos);
                    }
                    if let Some(old) = running {
                        superseded.push(old);
                    }
                }
            }

            if self.capacity > 0 {
                while inner.waiting.len() + inner.running.len() >= self.capacity {
                    match inner.waiting.pop_front() {
                        Some(oldest) => evicted.push(oldest),
                        None => break,
                    }
                }
            }

            inner.waiting.push_back(Arc::clone(&task));
        }

        // A replaced waiting task has left the queue and must settle here.
        if let Some(old) = replaced {
            debug!(queue = %self.name, key = old.key(), task_id = old.id(), "replacing waiting task");
            old.force_cancel();
        }
        for old in superseded {
            debug!(queue = %self.name, key = old.key(), task_id = old.id(), "superseding running task");
            old.cancel();
        }
        for old in evicted {
            debug!(queue = %self.name, key = old.key(), task_id = old.id(), "queue full, evicting oldest waiting task");
            old.force_cancel();
        }

        self.ignition.notify_waiters();
        Admission::Queued(TaskHandle::new(task))
    }

    /// Take the oldest waiting task whose key is free, claiming its key.
    pub fn pull(&self) -> Option<Arc<Task>> {
        let mut inner = self.lock();
        let mut i = 0;
        while i < inner.waiting.len() {
            if inner.waiting[i].state() != TaskState::Waiting {
                inner.waiting.remove(i);
                continue;
            }
            if self.key_locks.try_acquire(inner.waiting[i].key()) {
                let task = inner.waiting.remove(i)?;
                inner
                    .running
                    .insert(task.key().to_string(), Arc::clone(&task));
                return Some(task);
            }
            i += 1;
        }
        None
    }

    /// Release a task obtained from [`pull`](TaskQueue::pull) once it has
    /// settled.
    pub fn finish(&self, task: &Arc<Task>) {
        {
            let mut inner = self.lock();
            if inner
                .running
                .get(task.key())
                .is_some_and(|t| Arc::ptr_eq(t, task))
            {
                inner.running.remove(task.key());
            }
        }
        self.key_locks.release(task.key());
        self.ignition.notify_waiters();
    }

    /// Cancel the task queued or running under `key`, honoring its
    /// cancelable flag. A waiting task that refuses stays queued.
    pub fn cancel(&self, key: &str) -> bool {
        let targets: Vec<Arc<Task>> = {
            let inner = self.lock();
            inner
                .waiting
                .iter()
                .filter(|t| t.key() == key)
                .chain(inner.running.get(key))
                .cloned()
                .collect()
        };
        let canceled = targets.iter().fold(false, |any, t| t.cancel() || any);
        if canceled {
            self.lock()
                .waiting
                .retain(|t| t.state() == TaskState::Waiting);
        }
        canceled
    }

    /// Drop every waiting task and force-cancel running ones.
    pub fn clear(&self) {
        let (waiting, running): (Vec<_>, Vec<_>) = {
            let mut inner = self.lock();
            (
                inner.waiting.drain(..).collect(),
                inner.running.values().cloned().collect(),
            )
        };
        debug!(
            queue = %self.name,
            waiting = waiting.len(),
            running = running.len(),
            "clearing queue"
        );
        for task in waiting.iter().chain(running.iter()) {
            task.force_cancel();
        }
    }

    /// Number of waiting tasks.
    pub fn len(&self) -> usize {
        self.lock().waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn running_count(&self) -> usize {
        self.lock().running.len()
    }
}
