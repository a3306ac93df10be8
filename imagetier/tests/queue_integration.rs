//! Integration tests for lossy queues feeding a tier engine.
//!
//! These tests verify:
//! - Oldest waiting task eviction while a task is running
//! - Exactly one post per admitted task
//! - Per-key exclusion across queues sharing key locks

use imagetier::engine::{Engine, TaskSource, Tier};
use imagetier::task::{
    ConflictPolicy, Coordinator, Job, JobFuture, KeyLocks, Task, TaskOptions, TaskQueue, TaskState,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;

// =============================================================================
// Test Helpers
// =============================================================================

/// Records execution order; blocks on `gate` until a permit is added.
struct GatedJob {
    key: String,
    gate: Arc<Semaphore>,
    log: Arc<Mutex<Vec<String>>>,
    running: Arc<AtomicUsize>,
    max_running: Arc<AtomicUsize>,
}

impl Job for GatedJob {
    fn name(&self) -> &str {
        "gated"
    }

    fn execute(self: Arc<Self>, cancel: CancellationToken) -> JobFuture {
        Box::pin(async move {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            self.log.lock().unwrap().push(format!("exec {}", self.key));
            tokio::select! {
                permit = self.gate.acquire() => {
                    if let Ok(permit) = permit {
                        permit.forget();
                    }
                }
                _ = cancel.cancelled() => {}
            }
            self.running.fetch_sub(1, Ordering::SeqCst);
        })
    }

    fn on_post_execute(&self, canceled: bool) {
        self.log
            .lock()
            .unwrap()
            .push(format!("post {} canceled={}", self.key, canceled));
    }
}

struct Harness {
    coordinator: Coordinator,
    gate: Arc<Semaphore>,
    log: Arc<Mutex<Vec<String>>>,
    running: Arc<AtomicUsize>,
    max_running: Arc<AtomicUsize>,
}

impl Harness {
    fn new() -> Self {
        let (coordinator, _) = Coordinator::start();
        Self {
            coordinator,
            gate: Arc::new(Semaphore::new(0)),
            log: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(AtomicUsize::new(0)),
            max_running: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn task(&self, key: &str) -> Arc<Task> {
        let job = GatedJob {
            key: key.to_string(),
            gate: Arc::clone(&self.gate),
            log: Arc::clone(&self.log),
            running: Arc::clone(&self.running),
            max_running: Arc::clone(&self.max_running),
        };
        Task::new(key, Arc::new(job), TaskOptions::default(), self.coordinator.clone())
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

async fn wait_for_state(task: &Arc<Task>, state: TaskState) {
    let mut rx = task.subscribe();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == state))
        .await
        .expect("timed out waiting for task state")
        .expect("task dropped");
}

// =============================================================================
// Integration Tests
// =============================================================================

#[tokio::test]
async fn test_full_queue_evicts_waiting_task_while_first_runs() {
    let h = Harness::new();
    let queue = Arc::new(TaskQueue::new("disk", 2, ConflictPolicy::Cancel));
    let engine = Engine::start(Tier::Disk, 1, queue.ignition());
    engine.register(Arc::clone(&queue) as Arc<dyn TaskSource>);

    let k1 = h.task("k1");
    queue.put(Arc::clone(&k1));
    wait_for_state(&k1, TaskState::Executing).await;

    let k2 = h.task("k2");
    let k3 = h.task("k3");
    queue.put(Arc::clone(&k2));
    queue.put(Arc::clone(&k3));

    assert_eq!(k2.state(), TaskState::Canceled, "k2 evicted by k3");
    assert_eq!(k3.state(), TaskState::Waiting);

    h.gate.add_permits(2);
    wait_for_state(&k1, TaskState::Complete).await;
    wait_for_state(&k3, TaskState::Complete).await;

    let log = h.log();
    let execs: Vec<&String> = log.iter().filter(|l| l.starts_with("exec")).collect();
    assert_eq!(execs, vec!["exec k1", "exec k3"]);
    assert_eq!(
        log.iter().filter(|l| l.starts_with("post")).count(),
        3,
        "every admitted task posts once: {log:?}"
    );
    assert!(log.contains(&"post k2 canceled=true".to_string()));

    engine.shutdown();
    engine.join().await;
}

#[tokio::test]
async fn test_cancel_policy_only_latest_completes() {
    let h = Harness::new();
    let queue = Arc::new(TaskQueue::new("net", 0, ConflictPolicy::Cancel));
    let engine = Engine::start(Tier::Network, 2, queue.ignition());
    engine.register(Arc::clone(&queue) as Arc<dyn TaskSource>);

    let tasks: Vec<Arc<Task>> = (0..4).map(|_| h.task("same")).collect();
    for task in &tasks {
        queue.put(Arc::clone(task));
    }
    h.gate.add_permits(4);

    let last = tasks.last().unwrap();
    wait_for_state(last, TaskState::Complete).await;
    for task in &tasks[..3] {
        wait_for_state(task, TaskState::Canceled).await;
    }
    assert!(h.max_running.load(Ordering::SeqCst) <= 1);

    engine.shutdown();
    engine.join().await;
}

#[tokio::test]
async fn test_shared_key_locks_serialize_execution() {
    let h = Harness::new();
    let locks = KeyLocks::new();
    let ignition = Arc::new(Notify::new());
    let disk = Arc::new(
        TaskQueue::new("disk", 0, ConflictPolicy::Follow)
            .with_key_locks(locks.clone())
            .with_ignition(Arc::clone(&ignition)),
    );
    let net = Arc::new(
        TaskQueue::new("net", 0, ConflictPolicy::Follow)
            .with_key_locks(locks)
            .with_ignition(Arc::clone(&ignition)),
    );
    let engine = Engine::start(Tier::Disk, 4, ignition);
    engine.register(Arc::clone(&disk) as Arc<dyn TaskSource>);
    engine.register(Arc::clone(&net) as Arc<dyn TaskSource>);

    let first = h.task("k");
    let second = h.task("k");
    disk.put(Arc::clone(&first));
    net.put(Arc::clone(&second));

    wait_for_state(&first, TaskState::Executing).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(second.state(), TaskState::Waiting, "same key must wait");

    h.gate.add_permits(2);
    wait_for_state(&second, TaskState::Complete).await;
    assert_eq!(h.max_running.load(Ordering::SeqCst), 1);

    engine.shutdown();
    engine.join().await;
}

#[tokio::test]
async fn test_engine_idles_and_wakes_on_put() {
    let h = Harness::new();
    let queue = Arc::new(TaskQueue::new("memory", 0, ConflictPolicy::Cancel));
    let engine = Engine::start(Tier::Memory, 1, queue.ignition());
    engine.register(Arc::clone(&queue) as Arc<dyn TaskSource>);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(engine.executed_count(), 0);

    h.gate.add_permits(1);
    let task = h.task("late");
    queue.put(Arc::clone(&task));
    wait_for_state(&task, TaskState::Complete).await;

    engine.shutdown();
    engine.join().await;
    assert_eq!(engine.executed_count(), 1);
}
