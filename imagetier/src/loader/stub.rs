//! Coalesced consumers of one in-flight load.

use crate::request::{DisplayTarget, ImageRequest, LoadCallback, LoadEvent, LoadResult};
use crate::task::{Coordinator, Task};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::error;

/// One consumer waiting on a load.
pub(crate) struct Stub {
    pub id: u64,
    pub target: Option<DisplayTarget>,
    pub callback: LoadCallback,
}

/// The load behind a [`StubGroup`], as it moves from tier to tier.
pub(crate) struct Ticket {
    request: ImageRequest,
    key: String,
    /// Stage task currently carrying the load
    current: Mutex<Option<Arc<Task>>>,
    reloads: AtomicU32,
}

impl Ticket {
    pub fn new(request: ImageRequest) -> Self {
        let key = request.cache_key();
        Self {
            request,
            key,
            current: Mutex::new(None),
            reloads: AtomicU32::new(0),
        }
    }

    pub fn request(&self) -> &ImageRequest {
        &self.request
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn current(&self) -> MutexGuard<'_, Option<Arc<Task>>> {
        match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn set_current(&self, task: Arc<Task>) {
        *self.current() = Some(task);
    }

    /// Cancel whichever stage is carrying the load.
    pub fn cancel(&self) {
        let task = self.current().clone();
        if let Some(task) = task {
            task.cancel();
        }
    }

    /// Count a network retry. Returns the number of retries so far,
    /// including this one.
    pub fn bump_reloads(&self) -> u32 {
        self.reloads.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn reloads(&self) -> u32 {
        self.reloads.load(Ordering::Acquire)
    }
}

/// Consumers sharing one ticket. Whoever removes a group from the stub pool
/// owns delivering its members' results.
pub(crate) struct StubGroup {
    pub ticket: Arc<Ticket>,
    pub members: VecDeque<Stub>,
}

impl StubGroup {
    pub fn new(ticket: Arc<Ticket>, first: Stub) -> Self {
        Self {
            ticket,
            members: VecDeque::from([first]),
        }
    }
}

/// Hand `result` to every stub, in order, on the coordinator.
pub(crate) fn deliver(
    coordinator: &Coordinator,
    request: ImageRequest,
    stubs: Vec<Stub>,
    result: LoadResult,
) {
    if stubs.is_empty() {
        return;
    }
    coordinator.post(move || {
        for stub in stubs {
            let event = LoadEvent {
                request: request.clone(),
                target: stub.target,
                result: result.clone(),
            };
            let callback = stub.callback;
            if panic::catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                error!(url = %request.url, stub_id = stub.id, "load callback panicked");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_deliver_reaches_every_stub_once() {
        let (coordinator, _) = Coordinator::start();
        let calls = Arc::new(AtomicUsize::new(0));
        let stubs = (0..3)
            .map(|id| {
                let calls = Arc::clone(&calls);
                Stub {
                    id,
                    target: Some(DisplayTarget::new(id)),
                    callback: Box::new(move |event: LoadEvent| {
                        assert!(event.result.is_canceled());
                        assert_eq!(event.target.unwrap().downcast_ref::<u64>(), Some(&id));
                        calls.fetch_add(1, Ordering::SeqCst);
                    }),
                }
            })
            .collect();

        deliver(
            &coordinator,
            ImageRequest::new("http://img/a.png", 0, 0),
            stubs,
            LoadResult::Canceled,
        );
        coordinator.run(|| ()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_panicking_callback_does_not_starve_others() {
        let (coordinator, _) = Coordinator::start();
        let reached = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&reached);
        let stubs = vec![
            Stub {
                id: 1,
                target: None,
                callback: Box::new(|_: LoadEvent| panic!("consumer bug")),
            },
            Stub {
                id: 2,
                target: None,
                callback: Box::new(move |_: LoadEvent| {
                    r.fetch_add(1, Ordering::SeqCst);
                }),
            },
        ];

        deliver(
            &coordinator,
            ImageRequest::new("http://img/a.png", 0, 0),
            stubs,
            LoadResult::Canceled,
        );
        coordinator.run(|| ()).await;
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stub_pool_is_shared_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<StubGroup>();
        assert_send_sync::<dashmap::DashMap<String, StubGroup>>();
        assert_send_sync::<crate::loader::Node>();
    }

    #[test]
    fn test_ticket_reloads() {
        let ticket = Ticket::new(ImageRequest::new("http://img/a.png", 10, 20));
        assert!(ticket.key().ends_with("@10x20"));
        assert_eq!(ticket.reloads(), 0);
        assert_eq!(ticket.bump_reloads(), 1);
        assert_eq!(ticket.bump_reloads(), 2);
    }
}
