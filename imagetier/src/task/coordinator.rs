//! Single serializing context for task PRE/POST phases and consumer callbacks.
//!
//! ```text
//!   worker ──┐
//!   worker ──┼──► mpsc (unbounded) ──► coordinator loop ──► callback()
//!   node   ──┘                          (one tokio task)
//! ```
//!
//! Everything consumers can observe runs here, one closure at a time, in the
//! order it was posted.

use std::panic::{self, AssertUnwindSafe};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Cloneable handle for posting work onto the coordinator loop.
#[derive(Clone)]
pub struct Coordinator {
    tx: mpsc::UnboundedSender<Callback>,
    shutdown: CancellationToken,
}

impl Coordinator {
    /// Spawn the coordinator loop on the current tokio runtime.
    pub fn start() -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_loop(rx, shutdown.clone()));
        (Self { tx, shutdown }, handle)
    }

    /// Queue `f` to run on the coordinator.
    ///
    /// Once the loop has shut down, `f` runs inline on the caller instead so
    /// that no posted callback is ever lost.
    pub fn post<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Err(mpsc::error::SendError(callback)) = self.tx.send(Box::new(f)) {
            invoke(callback);
        }
    }

    /// Run `f` on the coordinator and wait for its result.
    ///
    /// Returns `None` if `f` panicked.
    pub async fn run<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        self.post(move || {
            let _ = result_tx.send(f());
        });
        result_rx.await.ok()
    }

    /// Stop accepting work. Callbacks already queued still run.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled() || self.tx.is_closed()
    }
}

async fn run_loop(mut rx: mpsc::UnboundedReceiver<Callback>, shutdown: CancellationToken) {
    debug!("coordinator started");
    loop {
        tokio::select! {
            biased;
            callback = rx.recv() => match callback {
                Some(callback) => invoke(callback),
                None => break,
            },
            _ = shutdown.cancelled() => {
                rx.close();
                while let Some(callback) = rx.recv().await {
                    invoke(callback);
                }
                break;
            }
        }
    }
    debug!("coordinator stopped");
}

fn invoke(callback: Callback) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!(panic = %message, "coordinator callback panicked");
    }
}
