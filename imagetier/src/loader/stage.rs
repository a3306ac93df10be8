//! One tier's attempt at satisfying a load.
//!
//! ```text
//!   Memory   probe cache ─────────────────────────────► Loaded | Miss
//!   Disk     store.get ─► read ─► decode ─► cache.put ► Loaded | Miss | Failed
//!   Network  fetch ─► persist ─► decode ─► cache.put ─► Loaded | Failed
//! ```
//!
//! A stage never decides what happens next. It records its outcome and, on
//! the coordinator, hands a [`StageReport`] to its node's dispatch loop,
//! which settles the load or promotes it to the next tier.

use super::stub::Ticket;
use crate::cache::{DiskStore, ResourceCache};
use crate::decode::Decoder;
use crate::engine::Tier;
use crate::fetch::{FetchError, NetworkFetcher};
use crate::request::FailureReason;
use crate::resource::ImageResource;
use crate::task::{Job, JobFuture};
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Collaborators shared by every stage of one loader.
pub(crate) struct StageContext {
    pub cache: Arc<ResourceCache>,
    pub disk: Arc<dyn DiskStore>,
    pub decoder: Arc<dyn Decoder>,
    pub fetcher: Arc<dyn NetworkFetcher>,
    /// Set the first time any stage executes
    started: AtomicBool,
}

impl StageContext {
    pub fn new(
        cache: Arc<ResourceCache>,
        disk: Arc<dyn DiskStore>,
        decoder: Arc<dyn Decoder>,
        fetcher: Arc<dyn NetworkFetcher>,
    ) -> Self {
        Self {
            cache,
            disk,
            decoder,
            fetcher,
            started: AtomicBool::new(false),
        }
    }

    pub fn has_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub(crate) enum StageOutcome {
    Loaded(ImageResource),
    Miss,
    Failed(FailureReason),
    Canceled,
}

/// Posted to the node once a stage task settles.
pub(crate) struct StageReport {
    pub ticket: Arc<Ticket>,
    pub tier: Tier,
    pub outcome: StageOutcome,
}

pub(crate) struct StageJob {
    tier: Tier,
    ticket: Arc<Ticket>,
    ctx: Arc<StageContext>,
    outcome: Mutex<Option<StageOutcome>>,
    reports: mpsc::UnboundedSender<StageReport>,
}

impl StageJob {
    pub fn new(
        tier: Tier,
        ticket: Arc<Ticket>,
        ctx: Arc<StageContext>,
        reports: mpsc::UnboundedSender<StageReport>,
    ) -> Self {
        Self {
            tier,
            ticket,
            ctx,
            outcome: Mutex::new(None),
            reports,
        }
    }

    fn record(&self, outcome: StageOutcome) {
        let mut slot = match self.outcome.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(outcome);
    }

    fn take(&self) -> Option<StageOutcome> {
        match self.outcome.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    fn run_memory(&self) -> StageOutcome {
        match self.ctx.cache.get(self.ticket.key()) {
            Some(resource) => StageOutcome::Loaded(resource),
            None => StageOutcome::Miss,
        }
    }

    async fn run_disk(&self, cancel: &CancellationToken) -> StageOutcome {
        let request = self.ticket.request();
        let disk_key = request.disk_key();
        let Some(path) = self.ctx.disk.get(&disk_key) else {
            return StageOutcome::Miss;
        };

        let decoder = Arc::clone(&self.ctx.decoder);
        let (width, height) = (request.width, request.height);
        let decoded = tokio::task::spawn_blocking(move || {
            let bytes = std::fs::read(&path).map_err(|e| FailureReason::Disk(e.to_string()))?;
            decoder
                .decode(&bytes, width, height)
                .map_err(|e| FailureReason::Decode(e.to_string()))
        })
        .await;

        match decoded {
            Ok(Ok(resource)) => self.admit(resource, cancel),
            Ok(Err(reason)) => {
                if matches!(reason, FailureReason::Decode(_)) {
                    // Corrupt entry; let the network tier replace it.
                    if let Err(e) = self.ctx.disk.remove(&disk_key) {
                        warn!(key = %disk_key, error = %e, "failed to drop corrupt disk entry");
                    }
                }
                StageOutcome::Failed(reason)
            }
            Err(e) => StageOutcome::Failed(FailureReason::Disk(e.to_string())),
        }
    }

    async fn run_network(&self, cancel: &CancellationToken) -> StageOutcome {
        let request = self.ticket.request();
        let bytes = match self.ctx.fetcher.fetch(request, cancel).await {
            Ok(bytes) => bytes,
            Err(FetchError::Canceled) => return StageOutcome::Canceled,
            Err(e) => {
                warn!(url = %request.url, error = %e, "network fetch failed");
                return StageOutcome::Failed(FailureReason::Fetch(e.to_string()));
            }
        };

        let disk = Arc::clone(&self.ctx.disk);
        let decoder = Arc::clone(&self.ctx.decoder);
        let disk_key = request.disk_key();
        let (width, height) = (request.width, request.height);
        let decoded = tokio::task::spawn_blocking(move || {
            persist(disk.as_ref(), &disk_key, &bytes);
            decoder
                .decode(&bytes, width, height)
                .map_err(|e| FailureReason::Decode(e.to_string()))
        })
        .await;

        match decoded {
            Ok(Ok(resource)) => self.admit(resource, cancel),
            Ok(Err(reason)) => StageOutcome::Failed(reason),
            Err(e) => StageOutcome::Failed(FailureReason::Decode(e.to_string())),
        }
    }

    /// Put a freshly decoded resource in the memory cache.
    fn admit(&self, resource: ImageResource, cancel: &CancellationToken) -> StageOutcome {
        if cancel.is_cancelled() {
            return StageOutcome::Canceled;
        }
        match self.ctx.cache.put(self.ticket.key(), resource.clone()) {
            Ok(()) => StageOutcome::Loaded(resource),
            Err(e) => {
                error!(key = self.ticket.key(), error = %e, "cache refused decoded image");
                StageOutcome::Failed(FailureReason::Cache(e.to_string()))
            }
        }
    }
}

/// Write fetched bytes to the disk store. Failures only cost a future
/// network round trip, so they are logged and swallowed.
fn persist(disk: &dyn DiskStore, key: &str, bytes: &Bytes) {
    let result = disk.edit(key).and_then(|mut editor| {
        if let Err(e) = editor.write(bytes) {
            editor.abort();
            return Err(e);
        }
        editor.commit()
    });
    if let Err(e) = result {
        warn!(key = key, error = %e, "failed to persist image to disk store");
    }
}

impl Job for StageJob {
    fn name(&self) -> &str {
        self.tier.as_str()
    }

    fn execute(self: Arc<Self>, cancel: CancellationToken) -> JobFuture {
        Box::pin(async move {
            self.ctx.started.store(true, Ordering::Release);
            let outcome = match self.tier {
                Tier::Memory => self.run_memory(),
                Tier::Disk => self.run_disk(&cancel).await,
                Tier::Network => self.run_network(&cancel).await,
            };
            debug!(
                key = self.ticket.key(),
                tier = %self.tier,
                outcome = outcome_label(&outcome),
                "stage finished"
            );
            self.record(outcome);
        })
    }

    fn on_post_execute(&self, canceled: bool) {
        let outcome = match (canceled, self.take()) {
            (true, _) => StageOutcome::Canceled,
            (false, Some(outcome)) => outcome,
            (false, None) => StageOutcome::Failed(FailureReason::Fetch(
                "stage ended without an outcome".to_string(),
            )),
        };
        // The node may already be gone; its groups were settled on destroy.
        let _ = self.reports.send(StageReport {
            ticket: Arc::clone(&self.ticket),
            tier: self.tier,
            outcome,
        });
    }
}

fn outcome_label(outcome: &StageOutcome) -> &'static str {
    match outcome {
        StageOutcome::Loaded(_) => "loaded",
        StageOutcome::Miss => "miss",
        StageOutcome::Failed(_) => "failed",
        StageOutcome::Canceled => "canceled",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{DiskStoreConfig, FsDiskStore};
    use crate::decode::DecodeError;
    use crate::fetch::FetchFuture;
    use crate::request::ImageRequest;

    struct FixedFetcher(Result<&'static [u8], u16>);

    impl NetworkFetcher for FixedFetcher {
        fn fetch<'a>(
            &'a self,
            request: &'a ImageRequest,
            _cancel: &'a CancellationToken,
        ) -> FetchFuture<'a> {
            let result = match self.0 {
                Ok(bytes) => Ok(Bytes::from_static(bytes)),
                Err(status) => Err(FetchError::Status {
                    status,
                    url: request.url.clone(),
                }),
            };
            Box::pin(async move { result })
        }
    }

    /// Decodes any non-empty input into a 2x2 image.
    struct TinyDecoder;

    impl Decoder for TinyDecoder {
        fn decode(&self, bytes: &[u8], _w: u32, _h: u32) -> Result<ImageResource, DecodeError> {
            if bytes.is_empty() {
                return Err(DecodeError::Empty);
            }
            Ok(ImageResource::new(2, 2, vec![0; 16]))
        }
    }

    fn context(dir: &std::path::Path, fetcher: FixedFetcher) -> Arc<StageContext> {
        let disk = FsDiskStore::open(DiskStoreConfig::new(dir, 1024 * 1024)).unwrap();
        Arc::new(StageContext::new(
            Arc::new(ResourceCache::new(1024, 1024)),
            Arc::new(disk),
            Arc::new(TinyDecoder),
            Arc::new(fetcher),
        ))
    }

    fn job(tier: Tier, ctx: &Arc<StageContext>) -> (Arc<StageJob>, mpsc::UnboundedReceiver<StageReport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let ticket = Arc::new(Ticket::new(ImageRequest::new("http://img/a.png", 0, 0)));
        (Arc::new(StageJob::new(tier, ticket, Arc::clone(ctx), tx)), rx)
    }

    #[tokio::test]
    async fn test_memory_stage_miss_then_hit() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), FixedFetcher(Err(404)));

        let (stage, mut rx) = job(Tier::Memory, &ctx);
        Arc::clone(&stage).execute(CancellationToken::new()).await;
        stage.on_post_execute(false);
        assert!(matches!(rx.recv().await.unwrap().outcome, StageOutcome::Miss));
        assert!(ctx.has_started());

        let (stage, mut rx) = job(Tier::Memory, &ctx);
        ctx.cache
            .put(stage.ticket.key(), ImageResource::new(1, 1, vec![0; 4]))
            .unwrap();
        Arc::clone(&stage).execute(CancellationToken::new()).await;
        stage.on_post_execute(false);
        assert!(matches!(rx.recv().await.unwrap().outcome, StageOutcome::Loaded(_)));
    }

    #[tokio::test]
    async fn test_network_stage_persists_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), FixedFetcher(Ok(b"png bytes")));

        let (stage, mut rx) = job(Tier::Network, &ctx);
        Arc::clone(&stage).execute(CancellationToken::new()).await;
        stage.on_post_execute(false);

        let report = rx.recv().await.unwrap();
        assert_eq!(report.tier, Tier::Network);
        assert!(matches!(report.outcome, StageOutcome::Loaded(_)));
        assert!(ctx.cache.contains(stage.ticket.key()));
        assert!(ctx.disk.get(&stage.ticket.request().disk_key()).is_some());
    }

    #[tokio::test]
    async fn test_disk_stage_reads_persisted_entry() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), FixedFetcher(Err(500)));

        let (stage, mut rx) = job(Tier::Disk, &ctx);
        persist(ctx.disk.as_ref(), &stage.ticket.request().disk_key(), &Bytes::from_static(b"x"));
        Arc::clone(&stage).execute(CancellationToken::new()).await;
        stage.on_post_execute(false);
        assert!(matches!(rx.recv().await.unwrap().outcome, StageOutcome::Loaded(_)));
    }

    #[tokio::test]
    async fn test_corrupt_disk_entry_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), FixedFetcher(Err(500)));

        let (stage, mut rx) = job(Tier::Disk, &ctx);
        let disk_key = stage.ticket.request().disk_key();
        persist(ctx.disk.as_ref(), &disk_key, &Bytes::new());
        Arc::clone(&stage).execute(CancellationToken::new()).await;
        stage.on_post_execute(false);

        assert!(matches!(
            rx.recv().await.unwrap().outcome,
            StageOutcome::Failed(FailureReason::Decode(_))
        ));
        assert!(ctx.disk.get(&disk_key).is_none());
    }

    #[tokio::test]
    async fn test_network_failure_and_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), FixedFetcher(Err(503)));

        let (stage, mut rx) = job(Tier::Network, &ctx);
        Arc::clone(&stage).execute(CancellationToken::new()).await;
        stage.on_post_execute(false);
        assert!(matches!(
            rx.recv().await.unwrap().outcome,
            StageOutcome::Failed(FailureReason::Fetch(_))
        ));

        let (stage, mut rx) = job(Tier::Network, &ctx);
        stage.on_post_execute(true);
        assert!(matches!(rx.recv().await.unwrap().outcome, StageOutcome::Canceled));
    }
}
