//! Components shared by every node of a configured loader.

use super::stage::StageContext;
use crate::config::LoaderSettings;
use crate::engine::{Engine, Tier};
use crate::task::{Coordinator, KeyLocks};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::info;

pub(crate) struct Server {
    pub settings: LoaderSettings,
    pub runtime: Handle,
    pub coordinator: Coordinator,
    /// Indexed by [`Tier::index`]
    pub engines: [Engine; 3],
    pub key_locks: KeyLocks,
    pub ignition: Arc<Notify>,
    pub ctx: Arc<StageContext>,
}

impl Server {
    /// Start the coordinator and one engine per tier. Must run inside the
    /// runtime `runtime` refers to.
    pub fn start(settings: LoaderSettings, runtime: Handle, ctx: StageContext) -> Self {
        let (coordinator, _) = Coordinator::start();
        let ignition = Arc::new(Notify::new());
        let engines = Tier::ALL.map(|tier| {
            Engine::start(tier, settings.threads(tier), Arc::clone(&ignition))
        });

        info!(
            memory_threads = settings.memory_threads,
            disk_threads = settings.disk_threads,
            network_threads = settings.network_threads,
            policy = %settings.duplicate_policy,
            "loader server started"
        );

        Self {
            settings,
            runtime,
            coordinator,
            engines,
            key_locks: KeyLocks::new(),
            ignition,
            ctx: Arc::new(ctx),
        }
    }

    pub fn engine(&self, tier: Tier) -> &Engine {
        &self.engines[tier.index()]
    }

    /// Stop engines and the coordinator, then free every cached resource.
    /// Nodes must be destroyed first.
    pub fn shutdown(&self) {
        for engine in &self.engines {
            engine.shutdown();
        }
        self.coordinator.shutdown();

        let freed = self.ctx.cache.remove_all();
        info!(freed, "loader server stopped");
    }
}
