//! The loader: configure once, then load images through memory, disk and
//! network tiers.
//!
//! # Example
//!
//! ```no_run
//! use imagetier::config::LoaderSettings;
//! use imagetier::loader::{Loader, LoaderComponents};
//!
//! # async fn example() -> Result<(), imagetier::config::ConfigError> {
//! let loader = Loader::new(LoaderComponents::default());
//! loader.configure(LoaderSettings::default())?;
//!
//! let (_handle, result) = loader.load_async("https://example.com/a.png", 256, 256, None)?;
//! if let Ok(event) = result.await {
//!     println!("{}", event.result);
//! }
//! loader.destroy();
//! # Ok(())
//! # }
//! ```
//!
//! # Lifecycle
//!
//! ```text
//!   Unconfigured ──configure──► Ready ──destroy──► Destroyed
//!                                 │ ▲
//!                                 └─┘ configure (only before the first
//!                                      stage has executed)
//! ```

mod node;
mod server;
mod stage;
mod stub;

pub use node::{LoadHandle, Node};

use crate::cache::{CacheReport, DiskStore, DiskStoreConfig, FsDiskStore, ResourceCache};
use crate::config::{ConfigError, LoaderSettings};
use crate::decode::{Decoder, ImageDecoder};
use crate::fetch::{HttpFetcher, NetworkFetcher};
use crate::request::{DisplayTarget, ImageRequest, LoadEvent};
use crate::resource::ImageResource;
use server::Server;
use stage::StageContext;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, info};

/// Id of the node backing the loader's own `load`/`unused` calls.
pub const DEFAULT_NODE: &str = "default";

/// Pluggable collaborators. Anything left unset gets the stock
/// implementation built from [`LoaderSettings`] at configure time.
#[derive(Default, Clone)]
pub struct LoaderComponents {
    disk: Option<Arc<dyn DiskStore>>,
    decoder: Option<Arc<dyn Decoder>>,
    fetcher: Option<Arc<dyn NetworkFetcher>>,
}

impl LoaderComponents {
    pub fn with_disk_store(mut self, disk: Arc<dyn DiskStore>) -> Self {
        self.disk = Some(disk);
        self
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn Decoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn NetworkFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    fn build(&self, settings: &LoaderSettings) -> Result<StageContext, ConfigError> {
        let disk = match &self.disk {
            Some(disk) => Arc::clone(disk),
            None => {
                let config =
                    DiskStoreConfig::new(&settings.disk_directory, settings.disk_cache_size)
                        .with_app_version(settings.app_version)
                        .with_wipe_on_version_change(settings.wipe_on_version_change);
                let store = FsDiskStore::open(config).map_err(|e| ConfigError::Invalid {
                    name: "disk_directory",
                    reason: e.to_string(),
                })?;
                Arc::new(store) as Arc<dyn DiskStore>
            }
        };

        let fetcher = match &self.fetcher {
            Some(fetcher) => Arc::clone(fetcher),
            None => {
                let http = HttpFetcher::new(settings.connect_timeout, settings.read_timeout)
                    .map_err(|e| ConfigError::Invalid {
                        name: "network",
                        reason: e.to_string(),
                    })?;
                Arc::new(http) as Arc<dyn NetworkFetcher>
            }
        };

        let decoder = self
            .decoder
            .clone()
            .unwrap_or_else(|| Arc::new(ImageDecoder::new()) as Arc<dyn Decoder>);

        let cache = Arc::new(ResourceCache::new(
            settings.memory_cache_size,
            settings.recycler_size,
        ));
        Ok(StageContext::new(cache, disk, decoder, fetcher))
    }
}

struct Ready {
    server: Arc<Server>,
    nodes: HashMap<String, Node>,
}

enum State {
    Unconfigured,
    Ready(Ready),
    Destroyed,
}

/// Tiered image loader.
pub struct Loader {
    components: LoaderComponents,
    state: Mutex<State>,
}

impl Default for Loader {
    fn default() -> Self {
        Self::new(LoaderComponents::default())
    }
}

impl Loader {
    pub fn new(components: LoaderComponents) -> Self {
        Self {
            components,
            state: Mutex::new(State::Unconfigured),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Validate `settings` and start the engines.
    ///
    /// May be called again to replace the settings until the first stage
    /// executes. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Invalid`] for unusable settings or collaborators
    /// - [`ConfigError::AlreadyStarted`] once work has executed
    /// - [`ConfigError::Destroyed`] after [`destroy`](Loader::destroy)
    /// - [`ConfigError::NoRuntime`] outside a tokio runtime
    pub fn configure(&self, settings: LoaderSettings) -> Result<(), ConfigError> {
        settings.validate()?;
        let runtime = Handle::try_current().map_err(|e| ConfigError::NoRuntime(e.to_string()))?;

        let mut state = self.lock();
        match &*state {
            State::Destroyed => return Err(ConfigError::Destroyed),
            State::Ready(ready) if ready.server.ctx.has_started() => {
                return Err(ConfigError::AlreadyStarted)
            }
            State::Ready(_) | State::Unconfigured => {}
        }

        let ctx = self.components.build(&settings)?;
        if let State::Ready(ready) = &*state {
            debug!("replacing loader configuration");
            for node in ready.nodes.values() {
                node.destroy();
            }
            ready.server.shutdown();
        }
        let server = Arc::new(Server::start(settings, runtime, ctx));
        let mut nodes = HashMap::new();
        nodes.insert(
            DEFAULT_NODE.to_string(),
            Node::new(DEFAULT_NODE, Arc::clone(&server)),
        );
        *state = State::Ready(Ready { server, nodes });
        info!("loader configured");
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        matches!(*self.lock(), State::Ready(_))
    }

    fn with_ready<R>(&self, f: impl FnOnce(&mut Ready) -> R) -> Result<R, ConfigError> {
        match &mut *self.lock() {
            State::Unconfigured => Err(ConfigError::NotConfigured),
            State::Destroyed => Err(ConfigError::Destroyed),
            State::Ready(ready) => Ok(f(ready)),
        }
    }

    fn server(&self) -> Result<Arc<Server>, ConfigError> {
        self.with_ready(|ready| Arc::clone(&ready.server))
    }

    /// The node with this id, created on first use.
    pub fn node(&self, id: &str) -> Result<Node, ConfigError> {
        self.with_ready(|ready| {
            if let Some(node) = ready.nodes.get(id).filter(|n| !n.is_destroyed()) {
                return node.clone();
            }
            let node = Node::new(id, Arc::clone(&ready.server));
            ready.nodes.insert(id.to_string(), node.clone());
            node
        })
    }

    fn default_node(&self) -> Result<Node, ConfigError> {
        self.node(DEFAULT_NODE)
    }

    /// Load an image on the default node. See [`Node::load`].
    pub fn load<F>(
        &self,
        url: &str,
        width: u32,
        height: u32,
        target: Option<DisplayTarget>,
        on_result: F,
    ) -> Result<LoadHandle, ConfigError>
    where
        F: FnOnce(LoadEvent) + Send + Sync + 'static,
    {
        Ok(self.default_node()?.load(url, width, height, target, on_result))
    }

    /// Load an image on the default node, receiving the outcome on a channel.
    pub fn load_async(
        &self,
        url: &str,
        width: u32,
        height: u32,
        target: Option<DisplayTarget>,
    ) -> Result<(LoadHandle, oneshot::Receiver<LoadEvent>), ConfigError> {
        Ok(self.default_node()?.load_async(url, width, height, target))
    }

    /// Memory cache lookup. Never touches disk or network.
    pub fn get(
        &self,
        url: &str,
        width: u32,
        height: u32,
    ) -> Result<Option<ImageResource>, ConfigError> {
        let key = ImageRequest::new(url, width, height).cache_key();
        Ok(self.server()?.ctx.cache.get(&key))
    }

    /// See [`Node::unused`].
    pub fn unused(&self, url: &str, width: u32, height: u32) -> Result<(), ConfigError> {
        self.default_node()?.unused(url, width, height);
        Ok(())
    }

    /// Free every cached image currently marked unused. Returns freed bytes.
    pub fn reduce(&self) -> Result<usize, ConfigError> {
        Ok(self.server()?.ctx.cache.reduce())
    }

    pub fn cache_report(&self) -> Result<CacheReport, ConfigError> {
        Ok(self.server()?.ctx.cache.report())
    }

    /// Destroy every node, stop the engines and free every cached image.
    /// Later calls do nothing.
    pub fn destroy(&self) {
        let previous = std::mem::replace(&mut *self.lock(), State::Destroyed);
        if let State::Ready(ready) = previous {
            for node in ready.nodes.values() {
                node.destroy();
            }
            ready.server.shutdown();
            info!("loader destroyed");
        }
    }
}

impl Drop for Loader {
    fn drop(&mut self) {
        self.destroy();
    }
}
