//! imagetier - tiered, concurrent image loading
//!
//! Loads images through three tiers, memory → disk → network, with:
//!
//! - a bounded memory cache whose evicted images wait in a recycle station
//!   until the consumer declares them unused
//! - cancellable tasks with an explicit state machine
//! - lossy per-tier queues that keep at most one task per image executing
//! - coalescing of duplicate requests and exactly one result per request
//!
//! # High-Level API
//!
//! ```ignore
//! use imagetier::config::LoaderSettings;
//! use imagetier::loader::Loader;
//!
//! let loader = Loader::default();
//! loader.configure(LoaderSettings::default())?;
//!
//! loader.load(url, 256, 256, None, |event| {
//!     if let Some(image) = event.result.resource() {
//!         image.with_pixels(|rgba| draw(rgba));
//!     }
//! })?;
//! ```

pub mod cache;
pub mod config;
pub mod decode;
pub mod engine;
pub mod fetch;
pub mod loader;
pub mod logging;
pub mod request;
pub mod resource;
pub mod task;

/// Version of the imagetier library and CLI.
///
/// Defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use loader::{LoadHandle, Loader, LoaderComponents, Node};
pub use request::{DisplayTarget, FailureReason, ImageRequest, LoadEvent, LoadResult};
pub use resource::{ImageResource, ResourceState};
