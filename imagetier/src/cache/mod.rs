//! Memory and disk caches.
//!
//! - [`ResourceCache`] holds decoded images with LRU eviction and a recycle
//!   station for evicted images that may still be displayed.
//! - [`DiskStore`] holds the raw fetched bytes, keyed by URL hash.

mod disk;
mod memory;
mod stats;
mod types;

pub use disk::{DiskEditor, DiskStore, DiskStoreConfig, FsDiskStore};
pub use memory::{size_of, ResourceCache};
pub use stats::{CacheReport, CacheStats};
pub use types::{CacheError, DiskError};
