//! Load requests, display targets and load results.

use crate::resource::ImageResource;
use sha2::{Digest, Sha256};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Hash a URL into the lowercase hex form used for disk keys.
pub fn url_hash(url: &str) -> String {
    hex::encode(Sha256::digest(url.as_bytes()))
}

/// A request for one image at one requested size.
///
/// The requested size is part of the memory cache key, so the same URL at
/// two sizes is decoded and cached twice. The disk store only keys on the
/// URL and keeps the original bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRequest {
    pub url: String,
    pub width: u32,
    pub height: u32,
}

impl ImageRequest {
    pub fn new(url: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            url: url.into(),
            width,
            height,
        }
    }

    /// Memory cache key: `sha256(url)@{width}x{height}`.
    pub fn cache_key(&self) -> String {
        format!("{}@{}x{}", url_hash(&self.url), self.width, self.height)
    }

    /// Disk store key: `sha256(url)`.
    pub fn disk_key(&self) -> String {
        url_hash(&self.url)
    }
}

impl fmt::Display for ImageRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}x{})", self.url, self.width, self.height)
    }
}

/// Opaque consumer handle passed through a load and handed back with the
/// result. The loader never looks inside it.
#[derive(Clone)]
pub struct DisplayTarget(Arc<dyn Any + Send + Sync>);

impl DisplayTarget {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for DisplayTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DisplayTarget(..)")
    }
}

/// Why a load ended in [`LoadResult::Failed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Every network attempt failed.
    Fetch(String),
    /// The fetched bytes could not be decoded.
    Decode(String),
    /// The disk store entry could not be read.
    Disk(String),
    /// The decoded image could not be admitted to the memory cache.
    Cache(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Fetch(msg) => write!(f, "fetch failed: {}", msg),
            FailureReason::Decode(msg) => write!(f, "decode failed: {}", msg),
            FailureReason::Disk(msg) => write!(f, "disk read failed: {}", msg),
            FailureReason::Cache(msg) => write!(f, "cache rejected image: {}", msg),
        }
    }
}

/// Terminal outcome of one load.
#[derive(Debug, Clone)]
pub enum LoadResult {
    Succeeded(ImageResource),
    Failed(FailureReason),
    Canceled,
}

impl LoadResult {
    pub fn is_success(&self) -> bool {
        matches!(self, LoadResult::Succeeded(_))
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, LoadResult::Canceled)
    }

    pub fn resource(&self) -> Option<&ImageResource> {
        match self {
            LoadResult::Succeeded(res) => Some(res),
            _ => None,
        }
    }
}

impl fmt::Display for LoadResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadResult::Succeeded(res) => {
                write!(f, "succeeded ({}x{})", res.width(), res.height())
            }
            LoadResult::Failed(reason) => write!(f, "failed: {}", reason),
            LoadResult::Canceled => write!(f, "canceled"),
        }
    }
}

/// What a consumer receives exactly once per load.
#[derive(Debug, Clone)]
pub struct LoadEvent {
    pub request: ImageRequest,
    pub target: Option<DisplayTarget>,
    pub result: LoadResult,
}

/// Consumer callback for [`LoadEvent`]s.
pub type LoadCallback = Box<dyn FnOnce(LoadEvent) + Send + Sync + 'static>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_includes_size() {
        let a = ImageRequest::new("https://img.example/a.png", 100, 50);
        let b = ImageRequest::new("https://img.example/a.png", 200, 50);

        assert_ne!(a.cache_key(), b.cache_key());
        assert_eq!(a.disk_key(), b.disk_key());
        assert!(a.cache_key().ends_with("@100x50"));
    }

    #[test]
    fn test_url_hash_is_sha256_hex() {
        let hash = url_hash("abc");
        assert_eq!(hash.len(), 64);
        assert_eq!(
            hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_display_target_downcast() {
        let target = DisplayTarget::new(42u32);
        assert_eq!(target.downcast_ref::<u32>(), Some(&42));
        assert!(target.downcast_ref::<String>().is_none());
    }

    #[test]
    fn test_load_result_accessors() {
        let res = ImageResource::new(1, 1, vec![0; 4]);
        assert!(LoadResult::Succeeded(res).is_success());
        assert!(LoadResult::Canceled.is_canceled());
        assert!(LoadResult::Failed(FailureReason::Fetch("x".into()))
            .resource()
            .is_none());
    }
}
