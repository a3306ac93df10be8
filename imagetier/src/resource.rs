//! Decoded image buffers with an explicit lifecycle.
//!
//! An [`ImageResource`] is a cheaply cloneable handle to a decoded RGBA
//! buffer. Cloning the handle never copies pixels, and dropping a clone never
//! frees them: the buffer is released only when the owning
//! [`ResourceCache`](crate::cache::ResourceCache) decides to free it.
//!
//! ```text
//!              put()                 trim() (not unused)
//!   Active ───────────► in cache ─────────────────────► Staged (station)
//!      │                   │                                 │
//!      │                   │ remove/replace/evict unused     │ unused/remove
//!      ▼                   ▼                                 ▼
//!    Freed ◄───────────────┴─────────────────────────────────┘
//! ```
//!
//! Consumers that keep a handle after the cache freed it observe
//! [`ImageResource::is_valid`] returning `false` and an empty pixel view.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};

/// Lifecycle state of an [`ImageResource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    /// Live and owned by a cache entry (or not cached yet).
    Active,
    /// Evicted into the recycle station; still readable.
    Staged,
    /// Released. Pixel data is gone.
    Freed,
}

impl ResourceState {
    fn as_u8(self) -> u8 {
        match self {
            ResourceState::Active => 0,
            ResourceState::Staged => 1,
            ResourceState::Freed => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => ResourceState::Active,
            1 => ResourceState::Staged,
            _ => ResourceState::Freed,
        }
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceState::Active => write!(f, "active"),
            ResourceState::Staged => write!(f, "staged"),
            ResourceState::Freed => write!(f, "freed"),
        }
    }
}

struct ResourceInner {
    width: u32,
    height: u32,
    byte_size: usize,
    state: AtomicU8,
    pixels: RwLock<Option<Box<[u8]>>>,
}

/// Shared handle to a decoded RGBA8 image.
#[derive(Clone)]
pub struct ImageResource {
    inner: Arc<ResourceInner>,
}

impl ImageResource {
    /// Wrap a decoded RGBA8 buffer.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        let byte_size = pixels.len();
        Self {
            inner: Arc::new(ResourceInner {
                width,
                height,
                byte_size,
                state: AtomicU8::new(ResourceState::Active.as_u8()),
                pixels: RwLock::new(Some(pixels.into_boxed_slice())),
            }),
        }
    }

    pub fn width(&self) -> u32 {
        self.inner.width
    }

    pub fn height(&self) -> u32 {
        self.inner.height
    }

    /// Size of the pixel buffer as allocated, regardless of lifecycle state.
    pub fn byte_size(&self) -> usize {
        self.inner.byte_size
    }

    pub fn state(&self) -> ResourceState {
        ResourceState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Returns `true` until the owning cache frees the buffer.
    pub fn is_valid(&self) -> bool {
        self.state() != ResourceState::Freed
    }

    /// Run `f` over the pixel data, or return `None` if the buffer was freed.
    pub fn with_pixels<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        let guard = match self.inner.pixels.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.as_deref().map(f)
    }

    /// Returns `true` if both handles point at the same buffer.
    pub fn ptr_eq(&self, other: &ImageResource) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Move an active resource into the staged state.
    pub(crate) fn stage(&self) {
        let _ = self.inner.state.compare_exchange(
            ResourceState::Active.as_u8(),
            ResourceState::Staged.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Move a staged resource back into the active state.
    pub(crate) fn activate(&self) {
        let _ = self.inner.state.compare_exchange(
            ResourceState::Staged.as_u8(),
            ResourceState::Active.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Free the pixel buffer. Returns `false` if it was already freed.
    pub(crate) fn release(&self) -> bool {
        let previous = self
            .inner
            .state
            .swap(ResourceState::Freed.as_u8(), Ordering::AcqRel);
        if previous == ResourceState::Freed.as_u8() {
            return false;
        }
        let mut guard = match self.inner.pixels.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.take();
        true
    }
}

impl fmt::Debug for ImageResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageResource")
            .field("width", &self.inner.width)
            .field("height", &self.inner.height)
            .field("byte_size", &self.inner.byte_size)
            .field("state", &self.state())
            .finish()
    }
}
