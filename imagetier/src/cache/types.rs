//! Error types shared by the memory cache and the disk store.

use thiserror::Error;

/// Memory cache errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The recycle station went over its byte budget.
    ///
    /// Resources still in use are never dropped silently, so a caller that
    /// keeps loading without ever signalling `unused` ends up here.
    #[error(
        "recycler out of memory: staged {staged} bytes exceeds budget of {budget} bytes (missing unused() calls?)"
    )]
    RecyclerOverflow { staged: usize, budget: usize },
}

/// Disk store errors.
#[derive(Debug, Error)]
pub enum DiskError {
    /// I/O error during a store operation
    #[error("Disk store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Another editor already holds the key
    #[error("Disk entry '{0}' is already being edited")]
    EditInProgress(String),

    /// The store directory could not be prepared
    #[error("Invalid disk store directory '{path}': {reason}")]
    InvalidDirectory { path: String, reason: String },
}
