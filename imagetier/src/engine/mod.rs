//! Per-tier worker pools.
//!
//! Each [`Engine`] owns a fixed number of tokio workers for one [`Tier`]
//! and pulls round-robin from every registered [`TaskSource`]. A node
//! registers one source per tier; a standalone [`TaskQueue`] is a source
//! too.
//!
//! [`TaskQueue`]: crate::task::TaskQueue

mod pool;
mod tier;

pub use pool::{Engine, TaskSource};
pub use tier::Tier;
