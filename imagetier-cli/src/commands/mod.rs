//! CLI command implementations.
//!
//! Each subcommand has its own module with argument definitions and handlers.
//!
//! # Command Modules
//!
//! - [`cache`] - Disk cache management (stats, clear)
//! - [`config`] - Configuration management (init, show, path)
//! - [`load`] - Load one image through the tiers

pub mod cache;
pub mod config;
pub mod load;
