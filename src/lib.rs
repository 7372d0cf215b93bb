//! # fxhost
//!
//! Host-side runtime for binary image-effect plugins.
//!
//! fxhost finds plugin bundles on disk, describes the plugins each binary
//! carries, and keeps that catalogue in a version-stamped cache document so
//! later runs only load binaries that changed. A separate budgeted buffer
//! pool serves the large scratch buffers plugins ask for while rendering.
//!
//! ## Features
//!
//! - **Lazy loading**: binaries are mapped only while something holds a reference
//! - **Persistent catalogue**: streaming cache reader with a version gate
//! - **Pluggable APIs**: per-API handlers decide support and what gets cached
//! - **Buffer reuse**: best-fit pool with used/allocated/wasted accounting
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fxhost::prelude::*;
//! use std::sync::Arc;
//!
//! # fn main() -> fxhost::Result<()> {
//! let mut cache = PluginCache::new(CacheConfig::from_env());
//! cache.register_api_handler(Arc::new(ImageEffectApi::new()));
//! cache.read_cache_file("plugins.xml")?;
//! cache.scan_plugin_files();
//! cache.save_if_dirty("plugins.xml")?;
//!
//! let pool = MemoryPool::new(512 << 20);
//! let frame = pool.allocate(1920 * 1080 * 4)?;
//! # drop(frame);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod config;
pub mod error;
pub mod memory;
pub mod observability;
pub mod plugin;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::{CacheConfig, SearchPath};
    pub use crate::error::{Error, Result};
    pub use crate::memory::{MemoryPool, PoolBuffer, PoolStats};
    pub use crate::plugin::{ApiHandler, ImageEffectApi, Plugin, PluginCache, PluginError};
}

pub use error::{Error, Result};
