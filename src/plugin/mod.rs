//! Plugin discovery and the persisted plugin catalogue.
//!
//! Plugins ship as bundles on a set of search paths. Each bundle holds one
//! shared library per platform, and each library exports two functions:
//!
//! ```c
//! int        OfxGetNumberOfPlugins(void);
//! OfxPlugin* OfxGetPlugin(int nth);
//! ```
//!
//! [`PluginCache`] finds the bundles, describes the plugins inside them
//! through the registered [`ApiHandler`]s, and keeps the result in a cache
//! document so binaries that did not change are never loaded again just to
//! be described.
//!
//! # Layout
//!
//! - [`abi`]: C layouts shared with plugin binaries
//! - [`Binary`]: reference-counted module handle, opened through a [`LibraryLoader`]
//! - [`Plugin`] / [`PluginBinary`]: catalogue entries
//! - [`ApiRegistry`]: API handlers, first match wins
//! - [`ImageEffectApi`]: the image-effect handler
//! - [`select`]: extension based selection over the accepted list

pub mod abi;
mod api;
mod binary;
mod cache;
mod descriptor;
mod document;
mod host;
pub mod image_effect;
mod scan;
pub mod select;

pub use api::{ApiHandler, ApiRegistry, ApiXmlParser, Attributes, XmlWriter};
pub use binary::{Binary, Library, LibraryLoader, LoadGuard, NativeLoader, PluginHandle, StaticLoader};
pub use cache::{PluginCache, ScanStats};
pub use descriptor::{Plugin, PluginBinary, PropertySet, PropertyValue};
pub use document::{DocumentRead, ReadStatus, read_document, write_document};
pub use host::{Host, MAX_PROPERTY_DIMENSION};
pub use image_effect::ImageEffectApi;
pub use scan::{BundleLocation, BundleScanner, bundle_binary_path};

use thiserror::Error;

/// Errors raised while loading or talking to plugin binaries.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The shared library could not be opened.
    #[error("failed to load library: {0}")]
    LoadFailed(String),

    /// A required export is missing.
    #[error("missing plugin entry point: {0}")]
    SymbolNotFound(String),

    /// Symbol lookup on a binary that is not loaded.
    #[error("binary is not loaded")]
    NotLoaded,

    /// The binary no longer has the catalogued plugin at its index.
    #[error("plugin '{identifier}' missing at index {index}")]
    InconsistentPlugin {
        /// Identifier recorded in the catalogue.
        identifier: String,
        /// Catalogued index.
        index: usize,
    },

    /// The plugin failed an action of the describe sequence.
    #[error("plugin '{identifier}' failed to describe itself (status {status})")]
    DescribeFailed {
        /// Plugin identifier.
        identifier: String,
        /// Status returned by the plugin.
        status: i32,
    },
}
