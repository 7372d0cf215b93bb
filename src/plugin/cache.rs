//! The plugin cache engine.
//!
//! A [`PluginCache`] keeps the catalogue of every plugin binary found on the
//! search paths together with the plugins each one carries. Describing a
//! plugin means loading its binary, so the catalogue is persisted and a
//! later run only reloads binaries whose size or modification time changed.
//!
//! ```rust,no_run
//! use fxhost::config::CacheConfig;
//! use fxhost::plugin::{ImageEffectApi, PluginCache};
//! use std::sync::Arc;
//!
//! # fn main() -> fxhost::Result<()> {
//! let mut cache = PluginCache::new(CacheConfig::from_env());
//! cache.register_api_handler(Arc::new(ImageEffectApi::new()));
//! cache.read_cache_file("plugins.xml")?;
//! cache.scan_plugin_files();
//! cache.save_if_dirty("plugins.xml")?;
//!
//! for plugin in cache.plugins() {
//!     println!("{} {}.{}", plugin.raw_identifier(), plugin.version_major(), plugin.version_minor());
//! }
//! # Ok(())
//! # }
//! ```

use super::api::{ApiHandler, ApiRegistry};
use super::binary::{Binary, LibraryLoader, NativeLoader};
use super::descriptor::{Plugin, PluginBinary};
use super::document::{ReadStatus, read_document, write_document};
use super::host::Host;
use super::scan::BundleScanner;
use crate::config::{CacheConfig, SearchPath};
use crate::error::Result;
use crate::observability;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// What one scan pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Binaries found on the search paths.
    pub found: usize,
    /// Binaries seen for the first time and described.
    pub added: usize,
    /// Catalogued binaries no longer found, dropped.
    pub removed: usize,
    /// Catalogued binaries that changed on disk and were described again.
    pub reloaded: usize,
    /// Plugins in the accepted list.
    pub accepted: usize,
    /// Plugins the handlers turned down.
    pub rejected: usize,
}

/// Catalogue of plugin binaries and the accepted plugin list.
pub struct PluginCache {
    config: CacheConfig,
    loader: Arc<dyn LibraryLoader>,
    registry: ApiRegistry,
    host: Host,
    binaries: Vec<PluginBinary>,
    known_binaries: HashSet<PathBuf>,
    plugins: Vec<Arc<Plugin>>,
    plugin_dirs: Vec<PathBuf>,
    dirty: bool,
}

impl PluginCache {
    /// An engine loading binaries from disk.
    pub fn new(config: CacheConfig) -> Self {
        Self::with_loader(config, Arc::new(NativeLoader))
    }

    /// An engine opening binaries through `loader`.
    pub fn with_loader(config: CacheConfig, loader: Arc<dyn LibraryLoader>) -> Self {
        Self {
            config,
            loader,
            registry: ApiRegistry::new(),
            host: Host::new(),
            binaries: Vec::new(),
            known_binaries: HashSet::new(),
            plugins: Vec::new(),
            plugin_dirs: Vec::new(),
            dirty: false,
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Append a search path for the next scan.
    pub fn add_search_path(&mut self, path: SearchPath) {
        self.config.add_search_path(path);
    }

    /// Register an API handler. Earlier registrations win lookups.
    pub fn register_api_handler(&mut self, handler: Arc<dyn ApiHandler>) {
        self.registry.register(handler);
    }

    /// First handler taking `(api, version)`.
    pub fn find_api_handler(&self, api: &str, version: i32) -> Option<&Arc<dyn ApiHandler>> {
        self.registry.find(api, version)
    }

    /// The host record handed to plugins.
    pub fn host(&self) -> &Host {
        &self.host
    }

    /// Catalogued binaries.
    pub fn binaries(&self) -> &[PluginBinary] {
        &self.binaries
    }

    /// Accepted plugins, in catalogue order.
    pub fn plugins(&self) -> &[Arc<Plugin>] {
        &self.plugins
    }

    /// Directories visited by the last scan.
    pub fn plugin_dirs(&self) -> &[PathBuf] {
        &self.plugin_dirs
    }

    /// Whether the catalogue differs from what was last read or written.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Restore catalogue entries from a cache document.
    ///
    /// Returns the number of binaries adopted. Binaries already catalogued
    /// are left alone. A document of another version is ignored.
    pub fn read_plugin_cache<R: std::io::BufRead>(&mut self, input: R) -> usize {
        let read = read_document(input, &self.config.cache_version, &self.registry, &self.loader);
        if matches!(read.status, ReadStatus::VersionMismatch { .. }) {
            return 0;
        }

        let mut adopted = 0;
        for binary in read.binaries {
            if self.known_binaries.insert(binary.file_path().to_path_buf()) {
                self.binaries.push(binary);
                adopted += 1;
            }
        }
        tracing::debug!(adopted, "plugin cache read");
        adopted
    }

    /// [`read_plugin_cache`](Self::read_plugin_cache) from a file. A missing
    /// file is a cold start.
    pub fn read_cache_file(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        match File::open(path) {
            Ok(file) => Ok(self.read_plugin_cache(BufReader::new(file))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no plugin cache yet");
                Ok(0)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Serialize the catalogue.
    pub fn write_plugin_cache<W: Write>(&self, out: W) -> Result<()> {
        write_document(out, &self.config.cache_version, &self.binaries, &self.registry)
    }

    /// Write the catalogue to `path` and mark it clean.
    ///
    /// The document goes to a temporary file next to `path` that is then
    /// renamed over it.
    pub fn write_cache_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut tmp_name = path.file_name().map(|name| name.to_os_string()).unwrap_or_default();
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);

        let written = File::create(&tmp_path)
            .map_err(crate::Error::from)
            .and_then(|file| self.write_plugin_cache(BufWriter::new(file)));
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(err);
        }
        fs::rename(&tmp_path, path)?;

        self.dirty = false;
        tracing::debug!(path = %path.display(), binaries = self.binaries.len(), "plugin cache written");
        Ok(())
    }

    /// Write the catalogue to `path` if it changed. Returns whether it wrote.
    pub fn save_if_dirty(&mut self, path: impl AsRef<Path>) -> Result<bool> {
        if !self.dirty {
            return Ok(false);
        }
        self.write_cache_file(path)?;
        Ok(true)
    }

    /// Walk the search paths, describe new binaries and rebuild the accepted list.
    pub fn scan_plugin_files(&mut self) -> ScanStats {
        let span = observability::span_scan(self.config.search_paths.len());
        let _enter = span.enter();

        let mut stats = ScanStats::default();
        let mut scanner = BundleScanner::new(&self.config.bundle_suffix, &self.config.arch);
        for root in &self.config.search_paths {
            scanner.scan(root);
        }
        let (bundles, plugin_dirs) = scanner.finish();
        self.plugin_dirs = plugin_dirs;

        let mut found = HashSet::new();
        for bundle in bundles {
            if !found.insert(bundle.binary_path.clone()) {
                continue;
            }
            if self.known_binaries.contains(&bundle.binary_path) {
                continue;
            }

            tracing::debug!(binary = %bundle.binary_path.display(), "new plugin binary");
            let binary = Arc::new(Binary::new(&bundle.binary_path, Arc::clone(&self.loader)));
            let mut entry = PluginBinary::discovered(binary, bundle.bundle_path);
            entry.load_plugin_info(&self.registry, &self.host);
            self.known_binaries.insert(bundle.binary_path);
            self.binaries.push(entry);
            self.dirty = true;
            stats.added += 1;
        }
        stats.found = found.len();

        self.reconcile(&found, &mut stats);

        tracing::info!(
            found = stats.found,
            added = stats.added,
            removed = stats.removed,
            reloaded = stats.reloaded,
            accepted = stats.accepted,
            rejected = stats.rejected,
            dirty = self.dirty,
            "plugin scan finished"
        );
        observability::record_scan(&stats, self.dirty);
        stats
    }

    fn reconcile(&mut self, found: &HashSet<PathBuf>, stats: &mut ScanStats) {
        self.plugins.clear();
        let mut kept = Vec::with_capacity(self.binaries.len());

        for mut binary in std::mem::take(&mut self.binaries) {
            if !found.contains(binary.file_path()) {
                tracing::debug!(binary = %binary.file_path().display(), "binary gone, dropped");
                self.known_binaries.remove(binary.file_path());
                self.dirty = true;
                stats.removed += 1;
                continue;
            }

            if binary.has_binary_changed() {
                tracing::debug!(binary = %binary.file_path().display(), "binary changed, describing again");
                binary.load_plugin_info(&self.registry, &self.host);
                self.dirty = true;
                stats.reloaded += 1;
            }

            for plugin in binary.plugins() {
                let Some(handler) = self.registry.find(plugin.api(), plugin.api_version()) else {
                    tracing::warn!(plugin = %plugin.raw_identifier(), api = %plugin.api(), "no api handler");
                    stats.rejected += 1;
                    continue;
                };
                match handler.plugin_supported(plugin) {
                    Ok(()) => {
                        handler.confirm_plugin(plugin);
                        self.plugins.push(Arc::clone(plugin));
                        stats.accepted += 1;
                    }
                    Err(reason) => {
                        tracing::warn!(
                            plugin = %plugin.raw_identifier(),
                            reason = %reason,
                            "ignoring unsupported plugin"
                        );
                        stats.rejected += 1;
                    }
                }
            }
            kept.push(binary);
        }

        self.binaries = kept;
    }

    /// Newest accepted plugin with `id` (case-insensitive). The first one
    /// found wins between equal versions.
    pub fn plugin_by_id(&self, id: &str) -> Option<&Arc<Plugin>> {
        let id = id.to_lowercase();
        let mut best: Option<&Arc<Plugin>> = None;
        for plugin in self.plugins.iter().filter(|p| p.identifier() == id) {
            if best.is_none_or(|current| plugin.trumps(current)) {
                best = Some(plugin);
            }
        }
        best
    }

    /// Newest accepted plugin with `id` and major version `major`.
    pub fn plugin_by_id_major(&self, id: &str, major: u32) -> Option<&Arc<Plugin>> {
        let id = id.to_lowercase();
        let mut best: Option<&Arc<Plugin>> = None;
        for plugin in self
            .plugins
            .iter()
            .filter(|p| p.identifier() == id && p.version_major() == major)
        {
            if best.is_none_or(|current| plugin.trumps(current)) {
                best = Some(plugin);
            }
        }
        best
    }

    /// First `<dir>/<base_name>` that exists among the directories the last
    /// scan visited.
    pub fn seek_plugin_file(&self, base_name: &str) -> Option<PathBuf> {
        if !self.config.plugin_seek {
            return None;
        }
        self.plugin_dirs
            .iter()
            .map(|dir| dir.join(base_name))
            .find(|candidate| candidate.exists())
    }
}

impl std::fmt::Debug for PluginCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginCache")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("binaries", &self.binaries.len())
            .field("plugins", &self.plugins.len())
            .field("dirty", &self.dirty)
            .finish()
    }
}
