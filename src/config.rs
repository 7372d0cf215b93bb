//! Plugin search-path configuration.
//!
//! The search list is assembled from three sources, in order:
//!
//! 1. `$OFX_PLUGIN_PATH`, split on the platform's list separators
//! 2. directories registered by the embedding host ([`CacheConfig::add_search_path`],
//!    [`CacheConfig::add_host_path`])
//! 3. the platform default plugin directory
//!
//! ```rust
//! use fxhost::config::{CacheConfig, SearchPath};
//!
//! let config = CacheConfig::new()
//!     .with_search_path(SearchPath::new("/opt/effects"))
//!     .with_search_path(SearchPath::non_recursive("/opt/effects-flat"))
//!     .with_cache_version("studio-1");
//! assert_eq!(config.search_paths.len(), 2);
//! ```

use std::path::PathBuf;

/// Environment variable holding extra plugin directories.
pub const PLUGIN_PATH_ENV: &str = "OFX_PLUGIN_PATH";

/// Directory name suffix identifying a plugin bundle.
pub const BUNDLE_SUFFIX: &str = ".ofx.bundle";

/// Cache version written by default. Bumping the crate version invalidates old caches.
pub const DEFAULT_CACHE_VERSION: &str = concat!("fxhost-", env!("CARGO_PKG_VERSION"));

#[cfg(windows)]
const DIRLIST_SEPARATORS: &[char] = &[';'];

#[cfg(not(windows))]
const DIRLIST_SEPARATORS: &[char] = &[':', ';'];

/// Architecture directory inside `<bundle>/Contents/` holding this platform's binary.
pub fn arch_str() -> &'static str {
    if cfg!(target_os = "windows") {
        if cfg!(target_pointer_width = "64") {
            "win64"
        } else {
            "win32"
        }
    } else if cfg!(target_os = "macos") {
        "MacOS"
    } else if cfg!(target_pointer_width = "32") {
        "Linux-x86"
    } else {
        "Linux-x86-64"
    }
}

/// Split an OS path list (`a:b;c`) into directories, dropping empty segments.
pub fn split_path_list(list: &str) -> Vec<PathBuf> {
    list.split(DIRLIST_SEPARATORS)
        .filter(|segment| !segment.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Standard plugin directory for a host id (`"Plugins"` for the shared one).
pub fn host_plugin_dir(host_id: &str) -> PathBuf {
    #[cfg(windows)]
    {
        let common = std::env::var("CommonProgramFiles")
            .unwrap_or_else(|_| "C:\\Program Files\\Common Files".to_string());
        PathBuf::from(common).join("OFX").join(host_id)
    }

    #[cfg(target_os = "macos")]
    {
        PathBuf::from("/Library/OFX").join(host_id)
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        PathBuf::from("/usr/OFX").join(host_id)
    }
}

/// One root directory to scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPath {
    /// Directory to scan.
    pub dir: PathBuf,
    /// How many directory levels below `dir` to descend.
    ///
    /// `None` walks the whole tree, `Some(0)` only looks at `dir` itself.
    pub max_depth: Option<usize>,
}

impl SearchPath {
    /// A recursively scanned directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_depth: None,
        }
    }

    /// A directory whose subdirectories are not visited.
    pub fn non_recursive(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_depth: Some(0),
        }
    }

    /// Limit recursion depth.
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }
}

/// Plugin cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Roots scanned in order.
    pub search_paths: Vec<SearchPath>,
    /// Version stamp written to, and required from, the persisted cache.
    pub cache_version: String,
    /// Whether [`seek_plugin_file`](crate::plugin::PluginCache::seek_plugin_file) looks anything up.
    pub plugin_seek: bool,
    /// Bundle directory suffix.
    pub bundle_suffix: String,
    /// Architecture subdirectory inside bundles.
    pub arch: String,
}

impl CacheConfig {
    /// An empty configuration: no search paths, default version.
    pub fn new() -> Self {
        Self {
            search_paths: Vec::new(),
            cache_version: DEFAULT_CACHE_VERSION.to_string(),
            plugin_seek: true,
            bundle_suffix: BUNDLE_SUFFIX.to_string(),
            arch: arch_str().to_string(),
        }
    }

    /// `$OFX_PLUGIN_PATH` entries followed by the platform default directory.
    pub fn from_env() -> Self {
        let mut config = Self::new();
        if let Ok(list) = std::env::var(PLUGIN_PATH_ENV) {
            for dir in split_path_list(&list) {
                config.add_search_path(SearchPath::new(dir));
            }
        }
        config.add_search_path(SearchPath::new(host_plugin_dir("Plugins")));
        config
    }

    /// Append a search path.
    pub fn add_search_path(&mut self, path: SearchPath) {
        self.search_paths.push(path);
    }

    /// Append the standard directory of a specific host.
    pub fn add_host_path(&mut self, host_id: &str) {
        self.add_search_path(SearchPath::new(host_plugin_dir(host_id)));
    }

    /// Builder form of [`add_search_path`](Self::add_search_path).
    pub fn with_search_path(mut self, path: SearchPath) -> Self {
        self.add_search_path(path);
        self
    }

    /// Set the cache version stamp.
    pub fn with_cache_version(mut self, version: impl Into<String>) -> Self {
        self.cache_version = version.into();
        self
    }

    /// Enable or disable plugin file seeking.
    pub fn with_plugin_seek(mut self, enabled: bool) -> Self {
        self.plugin_seek = enabled;
        self
    }

    /// Override the architecture subdirectory.
    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = arch.into();
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new().with_search_path(SearchPath::new(host_plugin_dir("Plugins")))
    }
}
