//! Reference-counted access to plugin binaries.
//!
//! [`Binary`] wraps one on-disk module. Every [`load`](Binary::load) takes a
//! reference and maps the module on the first one; every
//! [`unload`](Binary::unload) drops a reference and unmaps it on the last.
//! Symbol lookup goes through the [`Library`] the configured
//! [`LibraryLoader`] opened, so the engine never talks to `libloading`
//! directly and hosts can serve statically linked plugins through
//! [`StaticLoader`].

use super::abi::{GET_PLUGIN, GetPluginFn, MainEntryFn, RawPlugin, STAT_REPLY_DEFAULT, Status};
use super::descriptor::Plugin;
use super::host::Host;
use super::PluginError;
use std::collections::HashMap;
use std::ffi::{CStr, c_int, c_void};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::UNIX_EPOCH;

/// A mapped module.
pub trait Library: Send {
    /// Address of an exported symbol, `None` if it is not exported.
    fn symbol(&self, name: &str) -> Option<NonNull<c_void>>;
}

/// Opens modules by path.
pub trait LibraryLoader: Send + Sync {
    /// Map the module at `path`.
    fn open(&self, path: &Path) -> Result<Box<dyn Library>, PluginError>;
}

/// Loads shared libraries from disk with `libloading`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeLoader;

struct NativeLibrary(libloading::Library);

impl Library for NativeLibrary {
    fn symbol(&self, name: &str) -> Option<NonNull<c_void>> {
        // SAFETY: the symbol is only read as an address here; callers cast it
        // to the type the plugin ABI fixes for that name.
        let symbol: libloading::Symbol<'_, *mut c_void> = unsafe { self.0.get(name.as_bytes()).ok()? };
        NonNull::new(*symbol)
    }
}

impl LibraryLoader for NativeLoader {
    fn open(&self, path: &Path) -> Result<Box<dyn Library>, PluginError> {
        // SAFETY: loading runs the module's initializers. Plugin directories
        // are trusted by the host that configured them.
        let library = unsafe { libloading::Library::new(path) }
            .map_err(|e| PluginError::LoadFailed(format!("{}: {}", path.display(), e)))?;
        Ok(Box::new(NativeLibrary(library)))
    }
}

type SymbolTable = HashMap<String, usize>;

/// Serves in-process symbol tables as if they were modules on disk.
///
/// Useful for plugins linked into the host executable: register the table
/// under the path the scanner derives for the bundle, and the rest of the
/// engine treats it like any other binary.
#[derive(Debug, Default)]
pub struct StaticLoader {
    modules: Mutex<HashMap<PathBuf, Arc<SymbolTable>>>,
    opens: AtomicUsize,
    live: Arc<AtomicUsize>,
}

struct StaticLibrary {
    symbols: Arc<SymbolTable>,
    live: Arc<AtomicUsize>,
}

impl Library for StaticLibrary {
    fn symbol(&self, name: &str) -> Option<NonNull<c_void>> {
        self.symbols
            .get(name)
            .and_then(|&address| NonNull::new(address as *mut c_void))
    }
}

impl Drop for StaticLibrary {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl StaticLoader {
    /// Create an empty loader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the symbols served for `path`.
    pub fn register<'a>(
        &self,
        path: impl Into<PathBuf>,
        symbols: impl IntoIterator<Item = (&'a str, *const c_void)>,
    ) {
        let table = symbols
            .into_iter()
            .map(|(name, address)| (name.to_string(), address as usize))
            .collect();
        self.modules_lock().insert(path.into(), Arc::new(table));
    }

    /// Forget the module registered for `path`.
    pub fn unregister(&self, path: &Path) {
        self.modules_lock().remove(path);
    }

    /// Number of successful opens so far.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Number of modules currently open.
    pub fn open_libraries(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    fn modules_lock(&self) -> MutexGuard<'_, HashMap<PathBuf, Arc<SymbolTable>>> {
        self.modules.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LibraryLoader for StaticLoader {
    fn open(&self, path: &Path) -> Result<Box<dyn Library>, PluginError> {
        let symbols = self
            .modules_lock()
            .get(path)
            .cloned()
            .ok_or_else(|| PluginError::LoadFailed(format!("{}: no such module", path.display())))?;
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StaticLibrary {
            symbols,
            live: Arc::clone(&self.live),
        }))
    }
}

struct LoadState {
    refs: usize,
    library: Option<Box<dyn Library>>,
    invalid: bool,
}

/// One on-disk plugin module.
pub struct Binary {
    path: PathBuf,
    loader: Arc<dyn LibraryLoader>,
    state: Mutex<LoadState>,
}

impl Binary {
    /// Create an unloaded handle for `path`.
    pub fn new(path: impl Into<PathBuf>, loader: Arc<dyn LibraryLoader>) -> Self {
        Self {
            path: path.into(),
            loader,
            state: Mutex::new(LoadState {
                refs: 0,
                library: None,
                invalid: false,
            }),
        }
    }

    /// Path of the module.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Modification time in seconds since the epoch, 0 if the file is missing.
    pub fn modification_time(&self) -> i64 {
        std::fs::metadata(&self.path)
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map(|elapsed| elapsed.as_secs() as i64)
            .unwrap_or(0)
    }

    /// File size in bytes, 0 if the file is missing.
    pub fn file_size(&self) -> u64 {
        std::fs::metadata(&self.path).map(|meta| meta.len()).unwrap_or(0)
    }

    /// Whether the module failed to open or lacks its entry points.
    pub fn is_invalid(&self) -> bool {
        self.lock().invalid
    }

    /// Mark the module (in)valid.
    pub fn set_invalid(&self, invalid: bool) {
        self.lock().invalid = invalid;
    }

    /// Whether the module is currently mapped.
    pub fn is_loaded(&self) -> bool {
        self.lock().library.is_some()
    }

    /// Outstanding load references.
    pub fn ref_count(&self) -> usize {
        self.lock().refs
    }

    /// Take a load reference, mapping the module if this is the first one.
    ///
    /// An open failure marks the binary invalid and takes no reference.
    pub fn load(&self) -> Result<(), PluginError> {
        let mut state = self.lock();
        if state.library.is_none() {
            match self.loader.open(&self.path) {
                Ok(library) => {
                    tracing::trace!(path = %self.path.display(), "binary loaded");
                    state.library = Some(library);
                }
                Err(err) => {
                    state.invalid = true;
                    return Err(err);
                }
            }
        }
        state.refs += 1;
        Ok(())
    }

    /// Drop a load reference, unmapping the module on the last one.
    pub fn unload(&self) {
        let mut state = self.lock();
        if state.refs == 0 {
            return;
        }
        state.refs -= 1;
        if state.refs == 0 {
            state.library = None;
            tracing::trace!(path = %self.path.display(), "binary unloaded");
        }
    }

    /// Take a load reference released when the guard drops.
    pub fn acquire(&self) -> Result<LoadGuard<'_>, PluginError> {
        self.load()?;
        Ok(LoadGuard { binary: self })
    }

    /// Resolve an exported symbol. The module must be loaded.
    pub fn find_symbol(&self, name: &str) -> Result<NonNull<c_void>, PluginError> {
        let state = self.lock();
        let library = state.library.as_ref().ok_or(PluginError::NotLoaded)?;
        library
            .symbol(name)
            .ok_or_else(|| PluginError::SymbolNotFound(name.to_string()))
    }

    fn lock(&self) -> MutexGuard<'_, LoadState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Binary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Binary")
            .field("path", &self.path)
            .field("refs", &state.refs)
            .field("loaded", &state.library.is_some())
            .field("invalid", &state.invalid)
            .finish()
    }
}

/// Load reference held for a scope.
pub struct LoadGuard<'a> {
    binary: &'a Binary,
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        self.binary.unload();
    }
}

/// Resolve and call `OfxGetPlugin(index)` on a loaded binary.
///
/// `None` when the binary has no record at `index`, including indices the
/// ABI can't express.
pub(crate) fn fetch_raw_plugin(binary: &Binary, index: usize) -> Result<Option<NonNull<RawPlugin>>, PluginError> {
    let symbol = binary.find_symbol(GET_PLUGIN)?;
    // SAFETY: the plugin ABI fixes the signature of this symbol.
    let get_plugin = unsafe { std::mem::transmute::<*mut c_void, GetPluginFn>(symbol.as_ptr()) };
    let Ok(index) = c_int::try_from(index) else {
        return Ok(None);
    };
    // SAFETY: the binary stays loaded for the duration of the call.
    Ok(NonNull::new(unsafe { get_plugin(index) }))
}

/// Live access to one catalogued plugin.
///
/// Construction loads the plugin's binary, fetches the plugin record at the
/// catalogued index and hands it the host record. Dropping the handle
/// releases the load reference.
pub struct PluginHandle {
    binary: Arc<Binary>,
    raw: NonNull<RawPlugin>,
}

// SAFETY: the record lives in the binary, which stays mapped while the
// handle holds its load reference.
unsafe impl Send for PluginHandle {}

impl PluginHandle {
    /// Open `plugin` and register `host` with it.
    ///
    /// Fails with [`PluginError::InconsistentPlugin`] when the binary has no
    /// record at the catalogued index.
    pub fn new(plugin: &Plugin, host: &Host) -> Result<Self, PluginError> {
        let binary = Arc::clone(plugin.binary());
        binary.load()?;

        let raw = match fetch_raw_plugin(&binary, plugin.index()) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                binary.unload();
                return Err(PluginError::InconsistentPlugin {
                    identifier: plugin.raw_identifier().to_string(),
                    index: plugin.index(),
                });
            }
            Err(err) => {
                binary.unload();
                return Err(err);
            }
        };

        // SAFETY: non-null record owned by the loaded binary.
        if let Some(set_host) = unsafe { raw.as_ref() }.set_host {
            // SAFETY: the host record outlives every handle created from it.
            unsafe { set_host(host.as_raw()) };
        }

        Ok(Self { binary, raw })
    }

    /// The live plugin record.
    pub fn raw(&self) -> &RawPlugin {
        // SAFETY: see the Send impl above.
        unsafe { self.raw.as_ref() }
    }

    /// Dispatch an action to the plugin's main entry.
    ///
    /// A record without a main entry answers every action with
    /// [`STAT_REPLY_DEFAULT`].
    pub fn main_entry(&self, action: &CStr, handle: *const c_void) -> Status {
        let entry: Option<MainEntryFn> = self.raw().main_entry;
        match entry {
            // SAFETY: the plugin ABI fixes the signature; the binary is loaded.
            Some(entry) => unsafe { entry(action.as_ptr(), handle, std::ptr::null_mut(), std::ptr::null_mut()) },
            None => STAT_REPLY_DEFAULT,
        }
    }

    /// The binary this handle keeps loaded.
    pub fn binary(&self) -> &Arc<Binary> {
        &self.binary
    }
}

impl Drop for PluginHandle {
    fn drop(&mut self) {
        self.binary.unload();
    }
}
