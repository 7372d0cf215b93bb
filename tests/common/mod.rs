//! In-process plugin modules and bundle fixtures for integration tests.
//!
//! Each module is a symbol table of `extern "C"` functions served through a
//! [`StaticLoader`], so the full ABI path (count, get by index, set host,
//! main entry describe through the property suite) runs without building
//! shared objects. Bundles are real directories in a temp dir so scanning
//! and stat-based change detection work as they do on disk.

#![allow(dead_code)]

use fxhost::config::{CacheConfig, SearchPath, arch_str};
use fxhost::plugin::abi::{
    ACTION_DESCRIBE, FetchSuiteFn, GET_NUMBER_OF_PLUGINS, GET_PLUGIN, PROPERTY_SUITE, PROPERTY_SUITE_VERSION,
    PropertySuiteV1, RawHost, RawPlugin, STAT_FAILED, STAT_OK, STAT_REPLY_DEFAULT, Status,
};
use fxhost::plugin::image_effect::{
    CONTEXT_FILTER, CONTEXT_GENERAL, CONTEXT_READER, PROP_LABEL, PROP_SUPPORTED_CONTEXTS,
    PROP_SUPPORTED_EXTENSIONS,
};
use fxhost::plugin::{ImageEffectApi, PluginCache, StaticLoader, bundle_binary_path};
use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Symbols of one in-process module.
pub type Symbols = Vec<(&'static str, *const c_void)>;

/// Cache version used by fixtures.
pub const TEST_CACHE_VERSION: &str = "test-1";

// ============================================================================
// Plugin side of the ABI
// ============================================================================

static FETCH_SUITE: Mutex<Option<FetchSuiteFn>> = Mutex::new(None);

unsafe extern "C" fn set_host(host: *mut RawHost) {
    // SAFETY: the host record is alive for the duration of the call.
    let fetch = unsafe { (*host).fetch_suite };
    *FETCH_SUITE.lock().unwrap() = Some(fetch);
}

fn property_suite() -> &'static PropertySuiteV1 {
    let fetch = FETCH_SUITE.lock().unwrap().expect("setHost called before any action");
    let suite = unsafe { fetch(std::ptr::null_mut(), PROPERTY_SUITE.as_ptr(), PROPERTY_SUITE_VERSION) };
    assert!(!suite.is_null(), "host serves the property suite");
    unsafe { &*suite.cast::<PropertySuiteV1>() }
}

fn set_strings(props: *const c_void, name: &str, values: &[&str]) {
    let suite = property_suite();
    let name = CString::new(name).unwrap();
    for (index, value) in values.iter().enumerate() {
        let value = CString::new(*value).unwrap();
        let status = unsafe { (suite.set_string)(props.cast_mut(), name.as_ptr(), index as c_int, value.as_ptr()) };
        assert_eq!(status, STAT_OK);
    }
}

fn set_int(props: *const c_void, name: &str, value: i32) {
    let name = CString::new(name).unwrap();
    let status = unsafe { (property_suite().set_int)(props.cast_mut(), name.as_ptr(), 0, value) };
    assert_eq!(status, STAT_OK);
}

fn set_double(props: *const c_void, name: &str, value: f64) {
    let name = CString::new(name).unwrap();
    let status = unsafe { (property_suite().set_double)(props.cast_mut(), name.as_ptr(), 0, value) };
    assert_eq!(status, STAT_OK);
}

fn is_describe(action: *const c_char) -> bool {
    (unsafe { CStr::from_ptr(action) }) == ACTION_DESCRIBE
}

unsafe extern "C" fn blur_main(action: *const c_char, handle: *const c_void, _: *mut c_void, _: *mut c_void) -> Status {
    if !is_describe(action) {
        return STAT_REPLY_DEFAULT;
    }
    set_strings(handle, PROP_SUPPORTED_CONTEXTS, &[CONTEXT_FILTER, CONTEXT_GENERAL]);
    set_strings(handle, PROP_LABEL, &["Blur & Soften <fast>"]);
    set_int(handle, "net.example.Passes", 3);
    set_double(handle, "net.example.Radius", 2.75);
    STAT_OK
}

unsafe extern "C" fn read_png_main(action: *const c_char, handle: *const c_void, _: *mut c_void, _: *mut c_void) -> Status {
    if !is_describe(action) {
        return STAT_REPLY_DEFAULT;
    }
    set_strings(handle, PROP_SUPPORTED_CONTEXTS, &[CONTEXT_READER]);
    set_strings(handle, PROP_SUPPORTED_EXTENSIONS, &["png"]);
    STAT_OK
}

unsafe extern "C" fn read_all_main(action: *const c_char, handle: *const c_void, _: *mut c_void, _: *mut c_void) -> Status {
    if !is_describe(action) {
        return STAT_REPLY_DEFAULT;
    }
    set_strings(handle, PROP_SUPPORTED_CONTEXTS, &[CONTEXT_READER]);
    set_strings(handle, PROP_SUPPORTED_EXTENSIONS, &["png", "jpg", "exr"]);
    STAT_OK
}

unsafe extern "C" fn deform_main(action: *const c_char, handle: *const c_void, _: *mut c_void, _: *mut c_void) -> Status {
    if !is_describe(action) {
        return STAT_REPLY_DEFAULT;
    }
    set_strings(handle, PROP_SUPPORTED_CONTEXTS, &["OfxImageEffectContextDeform"]);
    STAT_OK
}

unsafe extern "C" fn failing_main(action: *const c_char, _: *const c_void, _: *mut c_void, _: *mut c_void) -> Status {
    if is_describe(action) { STAT_FAILED } else { STAT_OK }
}

const fn record(api: &'static CStr, id: &'static CStr, major: u32, minor: u32, main: fxhost::plugin::abi::MainEntryFn) -> RawPlugin {
    RawPlugin {
        plugin_api: api.as_ptr(),
        api_version: 1,
        plugin_identifier: id.as_ptr(),
        plugin_version_major: major,
        plugin_version_minor: minor,
        set_host: Some(set_host),
        main_entry: Some(main),
    }
}

pub static BLUR_V1: RawPlugin = record(c"OfxImageEffectPluginAPI", c"net.example.Blur", 1, 0, blur_main);
pub static BLUR_V2: RawPlugin = record(c"OfxImageEffectPluginAPI", c"net.example.Blur", 2, 1, blur_main);
pub static READ_PNG: RawPlugin = record(c"OfxImageEffectPluginAPI", c"net.example.ReadPNG", 1, 2, read_png_main);
pub static READ_ALL: RawPlugin = record(c"OfxImageEffectPluginAPI", c"net.example.ReadAll", 1, 0, read_all_main);
pub static PARTICLES: RawPlugin = record(c"OfxParticleSystemAPI", c"net.example.Particles", 1, 0, blur_main);
pub static DEFORM: RawPlugin = record(c"OfxImageEffectPluginAPI", c"net.example.Deform", 1, 0, deform_main);
pub static BROKEN: RawPlugin = record(c"OfxImageEffectPluginAPI", c"net.example.Broken", 1, 0, failing_main);

macro_rules! plugin_module {
    ($module:ident: $($record:ident),+) => {
        /// In-process plugin module.
        pub mod $module {
            use super::*;

            static RECORDS: &[&RawPlugin] = &[$(&super::$record),+];

            unsafe extern "C" fn count() -> c_int {
                RECORDS.len() as c_int
            }

            unsafe extern "C" fn get(nth: c_int) -> *mut RawPlugin {
                usize::try_from(nth)
                    .ok()
                    .and_then(|index| RECORDS.get(index))
                    .map_or(std::ptr::null_mut(), |record| std::ptr::from_ref::<RawPlugin>(record).cast_mut())
            }

            /// Exported symbols.
            pub fn symbols() -> Symbols {
                vec![
                    (GET_NUMBER_OF_PLUGINS, count as *const c_void),
                    (GET_PLUGIN, get as *const c_void),
                ]
            }
        }
    };
}

plugin_module!(blur: BLUR_V1);
plugin_module!(blur_v2: BLUR_V2);
plugin_module!(readers: READ_PNG, READ_ALL);
plugin_module!(mixed: PARTICLES, DEFORM, BROKEN);

/// A module that opens but exports none of the plugin entry points.
pub fn not_a_plugin() -> Symbols {
    vec![("something_else", set_host as *const c_void)]
}

// ============================================================================
// Bundle fixtures
// ============================================================================

/// Temp plugin directory plus the loader serving its modules.
pub struct Fixture {
    pub dir: TempDir,
    pub loader: Arc<StaticLoader>,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            loader: Arc::new(StaticLoader::new()),
        }
    }

    /// Create `<dir>/<name>.ofx.bundle` with its binary file and serve
    /// `symbols` for it. Returns the binary path.
    pub fn install(&self, name: &str, symbols: Symbols) -> PathBuf {
        let binary = self.bundle_binary(name);
        fs::create_dir_all(binary.parent().unwrap()).unwrap();
        fs::write(&binary, format!("module {name}")).unwrap();
        self.loader.register(&binary, symbols);
        binary
    }

    /// Rewrite a bundle's binary with new contents and symbols.
    pub fn replace(&self, name: &str, symbols: Symbols) -> PathBuf {
        let binary = self.bundle_binary(name);
        fs::write(&binary, format!("module {name}, rebuilt with a different size")).unwrap();
        self.loader.register(&binary, symbols);
        binary
    }

    /// Delete a bundle.
    pub fn remove(&self, name: &str) {
        fs::remove_dir_all(self.bundle_dir(name)).unwrap();
        self.loader.unregister(&self.bundle_binary(name));
    }

    pub fn bundle_dir(&self, name: &str) -> PathBuf {
        self.dir.path().join(format!("{name}.ofx.bundle"))
    }

    pub fn bundle_binary(&self, name: &str) -> PathBuf {
        bundle_binary_path(&self.bundle_dir(name), arch_str()).unwrap()
    }

    pub fn cache_file(&self) -> PathBuf {
        self.dir.path().join("plugin-cache.xml")
    }

    pub fn config(&self) -> CacheConfig {
        CacheConfig::new()
            .with_search_path(SearchPath::new(self.dir.path()))
            .with_cache_version(TEST_CACHE_VERSION)
    }

    /// Engine over the fixture with the image-effect handler registered.
    pub fn cache(&self) -> PluginCache {
        self.cache_with(self.config())
    }

    pub fn cache_with(&self, config: CacheConfig) -> PluginCache {
        let mut cache = PluginCache::with_loader(config, self.loader.clone());
        cache.register_api_handler(Arc::new(ImageEffectApi::new()));
        cache
    }
}

/// Raw identifiers of the accepted plugins, in order.
pub fn accepted_ids(cache: &PluginCache) -> Vec<String> {
    cache.plugins().iter().map(|p| p.raw_identifier().to_string()).collect()
}
