//! C ABI shared with plugin binaries.
//!
//! A plugin binary exports two functions:
//!
//! ```c
//! int        OfxGetNumberOfPlugins(void);
//! OfxPlugin* OfxGetPlugin(int nth);
//! ```
//!
//! Each returned record names the plugin API it implements, the API version,
//! its identifier and version, a `setHost` slot the host calls before anything
//! else, and the `mainEntry` action dispatcher. [`RawPlugin`] and [`RawHost`]
//! mirror those layouts.

use std::ffi::{CStr, c_char, c_int, c_uint, c_void};

/// Symbol returning the number of plugins in a binary.
pub const GET_NUMBER_OF_PLUGINS: &str = "OfxGetNumberOfPlugins";

/// Symbol returning the nth plugin record.
pub const GET_PLUGIN: &str = "OfxGetPlugin";

/// Status code returned across the ABI.
pub type Status = c_int;

/// Success.
pub const STAT_OK: Status = 0;
/// Generic failure.
pub const STAT_FAILED: Status = 1;
/// Unknown property or suite.
pub const STAT_ERR_UNKNOWN: Status = 3;
/// Unsupported request.
pub const STAT_ERR_UNSUPPORTED: Status = 5;
/// Null or foreign handle.
pub const STAT_ERR_BAD_HANDLE: Status = 9;
/// Index out of range.
pub const STAT_ERR_BAD_INDEX: Status = 10;
/// Plugin did not trap the action; host default applies.
pub const STAT_REPLY_DEFAULT: Status = 14;

/// Action sent once after the binary is loaded.
pub const ACTION_LOAD: &CStr = c"OfxActionLoad";
/// Action asking the plugin to describe itself into a property set.
pub const ACTION_DESCRIBE: &CStr = c"OfxActionDescribe";
/// Action sent before the binary is unloaded.
pub const ACTION_UNLOAD: &CStr = c"OfxActionUnload";

/// Name under which the host serves its property suite.
pub const PROPERTY_SUITE: &CStr = c"FxPropertySuite";
/// Property suite version served.
pub const PROPERTY_SUITE_VERSION: c_int = 1;

/// `OfxGetNumberOfPlugins`.
pub type GetNumberOfPluginsFn = unsafe extern "C" fn() -> c_int;

/// `OfxGetPlugin`.
pub type GetPluginFn = unsafe extern "C" fn(nth: c_int) -> *mut RawPlugin;

/// Host registration slot of a plugin record.
pub type SetHostFn = unsafe extern "C" fn(host: *mut RawHost);

/// Action dispatcher of a plugin record.
pub type MainEntryFn = unsafe extern "C" fn(
    action: *const c_char,
    handle: *const c_void,
    in_args: *mut c_void,
    out_args: *mut c_void,
) -> Status;

/// Suite lookup the host exposes to plugins.
pub type FetchSuiteFn =
    unsafe extern "C" fn(host: *mut c_void, suite_name: *const c_char, version: c_int) -> *const c_void;

/// Plugin record returned by `OfxGetPlugin`.
#[repr(C)]
pub struct RawPlugin {
    /// Null-terminated API family name.
    pub plugin_api: *const c_char,
    /// API version.
    pub api_version: c_int,
    /// Null-terminated plugin identifier.
    pub plugin_identifier: *const c_char,
    /// Major version of the plugin.
    pub plugin_version_major: c_uint,
    /// Minor version of the plugin.
    pub plugin_version_minor: c_uint,
    /// Called by the host with its host record.
    pub set_host: Option<SetHostFn>,
    /// Action dispatcher.
    pub main_entry: Option<MainEntryFn>,
}

// SAFETY: RawPlugin only holds pointers to static data and function pointers
// inside the plugin binary.
unsafe impl Send for RawPlugin {}
unsafe impl Sync for RawPlugin {}

/// Host record handed to `setHost`.
#[repr(C)]
pub struct RawHost {
    /// Host property set handle (opaque to plugins).
    pub host: *mut c_void,
    /// Suite lookup.
    pub fetch_suite: FetchSuiteFn,
}

// SAFETY: the host handle is owned by the host and never dereferenced by it
// through this record.
unsafe impl Send for RawHost {}
unsafe impl Sync for RawHost {}

/// Property suite served under [`PROPERTY_SUITE`].
///
/// `props` is the property set handle passed to the plugin as the action
/// handle; indices address one dimension of a multi-valued property.
#[repr(C)]
pub struct PropertySuiteV1 {
    /// Set one string value.
    pub set_string: unsafe extern "C" fn(
        props: *mut c_void,
        name: *const c_char,
        index: c_int,
        value: *const c_char,
    ) -> Status,
    /// Set one integer value.
    pub set_int:
        unsafe extern "C" fn(props: *mut c_void, name: *const c_char, index: c_int, value: c_int) -> Status,
    /// Set one double value.
    pub set_double:
        unsafe extern "C" fn(props: *mut c_void, name: *const c_char, index: c_int, value: f64) -> Status,
    /// Number of values of a property (0 when absent).
    pub get_dimension:
        unsafe extern "C" fn(props: *mut c_void, name: *const c_char, count: *mut c_int) -> Status,
}

/// Borrow a C string, `None` for null or non UTF-8.
///
/// # Safety
///
/// `ptr` must be null or point to a null-terminated string valid for `'a`.
pub unsafe fn c_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: caller guarantees ptr is valid and null-terminated.
    unsafe { CStr::from_ptr(ptr).to_str().ok() }
}

/// Owned copy of the identifying fields of a [`RawPlugin`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginRecord {
    /// API family name.
    pub api: String,
    /// API version.
    pub api_version: i32,
    /// Identifier as the plugin spells it.
    pub identifier: String,
    /// Major version.
    pub version_major: u32,
    /// Minor version.
    pub version_minor: u32,
}

impl PluginRecord {
    /// Copy a raw record. Returns `None` when the api or identifier is missing.
    ///
    /// # Safety
    ///
    /// The string pointers of `raw` must be null or valid C strings.
    pub unsafe fn from_raw(raw: &RawPlugin) -> Option<Self> {
        // SAFETY: forwarded from the caller.
        let (api, identifier) = unsafe { (c_str(raw.plugin_api)?, c_str(raw.plugin_identifier)?) };
        Some(Self {
            api: api.to_string(),
            api_version: raw.api_version,
            identifier: identifier.to_string(),
            version_major: raw.plugin_version_major,
            version_minor: raw.plugin_version_minor,
        })
    }
}
