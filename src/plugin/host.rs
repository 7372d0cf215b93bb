//! Host record and the property suite served to plugins.

use super::abi::{
    FetchSuiteFn, PROPERTY_SUITE, PROPERTY_SUITE_VERSION, PropertySuiteV1, RawHost, STAT_ERR_BAD_HANDLE,
    STAT_ERR_BAD_INDEX, STAT_ERR_UNKNOWN, STAT_OK, Status, c_str,
};
use super::descriptor::PropertySet;
use std::ffi::{c_char, c_int, c_void};

/// Highest property index a plugin may write.
pub const MAX_PROPERTY_DIMENSION: usize = 1024;

static PROPERTY_SUITE_V1: PropertySuiteV1 = PropertySuiteV1 {
    set_string: prop_set_string,
    set_int: prop_set_int,
    set_double: prop_set_double,
    get_dimension: prop_get_dimension,
};

/// The host side of the plugin ABI.
///
/// Handed to every plugin through `setHost`; plugins fetch the property
/// suite from it and use that suite on the handle passed with each action.
pub struct Host {
    raw: Box<RawHost>,
}

impl Host {
    /// A host serving the property suite.
    pub fn new() -> Self {
        let fetch_suite: FetchSuiteFn = fetch_suite;
        Self {
            raw: Box::new(RawHost {
                host: std::ptr::null_mut(),
                fetch_suite,
            }),
        }
    }

    /// Record passed to `setHost`. Valid while `self` lives.
    pub fn as_raw(&self) -> *mut RawHost {
        std::ptr::from_ref::<RawHost>(&*self.raw).cast_mut()
    }

    /// The property suite, as plugins see it.
    pub fn property_suite(&self) -> &'static PropertySuiteV1 {
        &PROPERTY_SUITE_V1
    }
}

impl Default for Host {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host").finish_non_exhaustive()
    }
}

unsafe extern "C" fn fetch_suite(_host: *mut c_void, name: *const c_char, version: c_int) -> *const c_void {
    // SAFETY: plugins pass null-terminated suite names.
    let name = unsafe { c_str(name) };
    if name.is_some() && name == PROPERTY_SUITE.to_str().ok() && version == PROPERTY_SUITE_VERSION {
        std::ptr::from_ref(&PROPERTY_SUITE_V1).cast()
    } else {
        std::ptr::null()
    }
}

/// # Safety
///
/// `props` must be null or the `PropertySet` handle passed with an action.
unsafe fn property_set<'a>(props: *mut c_void) -> Option<&'a mut PropertySet> {
    // SAFETY: forwarded from the caller.
    unsafe { props.cast::<PropertySet>().as_mut() }
}

fn property_index(index: c_int) -> Option<usize> {
    usize::try_from(index).ok().filter(|&index| index < MAX_PROPERTY_DIMENSION)
}

unsafe extern "C" fn prop_set_string(
    props: *mut c_void,
    name: *const c_char,
    index: c_int,
    value: *const c_char,
) -> Status {
    // SAFETY: plugins only hand back the handle they were given.
    let Some(set) = (unsafe { property_set(props) }) else {
        return STAT_ERR_BAD_HANDLE;
    };
    // SAFETY: plugins pass null-terminated strings.
    let (Some(name), Some(value)) = (unsafe { c_str(name) }, unsafe { c_str(value) }) else {
        return STAT_ERR_UNKNOWN;
    };
    let Some(index) = property_index(index) else {
        return STAT_ERR_BAD_INDEX;
    };
    set.set_string(name, index, value);
    STAT_OK
}

unsafe extern "C" fn prop_set_int(props: *mut c_void, name: *const c_char, index: c_int, value: c_int) -> Status {
    // SAFETY: plugins only hand back the handle they were given.
    let Some(set) = (unsafe { property_set(props) }) else {
        return STAT_ERR_BAD_HANDLE;
    };
    // SAFETY: plugins pass null-terminated strings.
    let Some(name) = (unsafe { c_str(name) }) else {
        return STAT_ERR_UNKNOWN;
    };
    let Some(index) = property_index(index) else {
        return STAT_ERR_BAD_INDEX;
    };
    set.set_int(name, index, value);
    STAT_OK
}

unsafe extern "C" fn prop_set_double(props: *mut c_void, name: *const c_char, index: c_int, value: f64) -> Status {
    // SAFETY: plugins only hand back the handle they were given.
    let Some(set) = (unsafe { property_set(props) }) else {
        return STAT_ERR_BAD_HANDLE;
    };
    // SAFETY: plugins pass null-terminated strings.
    let Some(name) = (unsafe { c_str(name) }) else {
        return STAT_ERR_UNKNOWN;
    };
    let Some(index) = property_index(index) else {
        return STAT_ERR_BAD_INDEX;
    };
    set.set_double(name, index, value);
    STAT_OK
}

unsafe extern "C" fn prop_get_dimension(props: *mut c_void, name: *const c_char, count: *mut c_int) -> Status {
    // SAFETY: plugins only hand back the handle they were given.
    let Some(set) = (unsafe { property_set(props) }) else {
        return STAT_ERR_BAD_HANDLE;
    };
    // SAFETY: plugins pass null-terminated strings.
    let Some(name) = (unsafe { c_str(name) }) else {
        return STAT_ERR_UNKNOWN;
    };
    if count.is_null() {
        return STAT_ERR_BAD_HANDLE;
    }
    let dimension = c_int::try_from(set.dimension(name)).unwrap_or(c_int::MAX);
    // SAFETY: checked non-null; the plugin owns the out slot.
    unsafe { count.write(dimension) };
    STAT_OK
}
