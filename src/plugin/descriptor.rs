//! Catalogue entries: plugin descriptors and the binaries that carry them.

use super::abi::{GET_NUMBER_OF_PLUGINS, GET_PLUGIN, GetNumberOfPluginsFn, PluginRecord};
use super::api::ApiRegistry;
use super::binary::{Binary, fetch_raw_plugin};
use super::host::Host;
use crate::observability;
use std::collections::BTreeMap;
use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Values of one property. Every property has a single type and holds
/// `dimension` values of it.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// String values.
    String(Vec<String>),
    /// Integer values.
    Int(Vec<i32>),
    /// Floating point values.
    Double(Vec<f64>),
}

impl PropertyValue {
    /// Type tag used in the persisted cache.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Int(_) => "int",
            Self::Double(_) => "double",
        }
    }

    /// Number of values.
    pub fn dimension(&self) -> usize {
        match self {
            Self::String(values) => values.len(),
            Self::Int(values) => values.len(),
            Self::Double(values) => values.len(),
        }
    }

    /// Values rendered as text, in index order.
    pub fn to_strings(&self) -> Vec<String> {
        match self {
            Self::String(values) => values.clone(),
            Self::Int(values) => values.iter().map(i32::to_string).collect(),
            Self::Double(values) => values.iter().map(f64::to_string).collect(),
        }
    }
}

fn set_at<T: Clone + Default>(values: &mut Vec<T>, index: usize, value: T) {
    if values.len() <= index {
        values.resize(index + 1, T::default());
    }
    values[index] = value;
}

/// Named, typed, multi-valued properties filled in by a plugin's describe
/// action.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertySet {
    values: BTreeMap<String, PropertyValue>,
}

impl PropertySet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the string at `index`, growing the property as needed.
    ///
    /// A property of another type is replaced.
    pub fn set_string(&mut self, name: &str, index: usize, value: &str) {
        match self.values.get_mut(name) {
            Some(PropertyValue::String(values)) => set_at(values, index, value.to_string()),
            _ => {
                let mut values = Vec::new();
                set_at(&mut values, index, value.to_string());
                self.values.insert(name.to_string(), PropertyValue::String(values));
            }
        }
    }

    /// Set the integer at `index`, growing the property as needed.
    pub fn set_int(&mut self, name: &str, index: usize, value: i32) {
        match self.values.get_mut(name) {
            Some(PropertyValue::Int(values)) => set_at(values, index, value),
            _ => {
                let mut values = Vec::new();
                set_at(&mut values, index, value);
                self.values.insert(name.to_string(), PropertyValue::Int(values));
            }
        }
    }

    /// Set the double at `index`, growing the property as needed.
    pub fn set_double(&mut self, name: &str, index: usize, value: f64) {
        match self.values.get_mut(name) {
            Some(PropertyValue::Double(values)) => set_at(values, index, value),
            _ => {
                let mut values = Vec::new();
                set_at(&mut values, index, value);
                self.values.insert(name.to_string(), PropertyValue::Double(values));
            }
        }
    }

    /// Replace a whole property.
    pub fn insert(&mut self, name: impl Into<String>, value: PropertyValue) {
        self.values.insert(name.into(), value);
    }

    /// Look up a property.
    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.values.get(name)
    }

    /// String values of `name`; empty when absent or of another type.
    pub fn strings(&self, name: &str) -> &[String] {
        match self.values.get(name) {
            Some(PropertyValue::String(values)) => values,
            _ => &[],
        }
    }

    /// Integer values of `name`; empty when absent or of another type.
    pub fn ints(&self, name: &str) -> &[i32] {
        match self.values.get(name) {
            Some(PropertyValue::Int(values)) => values,
            _ => &[],
        }
    }

    /// Double values of `name`; empty when absent or of another type.
    pub fn doubles(&self, name: &str) -> &[f64] {
        match self.values.get(name) {
            Some(PropertyValue::Double(values)) => values,
            _ => &[],
        }
    }

    /// Number of values of `name`, 0 when absent.
    pub fn dimension(&self, name: &str) -> usize {
        self.values.get(name).map_or(0, PropertyValue::dimension)
    }

    /// Properties in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Number of properties.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the set has no properties.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Description of one plugin found inside a binary.
///
/// Descriptors are shared: the binary's list and the engine's accepted list
/// hold the same `Arc`. The descriptor keeps a handle to its binary but does
/// not own the catalogue entry.
#[derive(Debug)]
pub struct Plugin {
    binary: Arc<Binary>,
    index: usize,
    api: String,
    api_version: i32,
    raw_identifier: String,
    identifier: String,
    version_major: u32,
    version_minor: u32,
    properties: PropertySet,
}

impl Plugin {
    /// Describe the plugin at `index` of `binary`.
    pub fn new(
        binary: Arc<Binary>,
        index: usize,
        api: impl Into<String>,
        api_version: i32,
        identifier: impl Into<String>,
        version_major: u32,
        version_minor: u32,
    ) -> Self {
        let raw_identifier = identifier.into();
        Self {
            binary,
            index,
            api: api.into(),
            api_version,
            identifier: raw_identifier.to_lowercase(),
            raw_identifier,
            version_major,
            version_minor,
            properties: PropertySet::new(),
        }
    }

    /// Describe a plugin from its ABI record.
    pub fn from_record(binary: Arc<Binary>, index: usize, record: &PluginRecord) -> Self {
        Self::new(
            binary,
            index,
            record.api.as_str(),
            record.api_version,
            record.identifier.as_str(),
            record.version_major,
            record.version_minor,
        )
    }

    /// Binary carrying this plugin.
    pub fn binary(&self) -> &Arc<Binary> {
        &self.binary
    }

    /// Position inside the binary.
    pub fn index(&self) -> usize {
        self.index
    }

    /// API family name.
    pub fn api(&self) -> &str {
        &self.api
    }

    /// API version.
    pub fn api_version(&self) -> i32 {
        self.api_version
    }

    /// Identifier as the plugin spells it.
    pub fn raw_identifier(&self) -> &str {
        &self.raw_identifier
    }

    /// Lowercased identifier used for lookups.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Major version.
    pub fn version_major(&self) -> u32 {
        self.version_major
    }

    /// Minor version.
    pub fn version_minor(&self) -> u32 {
        self.version_minor
    }

    /// Properties captured when the plugin was described.
    pub fn properties(&self) -> &PropertySet {
        &self.properties
    }

    /// Mutable access for API handlers filling in properties.
    pub fn properties_mut(&mut self) -> &mut PropertySet {
        &mut self.properties
    }

    /// Whether this plugin's version is strictly newer than `other`'s.
    pub fn trumps(&self, other: &Plugin) -> bool {
        (self.version_major, self.version_minor) > (other.version_major, other.version_minor)
    }
}

/// Catalogue entry for one binary inside a bundle.
#[derive(Debug)]
pub struct PluginBinary {
    binary: Arc<Binary>,
    bundle_path: PathBuf,
    file_modification_time: i64,
    file_size: u64,
    plugins: Vec<Arc<Plugin>>,
}

impl PluginBinary {
    /// Entry for a binary found on disk. Nothing is described yet; call
    /// [`load_plugin_info`](Self::load_plugin_info).
    pub fn discovered(binary: Arc<Binary>, bundle_path: impl Into<PathBuf>) -> Self {
        let file_modification_time = binary.modification_time();
        let file_size = binary.file_size();
        Self {
            binary,
            bundle_path: bundle_path.into(),
            file_modification_time,
            file_size,
            plugins: Vec::new(),
        }
    }

    /// Entry restored from the persisted cache with the recorded stats.
    pub fn from_cache(
        binary: Arc<Binary>,
        bundle_path: impl Into<PathBuf>,
        file_modification_time: i64,
        file_size: u64,
    ) -> Self {
        Self {
            binary,
            bundle_path: bundle_path.into(),
            file_modification_time,
            file_size,
            plugins: Vec::new(),
        }
    }

    /// The binary handle.
    pub fn binary(&self) -> &Arc<Binary> {
        &self.binary
    }

    /// Path of the binary file.
    pub fn file_path(&self) -> &Path {
        self.binary.path()
    }

    /// Path of the enclosing bundle directory.
    pub fn bundle_path(&self) -> &Path {
        &self.bundle_path
    }

    /// Recorded modification time.
    pub fn file_modification_time(&self) -> i64 {
        self.file_modification_time
    }

    /// Recorded file size.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Whether the file on disk no longer matches the recorded stats.
    ///
    /// Checked against the file on every call, so a rescan notices a binary
    /// rebuilt since the last one.
    pub fn has_binary_changed(&self) -> bool {
        self.binary.modification_time() != self.file_modification_time
            || self.binary.file_size() != self.file_size
    }

    /// Whether the binary could be opened and exposes its entry points.
    pub fn is_valid(&self) -> bool {
        !self.binary.is_invalid()
    }

    /// Described plugins.
    pub fn plugins(&self) -> &[Arc<Plugin>] {
        &self.plugins
    }

    /// Number of described plugins.
    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }

    /// Add a plugin restored from the persisted cache.
    pub fn add_plugin(&mut self, plugin: Plugin) {
        self.plugins.push(Arc::new(plugin));
    }

    /// Load the binary and (re)describe every plugin it carries.
    ///
    /// The recorded stats are refreshed first. Plugins whose API no handler
    /// accepts are left out; a handler failing to describe a plugin keeps it
    /// with empty properties. The binary is unloaded again before returning.
    pub fn load_plugin_info(&mut self, handlers: &ApiRegistry, host: &Host) {
        self.file_modification_time = self.binary.modification_time();
        self.file_size = self.binary.file_size();
        self.plugins.clear();
        self.binary.set_invalid(false);

        let _span = observability::instrument_describe(self.binary.path());
        let path = self.binary.path().display().to_string();
        let _guard = match self.binary.acquire() {
            Ok(guard) => guard,
            Err(err) => {
                tracing::warn!(binary = %path, error = %err, "can't load plugin binary");
                return;
            }
        };

        // both entry points must be exported, whatever the count turns out to be
        let entry_points = self
            .binary
            .find_symbol(GET_PLUGIN)
            .and_then(|_| self.binary.find_symbol(GET_NUMBER_OF_PLUGINS));
        let count = match entry_points {
            Ok(symbol) => {
                // SAFETY: the plugin ABI fixes the signature of this symbol.
                let get_count =
                    unsafe { std::mem::transmute::<*mut c_void, GetNumberOfPluginsFn>(symbol.as_ptr()) };
                // SAFETY: the binary is loaded while the guard lives.
                usize::try_from(unsafe { get_count() }).unwrap_or(0)
            }
            Err(err) => {
                tracing::warn!(binary = %path, error = %err, "not a plugin binary");
                self.binary.set_invalid(true);
                return;
            }
        };

        for index in 0..count {
            let raw = match fetch_raw_plugin(&self.binary, index) {
                Ok(Some(raw)) => raw,
                Ok(None) => {
                    tracing::warn!(binary = %path, index, "binary returned no plugin record");
                    continue;
                }
                Err(err) => {
                    tracing::warn!(binary = %path, error = %err, "not a plugin binary");
                    self.binary.set_invalid(true);
                    return;
                }
            };

            // SAFETY: non-null record inside the loaded binary, strings are C strings.
            let Some(record) = (unsafe { PluginRecord::from_raw(raw.as_ref()) }) else {
                tracing::warn!(binary = %path, index, "plugin record without api or identifier");
                continue;
            };

            let Some(handler) = handlers.find(&record.api, record.api_version) else {
                tracing::debug!(
                    binary = %path,
                    api = %record.api,
                    api_version = record.api_version,
                    "no handler for plugin api, ignoring"
                );
                continue;
            };

            let mut plugin = handler.new_plugin(Arc::clone(&self.binary), index, &record);
            if let Err(err) = handler.load_from_plugin(&mut plugin, host) {
                tracing::warn!(
                    plugin = %plugin.raw_identifier(),
                    error = %err,
                    "plugin could not be described"
                );
            }
            tracing::debug!(plugin = %plugin.raw_identifier(), index, "plugin described");
            self.plugins.push(Arc::new(plugin));
        }
    }
}
