//! API handlers: per-API-family policy plugged into the cache engine.
//!
//! The engine only knows how to find binaries, enumerate their plugin
//! records and persist the catalogue. Everything API specific (how a plugin
//! is described, whether it is usable, what extra data is cached for it)
//! lives behind [`ApiHandler`].

use super::abi::PluginRecord;
use super::binary::Binary;
use super::descriptor::Plugin;
use super::host::Host;
use super::PluginError;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Attributes of a cache document element, by name.
pub type Attributes = BTreeMap<String, String>;

/// Writer the engine hands to [`ApiHandler::save_xml`].
pub type XmlWriter<'a> = quick_xml::Writer<&'a mut Vec<u8>>;

/// Policy for one plugin API family.
pub trait ApiHandler: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Whether this handler takes plugins of `api` at `version`.
    fn matches(&self, api: &str, version: i32) -> bool;

    /// Create the descriptor for a plugin record.
    fn new_plugin(&self, binary: Arc<Binary>, index: usize, record: &PluginRecord) -> Plugin {
        Plugin::from_record(binary, index, record)
    }

    /// Fill in `plugin`'s API data by talking to the live plugin.
    fn load_from_plugin(&self, plugin: &mut Plugin, host: &Host) -> Result<(), PluginError>;

    /// Decide whether the host can use `plugin`. `Err` carries the reason.
    fn plugin_supported(&self, plugin: &Plugin) -> Result<(), String>;

    /// Called for every plugin that made it into the accepted list.
    fn confirm_plugin(&self, _plugin: &Arc<Plugin>) {}

    /// Start restoring one plugin's API data from the cache document.
    fn begin_xml_parsing(&self, plugin: &Plugin) -> Box<dyn ApiXmlParser>;

    /// Write `plugin`'s API data into the cache document.
    fn save_xml(&self, plugin: &Plugin, writer: &mut XmlWriter<'_>) -> crate::Result<()>;
}

/// Receives the elements nested in one cached plugin.
pub trait ApiXmlParser {
    /// An element opened.
    fn element_begin(&mut self, name: &str, attributes: &Attributes);

    /// Character data, possibly delivered in several pieces.
    fn characters(&mut self, text: &str);

    /// An element closed.
    fn element_end(&mut self, name: &str);

    /// The plugin element closed; store what was parsed.
    fn end(self: Box<Self>, plugin: &mut Plugin);
}

/// Ordered set of API handlers.
///
/// Lookups return the first registered handler that matches.
#[derive(Default, Clone)]
pub struct ApiRegistry {
    handlers: Vec<Arc<dyn ApiHandler>>,
}

impl ApiRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler.
    pub fn register(&mut self, handler: Arc<dyn ApiHandler>) {
        tracing::debug!(handler = handler.name(), "api handler registered");
        self.handlers.push(handler);
    }

    /// First handler matching `(api, version)`.
    pub fn find(&self, api: &str, version: i32) -> Option<&Arc<dyn ApiHandler>> {
        self.handlers.iter().find(|handler| handler.matches(api, version))
    }

    /// Registered handlers in order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ApiHandler>> {
        self.handlers.iter()
    }

    /// Number of handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for ApiRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.handlers.iter().map(|handler| handler.name()))
            .finish()
    }
}
