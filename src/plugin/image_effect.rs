//! Reference handler for the image-effect plugin API.
//!
//! Plugins are described by sending them the load, describe and unload
//! actions. During describe the action handle is a host-side
//! [`PropertySet`] the plugin fills in through the property suite. A plugin
//! is usable when it declares at least one context the handler accepts.
//!
//! The cached form of the property set is:
//!
//! ```xml
//! <property name="OfxImageEffectPropSupportedContexts" type="string" dimension="2">
//!   <value>OfxImageEffectContextFilter</value>
//!   <value>OfxImageEffectContextGeneral</value>
//! </property>
//! ```

use super::abi::{ACTION_DESCRIBE, ACTION_LOAD, ACTION_UNLOAD, STAT_OK, STAT_REPLY_DEFAULT, Status};
use super::api::{ApiHandler, ApiXmlParser, Attributes, XmlWriter};
use super::binary::PluginHandle;
use super::descriptor::{Plugin, PropertySet, PropertyValue};
use super::host::Host;
use super::PluginError;
use crate::error::Error;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use std::ffi::c_void;
use std::sync::Arc;

/// API family name.
pub const IMAGE_EFFECT_API: &str = "OfxImageEffectPluginAPI";
/// API version handled.
pub const IMAGE_EFFECT_API_VERSION: i32 = 1;

/// Contexts the plugin can be instantiated in.
pub const PROP_SUPPORTED_CONTEXTS: &str = "OfxImageEffectPropSupportedContexts";
/// File extensions a reader or writer plugin handles.
pub const PROP_SUPPORTED_EXTENSIONS: &str = "FxImageEffectPropSupportedExtensions";
/// User visible label.
pub const PROP_LABEL: &str = "OfxPropLabel";
/// Menu grouping.
pub const PROP_GROUPING: &str = "OfxImageEffectPluginPropGrouping";

/// Single input filter.
pub const CONTEXT_FILTER: &str = "OfxImageEffectContextFilter";
/// Arbitrary inputs.
pub const CONTEXT_GENERAL: &str = "OfxImageEffectContextGeneral";
/// No input.
pub const CONTEXT_GENERATOR: &str = "OfxImageEffectContextGenerator";
/// File reader.
pub const CONTEXT_READER: &str = "OfxImageEffectContextReader";
/// File writer.
pub const CONTEXT_WRITER: &str = "OfxImageEffectContextWriter";
/// Blend between two inputs.
pub const CONTEXT_TRANSITION: &str = "OfxImageEffectContextTransition";
/// Painting over an input.
pub const CONTEXT_PAINT: &str = "OfxImageEffectContextPaint";
/// Time remapping.
pub const CONTEXT_RETIMER: &str = "OfxImageEffectContextRetimer";

const DEFAULT_CONTEXTS: [&str; 8] = [
    CONTEXT_FILTER,
    CONTEXT_GENERAL,
    CONTEXT_GENERATOR,
    CONTEXT_READER,
    CONTEXT_WRITER,
    CONTEXT_TRANSITION,
    CONTEXT_PAINT,
    CONTEXT_RETIMER,
];

/// Whether `plugin` declares `context`.
pub fn supports_context(plugin: &Plugin, context: &str) -> bool {
    plugin
        .properties()
        .strings(PROP_SUPPORTED_CONTEXTS)
        .iter()
        .any(|declared| declared == context)
}

/// Extensions `plugin` declares, as written by the plugin.
pub fn supported_extensions(plugin: &Plugin) -> &[String] {
    plugin.properties().strings(PROP_SUPPORTED_EXTENSIONS)
}

/// Handler for `OfxImageEffectPluginAPI` version 1.
#[derive(Debug, Clone)]
pub struct ImageEffectApi {
    contexts: Vec<String>,
}

impl ImageEffectApi {
    /// Handler accepting every standard context.
    pub fn new() -> Self {
        Self::with_contexts(DEFAULT_CONTEXTS)
    }

    /// Handler accepting only `contexts`.
    pub fn with_contexts<I, S>(contexts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            contexts: contexts.into_iter().map(Into::into).collect(),
        }
    }

    /// Accepted contexts.
    pub fn contexts(&self) -> &[String] {
        &self.contexts
    }
}

impl Default for ImageEffectApi {
    fn default() -> Self {
        Self::new()
    }
}

fn succeeded(status: Status) -> bool {
    status == STAT_OK || status == STAT_REPLY_DEFAULT
}

impl ApiHandler for ImageEffectApi {
    fn name(&self) -> &str {
        "image effect"
    }

    fn matches(&self, api: &str, version: i32) -> bool {
        api == IMAGE_EFFECT_API && version == IMAGE_EFFECT_API_VERSION
    }

    fn load_from_plugin(&self, plugin: &mut Plugin, host: &Host) -> Result<(), PluginError> {
        let handle = PluginHandle::new(plugin, host)?;
        let describe_failed = |status| PluginError::DescribeFailed {
            identifier: plugin.raw_identifier().to_string(),
            status,
        };

        let status = handle.main_entry(ACTION_LOAD, std::ptr::null());
        if !succeeded(status) {
            return Err(describe_failed(status));
        }

        let mut properties = PropertySet::new();
        let status = handle.main_entry(
            ACTION_DESCRIBE,
            std::ptr::from_mut(&mut properties).cast::<c_void>().cast_const(),
        );
        handle.main_entry(ACTION_UNLOAD, std::ptr::null());
        if !succeeded(status) {
            return Err(describe_failed(status));
        }

        drop(handle);
        *plugin.properties_mut() = properties;
        Ok(())
    }

    fn plugin_supported(&self, plugin: &Plugin) -> Result<(), String> {
        let declared = plugin.properties().strings(PROP_SUPPORTED_CONTEXTS);
        if declared.is_empty() {
            return Err("declares no contexts".to_string());
        }
        if declared.iter().any(|context| self.contexts.contains(context)) {
            Ok(())
        } else {
            Err(format!("none of the contexts {declared:?} is supported"))
        }
    }

    fn confirm_plugin(&self, plugin: &Arc<Plugin>) {
        tracing::debug!(
            plugin = %plugin.raw_identifier(),
            major = plugin.version_major(),
            minor = plugin.version_minor(),
            "image effect accepted"
        );
    }

    fn begin_xml_parsing(&self, _plugin: &Plugin) -> Box<dyn ApiXmlParser> {
        Box::new(PropertyParser::default())
    }

    fn save_xml(&self, plugin: &Plugin, writer: &mut XmlWriter<'_>) -> crate::Result<()> {
        write_properties(plugin.properties(), writer)
    }
}

fn write_properties(properties: &PropertySet, writer: &mut XmlWriter<'_>) -> crate::Result<()> {
    let xml_err = |e: std::io::Error| Error::CacheDocument(e.to_string());

    for (name, value) in properties.iter() {
        let dimension = value.dimension().to_string();
        let mut property = BytesStart::new("property");
        property.push_attribute(("name", name));
        property.push_attribute(("type", value.type_name()));
        property.push_attribute(("dimension", dimension.as_str()));
        writer.write_event(Event::Start(property)).map_err(xml_err)?;

        for text in value.to_strings() {
            if text.is_empty() {
                writer
                    .write_event(Event::Empty(BytesStart::new("value")))
                    .map_err(xml_err)?;
            } else {
                writer
                    .write_event(Event::Start(BytesStart::new("value")))
                    .map_err(xml_err)?;
                writer
                    .write_event(Event::Text(BytesText::new(&text)))
                    .map_err(xml_err)?;
                writer
                    .write_event(Event::End(BytesEnd::new("value")))
                    .map_err(xml_err)?;
            }
        }

        writer
            .write_event(Event::End(BytesEnd::new("property")))
            .map_err(xml_err)?;
    }
    Ok(())
}

struct OpenProperty {
    name: String,
    kind: String,
    values: Vec<String>,
}

/// Rebuilds a [`PropertySet`] from cached `property` elements.
#[derive(Default)]
struct PropertyParser {
    parsed: PropertySet,
    current: Option<OpenProperty>,
    value: Option<String>,
}

impl PropertyParser {
    fn finish_property(&mut self, open: OpenProperty) {
        let value = match open.kind.as_str() {
            "string" => Some(PropertyValue::String(open.values)),
            "int" => open
                .values
                .iter()
                .map(|v| v.trim().parse::<i32>())
                .collect::<Result<Vec<_>, _>>()
                .ok()
                .map(PropertyValue::Int),
            "double" => open
                .values
                .iter()
                .map(|v| v.trim().parse::<f64>())
                .collect::<Result<Vec<_>, _>>()
                .ok()
                .map(PropertyValue::Double),
            _ => None,
        };
        match value {
            Some(value) => self.parsed.insert(open.name, value),
            None => tracing::warn!(property = %open.name, kind = %open.kind, "unreadable cached property, dropped"),
        }
    }
}

impl ApiXmlParser for PropertyParser {
    fn element_begin(&mut self, name: &str, attributes: &Attributes) {
        match name {
            "property" => {
                self.current = match (attributes.get("name"), attributes.get("type")) {
                    (Some(name), Some(kind)) => Some(OpenProperty {
                        name: name.clone(),
                        kind: kind.clone(),
                        values: Vec::new(),
                    }),
                    _ => None,
                };
            }
            "value" if self.current.is_some() => self.value = Some(String::new()),
            _ => {}
        }
    }

    fn characters(&mut self, text: &str) {
        if let Some(value) = self.value.as_mut() {
            value.push_str(text);
        }
    }

    fn element_end(&mut self, name: &str) {
        match name {
            "value" => {
                if let (Some(value), Some(open)) = (self.value.take(), self.current.as_mut()) {
                    open.values.push(value);
                }
            }
            "property" => {
                if let Some(open) = self.current.take() {
                    self.finish_property(open);
                }
            }
            _ => {}
        }
    }

    fn end(self: Box<Self>, plugin: &mut Plugin) {
        *plugin.properties_mut() = self.parsed;
    }
}
