//! Persisted catalogue document.
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <cache version="fxhost-0.1.0">
//!   <bundle>
//!     <binary bundle_path="/p/blur.ofx.bundle" path="/p/blur.ofx.bundle/Contents/Linux-x86-64/blur.ofx" mtime="1700000000" size="81920" valid="true"/>
//!     <plugin name="net.example.Blur" index="0" api="OfxImageEffectPluginAPI" api_version="1" major_version="1" minor_version="0">
//!       <apiproperties>
//!         ...written by the API handler...
//!       </apiproperties>
//!     </plugin>
//!   </bundle>
//! </cache>
//! ```
//!
//! Reading is streaming and tolerant: a version mismatch discards the whole
//! document, a `binary` element missing attributes drops its record, and a
//! syntax error keeps every `bundle` completed before it. A `binary` without
//! `valid` is taken as valid.

use super::abi::PluginRecord;
use super::api::{ApiRegistry, ApiXmlParser, Attributes};
use super::binary::{Binary, LibraryLoader};
use super::descriptor::{Plugin, PluginBinary};
use crate::error::{Error, Result};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use std::io::{BufRead, Write};
use std::str::FromStr;
use std::sync::Arc;

const ROOT: &str = "cache";
const BUNDLE: &str = "bundle";
const BINARY: &str = "binary";
const PLUGIN: &str = "plugin";
const API_PROPERTIES: &str = "apiproperties";

/// How reading a document went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadStatus {
    /// The whole document was read.
    Complete,
    /// The document has another version (or is not a plugin cache) and was ignored.
    VersionMismatch {
        /// Version found, if any.
        found: Option<String>,
    },
    /// A syntax error stopped reading; earlier records were kept.
    Malformed(String),
}

/// Binaries restored from a document.
#[derive(Debug)]
pub struct DocumentRead {
    /// Restored catalogue entries in document order.
    pub binaries: Vec<PluginBinary>,
    /// Outcome.
    pub status: ReadStatus,
}

fn parse_attr<T: FromStr>(attributes: &Attributes, key: &str) -> Option<T> {
    attributes.get(key)?.parse().ok()
}

/// Turns element callbacks into catalogue entries.
struct DocumentParser<'a> {
    registry: &'a ApiRegistry,
    loader: &'a Arc<dyn LibraryLoader>,
    expected_version: &'a str,
    seen_root: bool,
    mismatch: Option<ReadStatus>,
    binaries: Vec<PluginBinary>,
    current_binary: Option<PluginBinary>,
    current_plugin: Option<(Plugin, Box<dyn ApiXmlParser>)>,
}

impl<'a> DocumentParser<'a> {
    fn element_begin(&mut self, name: &str, attributes: &Attributes) {
        tracing::trace!(element = name, "cache element");
        if !self.seen_root {
            self.seen_root = true;
            let version = attributes.get("version");
            if name != ROOT || version.map(String::as_str) != Some(self.expected_version) {
                self.mismatch = Some(ReadStatus::VersionMismatch {
                    found: version.cloned(),
                });
            }
            return;
        }

        match name {
            BUNDLE => self.current_binary = None,
            BINARY => self.begin_binary(attributes),
            PLUGIN => self.begin_plugin(attributes),
            _ => {
                if let Some((_, parser)) = self.current_plugin.as_mut() {
                    parser.element_begin(name, attributes);
                }
            }
        }
    }

    fn begin_binary(&mut self, attributes: &Attributes) {
        let fields = (
            attributes.get("path"),
            attributes.get("bundle_path"),
            parse_attr::<i64>(attributes, "mtime"),
            parse_attr::<u64>(attributes, "size"),
        );
        self.current_binary = match fields {
            (Some(path), Some(bundle_path), Some(mtime), Some(size)) => {
                let binary = Arc::new(Binary::new(path, Arc::clone(self.loader)));
                if !parse_attr::<bool>(attributes, "valid").unwrap_or(true) {
                    binary.set_invalid(true);
                }
                Some(PluginBinary::from_cache(binary, bundle_path, mtime, size))
            }
            _ => {
                tracing::warn!(?attributes, "incomplete binary record in plugin cache, skipped");
                None
            }
        };
    }

    fn begin_plugin(&mut self, attributes: &Attributes) {
        let Some(binary) = self.current_binary.as_ref() else {
            return;
        };
        if binary.has_binary_changed() {
            return;
        }

        let fields = (
            attributes.get("name"),
            parse_attr::<usize>(attributes, "index"),
            attributes.get("api"),
            parse_attr::<i32>(attributes, "api_version"),
            parse_attr::<u32>(attributes, "major_version"),
            parse_attr::<u32>(attributes, "minor_version"),
        );
        let (Some(identifier), Some(index), Some(api), Some(api_version), Some(major), Some(minor)) = fields
        else {
            tracing::warn!(?attributes, "incomplete plugin record in plugin cache, skipped");
            return;
        };

        let Some(handler) = self.registry.find(api, api_version) else {
            tracing::debug!(api = %api, api_version, "no handler for cached plugin api, skipped");
            return;
        };

        let record = PluginRecord {
            api: api.clone(),
            api_version,
            identifier: identifier.clone(),
            version_major: major,
            version_minor: minor,
        };
        let plugin = handler.new_plugin(Arc::clone(binary.binary()), index, &record);
        let parser = handler.begin_xml_parsing(&plugin);
        self.current_plugin = Some((plugin, parser));
    }

    fn characters(&mut self, text: &str) {
        if let Some((_, parser)) = self.current_plugin.as_mut() {
            parser.characters(text);
        }
    }

    fn element_end(&mut self, name: &str) {
        match name {
            PLUGIN => {
                if let Some((mut plugin, parser)) = self.current_plugin.take() {
                    parser.end(&mut plugin);
                    if let Some(binary) = self.current_binary.as_mut() {
                        binary.add_plugin(plugin);
                    }
                }
            }
            BUNDLE => {
                if let Some(binary) = self.current_binary.take() {
                    self.binaries.push(binary);
                }
            }
            _ => {
                if let Some((_, parser)) = self.current_plugin.as_mut() {
                    parser.element_end(name);
                }
            }
        }
    }
}

fn element_name(name: &[u8]) -> String {
    String::from_utf8_lossy(name).into_owned()
}

fn element_attributes(element: &BytesStart<'_>) -> std::result::Result<Attributes, String> {
    let mut attributes = Attributes::new();
    for attr in element.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let value = attr.unescape_value().map_err(|e| e.to_string())?;
        attributes.insert(element_name(attr.key.as_ref()), value.into_owned());
    }
    Ok(attributes)
}

fn drive<R: BufRead>(input: R, parser: &mut DocumentParser<'_>) -> std::result::Result<(), String> {
    let mut reader = Reader::from_reader(input);
    let mut buf = Vec::new();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| format!("at byte {}: {}", reader.buffer_position(), e))?;
        match event {
            Event::Start(e) => {
                let attributes = element_attributes(&e)?;
                parser.element_begin(&element_name(e.name().as_ref()), &attributes);
            }
            Event::Empty(e) => {
                let name = element_name(e.name().as_ref());
                let attributes = element_attributes(&e)?;
                parser.element_begin(&name, &attributes);
                if parser.mismatch.is_none() {
                    parser.element_end(&name);
                }
            }
            Event::End(e) => parser.element_end(&element_name(e.name().as_ref())),
            Event::Text(e) => {
                let text = e.unescape().map_err(|e| e.to_string())?;
                parser.characters(&text);
            }
            Event::CData(e) => parser.characters(&String::from_utf8_lossy(&e)),
            Event::Eof => return Ok(()),
            _ => {}
        }
        if parser.mismatch.is_some() {
            return Ok(());
        }
        buf.clear();
    }
}

/// Restore catalogue entries from a cache document.
///
/// Plugins are restored only for binaries whose recorded stats still match
/// the file on disk and whose API has a handler in `registry`.
pub fn read_document<R: BufRead>(
    input: R,
    expected_version: &str,
    registry: &ApiRegistry,
    loader: &Arc<dyn LibraryLoader>,
) -> DocumentRead {
    let mut parser = DocumentParser {
        registry,
        loader,
        expected_version,
        seen_root: false,
        mismatch: None,
        binaries: Vec::new(),
        current_binary: None,
        current_plugin: None,
    };

    let result = drive(input, &mut parser);

    if let Some(status) = parser.mismatch {
        tracing::info!(expected = expected_version, ?status, "plugin cache version mismatch, ignored");
        return DocumentRead {
            binaries: Vec::new(),
            status,
        };
    }

    let status = match result {
        Ok(()) => ReadStatus::Complete,
        Err(reason) => {
            tracing::warn!(
                error = %reason,
                kept = parser.binaries.len(),
                "plugin cache is malformed, keeping complete records"
            );
            ReadStatus::Malformed(reason)
        }
    };
    DocumentRead {
        binaries: parser.binaries,
        status,
    }
}

/// Serialize the catalogue.
pub fn write_document<W: Write>(
    mut out: W,
    version: &str,
    binaries: &[PluginBinary],
    registry: &ApiRegistry,
) -> Result<()> {
    let xml_err = |e: std::io::Error| Error::CacheDocument(e.to_string());
    let mut buf = Vec::new();
    let mut writer = Writer::new_with_indent(&mut buf, b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml_err)?;

    let mut root = BytesStart::new(ROOT);
    root.push_attribute(("version", version));
    writer.write_event(Event::Start(root)).map_err(xml_err)?;

    for binary in binaries {
        writer
            .write_event(Event::Start(BytesStart::new(BUNDLE)))
            .map_err(xml_err)?;

        let path = binary.file_path().to_string_lossy();
        let bundle_path = binary.bundle_path().to_string_lossy();
        let mtime = binary.file_modification_time().to_string();
        let size = binary.file_size().to_string();
        let mut record = BytesStart::new(BINARY);
        record.push_attribute(("bundle_path", bundle_path.as_ref()));
        record.push_attribute(("path", path.as_ref()));
        record.push_attribute(("mtime", mtime.as_str()));
        record.push_attribute(("size", size.as_str()));
        record.push_attribute(("valid", if binary.is_valid() { "true" } else { "false" }));
        writer.write_event(Event::Empty(record)).map_err(xml_err)?;

        for plugin in binary.plugins() {
            let index = plugin.index().to_string();
            let api_version = plugin.api_version().to_string();
            let major = plugin.version_major().to_string();
            let minor = plugin.version_minor().to_string();
            let mut element = BytesStart::new(PLUGIN);
            element.push_attribute(("name", plugin.raw_identifier()));
            element.push_attribute(("index", index.as_str()));
            element.push_attribute(("api", plugin.api()));
            element.push_attribute(("api_version", api_version.as_str()));
            element.push_attribute(("major_version", major.as_str()));
            element.push_attribute(("minor_version", minor.as_str()));
            writer.write_event(Event::Start(element)).map_err(xml_err)?;

            writer
                .write_event(Event::Start(BytesStart::new(API_PROPERTIES)))
                .map_err(xml_err)?;
            match registry.find(plugin.api(), plugin.api_version()) {
                Some(handler) => handler.save_xml(plugin, &mut writer)?,
                None => tracing::warn!(
                    plugin = %plugin.raw_identifier(),
                    "no handler to save plugin api data"
                ),
            }
            writer
                .write_event(Event::End(BytesEnd::new(API_PROPERTIES)))
                .map_err(xml_err)?;

            writer
                .write_event(Event::End(BytesEnd::new(PLUGIN)))
                .map_err(xml_err)?;
        }

        writer
            .write_event(Event::End(BytesEnd::new(BUNDLE)))
            .map_err(xml_err)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new(ROOT)))
        .map_err(xml_err)?;
    buf.push(b'\n');

    out.write_all(&buf)?;
    out.flush()?;
    Ok(())
}
