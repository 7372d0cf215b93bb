//! Capability listings and extension-based plugin selection over the
//! accepted plugin list.
//!
//! Extensions compare case-insensitively and a leading dot is ignored.
//! `context` narrows every query to plugins declaring that image-effect
//! context; `None` considers them all.

use super::descriptor::Plugin;
use super::image_effect::{supported_extensions as declared_extensions, supports_context};
use std::sync::Arc;

fn normalize_extension(extension: &str) -> String {
    extension.strip_prefix('.').unwrap_or(extension).to_lowercase()
}

fn in_context(plugin: &Plugin, context: Option<&str>) -> bool {
    context.is_none_or(|context| supports_context(plugin, context))
}

/// Every extension declared by plugins in `context`, sorted and de-duplicated.
pub fn supported_extensions(plugins: &[Arc<Plugin>], context: Option<&str>) -> Vec<String> {
    let mut extensions: Vec<String> = plugins
        .iter()
        .filter(|plugin| in_context(plugin, context))
        .flat_map(|plugin| declared_extensions(plugin).iter().map(|ext| normalize_extension(ext)))
        .filter(|ext| !ext.is_empty())
        .collect();
    extensions.sort();
    extensions.dedup();
    extensions
}

/// Identifiers of plugins in `context`, sorted and de-duplicated.
pub fn plugin_identifiers(plugins: &[Arc<Plugin>], context: Option<&str>) -> Vec<String> {
    let mut identifiers: Vec<String> = plugins
        .iter()
        .filter(|plugin| in_context(plugin, context))
        .map(|plugin| plugin.raw_identifier().to_string())
        .collect();
    identifiers.sort();
    identifiers.dedup();
    identifiers
}

/// Plugin to use for files with `extension`.
///
/// Among the plugins in `context` declaring the extension, the one declaring
/// the fewest extensions overall is taken as the most specialized. Ties go
/// to the plugin listed first.
pub fn select_for_extension<'a>(
    plugins: &'a [Arc<Plugin>],
    extension: &str,
    context: Option<&str>,
) -> Option<&'a Arc<Plugin>> {
    let wanted = normalize_extension(extension);
    let mut best: Option<(&'a Arc<Plugin>, usize)> = None;

    for plugin in plugins.iter().filter(|plugin| in_context(plugin, context)) {
        let extensions = declared_extensions(plugin);
        if !extensions.iter().any(|ext| normalize_extension(ext) == wanted) {
            continue;
        }
        if best.is_none_or(|(_, count)| extensions.len() < count) {
            best = Some((plugin, extensions.len()));
        }
    }

    best.map(|(plugin, _)| plugin)
}
