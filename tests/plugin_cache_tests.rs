//! Integration tests for plugin discovery and the persisted catalogue.
//!
//! Plugins are in-process modules served by a `StaticLoader` at the paths
//! the scanner derives for real bundle directories.

mod common;

use common::{Fixture, TEST_CACHE_VERSION, accepted_ids};
use fxhost::plugin::image_effect::{CONTEXT_READER, IMAGE_EFFECT_API, PROP_LABEL, PROP_SUPPORTED_CONTEXTS};
use fxhost::plugin::select::{plugin_identifiers, select_for_extension, supported_extensions};
use fxhost::plugin::{
    ApiHandler, ApiXmlParser, Attributes, Binary, Host, ImageEffectApi, Plugin, PluginCache, PluginError,
    PluginHandle, XmlWriter,
};
use std::fs;
use std::sync::Arc;

// ============================================================================
// Discovery
// ============================================================================

#[test]
fn test_scan_accepts_supported_plugins() {
    let fx = Fixture::new();
    fx.install("blur", common::blur::symbols());
    fx.install("readers", common::readers::symbols());
    fx.install("mixed", common::mixed::symbols());

    let mut cache = fx.cache();
    let stats = cache.scan_plugin_files();

    // bundles in name order: blur, mixed, readers
    assert_eq!(
        accepted_ids(&cache),
        ["net.example.Blur", "net.example.ReadPNG", "net.example.ReadAll"]
    );
    assert_eq!(stats.found, 3);
    assert_eq!(stats.added, 3);
    assert_eq!(stats.accepted, 3);
    // deform declares an unknown context, broken fails to describe
    assert_eq!(stats.rejected, 2);
    assert!(cache.is_dirty());

    let blur = cache.plugin_by_id("net.example.blur").unwrap();
    assert_eq!(blur.properties().strings(PROP_LABEL), ["Blur & Soften <fast>"]);
    assert_eq!(blur.properties().ints("net.example.Passes"), [3]);
    assert_eq!(blur.properties().doubles("net.example.Radius"), [2.75]);

    // particles has no handler and is not catalogued at all
    let mixed = cache
        .binaries()
        .iter()
        .find(|b| b.file_path() == fx.bundle_binary("mixed"))
        .unwrap();
    assert_eq!(mixed.plugin_count(), 2);
}

#[test]
fn test_binaries_are_unloaded_after_scan() {
    let fx = Fixture::new();
    fx.install("blur", common::blur::symbols());
    fx.install("readers", common::readers::symbols());

    let mut cache = fx.cache();
    cache.scan_plugin_files();

    // one open per binary, none left open
    assert_eq!(fx.loader.opens(), 2);
    assert_eq!(fx.loader.open_libraries(), 0);
    for binary in cache.binaries() {
        assert_eq!(binary.binary().ref_count(), 0);
    }
}

#[test]
fn test_rescan_is_stable() {
    let fx = Fixture::new();
    fx.install("blur", common::blur::symbols());
    fx.install("readers", common::readers::symbols());

    let mut cache = fx.cache();
    cache.scan_plugin_files();
    let first = accepted_ids(&cache);
    let opens = fx.loader.opens();

    let stats = cache.scan_plugin_files();
    assert_eq!(accepted_ids(&cache), first);
    assert_eq!(stats.added, 0);
    assert_eq!(stats.reloaded, 0);
    assert_eq!(fx.loader.opens(), opens);
}

#[test]
fn test_invalid_binary_is_catalogued_without_plugins() {
    let fx = Fixture::new();
    fx.install("junk", common::not_a_plugin());
    let unloadable = fx.install("ghost", common::blur::symbols());
    fx.loader.unregister(&unloadable);
    fx.install("blur", common::blur::symbols());

    let mut cache = fx.cache();
    cache.scan_plugin_files();

    assert_eq!(accepted_ids(&cache), ["net.example.Blur"]);
    assert_eq!(cache.binaries().len(), 3);
    let invalid: Vec<_> = cache.binaries().iter().filter(|b| !b.is_valid()).collect();
    assert_eq!(invalid.len(), 2);
    assert!(invalid.iter().all(|b| b.plugin_count() == 0));

    // cached as such, so a warm start does not try them again
    cache.write_cache_file(fx.cache_file()).unwrap();
    let opens = fx.loader.opens();
    let mut warm = fx.cache();
    warm.read_cache_file(fx.cache_file()).unwrap();
    warm.scan_plugin_files();
    assert_eq!(fx.loader.opens(), opens);
    assert!(!warm.is_dirty());

    let mut invalid: Vec<_> = warm
        .binaries()
        .iter()
        .filter(|b| !b.is_valid())
        .map(|b| b.file_path().to_path_buf())
        .collect();
    invalid.sort();
    assert_eq!(invalid, [fx.bundle_binary("ghost"), fx.bundle_binary("junk")]);
}

// ============================================================================
// Persistence
// ============================================================================

#[test]
fn test_warm_start_loads_nothing() {
    let fx = Fixture::new();
    fx.install("blur", common::blur::symbols());
    fx.install("readers", common::readers::symbols());

    let mut cold = fx.cache();
    cold.scan_plugin_files();
    assert!(cold.save_if_dirty(fx.cache_file()).unwrap());
    assert!(!cold.save_if_dirty(fx.cache_file()).unwrap());
    let opens = fx.loader.opens();

    let mut warm = fx.cache();
    assert_eq!(warm.read_cache_file(fx.cache_file()).unwrap(), 2);
    let stats = warm.scan_plugin_files();

    assert_eq!(fx.loader.opens(), opens);
    assert_eq!(stats.added, 0);
    assert!(!warm.is_dirty());
    assert_eq!(accepted_ids(&warm), accepted_ids(&cold));

    for (restored, described) in warm.plugins().iter().zip(cold.plugins()) {
        assert_eq!(restored.identifier(), described.identifier());
        assert_eq!(restored.index(), described.index());
        assert_eq!(
            (restored.version_major(), restored.version_minor()),
            (described.version_major(), described.version_minor())
        );
        assert_eq!(restored.properties(), described.properties());
    }
}

#[test]
fn test_changed_binary_is_described_again() {
    let fx = Fixture::new();
    fx.install("blur", common::blur::symbols());
    fx.install("readers", common::readers::symbols());

    let mut cold = fx.cache();
    cold.scan_plugin_files();
    cold.write_cache_file(fx.cache_file()).unwrap();

    fx.replace("blur", common::blur_v2::symbols());
    let opens = fx.loader.opens();

    let mut warm = fx.cache();
    warm.read_cache_file(fx.cache_file()).unwrap();
    let stats = warm.scan_plugin_files();

    assert_eq!(stats.reloaded, 1);
    assert_eq!(fx.loader.opens(), opens + 1);
    assert!(warm.is_dirty());

    let blur = warm.plugin_by_id("net.example.Blur").unwrap();
    assert_eq!((blur.version_major(), blur.version_minor()), (2, 1));
    assert!(!blur.properties().strings(PROP_SUPPORTED_CONTEXTS).is_empty());

    let entry = warm
        .binaries()
        .iter()
        .find(|b| b.file_path() == fx.bundle_binary("blur"))
        .unwrap();
    assert!(!entry.has_binary_changed());
    assert_eq!(entry.file_size(), fs::metadata(fx.bundle_binary("blur")).unwrap().len());
}

#[test]
fn test_rescan_describes_rebuilt_binary() {
    let fx = Fixture::new();
    fx.install("blur", common::blur::symbols());
    fx.install("readers", common::readers::symbols());

    let mut cache = fx.cache();
    cache.scan_plugin_files();
    cache.write_cache_file(fx.cache_file()).unwrap();
    let blur = cache.plugin_by_id("net.example.blur").unwrap();
    assert_eq!((blur.version_major(), blur.version_minor()), (1, 0));

    fx.replace("blur", common::blur_v2::symbols());
    let opens = fx.loader.opens();
    let stats = cache.scan_plugin_files();

    assert_eq!(stats.reloaded, 1);
    assert_eq!(stats.added, 0);
    assert_eq!(fx.loader.opens(), opens + 1);
    assert!(cache.is_dirty());
    let blur = cache.plugin_by_id("net.example.blur").unwrap();
    assert_eq!((blur.version_major(), blur.version_minor()), (2, 1));

    // nothing changed since, so the next pass loads nothing
    let stats = cache.scan_plugin_files();
    assert_eq!(stats.reloaded, 0);
    assert_eq!(fx.loader.opens(), opens + 1);
}

#[test]
fn test_removed_binary_is_dropped() {
    let fx = Fixture::new();
    fx.install("blur", common::blur::symbols());
    fx.install("readers", common::readers::symbols());

    let mut cold = fx.cache();
    cold.scan_plugin_files();
    cold.write_cache_file(fx.cache_file()).unwrap();

    fx.remove("readers");

    let mut warm = fx.cache();
    warm.read_cache_file(fx.cache_file()).unwrap();
    let stats = warm.scan_plugin_files();

    assert_eq!(stats.removed, 1);
    assert_eq!(accepted_ids(&warm), ["net.example.Blur"]);
    assert_eq!(warm.binaries().len(), 1);
    assert!(warm.is_dirty());

    // same engine, second scan after removal
    let stats = cold.scan_plugin_files();
    assert_eq!(stats.removed, 1);
    assert_eq!(accepted_ids(&cold), ["net.example.Blur"]);
}

#[test]
fn test_version_mismatch_is_a_cold_start() {
    let fx = Fixture::new();
    fx.install("blur", common::blur::symbols());

    let mut cold = fx.cache();
    cold.scan_plugin_files();
    cold.write_cache_file(fx.cache_file()).unwrap();
    let opens = fx.loader.opens();

    let mut other = fx.cache_with(fx.config().with_cache_version("test-2"));
    assert_eq!(other.read_cache_file(fx.cache_file()).unwrap(), 0);
    let stats = other.scan_plugin_files();

    assert_eq!(stats.added, 1);
    assert_eq!(fx.loader.opens(), opens + 1);
    assert!(other.is_dirty());
    assert_eq!(accepted_ids(&other), ["net.example.Blur"]);
}

#[test]
fn test_cache_document_content() {
    let fx = Fixture::new();
    fx.install("blur", common::blur::symbols());

    let mut cache = fx.cache();
    cache.scan_plugin_files();
    let mut out = Vec::new();
    cache.write_plugin_cache(&mut out).unwrap();
    let doc = String::from_utf8(out).unwrap();

    assert!(doc.starts_with("<?xml"));
    assert!(doc.contains(&format!("<cache version=\"{TEST_CACHE_VERSION}\">")));
    assert!(doc.contains("name=\"net.example.Blur\""));
    assert!(doc.contains(&format!("api=\"{IMAGE_EFFECT_API}\"")));
    assert!(doc.contains("Blur &amp; Soften &lt;fast&gt;"));

    // reading the document back in memory restores the same plugin
    let mut restored = fx.cache();
    assert_eq!(restored.read_plugin_cache(doc.as_bytes()), 1);
    restored.scan_plugin_files();
    assert_eq!(
        restored.plugin_by_id("net.example.blur").unwrap().properties(),
        cache.plugin_by_id("net.example.blur").unwrap().properties()
    );
}

#[test]
fn test_truncated_cache_keeps_complete_bundles() {
    let fx = Fixture::new();
    fx.install("blur", common::blur::symbols());
    fx.install("readers", common::readers::symbols());

    let mut cold = fx.cache();
    cold.scan_plugin_files();
    let mut out = Vec::new();
    cold.write_plugin_cache(&mut out).unwrap();
    let doc = String::from_utf8(out).unwrap();

    // cut inside the second bundle, then add a stray closing tag
    let second = doc.match_indices("<bundle>").nth(1).unwrap().0;
    let broken = format!("{}<bundle></cache>", &doc[..second]);

    let mut warm = fx.cache();
    assert_eq!(warm.read_plugin_cache(broken.as_bytes()), 1);
    let opens = fx.loader.opens();
    warm.scan_plugin_files();

    // the lost bundle is found again as new
    assert_eq!(fx.loader.opens(), opens + 1);
    assert_eq!(accepted_ids(&warm), accepted_ids(&cold));
}

// ============================================================================
// Lookups and selection
// ============================================================================

#[test]
fn test_plugin_by_id_prefers_newest_version() {
    let fx = Fixture::new();
    fx.install("blur", common::blur::symbols());
    fx.install("blur2", common::blur_v2::symbols());

    let mut cache = fx.cache();
    cache.scan_plugin_files();

    let newest = cache.plugin_by_id("NET.EXAMPLE.BLUR").unwrap();
    assert_eq!((newest.version_major(), newest.version_minor()), (2, 1));

    let v1 = cache.plugin_by_id_major("net.example.blur", 1).unwrap();
    assert_eq!((v1.version_major(), v1.version_minor()), (1, 0));
    assert!(cache.plugin_by_id_major("net.example.blur", 3).is_none());
    assert!(cache.plugin_by_id("net.example.sharpen").is_none());
}

#[test]
fn test_extension_selection_over_accepted_plugins() {
    let fx = Fixture::new();
    fx.install("blur", common::blur::symbols());
    fx.install("readers", common::readers::symbols());

    let mut cache = fx.cache();
    cache.scan_plugin_files();
    let plugins = cache.plugins();

    let png = select_for_extension(plugins, ".PNG", Some(CONTEXT_READER)).unwrap();
    assert_eq!(png.raw_identifier(), "net.example.ReadPNG");
    let exr = select_for_extension(plugins, "exr", Some(CONTEXT_READER)).unwrap();
    assert_eq!(exr.raw_identifier(), "net.example.ReadAll");

    assert_eq!(supported_extensions(plugins, Some(CONTEXT_READER)), ["exr", "jpg", "png"]);
    assert_eq!(
        plugin_identifiers(plugins, Some(CONTEXT_READER)),
        ["net.example.ReadAll", "net.example.ReadPNG"]
    );
}

#[test]
fn test_seek_plugin_file_in_scanned_dirs() {
    let fx = Fixture::new();
    fx.install("blur", common::blur::symbols());
    let luts = fx.dir.path().join("luts");
    fs::create_dir_all(&luts).unwrap();
    fs::write(luts.join("film.cube"), b"LUT").unwrap();

    let mut cache = fx.cache();
    cache.scan_plugin_files();
    assert_eq!(cache.seek_plugin_file("film.cube"), Some(luts.join("film.cube")));
}

// ============================================================================
// Handles and handlers
// ============================================================================

#[test]
fn test_handle_reports_inconsistent_catalogue() {
    let fx = Fixture::new();
    let path = fx.install("blur", common::blur::symbols());

    let binary = Arc::new(Binary::new(&path, fx.loader.clone()));

    // past the end, and past what the C index can hold
    for stale_index in [4, usize::MAX] {
        let stale = Plugin::new(Arc::clone(&binary), stale_index, IMAGE_EFFECT_API, 1, "net.example.Blur", 1, 0);
        match PluginHandle::new(&stale, &Host::new()) {
            Err(PluginError::InconsistentPlugin { identifier, index }) => {
                assert_eq!(identifier, "net.example.Blur");
                assert_eq!(index, stale_index);
            }
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("expected an inconsistent plugin error"),
        }
        assert_eq!(binary.ref_count(), 0);
        assert_eq!(fx.loader.open_libraries(), 0);
    }
}

#[test]
fn test_handle_keeps_binary_loaded() {
    let fx = Fixture::new();
    fx.install("blur", common::blur::symbols());
    let mut cache = fx.cache();
    cache.scan_plugin_files();

    let blur = cache.plugin_by_id("net.example.blur").unwrap();
    let handle = PluginHandle::new(blur, cache.host()).unwrap();
    assert!(blur.binary().is_loaded());
    assert_eq!(fx.loader.open_libraries(), 1);

    drop(handle);
    assert!(!blur.binary().is_loaded());
}

/// Accepts every image effect, whatever it declares.
struct AcceptAll;

struct NoData;

impl ApiXmlParser for NoData {
    fn element_begin(&mut self, _name: &str, _attributes: &Attributes) {}
    fn characters(&mut self, _text: &str) {}
    fn element_end(&mut self, _name: &str) {}
    fn end(self: Box<Self>, _plugin: &mut Plugin) {}
}

impl ApiHandler for AcceptAll {
    fn name(&self) -> &str {
        "accept all"
    }

    fn matches(&self, api: &str, _version: i32) -> bool {
        api == IMAGE_EFFECT_API
    }

    fn load_from_plugin(&self, _plugin: &mut Plugin, _host: &Host) -> Result<(), PluginError> {
        Ok(())
    }

    fn plugin_supported(&self, _plugin: &Plugin) -> Result<(), String> {
        Ok(())
    }

    fn begin_xml_parsing(&self, _plugin: &Plugin) -> Box<dyn ApiXmlParser> {
        Box::new(NoData)
    }

    fn save_xml(&self, _plugin: &Plugin, _writer: &mut XmlWriter<'_>) -> fxhost::Result<()> {
        Ok(())
    }
}

#[test]
fn test_first_registered_handler_decides() {
    let fx = Fixture::new();
    fx.install("mixed", common::mixed::symbols());

    let mut permissive = PluginCache::with_loader(fx.config(), fx.loader.clone());
    permissive.register_api_handler(Arc::new(AcceptAll));
    permissive.register_api_handler(Arc::new(ImageEffectApi::new()));
    permissive.scan_plugin_files();
    assert_eq!(accepted_ids(&permissive), ["net.example.Deform", "net.example.Broken"]);
    assert_eq!(
        permissive.find_api_handler(IMAGE_EFFECT_API, 1).map(|h| h.name()),
        Some("accept all")
    );

    let mut strict = fx.cache();
    strict.register_api_handler(Arc::new(AcceptAll));
    strict.scan_plugin_files();
    assert!(accepted_ids(&strict).is_empty());
}
