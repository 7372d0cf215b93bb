//! Metrics collection using metrics-rs.

use crate::memory::PoolStats;
use crate::plugin::ScanStats;
use metrics::{Unit, counter, gauge};
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether metrics have been initialized.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

const POOL_USED_BYTES: &str = "fxhost_pool_used_bytes";
const POOL_ALLOCATED_BYTES: &str = "fxhost_pool_allocated_bytes";
const POOL_WASTED_BYTES: &str = "fxhost_pool_wasted_bytes";
const POOL_BUFFERS: &str = "fxhost_pool_buffers";
const SCAN_BINARIES_FOUND: &str = "fxhost_scan_binaries_found";
const SCAN_BINARIES_DESCRIBED: &str = "fxhost_scan_binaries_described";
const PLUGINS_ACCEPTED: &str = "fxhost_plugins_accepted";
const PLUGINS_REJECTED: &str = "fxhost_plugins_rejected";
const CACHE_DIRTY: &str = "fxhost_cache_dirty";

/// Initialize metrics descriptions.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    metrics::describe_gauge!(POOL_USED_BYTES, Unit::Bytes, "Reserved bytes of checked-out pool buffers");
    metrics::describe_gauge!(
        POOL_ALLOCATED_BYTES,
        Unit::Bytes,
        "Reserved bytes of all live pool buffers"
    );
    metrics::describe_gauge!(
        POOL_WASTED_BYTES,
        Unit::Bytes,
        "Reserved but unrequested bytes of checked-out pool buffers"
    );
    metrics::describe_gauge!(POOL_BUFFERS, Unit::Count, "Pool buffers by state");
    metrics::describe_gauge!(
        SCAN_BINARIES_FOUND,
        Unit::Count,
        "Plugin binaries found by the last scan"
    );
    metrics::describe_counter!(
        SCAN_BINARIES_DESCRIBED,
        Unit::Count,
        "Plugin binaries loaded to describe their plugins"
    );
    metrics::describe_gauge!(PLUGINS_ACCEPTED, Unit::Count, "Plugins in the accepted list");
    metrics::describe_gauge!(PLUGINS_REJECTED, Unit::Count, "Plugins turned down by their handler");
    metrics::describe_gauge!(CACHE_DIRTY, Unit::Count, "1 while the catalogue needs saving");
}

/// Publish pool accounting.
#[inline]
pub fn record_pool_usage(stats: &PoolStats) {
    gauge!(POOL_USED_BYTES).set(stats.used_bytes as f64);
    gauge!(POOL_ALLOCATED_BYTES).set(stats.allocated_bytes as f64);
    gauge!(POOL_WASTED_BYTES).set(stats.wasted_bytes as f64);
    gauge!(POOL_BUFFERS, "state" => "used").set(stats.used_buffers as f64);
    gauge!(POOL_BUFFERS, "state" => "unused").set(stats.unused_buffers as f64);
}

/// Publish the outcome of a scan pass.
#[inline]
pub fn record_scan(stats: &ScanStats, dirty: bool) {
    gauge!(SCAN_BINARIES_FOUND).set(stats.found as f64);
    counter!(SCAN_BINARIES_DESCRIBED).increment((stats.added + stats.reloaded) as u64);
    gauge!(PLUGINS_ACCEPTED).set(stats.accepted as f64);
    gauge!(PLUGINS_REJECTED).set(stats.rejected as f64);
    gauge!(CACHE_DIRTY).set(if dirty { 1.0 } else { 0.0 });
}
