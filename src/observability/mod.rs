//! Observability features: metrics and tracing.
//!
//! ## Metrics
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `fxhost_pool_used_bytes` | Gauge | Reserved bytes of checked-out buffers |
//! | `fxhost_pool_allocated_bytes` | Gauge | Reserved bytes of all live buffers |
//! | `fxhost_pool_wasted_bytes` | Gauge | Best-fit slack of checked-out buffers |
//! | `fxhost_pool_buffers` | Gauge | Buffers, labelled `state=used/unused` |
//! | `fxhost_scan_binaries_found` | Gauge | Binaries found by the last scan |
//! | `fxhost_scan_binaries_described` | Counter | Binaries loaded to be described |
//! | `fxhost_plugins_accepted` | Gauge | Accepted plugins |
//! | `fxhost_plugins_rejected` | Gauge | Plugins turned down by their handler |
//! | `fxhost_cache_dirty` | Gauge | 1 while the catalogue needs saving |
//!
//! Install any `metrics` recorder to collect them; without one the calls are no-ops.
//!
//! ## Tracing
//!
//! Scans run inside an INFO `plugin_scan` span and each binary description
//! inside a DEBUG `describe` span. Scan summaries log at INFO, per-binary
//! decisions at DEBUG, ignored plugins and unreadable caches at WARN.

mod metrics;
mod tracing_support;

pub use self::metrics::{init_metrics, record_pool_usage, record_scan};
pub use tracing_support::{instrument_describe, span_describe, span_scan};
