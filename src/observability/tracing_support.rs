//! Tracing spans for plugin discovery.

use std::path::Path;
use tracing::{Level, Span, span};

/// Span around one scan pass over `roots` search paths.
///
/// ```rust
/// use fxhost::observability::span_scan;
///
/// let span = span_scan(3);
/// let _guard = span.enter();
/// // scan here
/// ```
#[inline]
pub fn span_scan(roots: usize) -> Span {
    span!(Level::INFO, "plugin_scan", roots = roots)
}

/// Span around describing the plugins of one binary.
#[inline]
pub fn span_describe(binary: &Path) -> Span {
    span!(Level::DEBUG, "describe", binary = %binary.display())
}

/// Enter a [`span_describe`] span for the current scope.
pub fn instrument_describe(binary: &Path) -> tracing::span::EnteredSpan {
    span_describe(binary).entered()
}
