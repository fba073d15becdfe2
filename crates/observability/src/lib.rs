//! Tracing and logging setup shared by the binaries.

/// Initialize process-wide logging, optionally as JSON lines.
///
/// `default_filter` applies when `RUST_LOG` is unset. This is safe to call
/// multiple times; subsequent calls become no-ops.
pub fn init(default_filter: &str, json: bool) {
    tracing::init(default_filter, json);
}

/// Tracing configuration (filters, layers).
pub mod tracing;
