//! Tracing and logging setup shared by the ledger binaries and tests.

/// Initialize process-wide tracing with the `RUST_LOG` filter (default `info`).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Initialize tracing, falling back to `default_filter` when `RUST_LOG` is unset.
pub fn init_with_filter(default_filter: &str) {
    tracing::init_with_filter(default_filter);
}

/// Subscriber configuration (filters, layers).
pub mod tracing;
