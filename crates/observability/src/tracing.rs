//! Tracing/logging initialization.
//!
//! Logs are emitted as JSON lines with timestamps. Ledger spans carry
//! `account_id`, `operation_id` and `transfer_id` fields, so a request can be
//! followed across the engine and the store.

use tracing_subscriber::EnvFilter;

/// Default directive when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "info";

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    init_with_filter(DEFAULT_FILTER);
}

/// Like [`init`], with a custom fallback filter.
pub fn init_with_filter(default_filter: &str) {
    let filter = build_filter(default_filter);

    // JSON logs + timestamps, configurable via RUST_LOG.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}

fn build_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_a_no_op() {
        init_with_filter("warn");
        init();
        ::tracing::info!("still logging after double init");
    }

    #[test]
    fn invalid_fallback_filter_does_not_panic() {
        let _ = build_filter("not a [valid filter");
    }
}
