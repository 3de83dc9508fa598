//! Test logging configuration

use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call from every test; only the
/// first call installs the subscriber. Respects `RUST_LOG`.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}
