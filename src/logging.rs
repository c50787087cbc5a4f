//! Structured logging setup, built on `tracing` + `tracing-subscriber`.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Initialize the global `tracing` subscriber once. Safe to call
/// multiple times (e.g. once per test); only the first call takes
/// effect. Honors `RUST_LOG`, defaulting to `info`.
pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
            .init();
    });
}
