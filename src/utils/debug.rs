//! Debug logging setup.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::EnvFilter;

static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

/// Environment variable that forces debug logging.
pub const VSBX_DEBUG_ENV: &str = "VSBX_DEBUG";

/// Initialize the tracing subscriber from the CLI flag or `VSBX_DEBUG`.
pub fn init_debug_logging(force_debug: bool) {
    let debug_enabled = force_debug || std::env::var(VSBX_DEBUG_ENV).is_ok();
    DEBUG_ENABLED.store(debug_enabled, Ordering::SeqCst);

    let filter = if debug_enabled {
        EnvFilter::new("vsbx=debug,warn")
    } else {
        EnvFilter::new("vsbx=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();
}

/// Check if debug mode is enabled.
pub fn is_debug_enabled() -> bool {
    DEBUG_ENABLED.load(Ordering::SeqCst)
}
