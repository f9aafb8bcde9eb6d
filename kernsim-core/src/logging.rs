//! Tracing subscriber setup.
//!
//! Library crates log through `tracing` macros only; the binary installs the
//! subscriber once at startup. `RUST_LOG` overrides the level passed on the
//! command line.

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. Safe to call more than once; later calls
/// are no-ops (first subscriber wins).
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .try_init();
}
