//! Structured logging init: a `tracing_subscriber` fmt layer configured from
//! the `HVAC_LOG` env filter.

use tracing_subscriber::EnvFilter;

/// Initializes the global `tracing` subscriber from `HVAC_LOG`, falling back
/// to `info`. Safe to call more than once; later calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_env("HVAC_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
