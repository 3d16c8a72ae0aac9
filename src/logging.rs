//! Tracing subscriber setup.
//!
//! Grounded in `paracord-server`'s `main.rs` (`tracing_subscriber::fmt` with
//! an `EnvFilter` default string, `RUST_LOG` override). The teacher repo logs
//! through the same `tracing` facade but boots its subscriber via the Tauri
//! log plugin, which has no standalone equivalent here.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "skywave_core=info,skywave_core::demod=info";

/// Initializes the global `tracing` subscriber. Call once, from `main`.
pub fn init(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
