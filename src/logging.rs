//! Tracing subscriber setup
//!
//! Logs go to stderr; stdout carries the balance CSV.

use crate::config::LogConfig;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber
///
/// `RUST_LOG` overrides the configured level. Calling this twice is harmless:
/// the second installation is ignored.
pub fn init_logging(config: &LogConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(filter);

    if config.json {
        let layer = fmt::layer()
            .json()
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_ansi(false);
        let _ = registry.with(layer).try_init();
    } else {
        let layer = fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr);
        let _ = registry.with(layer).try_init();
    }
}
