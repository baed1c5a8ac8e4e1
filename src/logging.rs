//! Logging initialization.
//!
//! Logs go to stderr so they never interleave with the report on stdout.
//!
//! # Environment Variables
//!
//! - `CLIPSHRINK_LOG`: filter directive (e.g. "debug", "clipshrink=trace")
//! - `RUST_LOG`: used when `CLIPSHRINK_LOG` is unset

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Default filter for a `-v` count: 0 → warn, 1 → info, 2+ → debug.
pub fn level_for_verbosity(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

pub fn init(verbose: u8) -> Result<()> {
    let env_filter = EnvFilter::try_from_env("CLIPSHRINK_LOG")
        .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
        .unwrap_or_else(|_| EnvFilter::new(level_for_verbosity(verbose)));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init()
        .map_err(|e| anyhow!("failed to initialize logging: {}", e))
}
