//! Shared infrastructure for the mesh crates: directory configuration,
//! tracing setup, the I/O-facing error type and small helpers.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod helpers;

pub use config::DirectoryConfig;
pub use error::{Error, Result};

/// Installs the fmt subscriber at `info` unless `RUST_LOG` says otherwise.
pub fn init_tracing() {
    init_tracing_with_default("info");
}

/// Installs the fmt subscriber with `default_level` as the fallback filter.
///
/// A second call is a no-op, so tests and binaries can both call it.
pub fn init_tracing_with_default(default_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
