//! layerload CLI - the loader entry point and the ephemeral registry binary.

pub mod loader;
pub mod registry;
pub mod signal;

use tracing_subscriber::EnvFilter;

/// Install the stderr subscriber shared by both binaries.
///
/// `RUST_LOG` overrides the default `warn` level. Stdout is left to the
/// engine commands the loader runs.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
