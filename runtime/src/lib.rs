//! layerload runtime - engine driver, ephemeral registry and import pipeline.
//!
//! This crate makes pre-built images available to a local container engine:
//! legacy archives go through `engine load`, image configs are served by a
//! short-lived registry and pulled, and a final `run` may replace the process.

#![allow(clippy::result_large_err)]

pub mod digest;
pub mod engine;
pub mod fastpath;
pub mod import;
pub mod invoke;
pub mod legacy;
pub mod loader;
pub mod registry;
pub mod tracker;

#[cfg(test)]
pub(crate) mod testing;

// Re-export common types
pub use digest::Digest;
pub use engine::{CliEngine, Engine};
pub use fastpath::{ContentStore, LinkOutcome, LinkSummary};
pub use import::{ConfigImporter, ImageConfig, ImportOptions, ImportOutcome};
pub use invoke::{parse_run_arguments, RunArguments, RunRequest, RunSpec, DIVIDER, NORUN_FLAG};
pub use legacy::load_legacy;
pub use loader::{LoadOutcome, Loader};
pub use registry::{announce, EphemeralRegistry, RegistryCommand, RegistryServer, ServedImage};
pub use tracker::{ResourceTracker, TempResource};

/// layerload runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the registry binary installed next to the loader.
pub const REGISTRY_BINARY_NAME: &str = "layerload-registry";
