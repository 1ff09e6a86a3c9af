//! layerload core - configuration, stamp variables and error types.
//!
//! These types are shared by the import runtime and the command-line
//! entry points.

pub mod config;
pub mod error;
pub mod runfiles;
pub mod stamp;

// Re-export commonly used types
pub use config::{ImportDirective, LayerSpec, LoaderConfig};
pub use error::{LoadError, Result};
pub use runfiles::Runfiles;
pub use stamp::StampVariables;

/// layerload version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
