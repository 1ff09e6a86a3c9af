use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// layerload error types
#[derive(Error, Debug)]
pub enum LoadError {
    /// The container engine binary could not be located
    #[error("Container engine not found: {engine} ({reason})")]
    EngineNotFound { engine: String, reason: String },

    /// A stamp manifest line did not have the `KEY value` shape
    #[error("Malformed stamp variable at {}:{line}: {content:?}", path.display())]
    StampParseError {
        path: PathBuf,
        line: usize,
        content: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// An import cycle could not complete
    #[error("Import of {tag} failed: {message}")]
    ImportError { tag: String, message: String },

    /// The ephemeral registry never announced its reference
    #[error("Registry for {tag} not ready after {waited:?}")]
    RegistryTimeout { tag: String, waited: Duration },

    /// The ephemeral registry exited before announcing its reference
    #[error("Registry for {tag} exited before becoming ready ({status})")]
    RegistryExited { tag: String, status: String },

    /// An engine command returned a failure status
    #[error("Engine command `{command}` failed: {status}")]
    EngineCommandError { command: String, status: String },

    /// Invalid content digest
    #[error("Invalid digest {value:?}: {reason}")]
    DigestError { value: String, reason: String },

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for LoadError {
    fn from(err: serde_json::Error) -> Self {
        LoadError::SerializationError(err.to_string())
    }
}

/// Result type alias for layerload operations
pub type Result<T> = std::result::Result<T, LoadError>;
