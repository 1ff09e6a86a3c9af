//! Loading self-contained image archives.
//!
//! The archive goes straight to the engine's native `load`; the engine
//! deduplicates layers it already has.

use std::path::Path;

use layerload_core::error::{LoadError, Result};

use crate::engine::Engine;

/// Hand `archive` to `engine load`.
pub async fn load_legacy(engine: &dyn Engine, archive: &Path) -> Result<()> {
    if !archive.is_file() {
        return Err(LoadError::ConfigError(format!(
            "Image archive not found: {}",
            archive.display()
        )));
    }

    tracing::info!(archive = %archive.display(), "Loading image archive");
    engine.load(archive).await
}
