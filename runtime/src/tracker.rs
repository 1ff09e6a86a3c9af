//! Scoped ownership of everything ephemeral a load creates.
//!
//! Temp files and temp image tags are registered with a [`ResourceTracker`]
//! as soon as they exist. [`ResourceTracker::cleanup`] removes them; it runs
//! explicitly before the process is replaced and implicitly on drop, which
//! covers early returns, errors and cancellation of the loader future.
//! Cleanup is best-effort and never fails.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use layerload_core::error::{LoadError, Result};

use crate::engine::Engine;

/// A resource that must not outlive the load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TempResource {
    /// Scratch file
    File(PathBuf),
    /// Ephemeral image tag or reference
    ImageTag(String),
}

/// Owner of all temp resources for one invocation.
pub struct ResourceTracker {
    engine: Arc<dyn Engine>,
    resources: Vec<TempResource>,
}

impl ResourceTracker {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self {
            engine,
            resources: Vec::new(),
        }
    }

    /// Register a resource.
    pub fn track(&mut self, resource: TempResource) {
        tracing::trace!(?resource, "Tracking temp resource");
        self.resources.push(resource);
    }

    pub fn track_file(&mut self, path: impl Into<PathBuf>) {
        self.track(TempResource::File(path.into()));
    }

    pub fn track_tag(&mut self, reference: impl Into<String>) {
        self.track(TempResource::ImageTag(reference.into()));
    }

    /// Create an empty scratch file and register it before returning.
    pub fn temp_file(&mut self, prefix: &str) -> Result<PathBuf> {
        let file = tempfile::Builder::new()
            .prefix(prefix)
            .tempfile()
            .map_err(|e| LoadError::Other(format!("Failed to create temp file: {}", e)))?;
        let path = file
            .into_temp_path()
            .keep()
            .map_err(|e| LoadError::Other(format!("Failed to keep temp file: {}", e)))?;
        self.track_file(path.clone());
        Ok(path)
    }

    /// Remove a tracked tag now and stop tracking it.
    ///
    /// If removal fails the tag stays tracked so cleanup tries again.
    pub async fn release_tag(&mut self, reference: &str) -> Result<()> {
        self.engine.remove_image(reference).await?;
        self.resources
            .retain(|r| !matches!(r, TempResource::ImageTag(t) if t == reference));
        Ok(())
    }

    /// Currently tracked resources, in creation order.
    pub fn resources(&self) -> &[TempResource] {
        &self.resources
    }

    /// Remove every tracked resource, newest first, ignoring failures.
    ///
    /// Idempotent: a second call finds nothing left to do.
    pub fn cleanup(&mut self) {
        for resource in self.resources.drain(..).rev() {
            match resource {
                TempResource::File(path) => remove_file_quietly(&path),
                TempResource::ImageTag(reference) => {
                    if let Err(e) = self.engine.remove_image_blocking(&reference) {
                        tracing::debug!(reference = %reference, error = %e, "Temp tag removal failed");
                    }
                }
            }
        }
    }
}

impl Drop for ResourceTracker {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl std::fmt::Debug for ResourceTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceTracker")
            .field("engine", &self.engine.program())
            .field("resources", &self.resources)
            .finish()
    }
}

fn remove_file_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::debug!(path = %path.display(), error = %e, "Temp file removal failed");
        }
    }
}
