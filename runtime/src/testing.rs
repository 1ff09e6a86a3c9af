//! In-memory engine used by unit tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use layerload_core::error::{LoadError, Result};
use parking_lot::Mutex;

use crate::engine::Engine;

/// Records every command and keeps a reference → image ID map.
#[derive(Debug, Default)]
pub(crate) struct FakeEngine {
    program: PathBuf,
    images: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<String>>,
    fail_pulls: Mutex<bool>,
}

impl FakeEngine {
    pub(crate) fn new() -> Self {
        Self {
            program: PathBuf::from("/fake/engine"),
            ..Default::default()
        }
    }

    pub(crate) fn add_image(&self, reference: &str, id: &str) {
        self.images
            .lock()
            .insert(reference.to_string(), id.to_string());
    }

    pub(crate) fn has_image(&self, reference: &str) -> bool {
        self.images.lock().contains_key(reference)
    }

    pub(crate) fn image_ids(&self) -> HashMap<String, String> {
        self.images.lock().clone()
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub(crate) fn fail_pulls(&self) {
        *self.fail_pulls.lock() = true;
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }

    fn missing(&self, command: String) -> LoadError {
        LoadError::EngineCommandError {
            command,
            status: "No such image".to_string(),
        }
    }
}

#[async_trait]
impl Engine for FakeEngine {
    fn program(&self) -> &Path {
        &self.program
    }

    fn global_flags(&self) -> &[String] {
        &[]
    }

    async fn load(&self, archive: &Path) -> Result<()> {
        self.record(format!("load {}", archive.display()));
        Ok(())
    }

    async fn pull(&self, reference: &str) -> Result<()> {
        let call = format!("pull {reference}");
        self.record(call.clone());
        if *self.fail_pulls.lock() {
            return Err(LoadError::EngineCommandError {
                command: call,
                status: "exit status: 1".to_string(),
            });
        }
        let id = reference
            .rsplit_once('@')
            .map(|(_, digest)| digest.to_string())
            .unwrap_or_else(|| "sha256:pulled".to_string());
        self.add_image(reference, &id);
        Ok(())
    }

    async fn tag(&self, source: &str, target: &str) -> Result<()> {
        let call = format!("tag {source} {target}");
        self.record(call.clone());
        let mut images = self.images.lock();
        let id = images.get(source).cloned().ok_or_else(|| self.missing(call))?;
        images.insert(target.to_string(), id);
        Ok(())
    }

    async fn remove_image(&self, reference: &str) -> Result<()> {
        self.remove_image_blocking(reference)
    }

    async fn image_id(&self, reference: &str) -> Result<Option<String>> {
        self.record(format!("inspect {reference}"));
        Ok(self.images.lock().get(reference).cloned())
    }

    fn remove_image_blocking(&self, reference: &str) -> Result<()> {
        let call = format!("rmi {reference}");
        self.record(call.clone());
        match self.images.lock().remove(reference) {
            Some(_) => Ok(()),
            None => Err(self.missing(call)),
        }
    }
}
