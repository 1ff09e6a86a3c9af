//! One load-and-run cycle.
//!
//! Stamp variables are read first, then legacy archives are loaded, then
//! every configured image is imported in order. Finally the trailing
//! arguments decide whether a run follows. Imports never overlap: each
//! ephemeral registry is gone before the next one is spawned.

use std::sync::Arc;

use layerload_core::config::LoaderConfig;
use layerload_core::error::{LoadError, Result};
use layerload_core::stamp::StampVariables;

use crate::engine::Engine;
use crate::import::{ConfigImporter, ImageConfig, ImportOptions};
use crate::invoke::{parse_run_arguments, RunRequest, RunSpec};
use crate::legacy::load_legacy;
use crate::tracker::ResourceTracker;

/// What remains to be done once loading finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Nothing to run; the caller exits after cleanup
    Done,
    /// Replace the process with this invocation
    Run(RunSpec),
}

pub struct Loader {
    config: LoaderConfig,
    engine: Arc<dyn Engine>,
    importer: ConfigImporter,
}

impl Loader {
    pub fn new(config: LoaderConfig, engine: Arc<dyn Engine>, options: ImportOptions) -> Self {
        let importer = ConfigImporter::new(engine.clone(), options);
        Self {
            config,
            engine,
            importer,
        }
    }

    /// Load everything, then resolve the run request from `args`.
    pub async fn load(&self, args: &[String], tracker: &mut ResourceTracker) -> Result<LoadOutcome> {
        let stamps = StampVariables::load_all(&self.config.stamp_files)?;
        if !stamps.is_empty() {
            tracing::debug!(count = stamps.len(), "Stamp variables ready");
        }

        for archive in &self.config.legacy_archives {
            load_legacy(self.engine.as_ref(), archive).await?;
        }

        for directive in &self.config.imports {
            let tag = self.resolve_tag(&stamps, &directive.tag)?;
            let image = ImageConfig::from_directive(directive, tag);
            self.importer.import(&image, tracker).await?;
        }

        if !self.config.run {
            return Ok(LoadOutcome::Done);
        }

        let arguments = match parse_run_arguments(args) {
            RunRequest::Suppressed => {
                tracing::info!("Run suppressed");
                return Ok(LoadOutcome::Done);
            }
            RunRequest::Run(arguments) => arguments,
        };

        let tag = self.config.run_tag.as_deref().ok_or_else(|| {
            LoadError::ConfigError("run is enabled but run_tag is not set".to_string())
        })?;
        let tag = self.resolve_tag(&stamps, tag)?;
        Ok(LoadOutcome::Run(RunSpec::new(
            self.config.run_args.clone(),
            tag,
            arguments,
        )))
    }

    /// Tags are templates only when stamp files are declared.
    fn resolve_tag(&self, stamps: &StampVariables, template: &str) -> Result<String> {
        if self.config.stamp_files.is_empty() {
            Ok(template.to_string())
        } else {
            stamps.substitute(template)
        }
    }
}
