//! Loader configuration generated by the upstream build step.
//!
//! The build step writes one JSON document per loader describing which
//! engine to drive, which archives and image configs to load, and what to
//! run afterwards. Relative paths are resolved against the runfiles root.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LoadError, Result};
use crate::runfiles::Runfiles;

/// Environment variable naming the configuration file explicitly.
pub const CONFIG_ENV: &str = "LAYERLOAD_CONFIG";

/// Default blob root of the containerd content store.
pub const DEFAULT_CONTENT_STORE: &str = "/var/lib/containerd/io.containerd.content.v1.content/blobs";

/// Default bound on the registry readiness handshake.
pub const DEFAULT_REGISTRY_TIMEOUT_SECS: u64 = 60;

/// Suffix of digest files written next to blobs by the build step.
pub const DIGEST_FILE_SUFFIX: &str = ".sha256";

/// Complete loader configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Engine binary name (searched on PATH) or path
    #[serde(default = "default_engine")]
    pub engine: String,

    /// Global flags passed to every engine command
    #[serde(default)]
    pub engine_flags: Vec<String>,

    /// Stamp manifests providing `{KEY}` substitutions for tags
    #[serde(default)]
    pub stamp_files: Vec<PathBuf>,

    /// Self-contained archives handed to `engine load`
    #[serde(default)]
    pub legacy_archives: Vec<PathBuf>,

    /// Images imported through an ephemeral registry
    #[serde(default)]
    pub imports: Vec<ImportDirective>,

    /// Whether to run an image after loading
    #[serde(default)]
    pub run: bool,

    /// Default arguments placed right after `run`
    #[serde(default)]
    pub run_args: Vec<String>,

    /// Tag to run
    #[serde(default)]
    pub run_tag: Option<String>,

    /// Blob root of the content-addressable store used by the fast path
    #[serde(default = "default_content_store")]
    pub content_store: PathBuf,

    /// Ephemeral registry binary (defaults to `layerload-registry` next to the loader)
    #[serde(default)]
    pub registry_binary: Option<PathBuf>,

    /// Seconds to wait for the ephemeral registry to announce itself
    #[serde(default = "default_registry_timeout_secs")]
    pub registry_timeout_secs: u64,

    /// Skip imports whose target tag already resolves to the same image
    #[serde(default = "default_true")]
    pub skip_present: bool,

    /// Serve the ephemeral registry over plain HTTP instead of self-signed TLS
    #[serde(default)]
    pub registry_plain_http: bool,
}

/// One image assembled from a config blob and an ordered layer list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportDirective {
    /// Target tag; may contain `{KEY}` stamp placeholders
    pub tag: String,

    /// Image config JSON
    pub config: PathBuf,

    /// Digest file of the config (defaults to `<config>.sha256`)
    #[serde(default)]
    pub config_digest: Option<PathBuf>,

    /// Layers in application order
    #[serde(default)]
    pub layers: Vec<LayerSpec>,

    /// Publish layers into the content store before pulling
    #[serde(default)]
    pub fast_path: bool,
}

/// A layer blob and the file holding its digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSpec {
    /// Packed layer bytes
    pub path: PathBuf,

    /// Digest file (defaults to `<path>.sha256`)
    #[serde(default)]
    pub digest: Option<PathBuf>,
}

impl LayerSpec {
    /// The digest file for this layer, explicit or by convention.
    pub fn digest_file(&self) -> PathBuf {
        self.digest
            .clone()
            .unwrap_or_else(|| default_digest_file(&self.path))
    }
}

impl ImportDirective {
    /// The digest file for the config, explicit or by convention.
    pub fn config_digest_file(&self) -> PathBuf {
        self.config_digest
            .clone()
            .unwrap_or_else(|| default_digest_file(&self.config))
    }
}

/// `<path>.sha256`
pub fn default_digest_file(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(DIGEST_FILE_SUFFIX);
    PathBuf::from(name)
}

fn default_engine() -> String {
    "docker".to_string()
}

fn default_content_store() -> PathBuf {
    PathBuf::from(DEFAULT_CONTENT_STORE)
}

fn default_registry_timeout_secs() -> u64 {
    DEFAULT_REGISTRY_TIMEOUT_SECS
}

fn default_true() -> bool {
    true
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            engine_flags: Vec::new(),
            stamp_files: Vec::new(),
            legacy_archives: Vec::new(),
            imports: Vec::new(),
            run: false,
            run_args: Vec::new(),
            run_tag: None,
            content_store: default_content_store(),
            registry_binary: None,
            registry_timeout_secs: default_registry_timeout_secs(),
            skip_present: true,
            registry_plain_http: false,
        }
    }
}

impl LoaderConfig {
    /// Parse and validate a configuration document.
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            LoadError::ConfigError(format!(
                "Failed to read configuration {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&content)
    }

    /// Find the configuration file for a loader invoked as `argv0`.
    ///
    /// `LAYERLOAD_CONFIG` wins; otherwise `<runfiles>/<loader name>.json`.
    pub fn locate(runfiles: &Runfiles, argv0: &Path) -> Result<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
            return Ok(PathBuf::from(path));
        }

        let name = argv0.file_name().ok_or_else(|| {
            LoadError::ConfigError(format!(
                "Cannot derive configuration name from {}",
                argv0.display()
            ))
        })?;
        let mut file_name = name.to_owned();
        file_name.push(".json");
        Ok(runfiles.root().join(file_name))
    }

    /// Check cross-field invariants.
    pub fn validate(&self) -> Result<()> {
        if self.engine.trim().is_empty() {
            return Err(LoadError::ConfigError("engine must not be empty".to_string()));
        }
        if self.run && self.run_tag.as_deref().map_or(true, |t| t.trim().is_empty()) {
            return Err(LoadError::ConfigError(
                "run is enabled but run_tag is not set".to_string(),
            ));
        }
        for (i, import) in self.imports.iter().enumerate() {
            if import.tag.trim().is_empty() {
                return Err(LoadError::ConfigError(format!("imports[{}] has an empty tag", i)));
            }
        }
        if self.registry_timeout_secs == 0 {
            return Err(LoadError::ConfigError(
                "registry_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Rewrite every data path to an absolute path under the runfiles root.
    pub fn resolve_paths(&mut self, runfiles: &Runfiles) {
        for path in &mut self.stamp_files {
            *path = runfiles.resolve(path);
        }
        for path in &mut self.legacy_archives {
            *path = runfiles.resolve(path);
        }
        for import in &mut self.imports {
            import.config = runfiles.resolve(&import.config);
            if let Some(digest) = import.config_digest.as_mut() {
                *digest = runfiles.resolve(digest);
            }
            for layer in &mut import.layers {
                layer.path = runfiles.resolve(&layer.path);
                if let Some(digest) = layer.digest.as_mut() {
                    *digest = runfiles.resolve(digest);
                }
            }
        }
        if let Some(binary) = self.registry_binary.as_mut() {
            *binary = runfiles.resolve(binary);
        }
    }

    /// Registry readiness bound.
    pub fn registry_timeout(&self) -> Duration {
        Duration::from_secs(self.registry_timeout_secs)
    }
}
