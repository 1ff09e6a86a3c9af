//! Importing an image config through an ephemeral registry.
//!
//! One import cycle:
//!
//! 1. allocate a tracked scratch file for the registry's handshake line
//! 2. spawn the registry serving exactly this image
//! 3. optionally publish layers into the content store (fast path)
//! 4. wait, bounded, for the registry to announce its reference
//! 5. `pull` the reference
//! 6. kill the registry
//! 7. `tag` the pulled image and remove the pulled reference
//!
//! The registry never outlives its cycle: it is killed explicitly after the
//! pull and by drop on any other exit path.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use layerload_core::config::{ImportDirective, LoaderConfig};
use layerload_core::error::{LoadError, Result};

use crate::engine::Engine;
use crate::fastpath::ContentStore;
use crate::registry::{EphemeralRegistry, RegistryCommand, ServedImage};
use crate::tracker::ResourceTracker;

/// A resolved image to import: target tag plus blobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageConfig {
    /// Final tag, stamp variables already substituted
    pub tag: String,
    pub config: PathBuf,
    pub config_digest: PathBuf,
    /// `(digest file, layer)` pairs in manifest order
    pub layers: Vec<(PathBuf, PathBuf)>,
    pub fast_path: bool,
}

impl ImageConfig {
    /// Resolve a configured directive with an already-substituted tag.
    pub fn from_directive(directive: &ImportDirective, tag: String) -> Self {
        Self {
            tag,
            config: directive.config.clone(),
            config_digest: directive.config_digest_file(),
            layers: directive
                .layers
                .iter()
                .map(|layer| (layer.digest_file(), layer.path.clone()))
                .collect(),
            fast_path: directive.fast_path,
        }
    }
}

/// Settings shared by every import cycle.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub registry_binary: PathBuf,
    pub content_store: ContentStore,
    pub registry_timeout: Duration,
    pub skip_present: bool,
    pub plain_http: bool,
}

impl ImportOptions {
    /// Options from a loaded configuration; the registry binary is resolved by the caller.
    pub fn from_config(config: &LoaderConfig, registry_binary: PathBuf) -> Self {
        Self {
            registry_binary,
            content_store: ContentStore::new(&config.content_store),
            registry_timeout: config.registry_timeout(),
            skip_present: config.skip_present,
            plain_http: config.registry_plain_http,
        }
    }
}

/// What an import cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    /// The target tag now refers to the pulled image
    Imported { reference: String },
    /// The target tag already referred to this image
    AlreadyPresent,
}

/// Drives import cycles against one engine.
pub struct ConfigImporter {
    engine: Arc<dyn Engine>,
    options: ImportOptions,
}

impl ConfigImporter {
    pub fn new(engine: Arc<dyn Engine>, options: ImportOptions) -> Self {
        Self { engine, options }
    }

    /// Run one import cycle for `image`.
    pub async fn import(
        &self,
        image: &ImageConfig,
        tracker: &mut ResourceTracker,
    ) -> Result<ImportOutcome> {
        let repo = format!("layerload-{}", uuid::Uuid::new_v4().simple());

        if self.options.skip_present && self.is_present(&repo, image).await {
            tracing::info!(tag = %image.tag, "Image already present, skipping import");
            return Ok(ImportOutcome::AlreadyPresent);
        }

        let output = tracker.temp_file("layerload-registry-")?;
        let command = RegistryCommand {
            output,
            repo,
            config: image.config.clone(),
            config_digest: image.config_digest.clone(),
            layers: image.layers.clone(),
            plain_http: self.options.plain_http,
        };

        let mut registry =
            EphemeralRegistry::spawn(&self.options.registry_binary, &command, &image.tag)?;
        let pulled = self.link_and_pull(&mut registry, image, tracker).await;
        registry.terminate().await;
        let reference = pulled?;

        self.engine.tag(&reference, &image.tag).await?;
        if let Err(e) = tracker.release_tag(&reference).await {
            tracing::warn!(reference = %reference, error = %e, "Failed to remove pulled reference");
        }

        tracing::info!(tag = %image.tag, layers = image.layers.len(), "Imported image");
        Ok(ImportOutcome::Imported { reference })
    }

    /// Steps 3-5: fast path, readiness, pull. Returns the pulled reference.
    async fn link_and_pull(
        &self,
        registry: &mut EphemeralRegistry,
        image: &ImageConfig,
        tracker: &mut ResourceTracker,
    ) -> Result<String> {
        if image.fast_path {
            if self.options.content_store.is_writable() {
                let summary = self.options.content_store.link_layers(&image.layers);
                tracing::debug!(
                    tag = %image.tag,
                    linked = summary.linked,
                    present = summary.present,
                    skipped = summary.skipped,
                    "Fast-path layer linking"
                );
            } else {
                tracing::debug!(tag = %image.tag, "Content store not writable, skipping fast path");
            }
        }

        let reference = registry.wait_ready(self.options.registry_timeout).await?;
        if reference.is_empty() {
            return Err(LoadError::ImportError {
                tag: image.tag.clone(),
                message: "registry announced an empty reference".to_string(),
            });
        }

        tracker.track_tag(reference.clone());
        tracing::info!(tag = %image.tag, reference = %reference, "Pulling from ephemeral registry");
        self.engine.pull(&reference).await?;
        Ok(reference)
    }

    /// Whether the target tag already resolves to this image's config or manifest.
    async fn is_present(&self, repo: &str, image: &ImageConfig) -> bool {
        let served =
            match ServedImage::build(repo, &image.config, &image.config_digest, &image.layers) {
                Ok(served) => served,
                Err(e) => {
                    tracing::debug!(tag = %image.tag, error = %e, "Cannot precompute image digests");
                    return false;
                }
            };
        match self.engine.image_id(&image.tag).await {
            Ok(Some(id)) => {
                id == served.config_digest().to_string() || id == served.manifest_digest().to_string()
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::Digest;
    use crate::testing::FakeEngine;
    use crate::tracker::TempResource;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    const REFERENCE: &str = "127.0.0.1:5000/layerload-x@sha256:feed";

    struct Fixture {
        dir: tempfile::TempDir,
        image: ImageConfig,
    }

    fn fixture(fast_path: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut layers = Vec::new();
        for (name, content) in [("l1.tar", b"one".as_slice()), ("l2.tar", b"two".as_slice())] {
            let path = dir.path().join(name);
            let digest = dir.path().join(format!("{name}.sha256"));
            std::fs::write(&path, content).unwrap();
            std::fs::write(&digest, Digest::sha256_of(content).hex()).unwrap();
            layers.push((digest, path));
        }
        let config = dir.path().join("config.json");
        std::fs::write(&config, b"{\"rootfs\":{}}").unwrap();
        let image = ImageConfig {
            tag: "app:v1".to_string(),
            config_digest: dir.path().join("config.json.sha256"),
            config,
            layers,
            fast_path,
        };
        Fixture { dir, image }
    }

    fn registry_script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake-registry");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn announcing_registry(dir: &Path) -> PathBuf {
        registry_script(dir, &format!("echo {REFERENCE} >> \"$2\"\nexec sleep 30"))
    }

    fn options(registry_binary: PathBuf, store: &Path) -> ImportOptions {
        ImportOptions {
            registry_binary,
            content_store: ContentStore::new(store),
            registry_timeout: Duration::from_secs(10),
            skip_present: true,
            plain_http: false,
        }
    }

    #[tokio::test]
    async fn test_import_cycle() {
        let f = fixture(false);
        let engine = Arc::new(FakeEngine::new());
        let importer = ConfigImporter::new(
            engine.clone(),
            options(announcing_registry(f.dir.path()), &f.dir.path().join("store")),
        );
        let mut tracker = ResourceTracker::new(engine.clone());

        let outcome = importer.import(&f.image, &mut tracker).await.unwrap();
        assert_eq!(
            outcome,
            ImportOutcome::Imported {
                reference: REFERENCE.to_string()
            }
        );

        // Target exists, pulled reference does not.
        assert!(engine.has_image("app:v1"));
        assert!(!engine.has_image(REFERENCE));
        assert_eq!(
            engine.calls(),
            [
                "inspect app:v1".to_string(),
                format!("pull {REFERENCE}"),
                format!("tag {REFERENCE} app:v1"),
                format!("rmi {REFERENCE}"),
            ]
        );

        // Only the scratch file remains tracked.
        assert_eq!(tracker.resources().len(), 1);
        assert!(matches!(tracker.resources()[0], TempResource::File(_)));
        tracker.cleanup();
    }

    #[tokio::test]
    async fn test_fast_path_links_layers() {
        let f = fixture(true);
        let store = f.dir.path().join("store");
        std::fs::create_dir_all(store.join("sha256")).unwrap();
        let engine = Arc::new(FakeEngine::new());
        let importer =
            ConfigImporter::new(engine.clone(), options(announcing_registry(f.dir.path()), &store));
        let mut tracker = ResourceTracker::new(engine.clone());

        importer.import(&f.image, &mut tracker).await.unwrap();

        for (_, layer) in &f.image.layers {
            let content = std::fs::read(layer).unwrap();
            let link = store.join("sha256").join(Digest::sha256_of(&content).hex());
            assert_eq!(std::fs::read_link(&link).unwrap(), *layer);
        }
    }

    #[tokio::test]
    async fn test_fast_path_without_store_still_imports() {
        let f = fixture(true);
        let engine = Arc::new(FakeEngine::new());
        let importer = ConfigImporter::new(
            engine.clone(),
            options(announcing_registry(f.dir.path()), Path::new("/nonexistent/store")),
        );
        let mut tracker = ResourceTracker::new(engine.clone());

        importer.import(&f.image, &mut tracker).await.unwrap();
        assert!(engine.has_image("app:v1"));
    }

    #[tokio::test]
    async fn test_skip_when_present() {
        let f = fixture(false);
        let config_digest = Digest::sha256_of(b"{\"rootfs\":{}}").to_string();
        let engine = Arc::new(FakeEngine::new());
        engine.add_image("app:v1", &config_digest);
        let importer = ConfigImporter::new(
            engine.clone(),
            options(announcing_registry(f.dir.path()), &f.dir.path().join("store")),
        );
        let mut tracker = ResourceTracker::new(engine.clone());

        let outcome = importer.import(&f.image, &mut tracker).await.unwrap();
        assert_eq!(outcome, ImportOutcome::AlreadyPresent);
        assert_eq!(engine.calls(), ["inspect app:v1"]);
        assert!(tracker.resources().is_empty());
    }

    #[tokio::test]
    async fn test_stale_tag_is_reimported() {
        let f = fixture(false);
        let engine = Arc::new(FakeEngine::new());
        engine.add_image("app:v1", "sha256:somethingelse");
        let importer = ConfigImporter::new(
            engine.clone(),
            options(announcing_registry(f.dir.path()), &f.dir.path().join("store")),
        );
        let mut tracker = ResourceTracker::new(engine.clone());

        importer.import(&f.image, &mut tracker).await.unwrap();
        assert_eq!(engine.image_ids()["app:v1"], "sha256:feed");
    }

    #[tokio::test]
    async fn test_pull_failure_cleans_up() {
        let f = fixture(false);
        let engine = Arc::new(FakeEngine::new());
        engine.fail_pulls();
        let importer = ConfigImporter::new(
            engine.clone(),
            options(announcing_registry(f.dir.path()), &f.dir.path().join("store")),
        );
        let mut tracker = ResourceTracker::new(engine.clone());

        let err = importer.import(&f.image, &mut tracker).await.unwrap_err();
        assert!(matches!(err, LoadError::EngineCommandError { .. }));
        assert!(!engine.has_image("app:v1"));

        // The pulled reference stays tracked for cleanup.
        assert!(tracker
            .resources()
            .contains(&TempResource::ImageTag(REFERENCE.to_string())));
        let scratch: Vec<PathBuf> = tracker
            .resources()
            .iter()
            .filter_map(|r| match r {
                TempResource::File(p) => Some(p.clone()),
                _ => None,
            })
            .collect();
        tracker.cleanup();
        assert!(scratch.iter().all(|p| !p.exists()));
    }

    #[tokio::test]
    async fn test_silent_registry_times_out() {
        let f = fixture(false);
        let engine = Arc::new(FakeEngine::new());
        let mut opts = options(
            registry_script(f.dir.path(), "exec sleep 30"),
            &f.dir.path().join("store"),
        );
        opts.registry_timeout = Duration::from_millis(200);
        let importer = ConfigImporter::new(engine.clone(), opts);
        let mut tracker = ResourceTracker::new(engine.clone());

        let err = importer.import(&f.image, &mut tracker).await.unwrap_err();
        assert!(matches!(err, LoadError::RegistryTimeout { .. }));
        assert!(!engine.calls().iter().any(|c| c.starts_with("pull")));
    }

    #[test]
    fn test_options_from_config() {
        let config = LoaderConfig::from_json(
            r#"{"content_store": "/store/blobs", "registry_timeout_secs": 5,
                "skip_present": false, "registry_plain_http": true}"#,
        )
        .unwrap();
        let options = ImportOptions::from_config(&config, PathBuf::from("/bin/reg"));
        assert_eq!(options.registry_binary, PathBuf::from("/bin/reg"));
        assert_eq!(options.registry_timeout, Duration::from_secs(5));
        assert!(!options.skip_present);
        assert!(options.plain_http);
        assert_eq!(
            options.content_store.algorithm_dir("sha256"),
            PathBuf::from("/store/blobs/sha256")
        );
    }

    #[tokio::test]
    async fn test_plain_http_reaches_registry() {
        let f = fixture(false);
        let args_file = f.dir.path().join("registry-args");
        let registry = registry_script(
            f.dir.path(),
            &format!(
                "echo \"$*\" > '{}'\necho {REFERENCE} >> \"$2\"\nexec sleep 30",
                args_file.display()
            ),
        );
        let engine = Arc::new(FakeEngine::new());
        let mut opts = options(registry, &f.dir.path().join("store"));
        opts.plain_http = true;
        let importer = ConfigImporter::new(engine.clone(), opts);
        let mut tracker = ResourceTracker::new(engine.clone());

        importer.import(&f.image, &mut tracker).await.unwrap();
        let args = std::fs::read_to_string(&args_file).unwrap();
        assert!(args.contains("--plain-http"), "{args}");
    }

    #[test]
    fn test_from_directive() {
        let directive: ImportDirective = serde_json::from_str(
            r#"{"tag": "app:{X}", "config": "/c.json", "layers": [{"path": "/l.tar"}], "fast_path": true}"#,
        )
        .unwrap();
        let image = ImageConfig::from_directive(&directive, "app:1".to_string());
        assert_eq!(image.tag, "app:1");
        assert_eq!(image.config_digest, PathBuf::from("/c.json.sha256"));
        assert_eq!(
            image.layers,
            [(PathBuf::from("/l.tar.sha256"), PathBuf::from("/l.tar"))]
        );
        assert!(image.fast_path);
    }
}
