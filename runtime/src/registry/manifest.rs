//! The single image an ephemeral registry serves.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use layerload_core::error::Result;
use serde::{Deserialize, Serialize};

use crate::digest::Digest;

pub const MANIFEST_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const CONFIG_MEDIA_TYPE: &str = "application/vnd.docker.container.image.v1+json";
pub const LAYER_MEDIA_TYPE: &str = "application/vnd.docker.image.rootfs.diff.tar";

/// Content descriptor inside a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: String,
    pub size: u64,
}

/// Docker distribution manifest, schema 2.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    pub schema_version: u32,
    pub media_type: String,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
}

/// A blob the registry can stream from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobEntry {
    pub media_type: &'static str,
    pub path: PathBuf,
    pub size: u64,
}

/// Manifest bytes plus the blobs it references.
#[derive(Debug, Clone)]
pub struct ServedImage {
    repo: String,
    manifest: Vec<u8>,
    manifest_digest: Digest,
    config_digest: Digest,
    blobs: HashMap<String, BlobEntry>,
}

impl ServedImage {
    /// Assemble the image from a config blob and `(digest file, layer)` pairs.
    ///
    /// Digests come from the digest files; a missing digest file means the
    /// blob is hashed.
    pub fn build(
        repo: &str,
        config: &Path,
        config_digest_file: &Path,
        layers: &[(PathBuf, PathBuf)],
    ) -> Result<Self> {
        let mut blobs = HashMap::new();

        let config_digest = Digest::for_blob(config_digest_file, config)?;
        let config_descriptor =
            register_blob(&mut blobs, CONFIG_MEDIA_TYPE, config, &config_digest)?;

        let mut layer_descriptors = Vec::with_capacity(layers.len());
        for (digest_file, layer) in layers {
            let digest = Digest::for_blob(digest_file, layer)?;
            layer_descriptors.push(register_blob(&mut blobs, LAYER_MEDIA_TYPE, layer, &digest)?);
        }

        let manifest = ImageManifest {
            schema_version: 2,
            media_type: MANIFEST_MEDIA_TYPE.to_string(),
            config: config_descriptor,
            layers: layer_descriptors,
        };
        let manifest = serde_json::to_vec(&manifest)?;
        let manifest_digest = Digest::sha256_of(&manifest);

        Ok(Self {
            repo: repo.to_string(),
            manifest,
            manifest_digest,
            config_digest,
            blobs,
        })
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// Serialized manifest, exactly as served.
    pub fn manifest(&self) -> &[u8] {
        &self.manifest
    }

    pub fn manifest_digest(&self) -> &Digest {
        &self.manifest_digest
    }

    pub fn config_digest(&self) -> &Digest {
        &self.config_digest
    }

    /// `<repo>@<manifest digest>`
    pub fn image_ref(&self) -> String {
        format!("{}@{}", self.repo, self.manifest_digest)
    }

    /// Whether `reference` names the manifest (`latest` or its digest).
    pub fn is_manifest_reference(&self, reference: &str) -> bool {
        reference == "latest" || reference == self.manifest_digest.to_string()
    }

    pub fn blob(&self, digest: &str) -> Option<&BlobEntry> {
        self.blobs.get(digest)
    }
}

fn register_blob(
    blobs: &mut HashMap<String, BlobEntry>,
    media_type: &'static str,
    path: &Path,
    digest: &Digest,
) -> Result<Descriptor> {
    let size = std::fs::metadata(path)?.len();
    blobs.insert(
        digest.to_string(),
        BlobEntry {
            media_type,
            path: path.to_path_buf(),
            size,
        },
    );
    Ok(Descriptor {
        media_type: media_type.to_string(),
        digest: digest.to_string(),
        size,
    })
}
