//! Zero-copy layer publication into a content-addressable store.
//!
//! Before the engine pulls from the ephemeral registry, each layer can be
//! published as a symlink at `<blobs>/<algorithm>/<hex>`. The engine's pull
//! then finds the blob already present and skips the transfer. Nothing here
//! is fatal: a layer that cannot be linked is simply pulled the slow way.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use layerload_core::error::Result;

use crate::digest::{Digest, SHA256};

/// What happened to one layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    /// A new link now points at the layer
    Linked,
    /// A real blob (or a live link) already occupies the location
    AlreadyPresent,
}

/// Per-import summary of the fast path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkSummary {
    pub linked: usize,
    pub present: usize,
    pub skipped: usize,
}

/// Blob area of a content-addressable store.
#[derive(Debug, Clone)]
pub struct ContentStore {
    blobs_root: PathBuf,
}

impl ContentStore {
    pub fn new(blobs_root: impl Into<PathBuf>) -> Self {
        Self {
            blobs_root: blobs_root.into(),
        }
    }

    /// Directory holding blobs of one digest algorithm.
    pub fn algorithm_dir(&self, algorithm: &str) -> PathBuf {
        self.blobs_root.join(algorithm)
    }

    /// Location of a blob.
    pub fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.algorithm_dir(digest.algorithm()).join(digest.hex())
    }

    /// Whether the sha256 blob directory is writable by this process.
    pub fn is_writable(&self) -> bool {
        is_writable_dir(&self.algorithm_dir(SHA256))
    }

    /// Link every `(digest file, layer)` pair, never failing.
    pub fn link_layers(&self, layers: &[(PathBuf, PathBuf)]) -> LinkSummary {
        let mut summary = LinkSummary::default();
        for (digest_file, layer) in layers {
            match self.link_layer(digest_file, layer) {
                Ok(LinkOutcome::Linked) => summary.linked += 1,
                Ok(LinkOutcome::AlreadyPresent) => summary.present += 1,
                Err(e) => {
                    summary.skipped += 1;
                    tracing::debug!(
                        layer = %layer.display(),
                        error = %e,
                        "Skipping fast-path link"
                    );
                }
            }
        }
        summary
    }

    /// Publish `layer` at the store location named by the digest in `digest_file`.
    ///
    /// A dangling link at the location is replaced atomically: the new link
    /// is created under a temporary name and renamed over the old one.
    pub fn link_layer(&self, digest_file: &Path, layer: &Path) -> Result<LinkOutcome> {
        let digest = Digest::read_file(digest_file)?;
        let target = self.blob_path(&digest);

        match std::fs::symlink_metadata(&target) {
            Ok(meta) if !meta.file_type().is_symlink() => return Ok(LinkOutcome::AlreadyPresent),
            // Live link: the blob is reachable already.
            Ok(_) if target.is_file() => return Ok(LinkOutcome::AlreadyPresent),
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let source = std::path::absolute(layer)?;
        let staging = target.with_file_name(format!(
            ".{}.layerload-{}",
            digest.hex(),
            std::process::id()
        ));
        let _ = std::fs::remove_file(&staging);
        std::os::unix::fs::symlink(&source, &staging)?;
        if let Err(e) = std::fs::rename(&staging, &target) {
            let _ = std::fs::remove_file(&staging);
            return Err(e.into());
        }

        tracing::debug!(
            digest = %digest,
            layer = %source.display(),
            "Linked layer into content store"
        );
        Ok(LinkOutcome::Linked)
    }
}

fn is_writable_dir(path: &Path) -> bool {
    if !path.is_dir() {
        return false;
    }
    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    // SAFETY: c_path is a valid NUL-terminated string for the duration of the call.
    unsafe { libc::access(c_path.as_ptr(), libc::W_OK) == 0 }
}
