//! Ephemeral registry process management.
//!
//! The registry runs as a child process for the duration of one import
//! cycle. It announces the reference to pull by appending one line to an
//! output file; the loader polls that file with a bounded wait.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use layerload_core::error::{LoadError, Result};
use tokio::process::{Child, Command};
use tokio::time::Instant;

/// Interval between readiness polls.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Arguments for the `layerload-registry` binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryCommand {
    pub output: PathBuf,
    pub repo: String,
    pub config: PathBuf,
    pub config_digest: PathBuf,
    /// `(digest file, layer)` pairs in manifest order
    pub layers: Vec<(PathBuf, PathBuf)>,
    pub plain_http: bool,
}

impl RegistryCommand {
    /// Command-line arguments, with layers as interleaved digest/layer pairs.
    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--output".into(),
            self.output.clone().into(),
            "--repo".into(),
            self.repo.clone().into(),
            "--config".into(),
            self.config.clone().into(),
            "--config-digest".into(),
            self.config_digest.clone().into(),
        ];
        if self.plain_http {
            args.push("--plain-http".into());
        }
        if !self.layers.is_empty() {
            args.push("--".into());
        }
        for (digest, layer) in &self.layers {
            args.push(digest.clone().into());
            args.push(layer.clone().into());
        }
        args
    }
}

/// A running registry child bound to one import cycle.
#[derive(Debug)]
pub struct EphemeralRegistry {
    child: Child,
    output: PathBuf,
    tag: String,
}

impl EphemeralRegistry {
    /// Start `program` in the background. The child is killed if the
    /// handle is dropped.
    pub fn spawn(program: &Path, command: &RegistryCommand, tag: &str) -> Result<Self> {
        let child = Command::new(program)
            .args(command.args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LoadError::ImportError {
                tag: tag.to_string(),
                message: format!("failed to spawn registry {}: {}", program.display(), e),
            })?;

        tracing::debug!(
            pid = ?child.id(),
            program = %program.display(),
            repo = %command.repo,
            "Registry started"
        );

        Ok(Self {
            child,
            output: command.output.clone(),
            tag: tag.to_string(),
        })
    }

    /// Process ID, while the child has not been reaped.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the first complete output line, at most `timeout`.
    pub async fn wait_ready(&mut self, timeout: Duration) -> Result<String> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(line) = first_line(&self.output)? {
                return Ok(line);
            }

            if let Some(status) = self.child.try_wait()? {
                // The line may have landed between the read and the exit.
                if let Some(line) = first_line(&self.output)? {
                    return Ok(line);
                }
                return Err(LoadError::RegistryExited {
                    tag: self.tag.clone(),
                    status: status.to_string(),
                });
            }

            if Instant::now() >= deadline {
                return Err(LoadError::RegistryTimeout {
                    tag: self.tag.clone(),
                    waited: timeout,
                });
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    /// Kill and reap the child, ignoring errors.
    pub async fn terminate(mut self) {
        let pid = self.child.id();
        if let Err(e) = self.child.kill().await {
            tracing::debug!(?pid, error = %e, "Registry kill failed");
        } else {
            tracing::debug!(?pid, "Registry stopped");
        }
    }
}

/// First newline-terminated line of `path`, if one has been written.
fn first_line(path: &Path) -> Result<Option<String>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(content
        .split_once('\n')
        .map(|(line, _)| line.trim().to_string())
        .filter(|line| !line.is_empty()))
}
