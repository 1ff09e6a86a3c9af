//! Container engine driver.
//!
//! The engine (docker, podman, ...) is a black box reached through its
//! command line. [`Engine`] is the seam the loader talks to; [`CliEngine`]
//! is the real implementation.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use layerload_core::error::{LoadError, Result};
use tokio::process::Command;

/// Operations the loader needs from a container engine.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Engine binary.
    fn program(&self) -> &Path;

    /// Flags placed before every subcommand.
    fn global_flags(&self) -> &[String];

    /// `load -i <archive>`
    async fn load(&self, archive: &Path) -> Result<()>;

    /// `pull <reference>`
    async fn pull(&self, reference: &str) -> Result<()>;

    /// `tag <source> <target>`
    async fn tag(&self, source: &str, target: &str) -> Result<()>;

    /// `rmi <reference>`
    async fn remove_image(&self, reference: &str) -> Result<()>;

    /// Image ID a reference resolves to, or `None` if it does not exist.
    async fn image_id(&self, reference: &str) -> Result<Option<String>>;

    /// Synchronous `rmi`, for cleanup paths that cannot await.
    fn remove_image_blocking(&self, reference: &str) -> Result<()>;

    /// Build a synchronous command with the engine's global flags applied.
    fn std_command(&self) -> std::process::Command {
        let mut cmd = std::process::Command::new(self.program());
        cmd.args(self.global_flags());
        cmd
    }
}

/// Engine driven through its command-line interface.
#[derive(Debug, Clone)]
pub struct CliEngine {
    program: PathBuf,
    flags: Vec<String>,
}

impl CliEngine {
    /// Locate `engine` (a bare name searched on PATH, or a path).
    ///
    /// Fails before anything else happens so no resource is ever created
    /// for an engine that does not exist.
    pub fn locate(engine: &str, flags: Vec<String>) -> Result<Self> {
        let program = which::which(engine).map_err(|e| LoadError::EngineNotFound {
            engine: engine.to_string(),
            reason: e.to_string(),
        })?;
        tracing::debug!(engine = %program.display(), "Located container engine");
        Ok(Self { program, flags })
    }

    /// Engine subcommands die with the future awaiting them.
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.flags).kill_on_drop(true);
        cmd
    }

    fn describe<S: AsRef<OsStr>>(&self, args: &[S]) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.flags.iter().cloned());
        parts.extend(args.iter().map(|a| a.as_ref().to_string_lossy().into_owned()));
        parts.join(" ")
    }

    /// Run with inherited stdio so the engine's progress output is visible.
    async fn run_visible<S: AsRef<OsStr>>(&self, args: &[S]) -> Result<()> {
        let status = self.command().args(args).status().await?;
        if status.success() {
            Ok(())
        } else {
            Err(LoadError::EngineCommandError {
                command: self.describe(args),
                status: status.to_string(),
            })
        }
    }

    /// Run quietly, returning stdout; stderr is folded into the error.
    async fn run_captured<S: AsRef<OsStr>>(&self, args: &[S]) -> Result<String> {
        let output = self
            .command()
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(LoadError::EngineCommandError {
                command: self.describe(args),
                status: format!("{}: {}", output.status, stderr.trim()),
            })
        }
    }
}

#[async_trait]
impl Engine for CliEngine {
    fn program(&self) -> &Path {
        &self.program
    }

    fn global_flags(&self) -> &[String] {
        &self.flags
    }

    async fn load(&self, archive: &Path) -> Result<()> {
        self.run_visible(&[OsStr::new("load"), OsStr::new("-i"), archive.as_os_str()])
            .await
    }

    async fn pull(&self, reference: &str) -> Result<()> {
        self.run_visible(&["pull", reference]).await
    }

    async fn tag(&self, source: &str, target: &str) -> Result<()> {
        self.run_captured(&["tag", source, target]).await.map(drop)
    }

    async fn remove_image(&self, reference: &str) -> Result<()> {
        self.run_captured(&["rmi", reference]).await.map(drop)
    }

    async fn image_id(&self, reference: &str) -> Result<Option<String>> {
        match self
            .run_captured(&["image", "inspect", "--format", "{{.Id}}", reference])
            .await
        {
            Ok(stdout) => {
                let id = stdout.trim();
                Ok((!id.is_empty()).then(|| id.to_string()))
            }
            Err(LoadError::EngineCommandError { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn remove_image_blocking(&self, reference: &str) -> Result<()> {
        let status = self
            .std_command()
            .arg("rmi")
            .arg(reference)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;
        if status.success() {
            Ok(())
        } else {
            Err(LoadError::EngineCommandError {
                command: self.describe(&["rmi", reference]),
                status: status.to_string(),
            })
        }
    }
}
