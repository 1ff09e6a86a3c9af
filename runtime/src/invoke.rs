//! Building and executing the final `run` invocation.

use std::ffi::OsString;
use std::os::unix::process::CommandExt;

use layerload_core::error::LoadError;

use crate::engine::Engine;
use crate::tracker::ResourceTracker;

/// Suppresses the run regardless of position.
pub const NORUN_FLAG: &str = "--norun";

/// Separates engine-run options from container arguments.
pub const DIVIDER: &str = "--";

/// Trailing arguments split at the first divider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunArguments {
    pub engine_options: Vec<String>,
    pub container_args: Vec<String>,
}

/// Whether to run, and with what.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunRequest {
    Suppressed,
    Run(RunArguments),
}

/// Interpret the trailing command-line arguments.
///
/// `--norun` is looked for across the whole list first, including after
/// the divider. Only if it is absent are the arguments partitioned.
pub fn parse_run_arguments(args: &[String]) -> RunRequest {
    if args.iter().any(|a| a == NORUN_FLAG) {
        return RunRequest::Suppressed;
    }

    let (engine_options, container_args) = match args.iter().position(|a| a == DIVIDER) {
        Some(i) => (args[..i].to_vec(), args[i + 1..].to_vec()),
        None => (args.to_vec(), Vec::new()),
    };
    RunRequest::Run(RunArguments {
        engine_options,
        container_args,
    })
}

/// A fully resolved `run` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    pub default_args: Vec<String>,
    pub tag: String,
    pub arguments: RunArguments,
}

impl RunSpec {
    pub fn new(default_args: Vec<String>, tag: String, arguments: RunArguments) -> Self {
        Self {
            default_args,
            tag,
            arguments,
        }
    }

    /// Arguments after the engine's global flags, starting with `run`.
    pub fn run_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(
            2 + self.default_args.len()
                + self.arguments.engine_options.len()
                + self.arguments.container_args.len(),
        );
        args.push("run".to_string());
        args.extend(self.default_args.iter().cloned());
        if !self.arguments.engine_options.is_empty() {
            args.extend(self.arguments.engine_options.iter().cloned());
        }
        args.push(self.tag.clone());
        if !self.arguments.container_args.is_empty() {
            args.extend(self.arguments.container_args.iter().cloned());
        }
        args
    }

    /// Full argv, program first.
    pub fn command_line(&self, engine: &dyn Engine) -> Vec<OsString> {
        let mut argv = vec![engine.program().as_os_str().to_os_string()];
        argv.extend(engine.global_flags().iter().map(OsString::from));
        argv.extend(self.run_args().into_iter().map(OsString::from));
        argv
    }

    /// Clean up, then replace this process with the engine.
    ///
    /// Only returns on failure. Cleanup runs first because nothing in this
    /// process survives a successful exec.
    pub fn exec(self, engine: &dyn Engine, tracker: &mut ResourceTracker) -> LoadError {
        tracing::debug!(argv = ?self.command_line(engine), "Executing run");
        tracker.cleanup();

        let err = engine.std_command().args(self.run_args()).exec();
        LoadError::EngineCommandError {
            command: format!("{} run {}", engine.program().display(), self.tag),
            status: err.to_string(),
        }
    }
}
