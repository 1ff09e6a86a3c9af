//! The `layerload` entry point.
//!
//! Everything after the program name belongs to the run invoker, so the
//! arguments are taken raw instead of going through a flag parser.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use layerload_core::config::LoaderConfig;
use layerload_core::error::{LoadError, Result};
use layerload_core::runfiles::Runfiles;
use layerload_runtime::engine::{CliEngine, Engine};
use layerload_runtime::import::ImportOptions;
use layerload_runtime::loader::{LoadOutcome, Loader};
use layerload_runtime::tracker::ResourceTracker;
use layerload_runtime::REGISTRY_BINARY_NAME;

use crate::signal::{Shutdown, ShutdownSignals};

/// Everything resolved before the first resource is created.
struct Prepared {
    config: LoaderConfig,
    engine: Arc<dyn Engine>,
    options: ImportOptions,
}

/// Split `argv` into the program path and the trailing arguments.
pub fn split_argv(argv: Vec<std::ffi::OsString>) -> Result<(PathBuf, Vec<String>)> {
    let mut argv = argv.into_iter();
    let argv0 = argv
        .next()
        .map(PathBuf::from)
        .ok_or_else(|| LoadError::Other("empty argument list".to_string()))?;
    let args = argv
        .map(|arg| {
            arg.into_string().map_err(|arg| {
                LoadError::ConfigError(format!("argument is not valid UTF-8: {:?}", arg))
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok((argv0, args))
}

/// Run one load cycle and return the process exit code.
///
/// Returns only if the run was suppressed, disabled or failed; a
/// successful run replaces the process.
pub async fn run(argv0: &Path, args: &[String]) -> i32 {
    let prepared = match prepare(argv0) {
        Ok(prepared) => prepared,
        Err(e) => {
            eprintln!("Error: {e}");
            return 1;
        }
    };
    let mut signals = match ShutdownSignals::install() {
        Ok(signals) => signals,
        Err(e) => {
            eprintln!("Error: failed to install signal handlers: {e}");
            return 1;
        }
    };

    let engine = prepared.engine.clone();
    let mut tracker = ResourceTracker::new(engine.clone());
    let loader = Loader::new(prepared.config, engine.clone(), prepared.options);

    let result = {
        let load = loader.load(args, &mut tracker);
        tokio::select! {
            result = load => Ok(result),
            signal = signals.recv() => Err(signal),
        }
    };

    match result {
        Ok(Ok(LoadOutcome::Done)) => {
            tracker.cleanup();
            0
        }
        Ok(Ok(LoadOutcome::Run(spec))) => {
            let err = spec.exec(engine.as_ref(), &mut tracker);
            eprintln!("Error: {err}");
            1
        }
        Ok(Err(e)) => {
            tracker.cleanup();
            eprintln!("Error: {e}");
            1
        }
        Err(signal) => interrupted(signal, &mut tracker),
    }
}

fn interrupted(signal: Shutdown, tracker: &mut ResourceTracker) -> i32 {
    tracing::warn!(signal = signal.name(), "Interrupted, cleaning up");
    tracker.cleanup();
    signal.exit_code()
}

fn prepare(argv0: &Path) -> Result<Prepared> {
    let runfiles = Runfiles::discover(argv0)?;
    let config_path = LoaderConfig::locate(&runfiles, argv0)?;
    let mut config = LoaderConfig::from_file(&config_path)?;
    config.resolve_paths(&runfiles);
    tracing::debug!(
        config = %config_path.display(),
        runfiles = %runfiles.root().display(),
        "Loaded configuration"
    );

    let engine = CliEngine::locate(&config.engine, config.engine_flags.clone())?;
    let registry_binary = match &config.registry_binary {
        Some(binary) => binary.clone(),
        None => default_registry_binary()?,
    };
    let options = ImportOptions::from_config(&config, registry_binary);

    Ok(Prepared {
        config,
        engine: Arc::new(engine),
        options,
    })
}

/// `layerload-registry` installed next to the running executable.
fn default_registry_binary() -> Result<PathBuf> {
    Ok(std::env::current_exe()?.with_file_name(REGISTRY_BINARY_NAME))
}
