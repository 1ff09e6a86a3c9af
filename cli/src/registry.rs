//! `layerload-registry`: serve one image until killed.

use std::path::PathBuf;

use clap::Parser;
use layerload_core::error::{LoadError, Result};
use layerload_runtime::registry::{announce, RegistryServer, ServedImage};

/// Ephemeral registry serving exactly one image over loopback.
#[derive(Parser, Debug)]
#[command(name = "layerload-registry", version, about)]
pub struct RegistryArgs {
    /// File the pullable reference is appended to once listening
    #[arg(long)]
    pub output: PathBuf,

    /// Repository name the image is served under
    #[arg(long)]
    pub repo: String,

    /// Image config JSON
    #[arg(long)]
    pub config: PathBuf,

    /// Digest file of the config
    #[arg(long)]
    pub config_digest: PathBuf,

    /// Serve plain HTTP instead of TLS
    #[arg(long)]
    pub plain_http: bool,

    /// Interleaved `<digest file> <layer>` pairs, in layer order
    #[arg(last = true, num_args = 0..)]
    pub layers: Vec<PathBuf>,
}

impl RegistryArgs {
    /// Layers as `(digest file, layer)` pairs.
    pub fn layer_pairs(&self) -> Result<Vec<(PathBuf, PathBuf)>> {
        if self.layers.len() % 2 != 0 {
            return Err(LoadError::ConfigError(format!(
                "layers must be <digest file> <layer> pairs, got {} paths",
                self.layers.len()
            )));
        }
        Ok(self
            .layers
            .chunks(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect())
    }
}

/// Build the image, bind, announce, then serve forever.
pub async fn run(args: RegistryArgs) -> Result<()> {
    let layers = args.layer_pairs()?;
    let image = ServedImage::build(&args.repo, &args.config, &args.config_digest, &layers)?;
    let server = RegistryServer::bind(image, !args.plain_http).await?;

    let reference = server.reference()?;
    announce(&args.output, &reference)?;
    tracing::debug!(reference = %reference, output = %args.output.display(), "Announced");

    server.serve().await
}
