//! layerload-registry entry point.

use clap::Parser;

use layerload_cli::registry::{run, RegistryArgs};

#[tokio::main]
async fn main() {
    layerload_cli::init_tracing();

    let args = RegistryArgs::parse();

    if let Err(e) = run(args).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
