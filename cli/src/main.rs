//! layerload entry point.

use layerload_cli::loader::{run, split_argv};

#[tokio::main]
async fn main() {
    layerload_cli::init_tracing();

    let (argv0, args) = match split_argv(std::env::args_os().collect()) {
        Ok(split) => split,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let code = run(&argv0, &args).await;
    std::process::exit(code);
}
