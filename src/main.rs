use clap::Parser;
use log_tracker::{Application, Config, logging};
use std::path::PathBuf;
use std::process;

/// Tail log files and push new records to the browser.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// YAML configuration file
    #[arg(default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration {}: {}", args.config.display(), e);
            process::exit(1);
        }
    };

    if let Err(e) = logging::init(&config.logs) {
        eprintln!("Error setting up logging: {}", e);
        process::exit(1);
    }

    tracing::info!(config = %args.config.display(), "starting log tracker");
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "cannot listen for ctrl-c");
        }
    };

    if let Err(e) = Application::new(config).run(shutdown).await {
        tracing::error!(error = %e, "log tracker failed");
        process::exit(1);
    }
}
