#![forbid(unsafe_code)]

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tollgate_lib::config::load_from_path;
use tollgate_lib::telemetry::init_tracing_with_otel;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Tollgate: shared-counter admission gate for HTTP APIs")]
struct Cli {
    /// Path to configuration TOML file
    #[arg(short, long, value_name = "FILE", env = "TOLLGATE_CONFIG", default_value = "config/tollgate.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let cfg = match load_from_path(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("failed to load configuration from {}: {err}", cli.config.display());
            std::process::exit(1);
        }
    };

    if let Err(err) = init_tracing_with_otel(&cfg.logging, &cfg.telemetry) {
        eprintln!("failed to initialize tracing: {err}");
        std::process::exit(1);
    }

    info!(
        listen = ?cfg.listen,
        store = ?cfg.store.backend,
        tiers = cfg.tiers.len(),
        quotas = cfg.quotas.len(),
        "configuration loaded"
    );

    if let Err(err) = tollgate_lib::run(Arc::new(cfg)).await {
        error!(%err, "gate exited with error");
        std::process::exit(1);
    }
}
