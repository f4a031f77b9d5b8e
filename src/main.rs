//! Strata - unified CLI entrypoint.
//!
//! Usage:
//!   strata start --config config/strata.toml
//!   strata config validate --config config/strata.toml
//!   strata config show
//!   strata status [--endpoint ADDR]

use anyhow::Result;
use clap::Parser;
use strata::cli::commands::{load_config, run_config, run_start, run_status};
use strata::cli::{Cli, Commands};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config/strata.toml"));

    match cli.command {
        Commands::Start(args) => {
            let config = load_config(&config_path, cli.log_level, Some(&args))?;
            init_tracing(&config.telemetry.log_level);
            run_start(config).await
        }
        Commands::Config(args) => {
            let config = load_config(&config_path, cli.log_level, None)?;
            run_config(config, args.action)
        }
        Commands::Status(args) => {
            let config = load_config(&config_path, cli.log_level, None)?;
            run_status(config, args).await
        }
    }
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("strata={log_level}")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
