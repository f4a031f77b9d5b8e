//! CLI command implementations.

use crate::core::config::{Config, ConfigOverrides};
use crate::core::runtime::Runtime;
use crate::net::codec::{DecodeResult, FrameCodec, WireRequest, WireResponse};
use anyhow::{Context, Result};
use bytes::BytesMut;
use clap::{Args, Subcommand};
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Arguments for `strata start`.
#[derive(Args, Debug)]
pub struct StartArgs {
    /// Override the read listener bind address.
    #[arg(long)]
    pub read_bind: Option<String>,

    /// Override the data directory.
    #[arg(long)]
    pub data_dir: Option<String>,
}

/// Arguments for `strata config`.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Configuration subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Validate the configuration file.
    Validate,
    /// Print the effective configuration as JSON.
    Show,
}

/// Arguments for `strata status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Read listener address to probe; defaults to the configured one.
    #[arg(long)]
    pub endpoint: Option<String>,
}

/// Load configuration with CLI overrides applied.
pub fn load_config(
    path: &Path,
    log_level: Option<String>,
    start: Option<&StartArgs>,
) -> Result<Config> {
    let mut config = Config::from_file(path)?;
    config.apply_overrides(&ConfigOverrides {
        log_level,
        data_dir: start.and_then(|a| a.data_dir.clone()),
        read_bind: start.and_then(|a| a.read_bind.clone()),
    });
    config.validate()?;
    Ok(config)
}

/// Run the node until shutdown.
pub async fn run_start(config: Config) -> Result<()> {
    let mut runtime = Runtime::new(config)?;
    runtime.run().await
}

/// Validate or show the configuration.
pub fn run_config(config: Config, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Validate => {
            println!("configuration OK");
        }
        ConfigAction::Show => {
            let json = serde_json::to_string_pretty(&config)
                .context("failed to render configuration")?;
            println!("{json}");
        }
    }
    Ok(())
}

/// Probe a running node's read listener with a health check.
pub async fn run_status(config: Config, args: StatusArgs) -> Result<()> {
    let endpoint = args.endpoint.unwrap_or(config.listener.read_bind);
    let codec = FrameCodec::new();

    let mut stream = tokio::net::TcpStream::connect(&endpoint)
        .await
        .with_context(|| format!("cannot connect to {endpoint}"))?;
    let frame = codec.encode_request(&WireRequest::HealthCheck)?;
    stream.write_all(&frame).await?;

    let mut buffer = BytesMut::with_capacity(1024);
    loop {
        match codec.decode_response(&mut buffer) {
            DecodeResult::Complete(WireResponse::Shortcut { status, message }) => {
                println!("{endpoint}: {status} {message}");
                return Ok(());
            }
            DecodeResult::Complete(other) => {
                anyhow::bail!("unexpected health response: {other:?}");
            }
            DecodeResult::Incomplete => {
                if stream.read_buf(&mut buffer).await? == 0 {
                    anyhow::bail!("connection closed before response");
                }
            }
            DecodeResult::Invalid(reason) => anyhow::bail!("malformed response: {reason}"),
        }
    }
}
