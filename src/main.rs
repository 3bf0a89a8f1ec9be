//! voxlink - headless client for networked voxel worlds
//!
//! Connects to a server, streams the chunks around the origin and reports
//! what it saw.

mod cli;
mod config;
mod headless;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Args;
use config::ClientSettings;
use headless::HeadlessConfig;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => ClientSettings::load_from_path(path),
        None => ClientSettings::load(),
    };
    settings.apply_cli_overrides(&args);

    // RUST_LOG wins over the configured level.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.as_str()));
    if args.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("Starting voxlink v{}", env!("CARGO_PKG_VERSION"));

    let summary = headless::run(HeadlessConfig {
        settings,
        duration: Duration::from_secs(args.duration_secs),
    })
    .await?;

    let report = serde_json::to_string_pretty(&summary).context("failed to encode summary")?;
    println!("{report}");
    Ok(())
}
