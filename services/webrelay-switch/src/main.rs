//! Web Relay Switch CLI
//!
//! Command-line interface for the relay, PWM and DAC switch server.

use std::path::PathBuf;

use clap::Parser;
use tracing::Level;

use webrelay_switch::{load_config, Config, ServerBuilder};

#[derive(Parser)]
#[command(name = "webrelay-switch")]
#[command(about = "Alpaca switch server for relay, PWM and DAC channels")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server port (overrides config file)
    #[arg(long)]
    server_port: Option<u16>,

    /// Store image file (overrides config file)
    #[arg(long)]
    storage: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info", value_parser = parse_log_level)]
    log_level: Level,
}

fn parse_log_level(s: &str) -> Result<Level, String> {
    s.parse().map_err(|_| {
        format!(
            "Invalid log level: {}. Use: trace, debug, info, warn, error",
            s
        )
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .init();

    tracing::debug!(
        "Parsed command line arguments: config={:?}, server_port={:?}, storage={:?}, log_level={:?}",
        args.config,
        args.server_port,
        args.storage,
        args.log_level
    );

    let mut config = if let Some(config_path) = &args.config {
        tracing::debug!("Loading configuration from {:?}", config_path);
        load_config(config_path)?
    } else {
        tracing::debug!("Using default configuration");
        Config::default()
    };

    if let Some(server_port) = args.server_port {
        config.server.port = server_port;
    }
    if let Some(storage) = args.storage {
        config.storage.path = Some(storage);
    }

    tracing::info!("Starting webrelay switch");
    tracing::info!("Server port: {}", config.server.port);

    ServerBuilder::new(config).build().await?.start().await?;

    Ok(())
}
