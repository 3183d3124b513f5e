//! Clotho ladder market-making engine - entry point.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Clotho ladder market maker
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via CLOTHO_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // TLS provider must be installed before the first connection.
    clotho_ws::init_crypto();

    let args = Args::parse();
    clotho_telemetry::init_logging(None)?;

    info!("Starting Clotho v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > CLOTHO_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("CLOTHO_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");
    let config = clotho_bot::AppConfig::from_file(&config_path)?;
    info!(
        symbol = %config.symbol(),
        host = %config.exchange.host,
        depth = config.strategy.ladder_depth,
        "Configuration loaded"
    );

    let engine = clotho_bot::Engine::new(config)?;
    engine.run().await?;

    Ok(())
}
