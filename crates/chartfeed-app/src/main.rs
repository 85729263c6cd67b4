//! chartfeed - real-time chart data feed.
//!
//! `serve` runs the stream gateway; `watch` prints one asset's bars.

use anyhow::Result;
use chartfeed_app::{AppConfig, Application, WatchOptions};
use chartfeed_core::{Metric, Resolution};
use clap::{Parser, Subcommand};
use tracing::info;

/// Real-time chart data feed
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via CHARTFEED_CONFIG env var)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the server-sent-event stream gateway
    Serve,
    /// Load history and print live bars for one asset as JSON lines
    Watch {
        /// Token address
        #[arg(long)]
        asset: String,
        /// Chain identifier
        #[arg(long)]
        chain: String,
        /// Display symbol (defaults to the asset address)
        #[arg(long)]
        symbol: Option<String>,
        /// Widget resolution, e.g. 1, 5, 60, 1D
        #[arg(long, default_value = "1")]
        resolution: Resolution,
        /// price or marketcap
        #[arg(long, default_value = "price")]
        metric: Metric,
        /// Quote in the pair's native token instead of USD
        #[arg(long)]
        quote: bool,
        /// Circulating supply for market-cap mode
        #[arg(long)]
        supply: Option<f64>,
        /// Show this address's trades as marks
        #[arg(long)]
        maker: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Must run before any TLS connection is opened
    chartfeed_stream::init_crypto();

    let args = Args::parse();

    chartfeed_telemetry::init_logging()?;

    info!("Starting chartfeed v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load(args.config)?;
    info!(
        transport = ?config.feed.transport,
        rest = %config.feed.rest_base_url,
        upstream = config.api_key().is_some(),
        "Configuration loaded"
    );

    let app = Application::new(config);
    match args.command {
        Command::Serve => app.serve().await?,
        Command::Watch {
            asset,
            chain,
            symbol,
            resolution,
            metric,
            quote,
            supply,
            maker,
        } => {
            app.watch(WatchOptions {
                asset,
                chain,
                symbol,
                resolution,
                metric,
                quote,
                supply,
                marks_filter: maker,
            })
            .await?
        }
    }

    Ok(())
}
