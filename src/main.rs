use anyhow::{Context, Result};
use bucketbot::api::{BinanceClient, PositionApiClient};
use bucketbot::buckets::{BucketCapacity, SignalClassifier};
use bucketbot::config::{load_config, AppConfig};
use bucketbot::execution::{BotRunner, RunnerSettings};
use bucketbot::models::Bucket;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Bucket-fill signal bot")]
struct Cli {
    /// Directory holding default.toml, {env}.toml and local.toml
    #[arg(long, global = true, default_value = "config")]
    config_dir: PathBuf,
    /// Selects which configuration environment to load (maps to {config_dir}/{env}.toml)
    #[arg(long, global = true)]
    env: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run cycles forever on the timeframe schedule
    Run,
    /// Run a single cycle over every asset and exit
    Once,
    /// Print the sealed buckets for one asset without touching positions
    Buckets {
        #[arg(long)]
        asset: String,
        /// Override the configured bucket capacity (percent)
        #[arg(long)]
        capacity: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = load_config(&cli.config_dir, cli.env.as_deref())?;
    setup_logging(&config.log_filter);

    let mut runner = build_runner(&config)?;

    match cli.command {
        Commands::Run => {
            tracing::info!("🚀 BucketBot starting");
            tracing::info!(
                "  Assets: {} | timeframe {} | capacity {}% | size {}",
                runner.settings().assets.join(", "),
                runner.settings().timeframe,
                runner.settings().capacity.pct(),
                runner.settings().position_size
            );
            tracing::info!("  Gateway: {} (table {})", config.gateway.base_url, config.gateway.table_name);
            tracing::info!("\nPress Ctrl+C to stop...\n");

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");
                }
                _ = runner.run_forever() => {
                    tracing::error!("Cycle loop exited unexpectedly");
                }
            }

            tracing::info!("👋 BucketBot stopped");
        }
        Commands::Once => {
            let report = runner.run_cycle().await;
            tracing::info!(
                "✅ Cycle complete ({} ok, {} failed)",
                report.succeeded(),
                report.failed()
            );
        }
        Commands::Buckets { asset, capacity } => {
            let capacity = match capacity {
                Some(pct) => BucketCapacity::new(pct)
                    .with_context(|| format!("capacity must be a positive percentage, got {}", pct))?,
                None => runner.settings().capacity,
            };
            let asset = asset.to_uppercase();
            let buckets = runner.load_buckets(&asset, capacity).await?;
            print_bucket_table(&asset, &buckets, SignalClassifier::new(capacity));
        }
    }

    Ok(())
}

// ============================================================================
// Initialization Functions
// ============================================================================

fn setup_logging(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_runner(config: &AppConfig) -> Result<BotRunner<BinanceClient, PositionApiClient>> {
    let settings = RunnerSettings::from_config(config)?;

    let source = BinanceClient::new(
        config.exchange.rest_url.clone(),
        config.exchange.timeout(),
        config.exchange.requests_per_minute,
    )
    .context("failed to build exchange client")?;

    let gateway = PositionApiClient::new(
        config.gateway.base_url.clone(),
        config.gateway.table_name.clone(),
        config.gateway.timeout(),
    )
    .context("failed to build position service client")?;

    Ok(BotRunner::new(source, gateway, settings))
}

// ============================================================================
// Output
// ============================================================================

fn print_bucket_table(asset: &str, buckets: &[Bucket], classifier: SignalClassifier) {
    println!("\n{} sealed buckets", asset);
    println!("{}", "=".repeat(96));
    println!(
        "{:>5}  {:<6} {:>8}  {:>12} {:>12}  {:<20} {:<20}",
        "ID", "COLOUR", "FILL", "OPEN", "CLOSE", "START", "END"
    );
    println!("{}", "-".repeat(96));

    for bucket in buckets {
        let colour = bucket.direction().map(|d| d.colour()).unwrap_or("-");
        println!(
            "{:>5}  {:<6} {:>+7.2}%  {:>12.6} {:>12.6}  {:<20} {:<20}",
            bucket.id,
            colour,
            bucket.fill,
            bucket.open_price,
            bucket.close_price,
            bucket.start_time.format("%Y-%m-%d %H:%M"),
            bucket.end_time.format("%Y-%m-%d %H:%M")
        );
    }

    let summary = classifier.summarize(buckets);
    println!("{}", "=".repeat(96));
    println!(
        "Total {} | GREEN {} | RED {} | net fill {:+.2}%",
        summary.total, summary.bullish, summary.bearish, summary.net_fill
    );
    if let Some(ratio) = summary.ratio() {
        println!("GREEN/RED ratio {:.2}", ratio);
    }
    match classifier.latest(buckets) {
        Ok(Some(signal)) => println!(
            "Latest: bucket {} {} closing at {:.6}",
            signal.bucket_id,
            signal.direction.colour(),
            signal.close_price
        ),
        Ok(None) => println!("Latest: none sealed yet"),
        Err(e) => println!("Latest: {}", e),
    }
}
