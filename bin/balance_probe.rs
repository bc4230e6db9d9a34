//! # Balance Probe
//!
//! Runs a single aggregation cycle for one holder and prints the resulting
//! view as JSON.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin balance_probe -- --address terra1... --network mainnet
//! ```
//!
//! Chains come from `Config.toml` / `SDK_CHAINS`, or from a published
//! `chains.json` with `--chains-url`; `--network` matches a chain name or
//! chain id and defaults to `classic`.

use anyhow::{Context, Result};
use clap::Parser;
use std::time::Instant;
use terra_balance_sdk::{
    aggregator::BalanceAggregator,
    chains::{fetch_chains, select_chain},
    metrics,
    registry::{AssetsRegistry, TokenRegistry},
    settings::Settings,
};

#[derive(Parser, Debug)]
#[command(name = "balance_probe", about = "Fetch CW20 balances for one Terra address")]
struct Args {
    /// Holder address (terra1...)
    #[arg(long)]
    address: String,

    /// Chain name or chain id
    #[arg(long)]
    network: Option<String>,

    /// Settings file (TOML)
    #[arg(long, default_value = "Config.toml")]
    config: String,

    /// Load chains from a published chains.json instead of the settings
    #[arg(long)]
    chains_url: Option<String>,

    /// Run a second cycle right after the first (exercises the balance cache)
    #[arg(long, default_value_t = false)]
    twice: bool,
}

#[cfg(feature = "observability")]
fn init_telemetry(level: &str) -> Result<()> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into()))
        .init();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .install()
        .context("Failed to install Prometheus exporter")?;
    Ok(())
}

#[cfg(not(feature = "observability"))]
fn init_telemetry(level: &str) -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let args = Args::parse();
    let settings = Settings::from_file(&args.config, false).context("Failed to load settings")?;
    init_telemetry(&settings.log.level)?;
    metrics::describe_metrics();

    let chains = match &args.chains_url {
        Some(url) => {
            let client = reqwest::Client::builder()
                .timeout(settings.fetch.request_timeout())
                .build()?;
            fetch_chains(&client, url, settings.registry.mainnet_lcd_override.as_deref()).await?
        }
        None => settings.chains.clone(),
    };
    let chain = select_chain(&chains, args.network.as_deref())?;
    log::info!("🚀 Balance probe: {} on {} ({})", args.address, chain.name, chain.chain_id);

    let registry_provider = AssetsRegistry::new(
        settings.registry.assets_base_url.clone(),
        settings.fetch.request_timeout(),
    )?;
    let registry = registry_provider.registry(chain).await?;

    let aggregator = BalanceAggregator::from_settings(&settings, chain).await?;
    let runs = if args.twice { 2 } else { 1 };
    let mut view = aggregator.view(&args.address, &registry);
    for run in 1..=runs {
        let started = Instant::now();
        view = aggregator.aggregate(&args.address, &registry).await;
        log::info!(
            "✅ Cycle {}: {} entr(ies) in {:?}",
            run,
            view.list.as_ref().map_or(0, Vec::len),
            started.elapsed()
        );
    }

    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}
