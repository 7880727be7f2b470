//! promo-harvester command line entry point
//!
//! Usage: `promo-harvester [CONFIG_FILE]`. A file given as argument must
//! exist. Without an argument `config/harvester.toml` is used when present.
//! `HARVEST_*` environment variables override either.

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use promo_harvester::application::{HarvestService, spawn_interrupt_handler};
use promo_harvester::infrastructure::{AppConfig, init_logging};

const DEFAULT_CONFIG_PATH: &str = "config/harvester.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => AppConfig::load(Some(path.as_str())),
        None => AppConfig::load_or_defaults(DEFAULT_CONFIG_PATH),
    }
    .context("Failed to load configuration")?;
    init_logging(&config.logging)?;
    info!(
        "Starting harvest: links={}, proxies={}, checkpoint={}",
        config.input.product_links_path.display(),
        config.input.proxies_path.display(),
        config.output.checkpoint_path.display()
    );

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let report = HarvestService::new(config).run(&cancel).await?;
    info!(
        "{} of {} items merged this run ({} filtered, {} skipped)",
        report.merged, report.total_items, report.filtered, report.skipped
    );
    Ok(())
}
