pub use anyhow::Result;
use anyhow::Context;
use clap::Parser;
use opinionated_metrics::Mode;
use std::{path::PathBuf, sync::Arc};
use tracing::{debug, info_span};

mod alert;
mod config;
mod detection_loop;
mod errors;
mod geocoders;
mod logging;
mod mail;
mod model;
mod reference_tables;
mod region;
mod store;
mod trigger;

use crate::{
    config::Config,
    errors::display_causes_and_backtrace,
    geocoders::{shared_http_client, GeocoderClient},
    reference_tables::ReferenceTables,
    store::TweetStore,
};

/// Watches for bursts of short, geotagged tweets and alerts on the felt region.
#[derive(Debug, Parser)]
#[command(author, version, about = "detect earthquakes from tweet bursts")]
struct Opt {
    /// Path to the TOML configuration file.
    #[arg(long = "config", default_value = "ted.toml")]
    config_path: PathBuf,

    /// Run a single detection tick and exit, instead of looping forever.
    /// Useful for operational dry-runs.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let opt = Opt::parse();

    // Configuration errors are fatal and reported before the logger (or
    // metrics) are set up, matching SPEC_FULL.md §7.
    let config = match Config::from_path(&opt.config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {}", err);
            std::process::exit(1);
        }
    };

    let _guard = logging::init(&config.logging);
    let _span = info_span!("ted").entered();
    debug!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let metrics_handle = opinionated_metrics::Builder::new(Mode::Cli).install()?;

    let result = run(config, opt.once).await;

    if let Err(err) = metrics_handle.report().await {
        tracing::warn!("could not report metrics: {:?}", err);
    }

    if let Err(err) = &result {
        display_causes_and_backtrace(err);
        std::process::exit(1);
    }

    Ok(())
}

async fn run(config: Config, once: bool) -> Result<()> {
    let store = TweetStore::connect(&config.database.connection_url())
        .await
        .context("could not connect to the tweet store")?;
    let reference_tables = Arc::new(
        ReferenceTables::load(store.pool())
            .await
            .context("could not load reference tables")?,
    );

    let http_client = shared_http_client();
    let geocoder = GeocoderClient::new(http_client, config.esri.clone(), reference_tables);

    detection_loop::run(Arc::new(store), Arc::new(geocoder), Arc::new(config), once).await;
    Ok(())
}
