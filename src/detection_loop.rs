//! The long-running detection loop.
//!
//! Ticks the STA/LTA trigger (component B) on a wall-clock schedule aligned
//! to `bin_length`; when it fires, hands off to the alert assembler
//! (component E). A shutdown signal completes the in-flight tick, then
//! exits (SPEC_FULL.md §5).

use std::sync::Arc;

use chrono::Utc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, info_span, warn, Instrument};

use crate::{alert, config::Config, geocoders::GeocoderClient, store::TweetStore, trigger::StaLtaTrigger};

/// Run the detection loop until a Ctrl-C / SIGTERM is received.
///
/// If `once` is true, run a single tick and return (used for operational
/// dry-runs).
pub async fn run(
    store: Arc<TweetStore>,
    geocoder: Arc<GeocoderClient>,
    config: Arc<Config>,
    once: bool,
) {
    let mut trigger = StaLtaTrigger::new(&config.setup, Utc::now());
    let bin_length = std::time::Duration::from_secs(config.setup.bin_length.max(1) as u64);

    // Ticks that overrun a bin are dropped rather than queued: detection is
    // real-time, and a stale tick isn't useful.
    let mut ticker = interval(bin_length);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Utc::now();
                match trigger.tick(&store, now).await {
                    Ok(Some(fired)) => {
                        info!(ratio = fired.ratio, time = %fired.time, "trigger fired");
                        let store = Arc::clone(&store);
                        let geocoder = Arc::clone(&geocoder);
                        let config = Arc::clone(&config);
                        let span = info_span!("alert", time = %fired.time);
                        tokio::spawn(async move {
                            if let Err(err) =
                                alert::assemble_and_dispatch(&store, &geocoder, &config, fired.time)
                                    .await
                            {
                                warn!("alert assembly failed: {}", err);
                            }
                        }.instrument(span));
                    }
                    Ok(None) => {}
                    Err(err) => {
                        warn!("trigger tick failed: {}", err);
                    }
                }
                if once {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received, finishing in-flight tick");
                break;
            }
        }
    }
}
