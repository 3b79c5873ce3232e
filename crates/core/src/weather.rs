//! Background weather collection
//!
//! The provider behind [`WeatherSource`] is opaque; this module only drives
//! it on a timer and files whatever it returns.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::knowledge::KnowledgeBase;
use crate::models::{SiteCoordinates, WeatherSample};

/// A provider of weather observations for a location
#[async_trait]
pub trait WeatherSource: Send + Sync {
    /// Observations for `site`. Returned samples must carry `site.location_id`.
    async fn fetch(&self, site: &SiteCoordinates) -> Result<Vec<WeatherSample>>;
}

/// Run one collection pass. Returns the number of samples stored.
pub async fn fetch_once(kb: &KnowledgeBase, source: &dyn WeatherSource) -> usize {
    let Some(sites) = kb.get_coordinates().await else {
        debug!("No locations to fetch weather for");
        return 0;
    };

    let mut stored = 0;
    for site in &sites {
        let samples = match source.fetch(site).await {
            Ok(samples) => samples,
            Err(e) => {
                warn!(location_id = site.location_id, error = %e, "Weather fetch failed");
                continue;
            }
        };

        for sample in &samples {
            if kb.add_weather_sample(sample).await {
                stored += 1;
            } else {
                warn!(
                    location_id = sample.location_id,
                    timestamp = sample.timestamp,
                    "Failed to store weather sample"
                );
            }
        }
    }

    debug!(locations = sites.len(), stored, "Weather pass complete");
    stored
}

/// Collect weather for every location now and then every `interval`, until
/// `shutdown` fires. Failures are logged and never end the loop.
pub fn spawn_weather_fetch(
    kb: KnowledgeBase,
    source: Arc<dyn WeatherSource>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = interval.as_secs(), "Weather fetch started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    fetch_once(&kb, source.as_ref()).await;
                }
                _ = shutdown.recv() => {
                    debug!("Weather fetch shutting down");
                    break;
                }
            }
        }
    })
}
