//! Background data refresh system
//!
//! Periodically refreshes weather for every region and sweeps long-expired
//! cache entries, reporting progress over a tokio channel.

use chrono::Duration as TtlDuration;
use futures::future::join_all;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::client::DataStatus;
use crate::data::{all_regions, WarehouseReading, WeatherService};

/// Messages sent from the background task
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RefreshMessage {
    /// Weather data updated for a region
    WeatherUpdated {
        region_id: &'static str,
        reading: WarehouseReading,
        status: DataStatus,
    },
    /// A region could not be refreshed at all
    RefreshError { region_id: &'static str, message: String },
    /// Expired entries older than the retention window were dropped
    CacheSwept { removed: usize },
    /// Refresh started
    RefreshStarted,
    /// Refresh completed; `degraded` regions were served stale or fallback data
    RefreshCompleted { degraded: usize },
}

/// Configuration for refresh intervals
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Interval for weather data refresh
    pub weather_interval: Duration,
    /// Interval between cache sweeps
    pub sweep_interval: Duration,
    /// How long past expiry an entry is kept as a stale fallback
    pub stale_retention: TtlDuration,
    /// Whether auto-refresh is enabled
    pub enabled: bool,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            weather_interval: Duration::from_secs(1800), // matches the weather TTL
            sweep_interval: Duration::from_secs(3600),
            stale_retention: TtlDuration::days(7),
            enabled: true,
        }
    }
}

/// Handle for controlling the background refresh task
///
/// Dropping the handle stops the task.
pub struct RefreshHandle {
    /// Channel for receiving refresh messages
    pub receiver: mpsc::Receiver<RefreshMessage>,
    shutdown_tx: mpsc::Sender<()>,
    trigger_tx: mpsc::Sender<()>,
}

impl RefreshHandle {
    /// Spawns the refresh task; the first refresh waits one full interval
    pub fn spawn(config: RefreshConfig, weather: WeatherService) -> Self {
        let (msg_tx, msg_rx) = mpsc::channel(32);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (trigger_tx, mut trigger_rx) = mpsc::channel::<()>(1);

        if config.enabled {
            tokio::spawn(async move {
                let mut refresh = tokio::time::interval(config.weather_interval);
                let mut sweep = tokio::time::interval(config.sweep_interval);
                // Skip the first tick (immediate)
                refresh.tick().await;
                sweep.tick().await;

                loop {
                    tokio::select! {
                        _ = refresh.tick() => refresh_regions(&weather, &msg_tx).await,
                        Some(()) = trigger_rx.recv() => refresh_regions(&weather, &msg_tx).await,
                        _ = sweep.tick() => sweep_caches(&weather, config.stale_retention, &msg_tx).await,
                        _ = shutdown_rx.recv() => break,
                    }
                }
                debug!("refresh task stopped");
            });
        }

        Self {
            receiver: msg_rx,
            shutdown_tx,
            trigger_tx,
        }
    }

    /// Requests an immediate refresh; ignored if one is already queued
    pub fn request_refresh(&self) {
        let _ = self.trigger_tx.try_send(());
    }

    /// Shuts down the background task
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn refresh_regions(weather: &WeatherService, tx: &mpsc::Sender<RefreshMessage>) {
    let _ = tx.send(RefreshMessage::RefreshStarted).await;

    let regions = all_regions();
    let results = join_all(regions.iter().map(|region| weather.current_weather(region))).await;

    let mut degraded = 0;
    for (region, result) in regions.iter().zip(results) {
        let message = match result {
            Ok(resolved) => {
                if resolved.is_degraded() {
                    degraded += 1;
                }
                RefreshMessage::WeatherUpdated {
                    region_id: region.id,
                    reading: resolved.payload,
                    status: resolved.status,
                }
            }
            Err(e) => {
                warn!(region = region.id, error = %e, "weather refresh failed");
                RefreshMessage::RefreshError {
                    region_id: region.id,
                    message: e.to_string(),
                }
            }
        };
        let _ = tx.send(message).await;
    }

    info!(regions = regions.len(), degraded, "weather refresh complete");
    let _ = tx.send(RefreshMessage::RefreshCompleted { degraded }).await;
}

async fn sweep_caches(weather: &WeatherService, retention: TtlDuration, tx: &mpsc::Sender<RefreshMessage>) {
    let removed: usize = weather
        .clients()
        .iter()
        .map(|client| client.cache().purge_older_than(retention))
        .sum();
    if removed > 0 {
        info!(removed, "swept expired cache entries");
    }
    let _ = tx.send(RefreshMessage::CacheSwept { removed }).await;
}
