//! tidestomes - Scottish whisky-region weather, marine features and vessel activity
//!
//! Resolves one kind of data per invocation and prints it as JSON on stdout.
//! Degraded results (stale cache or fallback data) still exit successfully;
//! only hard failures such as missing credentials exit non-zero.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde::Serialize;
use tracing::info;

use tidestomes::cache::{CacheManager, Clock, SystemClock};
use tidestomes::cli::{Cli, Command};
use tidestomes::config::Settings;
use tidestomes::data::{BoundingBox, SpeciesService, VesselService, WeatherService};
use tidestomes::logging;
use tidestomes::refresh::{RefreshConfig, RefreshHandle};
use tidestomes::{DataStatus, Resolved};

/// Connectors sharing one clock and disk cache
struct Services {
    weather: WeatherService,
    species: SpeciesService,
    vessels: VesselService,
}

impl Services {
    fn build(settings: &Settings, disk_cache: bool) -> Self {
        let persistence = if disk_cache {
            settings
                .cache_dir
                .clone()
                .map(CacheManager::with_dir)
                .or_else(CacheManager::new)
        } else {
            None
        };
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        Self {
            weather: WeatherService::from_settings(settings, persistence.clone(), clock.clone()),
            species: SpeciesService::from_settings(settings, persistence.clone(), clock.clone()),
            vessels: VesselService::from_settings(settings, persistence, clock),
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let settings = Settings::from_env()?;
    logging::init(cli.log.as_deref().unwrap_or(&settings.log_filter));

    let services = Services::build(&settings, !cli.no_disk_cache);

    match cli.command {
        Command::Weather { region } => {
            print_json(&services.weather.current_weather(region).await?)?;
        }
        Command::Forecast { region, days } => {
            print_json(&services.weather.forecast(region, days).await?)?;
        }
        Command::Summary => {
            let summary = services.weather.all_regions_summary().await?;
            let status = summary
                .regions
                .iter()
                .map(|r| r.status)
                .fold(DataStatus::Live, DataStatus::worst);
            print_json(&Resolved {
                payload: summary,
                status,
                stored_at: None,
            })?;
        }
        Command::Species {
            turtles,
            habitats,
            near,
            radius_km,
        } => {
            let resolved = if turtles {
                services.species.sea_turtles().await?
            } else if habitats {
                services.species.marine_habitats().await?
            } else if let Some(point) = near {
                services.species.species_near(point.lat, point.lon, radius_km).await?
            } else {
                services.species.all_species().await?
            };
            print_json(&resolved)?;
        }
        Command::Events { days, bbox } => {
            let bbox = bbox.unwrap_or(BoundingBox::SCOTTISH_COAST);
            print_json(&services.vessels.activity_summary(bbox, days).await?)?;
        }
        Command::Keys => {
            print_json(&settings.key_status())?;
        }
        Command::Watch { interval } => {
            let config = RefreshConfig {
                weather_interval: Duration::from_secs(interval),
                stale_retention: settings.stale_retention,
                ..RefreshConfig::default()
            };
            let mut handle = RefreshHandle::spawn(config, services.weather);
            handle.request_refresh();
            info!(interval, "watching regional weather, ctrl-c to stop");

            loop {
                tokio::select! {
                    message = handle.receiver.recv() => match message {
                        Some(message) => println!("{}", serde_json::to_string(&message)?),
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            handle.shutdown().await;
        }
    }

    Ok(())
}
