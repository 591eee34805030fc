//! Command-line interface parsing for tidestomes
//!
//! Each subcommand resolves one kind of data and prints it as JSON. The
//! `status` field of the output says whether the data is live, cached, stale
//! or a fallback.

use clap::{Parser, Subcommand};
use std::str::FromStr;
use thiserror::Error;

use crate::data::{get_region_by_id, BoundingBox, Region};

/// Error types for CLI argument parsing
#[derive(Debug, Error)]
pub enum CliError {
    /// The specified region id is not recognized
    #[error("Invalid region: '{0}'. Valid regions: edinburgh, glasgow, islay, aberlour, dufftown")]
    InvalidRegion(String),

    /// A `LAT,LON` argument could not be parsed
    #[error("Invalid point: '{0}'. Expected LAT,LON in decimal degrees")]
    InvalidPoint(String),
}

/// Scottish weather, marine feature and fishing-vessel data with caching and fallbacks
#[derive(Parser, Debug)]
#[command(name = "tidestomes")]
#[command(about = "Cached, retrying access to Scottish weather, marine and vessel data")]
#[command(version)]
pub struct Cli {
    /// Log filter, e.g. `debug` or `tidestomes=debug` (overrides TIDES_LOG)
    #[arg(long, global = true, value_name = "FILTER")]
    pub log: Option<String>,

    /// Keep cached responses in memory only
    #[arg(long, global = true)]
    pub no_disk_cache: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Current warehouse conditions for one region
    Weather {
        #[arg(long, default_value = "edinburgh", value_parser = parse_region_arg)]
        region: &'static Region,
    },

    /// Three-hourly warehouse forecast for one region
    Forecast {
        #[arg(long, default_value = "edinburgh", value_parser = parse_region_arg)]
        region: &'static Region,

        /// Days ahead, 1 to 5
        #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u32).range(1..=5))]
        days: u32,
    },

    /// Current conditions for every region with Scotland-wide averages
    Summary,

    /// Priority marine feature records
    Species {
        /// Only sea turtle records
        #[arg(long, conflicts_with_all = ["habitats", "near"])]
        turtles: bool,

        /// Habitat records instead of species
        #[arg(long, conflicts_with = "near")]
        habitats: bool,

        /// Species recorded near a point
        #[arg(long, value_name = "LAT,LON")]
        near: Option<Point>,

        /// Search radius for --near
        #[arg(long, default_value_t = 50.0)]
        radius_km: f64,
    },

    /// Fishing-vessel activity summary
    Events {
        /// Days back from today
        #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u32).range(1..=366))]
        days: u32,

        /// Area to summarise; defaults to the Aberdeenshire coast
        #[arg(long, value_name = "LAT_MIN,LAT_MAX,LON_MIN,LON_MAX")]
        bbox: Option<BoundingBox>,
    },

    /// Show which API credentials are configured
    Keys,

    /// Refresh all regions periodically and print each update
    Watch {
        /// Seconds between refreshes
        #[arg(long, default_value_t = 1800, value_parser = clap::value_parser!(u64).range(1..))]
        interval: u64,
    },
}

/// A latitude/longitude pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub lat: f64,
    pub lon: f64,
}

impl FromStr for Point {
    type Err = CliError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CliError::InvalidPoint(s.to_string());
        let (lat, lon) = s.split_once(',').ok_or_else(invalid)?;
        let lat: f64 = lat.trim().parse().map_err(|_| invalid())?;
        let lon: f64 = lon.trim().parse().map_err(|_| invalid())?;

        if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon) {
            Ok(Point { lat, lon })
        } else {
            Err(invalid())
        }
    }
}

/// Parses a region id argument into one of the static regions.
pub fn parse_region_arg(s: &str) -> Result<&'static Region, CliError> {
    get_region_by_id(&s.to_lowercase()).ok_or_else(|| CliError::InvalidRegion(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_region_arg_known_ids() {
        assert_eq!(parse_region_arg("islay").unwrap().id, "islay");
        assert_eq!(parse_region_arg("Dufftown").unwrap().id, "dufftown");
    }

    #[test]
    fn test_parse_region_arg_invalid() {
        let err = parse_region_arg("narnia").unwrap_err();
        assert!(err.to_string().contains("Invalid region"));
        assert!(err.to_string().contains("narnia"));
    }

    #[test]
    fn test_point_from_str() {
        assert_eq!("56.0,-3.2".parse::<Point>().unwrap(), Point { lat: 56.0, lon: -3.2 });
        assert_eq!(" 57.1 , -2.0 ".parse::<Point>().unwrap(), Point { lat: 57.1, lon: -2.0 });
        assert!("56.0".parse::<Point>().is_err());
        assert!("north,west".parse::<Point>().is_err());
        assert!("91.0,0.0".parse::<Point>().is_err());
    }

    #[test]
    fn test_cli_weather_defaults_to_edinburgh() {
        let cli = Cli::parse_from(["tidestomes", "weather"]);
        match cli.command {
            Command::Weather { region } => assert_eq!(region.id, "edinburgh"),
            other => panic!("unexpected command: {:?}", other),
        }
        assert!(!cli.no_disk_cache);
    }

    #[test]
    fn test_cli_forecast_days_range() {
        let cli = Cli::parse_from(["tidestomes", "forecast", "--region", "glasgow", "--days", "3"]);
        assert!(matches!(cli.command, Command::Forecast { days: 3, .. }));

        assert!(Cli::try_parse_from(["tidestomes", "forecast", "--days", "6"]).is_err());
        assert!(Cli::try_parse_from(["tidestomes", "forecast", "--days", "0"]).is_err());
    }

    #[test]
    fn test_cli_invalid_region_rejected() {
        assert!(Cli::try_parse_from(["tidestomes", "weather", "--region", "narnia"]).is_err());
    }

    #[test]
    fn test_cli_species_near() {
        let cli = Cli::parse_from(["tidestomes", "species", "--near", "56.0,-3.0", "--radius-km", "25"]);
        assert_eq!(
            cli.command,
            Command::Species {
                turtles: false,
                habitats: false,
                near: Some(Point { lat: 56.0, lon: -3.0 }),
                radius_km: 25.0,
            }
        );
    }

    #[test]
    fn test_cli_species_flags_conflict() {
        assert!(Cli::try_parse_from(["tidestomes", "species", "--turtles", "--habitats"]).is_err());
        assert!(Cli::try_parse_from(["tidestomes", "species", "--habitats", "--near", "56,-3"]).is_err());
        assert!(Cli::try_parse_from(["tidestomes", "species"]).is_ok());
    }

    #[test]
    fn test_cli_events_bbox() {
        let cli = Cli::parse_from(["tidestomes", "events", "--days", "7", "--bbox", "54,58,-4,2"]);
        assert_eq!(
            cli.command,
            Command::Events {
                days: 7,
                bbox: Some(BoundingBox::NORTH_SEA),
            }
        );
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["tidestomes", "keys", "--no-disk-cache", "--log", "debug"]);
        assert!(cli.no_disk_cache);
        assert_eq!(cli.log.as_deref(), Some("debug"));
        assert_eq!(cli.command, Command::Keys);
    }
}
