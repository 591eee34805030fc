//! Upstream connectors and the data models they produce
//!
//! Each connector wraps one external API in an [`ApiClient`](crate::client::ApiClient)
//! and turns validated responses into the types below.

pub mod regions;
pub mod species;
pub mod vessels;
pub mod weather;

pub use regions::{all_regions, get_region_by_id};
pub use species::{Feature, SpeciesService};
pub use vessels::{ActivitySummary, BoundingBox, EventPage, EventQuery, VesselEvent, VesselService};
pub use weather::{RegionsSummary, WeatherService};

use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use serde::Serialize;

/// A whisky storage region in Scotland
///
/// Uses `&'static str` for string fields so the REGIONS table can be built
/// statically. Only `Serialize` is implemented for the same reason.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Region {
    pub id: &'static str,
    pub name: &'static str,
    /// Role in the industry (production heartland, trade center, ...)
    pub kind: &'static str,
    pub latitude: f64,
    pub longitude: f64,
    /// Coastal warehouses see more marine air exchange
    pub coastal: bool,
    pub storage_type: &'static str,
    /// Typical conditions, served when nothing better is available
    pub historical: HistoricalConditions,
}

/// Long-run average conditions for a region
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HistoricalConditions {
    /// Outdoor temperature in Celsius
    pub ambient_temp: f64,
    /// Relative humidity percentage
    pub humidity: f64,
    /// Wind speed in m/s
    pub wind_speed: f64,
}

/// Meteorological season in Scotland
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Season {
    Winter,
    Spring,
    Summer,
    Autumn,
}

impl Season {
    pub fn from_month(month: u32) -> Self {
        match month {
            12 | 1 | 2 => Season::Winter,
            3..=5 => Season::Spring,
            6..=8 => Season::Summer,
            _ => Season::Autumn,
        }
    }

    pub fn at(time: DateTime<Utc>) -> Self {
        Self::from_month(time.month())
    }
}

/// How good current conditions are for maturing whisky
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QualityRating {
    Excellent,
    Good,
    Suboptimal,
}

/// Whether temperature and humidity sit inside the maturation window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OptimalConditions {
    pub overall: bool,
    pub temperature: bool,
    pub humidity: bool,
    pub quality_rating: QualityRating,
}

/// Weather at a region translated into warehouse conditions
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WarehouseReading {
    pub region_id: &'static str,
    pub region_name: &'static str,
    /// Outdoor temperature in Celsius
    pub ambient_temp: f64,
    /// Modelled temperature inside the warehouse in Celsius
    pub warehouse_temp: f64,
    pub humidity: f64,
    pub wind_speed: f64,
    /// Pressure in hPa
    pub pressure: f64,
    pub description: String,
    pub coastal: bool,
    pub storage_type: &'static str,
    /// 1.0 = optimal; higher means faster maturation
    pub aging_rate_factor: f64,
    pub optimal: OptimalConditions,
    pub observed_at: DateTime<Utc>,
}

/// One three-hourly forecast step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastPoint {
    pub time: NaiveDateTime,
    pub ambient_temp: f64,
    pub warehouse_temp: f64,
    pub humidity: f64,
    pub description: String,
    pub aging_rate: f64,
}

/// Forecast for one region
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionalForecast {
    pub region_id: &'static str,
    pub region_name: &'static str,
    pub points: Vec<ForecastPoint>,
}

/// Rounds to `places` decimal places
pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10_f64.powi(places);
    (value * factor).round() / factor
}
