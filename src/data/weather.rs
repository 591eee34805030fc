//! OpenWeather client and the warehouse thermal model
//!
//! Fetches current conditions and three-hourly forecasts for each region and
//! translates outdoor weather into the conditions inside a maturation
//! warehouse.

use chrono::{DateTime, Duration as TtlDuration, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use super::{
    all_regions, round_to, ForecastPoint, HistoricalConditions, OptimalConditions, QualityRating,
    Region, RegionalForecast, Season, WarehouseReading,
};
use crate::cache::{CacheManager, Clock};
use crate::client::{ApiClient, ClientConfig, DataStatus, Resolved};
use crate::config::Settings;
use crate::http::FetchError;

/// Forecasts change slowly
const FORECAST_TTL_HOURS: i64 = 3;

/// OpenWeather returns at most five days of three-hourly steps
const MAX_FORECAST_DAYS: u32 = 5;

/// Pressure reported by the fallback payload, in hPa
const STANDARD_PRESSURE: f64 = 1013.0;

const FALLBACK_DESCRIPTION: &str = "overcast clouds";

/// `/weather` response body
///
/// Only the fields the thermal model needs are declared. `main.temp` and
/// `main.humidity` are required; a body without them is rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentWeatherResponse {
    pub main: MainReadings,
    #[serde(default)]
    pub wind: Wind,
    #[serde(default)]
    pub weather: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MainReadings {
    pub temp: f64,
    pub humidity: f64,
    #[serde(default = "standard_pressure")]
    pub pressure: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Wind {
    #[serde(default)]
    pub speed: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub description: String,
}

/// `/forecast` response body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResponse {
    pub list: Vec<ForecastItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastItem {
    /// Unix timestamp in seconds
    pub dt: i64,
    pub main: MainReadings,
    #[serde(default)]
    pub wind: Wind,
    #[serde(default)]
    pub weather: Vec<Condition>,
}

fn standard_pressure() -> f64 {
    STANDARD_PRESSURE
}

impl CurrentWeatherResponse {
    /// A response-shaped payload built from a region's historical averages
    pub fn from_historical(historical: &HistoricalConditions) -> Self {
        Self {
            main: MainReadings {
                temp: historical.ambient_temp,
                humidity: historical.humidity,
                pressure: STANDARD_PRESSURE,
            },
            wind: Wind {
                speed: historical.wind_speed,
            },
            weather: vec![Condition {
                description: FALLBACK_DESCRIPTION.to_string(),
            }],
        }
    }

    fn description(&self) -> String {
        describe(&self.weather)
    }
}

fn describe(conditions: &[Condition]) -> String {
    conditions
        .first()
        .map(|c| c.description.clone())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Temperature inside a traditional stone warehouse
///
/// Thick walls damp the outdoor swing towards a seasonal base temperature.
/// Coastal sites lose a little more heat to wind-driven marine air, and
/// humid air slows evaporative cooling.
pub fn warehouse_temperature(
    ambient: f64,
    humidity: f64,
    wind_speed: f64,
    coastal: bool,
    season: Season,
) -> f64 {
    let seasonal_offset = match season {
        Season::Winter => 4.0,
        Season::Spring => 2.5,
        Season::Summer => 1.0,
        Season::Autumn => 3.0,
    };
    let damping = if coastal { 0.70 } else { 0.75 };
    let base = 12.5 + seasonal_offset;

    let mut warehouse = ambient * damping + base * (1.0 - damping);
    if coastal {
        warehouse -= wind_speed * 0.15;
    }

    warehouse * (1.0 + (humidity - 70.0) * 0.002)
}

/// Relative maturation speed; 1.0 at 13.5 °C and 70 % humidity
pub fn aging_rate(warehouse_temp: f64, humidity: f64) -> f64 {
    let temp_factor = 1.0 + (warehouse_temp - 13.5).abs() * 0.05;
    let humidity_factor = 1.0 + (humidity - 70.0).abs() * 0.002;
    temp_factor * humidity_factor
}

impl OptimalConditions {
    /// Checks against the 10-18 °C and 60-80 % maturation window
    pub fn assess(temp: f64, humidity: f64) -> Self {
        let temperature = (10.0..=18.0).contains(&temp);
        let humidity = (60.0..=80.0).contains(&humidity);
        let quality_rating = match (temperature, humidity) {
            (true, true) => QualityRating::Excellent,
            (true, false) | (false, true) => QualityRating::Good,
            (false, false) => QualityRating::Suboptimal,
        };

        Self {
            overall: temperature && humidity,
            temperature,
            humidity,
            quality_rating,
        }
    }
}

/// Applies the thermal model to one current-weather response
pub fn process_current(
    region: &'static Region,
    response: &CurrentWeatherResponse,
    observed_at: DateTime<Utc>,
) -> WarehouseReading {
    let main = &response.main;
    let warehouse = warehouse_temperature(
        main.temp,
        main.humidity,
        response.wind.speed,
        region.coastal,
        Season::at(observed_at),
    );

    WarehouseReading {
        region_id: region.id,
        region_name: region.name,
        ambient_temp: round_to(main.temp, 1),
        warehouse_temp: round_to(warehouse, 1),
        humidity: main.humidity,
        wind_speed: response.wind.speed,
        pressure: main.pressure,
        description: response.description(),
        coastal: region.coastal,
        storage_type: region.storage_type,
        aging_rate_factor: round_to(aging_rate(warehouse, main.humidity), 3),
        optimal: OptimalConditions::assess(warehouse, main.humidity),
        observed_at,
    }
}

/// Applies the thermal model to every forecast step
///
/// The season is taken from `now`, not from each step, so a forecast that
/// crosses a season boundary stays on one model.
pub fn process_forecast(
    region: &'static Region,
    response: &ForecastResponse,
    now: DateTime<Utc>,
) -> Result<RegionalForecast, FetchError> {
    let season = Season::at(now);
    let mut points = Vec::with_capacity(response.list.len());

    for item in &response.list {
        let time = DateTime::<Utc>::from_timestamp(item.dt, 0)
            .ok_or_else(|| FetchError::InvalidResponse(format!("forecast timestamp out of range: {}", item.dt)))?
            .naive_utc();
        let warehouse = warehouse_temperature(
            item.main.temp,
            item.main.humidity,
            item.wind.speed,
            region.coastal,
            season,
        );

        points.push(ForecastPoint {
            time,
            ambient_temp: round_to(item.main.temp, 1),
            warehouse_temp: round_to(warehouse, 1),
            humidity: item.main.humidity,
            description: describe(&item.weather),
            aging_rate: round_to(aging_rate(warehouse, item.main.humidity), 3),
        });
    }

    Ok(RegionalForecast {
        region_id: region.id,
        region_name: region.name,
        points,
    })
}

/// Scotland-wide averages across the regions that produced a reading
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Averages {
    pub ambient_temp: f64,
    pub warehouse_temp: f64,
    pub humidity: f64,
}

/// One region's entry in a [`RegionsSummary`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionReport {
    pub status: DataStatus,
    pub reading: WarehouseReading,
}

/// A region that produced nothing at all
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionFailure {
    pub region_id: &'static str,
    pub error: String,
}

/// Current conditions for every region
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionsSummary {
    pub generated_at: DateTime<Utc>,
    pub regions: Vec<RegionReport>,
    pub scotland_average: Option<Averages>,
    /// Regions served from stale or fallback data
    pub degraded: usize,
    pub failures: Vec<RegionFailure>,
}

impl RegionsSummary {
    fn build(
        generated_at: DateTime<Utc>,
        results: Vec<(&'static Region, Result<Resolved<WarehouseReading>, FetchError>)>,
    ) -> Self {
        let mut regions = Vec::new();
        let mut failures = Vec::new();

        for (region, result) in results {
            match result {
                Ok(resolved) => regions.push(RegionReport {
                    status: resolved.status,
                    reading: resolved.payload,
                }),
                Err(e) => failures.push(RegionFailure {
                    region_id: region.id,
                    error: e.to_string(),
                }),
            }
        }

        let scotland_average = if regions.is_empty() {
            None
        } else {
            let n = regions.len() as f64;
            let mean = |f: fn(&WarehouseReading) -> f64| {
                round_to(regions.iter().map(|r| f(&r.reading)).sum::<f64>() / n, 1)
            };
            Some(Averages {
                ambient_temp: mean(|r: &WarehouseReading| r.ambient_temp),
                warehouse_temp: mean(|r: &WarehouseReading| r.warehouse_temp),
                humidity: mean(|r: &WarehouseReading| r.humidity),
            })
        };
        let degraded = regions.iter().filter(|r| r.status.is_degraded()).count();

        Self {
            generated_at,
            regions,
            scotland_average,
            degraded,
            failures,
        }
    }
}

/// Weather for the whisky regions
#[derive(Debug, Clone)]
pub struct WeatherService {
    api_key: Option<String>,
    current: ApiClient,
    forecast: ApiClient,
}

impl WeatherService {
    /// Builds the service from settings; `persistence` enables the disk tier
    pub fn from_settings(settings: &Settings, persistence: Option<CacheManager>, clock: Arc<dyn Clock>) -> Self {
        let base = |name: &str, ttl: TtlDuration| {
            ClientConfig::new(name, settings.openweather_base_url.clone())
                .retry_policy(settings.retry_policy)
                .timeout(settings.request_timeout)
                .ttl(ttl)
                .redact("appid")
                .persist_to(persistence.clone())
                .clock(clock.clone())
        };

        Self {
            api_key: settings.openweather_api_key.clone(),
            current: ApiClient::configure(base("openweather", settings.ttls.weather)),
            forecast: ApiClient::configure(base(
                "openweather-forecast",
                TtlDuration::hours(FORECAST_TTL_HOURS),
            )),
        }
    }

    /// The client used for current conditions
    pub fn client(&self) -> &ApiClient {
        &self.current
    }

    /// Both clients, for cache maintenance
    pub fn clients(&self) -> [&ApiClient; 2] {
        [&self.current, &self.forecast]
    }

    fn api_key(&self) -> Result<&str, FetchError> {
        self.api_key.as_deref().ok_or_else(|| FetchError::MissingCredentials {
            service: "OpenWeather".to_string(),
        })
    }

    fn location_params(&self, region: &Region) -> Result<Vec<(String, String)>, FetchError> {
        Ok(vec![
            ("lat".to_string(), region.latitude.to_string()),
            ("lon".to_string(), region.longitude.to_string()),
            ("appid".to_string(), self.api_key()?.to_string()),
            ("units".to_string(), "metric".to_string()),
        ])
    }

    /// Current warehouse conditions for a region
    ///
    /// Falls back to the region's historical averages when the upstream is
    /// down and nothing is cached.
    pub async fn current_weather(
        &self,
        region: &'static Region,
    ) -> Result<Resolved<WarehouseReading>, FetchError> {
        let params = self.location_params(region)?;
        let fallback = CurrentWeatherResponse::from_historical(&region.historical);

        let resolved = self
            .current
            .resolve_as::<CurrentWeatherResponse, _, _, _>("/weather", params, Some(fallback))
            .await?;

        let observed_at = resolved.stored_at.unwrap_or_else(|| self.current.cache().now());
        if resolved.is_degraded() {
            info!(region = region.id, status = ?resolved.status, "weather served from degraded source");
        }
        Ok(resolved.map(|response| process_current(region, &response, observed_at)))
    }

    /// Three-hourly forecast for `days` days (clamped to 1..=5)
    pub async fn forecast(
        &self,
        region: &'static Region,
        days: u32,
    ) -> Result<Resolved<RegionalForecast>, FetchError> {
        let days = days.clamp(1, MAX_FORECAST_DAYS);
        let mut params = self.location_params(region)?;
        params.push(("cnt".to_string(), (days * 8).to_string()));

        let resolved = self
            .forecast
            .resolve_as::<ForecastResponse, _, _, _>("/forecast", params, None)
            .await?;

        let now = self.forecast.cache().now();
        let forecast = process_forecast(region, &resolved.payload, now)?;
        Ok(resolved.map(|_| forecast))
    }

    /// Current conditions for every region, fetched concurrently
    ///
    /// Regions that fail are listed in `failures`. When every region fails
    /// the first error is returned instead.
    pub async fn all_regions_summary(&self) -> Result<RegionsSummary, FetchError> {
        self.api_key()?;

        let regions = all_regions();
        let results = join_all(regions.iter().map(|region| self.current_weather(region))).await;
        let results: Vec<_> = regions.iter().zip(results).collect();

        if results.iter().all(|(_, r)| r.is_err()) {
            if let Some((_, Err(e))) = results.into_iter().next() {
                return Err(e);
            }
            return Err(FetchError::InvalidRequest("no regions configured".to_string()));
        }

        let summary = RegionsSummary::build(self.current.cache().now(), results);
        if summary.degraded > 0 {
            warn!(
                degraded = summary.degraded,
                total = summary.regions.len(),
                "regional summary includes degraded data"
            );
        }
        Ok(summary)
    }
}
