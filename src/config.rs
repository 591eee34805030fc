//! Runtime settings loaded from the environment
//!
//! API keys and tuning knobs come from environment variables, optionally
//! seeded from a `.env` file in the working directory.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::Duration as TtlDuration;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::http::RetryPolicy;

pub const DEFAULT_OPENWEATHER_BASE_URL: &str = "https://api.openweathermap.org/data/2.5";
pub const DEFAULT_MARINE_FEATURES_BASE_URL: &str = "https://services1.arcgis.com/LM9GyVFsughzHdbO/ArcGIS/rest/services/GeMS___Scottish_Priority_Marine_Features/FeatureServer";
pub const DEFAULT_GFW_BASE_URL: &str = "https://gateway.api.globalfishingwatch.org";

/// Upper bound for any TTL or retention window (365 days)
const MAX_TTL_SECS: i64 = 365 * 24 * 60 * 60;

/// Errors raised while reading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable was set but could not be parsed
    #[error("{var} has invalid value '{value}'")]
    Parse { var: &'static str, value: String },

    /// A value parsed but is out of range
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Cache lifetimes for the three classes of upstream data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    /// Current conditions change quickly
    pub weather: TtlDuration,
    /// Vessel activity
    pub marine: TtlDuration,
    /// Species and habitat layers barely change
    pub climate: TtlDuration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            weather: TtlDuration::seconds(1800),
            marine: TtlDuration::seconds(3600),
            climate: TtlDuration::seconds(86400),
        }
    }
}

/// Which credentials are present
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyStatus {
    pub openweather: bool,
    pub global_fishing_watch: bool,
    pub missing: Vec<&'static str>,
}

impl KeyStatus {
    pub fn all_present(&self) -> bool {
        self.missing.is_empty()
    }
}

/// All settings the clients need
#[derive(Debug, Clone)]
pub struct Settings {
    pub openweather_api_key: Option<String>,
    pub openweather_base_url: String,
    pub gfw_api_token: Option<String>,
    pub gfw_base_url: String,
    pub marine_features_base_url: String,
    pub request_timeout: Duration,
    pub retry_policy: RetryPolicy,
    pub ttls: CacheTtls,
    /// Overrides the XDG cache directory when set
    pub cache_dir: Option<PathBuf>,
    /// How long expired entries are kept around as stale fallbacks
    pub stale_retention: TtlDuration,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            openweather_api_key: None,
            openweather_base_url: DEFAULT_OPENWEATHER_BASE_URL.to_string(),
            gfw_api_token: None,
            gfw_base_url: DEFAULT_GFW_BASE_URL.to_string(),
            marine_features_base_url: DEFAULT_MARINE_FEATURES_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(15),
            retry_policy: RetryPolicy::default(),
            ttls: CacheTtls::default(),
            cache_dir: None,
            stale_retention: TtlDuration::days(7),
            log_filter: "info".to_string(),
        }
    }
}

impl Settings {
    /// Loads `.env` (if present) and reads settings from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_vars(std::env::vars().collect())
    }

    /// Builds settings from an explicit variable map
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        let defaults = Settings::default();
        let text = |name: &str| {
            vars.get(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let attempts = parse_var(&vars, "API_RETRY_ATTEMPTS")?.unwrap_or(defaults.retry_policy.max_attempts());
        let delay_secs: f64 =
            parse_var(&vars, "API_RETRY_DELAY_SECS")?.unwrap_or(defaults.retry_policy.base_delay().as_secs_f64());
        let multiplier =
            parse_var(&vars, "API_RETRY_MULTIPLIER")?.unwrap_or(defaults.retry_policy.backoff_multiplier());
        let base_delay = Duration::try_from_secs_f64(delay_secs).map_err(|_| ConfigError::Invalid {
            field: "API_RETRY_DELAY_SECS",
            reason: "must be a non-negative number of seconds".to_string(),
        })?;
        let retry_policy = RetryPolicy::new(attempts, base_delay, multiplier)?;

        let timeout_secs: u64 = parse_var(&vars, "API_TIMEOUT_SECS")?.unwrap_or(defaults.request_timeout.as_secs());
        if timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "API_TIMEOUT_SECS",
                reason: "must be at least 1".to_string(),
            });
        }

        let ttl = |name: &'static str, default: TtlDuration| -> Result<TtlDuration, ConfigError> {
            match parse_var::<i64>(&vars, name)? {
                None => Ok(default),
                Some(secs) if secs <= MAX_TTL_SECS => TtlDuration::try_seconds(secs).ok_or(ConfigError::Invalid {
                    field: name,
                    reason: "out of range".to_string(),
                }),
                Some(_) => Err(ConfigError::Invalid {
                    field: name,
                    reason: format!("must be at most {} seconds", MAX_TTL_SECS),
                }),
            }
        };
        let ttls = CacheTtls {
            weather: ttl("CACHE_TTL_WEATHER_SECS", defaults.ttls.weather)?,
            marine: ttl("CACHE_TTL_MARINE_SECS", defaults.ttls.marine)?,
            climate: ttl("CACHE_TTL_CLIMATE_SECS", defaults.ttls.climate)?,
        };
        if ttls.weather <= TtlDuration::zero() || ttls.marine <= TtlDuration::zero() || ttls.climate <= TtlDuration::zero() {
            return Err(ConfigError::Invalid {
                field: "cache ttl",
                reason: "must be positive".to_string(),
            });
        }

        let stale_retention = ttl("CACHE_STALE_RETENTION_SECS", defaults.stale_retention)?;

        Ok(Self {
            openweather_api_key: text("OPENWEATHER_API_KEY"),
            openweather_base_url: text("OPENWEATHER_BASE_URL").unwrap_or(defaults.openweather_base_url),
            gfw_api_token: text("GFW_API_TOKEN"),
            gfw_base_url: text("GFW_API_BASE_URL").unwrap_or(defaults.gfw_base_url),
            marine_features_base_url: text("MARINE_FEATURES_BASE_URL")
                .unwrap_or(defaults.marine_features_base_url),
            request_timeout: Duration::from_secs(timeout_secs),
            retry_policy,
            ttls,
            cache_dir: text("TIDES_CACHE_DIR").map(PathBuf::from),
            stale_retention,
            log_filter: text("TIDES_LOG")
                .or_else(|| text("RUST_LOG"))
                .unwrap_or(defaults.log_filter),
        })
    }

    /// Reports which API credentials are configured, warning about the rest
    pub fn key_status(&self) -> KeyStatus {
        let openweather = self.openweather_api_key.is_some();
        let global_fishing_watch = self.gfw_api_token.is_some();

        let mut missing = Vec::new();
        if !openweather {
            missing.push("OPENWEATHER_API_KEY");
        }
        if !global_fishing_watch {
            missing.push("GFW_API_TOKEN");
        }
        if !missing.is_empty() {
            warn!(missing = ?missing, "running with incomplete API configuration");
        }

        KeyStatus {
            openweather,
            global_fishing_watch,
            missing,
        }
    }
}

fn parse_var<T: FromStr>(vars: &HashMap<String, String>, var: &'static str) -> Result<Option<T>, ConfigError> {
    match vars.get(var).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(value) => value.parse().map(Some).map_err(|_| ConfigError::Parse {
            var,
            value: value.to_string(),
        }),
    }
}
