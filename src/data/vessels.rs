//! Global Fishing Watch events client
//!
//! Vessel events are paged; each page carries the offset of the next one.
//! Requests authenticate with a bearer token.

use chrono::{DateTime, Duration as TtlDuration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

use super::round_to;
use crate::cache::{CacheManager, Clock};
use crate::client::{ApiClient, ClientConfig, DataStatus, Resolved};
use crate::config::Settings;
use crate::http::FetchError;

const EVENTS_PATH: &str = "/v3/events";
const EVENTS_DATASET: &str = "public-global-fishing-events:latest";

/// Page size used when summarising activity
const SUMMARY_PAGE_SIZE: u32 = 100;

/// Upper bound on pages fetched for one summary
const MAX_SUMMARY_PAGES: usize = 20;

/// A latitude/longitude rectangle
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

impl BoundingBox {
    /// Aberdeenshire coast
    pub const SCOTTISH_COAST: BoundingBox = BoundingBox {
        lat_min: 56.5,
        lat_max: 58.5,
        lon_min: -3.5,
        lon_max: -1.0,
    };

    pub const NORTH_SEA: BoundingBox = BoundingBox {
        lat_min: 54.0,
        lat_max: 58.0,
        lon_min: -4.0,
        lon_max: 2.0,
    };

    pub fn new(lat_min: f64, lat_max: f64, lon_min: f64, lon_max: f64) -> Result<Self, FetchError> {
        let bbox = Self {
            lat_min,
            lat_max,
            lon_min,
            lon_max,
        };
        bbox.validate()?;
        Ok(bbox)
    }

    fn validate(&self) -> Result<(), FetchError> {
        let lat_ok = (-90.0..=90.0).contains(&self.lat_min)
            && (-90.0..=90.0).contains(&self.lat_max)
            && self.lat_min < self.lat_max;
        let lon_ok = (-180.0..=180.0).contains(&self.lon_min)
            && (-180.0..=180.0).contains(&self.lon_max)
            && self.lon_min < self.lon_max;
        if lat_ok && lon_ok {
            Ok(())
        } else {
            Err(FetchError::InvalidRequest(format!("invalid bounding box: {self}")))
        }
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.lat_min, self.lat_max, self.lon_min, self.lon_max)
    }
}

/// Parses `lat_min,lat_max,lon_min,lon_max`
impl FromStr for BoundingBox {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("'{s}' is not a list of numbers: {e}"))?;

        match parts.as_slice() {
            [lat_min, lat_max, lon_min, lon_max] => {
                BoundingBox::new(*lat_min, *lat_max, *lon_min, *lon_max).map_err(|e| e.to_string())
            }
            _ => Err(format!("expected lat_min,lat_max,lon_min,lon_max, got '{s}'")),
        }
    }
}

/// Parameters for one page of events
#[derive(Debug, Clone, PartialEq)]
pub struct EventQuery {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub bbox: Option<BoundingBox>,
    pub limit: u32,
    pub offset: u64,
}

impl EventQuery {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start,
            end,
            bbox: None,
            limit: SUMMARY_PAGE_SIZE,
            offset: 0,
        }
    }

    pub fn bbox(mut self, bbox: BoundingBox) -> Self {
        self.bbox = Some(bbox);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    fn params(&self) -> Result<Vec<(String, String)>, FetchError> {
        if self.start > self.end {
            return Err(FetchError::InvalidRequest(format!(
                "start date {} is after end date {}",
                self.start, self.end
            )));
        }
        if self.limit == 0 {
            return Err(FetchError::InvalidRequest("limit must be at least 1".to_string()));
        }

        let mut params = vec![
            ("datasets[0]".to_string(), EVENTS_DATASET.to_string()),
            ("start-date".to_string(), self.start.format("%Y-%m-%d").to_string()),
            ("end-date".to_string(), self.end.format("%Y-%m-%d").to_string()),
            ("limit".to_string(), self.limit.to_string()),
            ("offset".to_string(), self.offset.to_string()),
        ];
        if let Some(bbox) = &self.bbox {
            bbox.validate()?;
            params.extend([
                ("lat-min".to_string(), bbox.lat_min.to_string()),
                ("lat-max".to_string(), bbox.lat_max.to_string()),
                ("lon-min".to_string(), bbox.lon_min.to_string()),
                ("lon-max".to_string(), bbox.lon_max.to_string()),
            ]);
        }
        Ok(params)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VesselInfo {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub flag: Option<String>,
}

/// One vessel event (fishing, port visit, encounter, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VesselEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub start: DateTime<Utc>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub position: Option<Position>,
    #[serde(default)]
    pub vessel: Option<VesselInfo>,
}

impl VesselEvent {
    /// Event length in hours; zero for open-ended events
    pub fn duration_hours(&self) -> f64 {
        self.end
            .map(|end| (end - self.start).num_seconds().max(0) as f64 / 3600.0)
            .unwrap_or(0.0)
    }
}

/// One page of events
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPage {
    pub entries: Vec<VesselEvent>,
    /// Offset of the next page; `None` on the last page
    #[serde(default)]
    pub next_offset: Option<u64>,
    #[serde(default)]
    pub total: Option<u64>,
}

/// Aggregated vessel activity in an area
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivitySummary {
    pub bbox: BoundingBox,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub days: u32,
    pub vessel_events: usize,
    pub unique_vessels: usize,
    pub events_by_type: BTreeMap<String, usize>,
    pub fishing_hours: f64,
    pub avg_daily_activity: f64,
    /// 0 (quiet) to 100 (extreme)
    pub pressure_index: f64,
    /// Set when the page limit stopped collection early
    pub truncated: bool,
}

impl ActivitySummary {
    fn from_events(bbox: BoundingBox, start: NaiveDate, end: NaiveDate, days: u32, events: &[VesselEvent]) -> Self {
        let mut events_by_type = BTreeMap::new();
        let mut vessels = HashSet::new();
        let mut fishing_hours = 0.0;

        for event in events {
            *events_by_type.entry(event.event_type.clone()).or_insert(0) += 1;
            if let Some(vessel) = &event.vessel {
                vessels.insert(vessel.id.as_str());
            }
            if event.event_type == "fishing" {
                fishing_hours += event.duration_hours();
            }
        }

        let count = events.len();
        Self {
            bbox,
            start,
            end,
            days,
            vessel_events: count,
            unique_vessels: vessels.len(),
            events_by_type,
            fishing_hours: round_to(fishing_hours, 2),
            avg_daily_activity: if days > 0 { round_to(count as f64 / days as f64, 2) } else { 0.0 },
            pressure_index: round_to((count as f64 * 2.0 + fishing_hours * 0.5).min(100.0), 2),
            truncated: false,
        }
    }
}

/// Fishing-vessel activity lookups
#[derive(Debug, Clone)]
pub struct VesselService {
    has_token: bool,
    client: ApiClient,
}

impl VesselService {
    pub fn from_settings(settings: &Settings, persistence: Option<CacheManager>, clock: Arc<dyn Clock>) -> Self {
        let mut config = ClientConfig::new("global-fishing-watch", settings.gfw_base_url.clone())
            .retry_policy(settings.retry_policy)
            .timeout(settings.request_timeout)
            .ttl(settings.ttls.marine)
            .persist_to(persistence)
            .clock(clock);
        if let Some(token) = &settings.gfw_api_token {
            config = config.header("Authorization", format!("Bearer {token}"));
        }

        Self {
            has_token: settings.gfw_api_token.is_some(),
            client: ApiClient::configure(config),
        }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    fn require_token(&self) -> Result<(), FetchError> {
        if self.has_token {
            Ok(())
        } else {
            Err(FetchError::MissingCredentials {
                service: "Global Fishing Watch".to_string(),
            })
        }
    }

    /// One page of events; an empty page stands in when the upstream is down
    pub async fn events(&self, query: &EventQuery) -> Result<Resolved<EventPage>, FetchError> {
        self.require_token()?;
        let params = query.params()?;

        let resolved = self
            .client
            .resolve_as::<EventPage, _, _, _>(EVENTS_PATH, params, Some(EventPage::default()))
            .await?;
        debug!(
            offset = query.offset,
            entries = resolved.payload.entries.len(),
            next_offset = ?resolved.payload.next_offset,
            status = ?resolved.status,
            "event page resolved"
        );
        Ok(resolved)
    }

    /// Summarises the last `days` days of activity in `bbox`, following pages
    pub async fn activity_summary(
        &self,
        bbox: BoundingBox,
        days: u32,
    ) -> Result<Resolved<ActivitySummary>, FetchError> {
        self.require_token()?;
        bbox.validate()?;

        let now = self.client.cache().now();
        let end = now.date_naive();
        let start = (now - TtlDuration::days(i64::from(days))).date_naive();

        let mut query = EventQuery::new(start, end).bbox(bbox);
        let mut events = Vec::new();
        let mut status: Option<DataStatus> = None;
        let mut stored_at = None;
        let mut truncated = true;

        for _ in 0..MAX_SUMMARY_PAGES {
            let page = self.events(&query).await?;
            status = Some(status.map_or(page.status, |s| s.worst(page.status)));
            stored_at = match (stored_at, page.stored_at) {
                (Some(a), Some(b)) => Some(std::cmp::min(a, b)),
                (a, b) => a.or(b),
            };

            let next = page.payload.next_offset;
            events.extend(page.payload.entries);
            match next {
                Some(offset) if offset > query.offset => query = query.offset(offset),
                _ => {
                    truncated = false;
                    break;
                }
            }
        }

        let status = status.unwrap_or(DataStatus::Live);
        let mut summary = ActivitySummary::from_events(bbox, start, end, days, &events);
        summary.truncated = truncated;
        info!(
            events = summary.vessel_events,
            vessels = summary.unique_vessels,
            fishing_hours = summary.fishing_hours,
            status = ?status,
            "vessel activity summarised"
        );

        Ok(Resolved {
            payload: summary,
            status,
            stored_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use crate::http::RetryPolicy;
    use chrono::TimeZone;
    use mockito::Matcher;
    use serde_json::json;
    use std::time::Duration;

    fn clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2025, 11, 14, 12, 0, 0).unwrap())
    }

    fn service(url: &str, token: Option<&str>) -> VesselService {
        let settings = Settings {
            gfw_api_token: token.map(str::to_string),
            gfw_base_url: url.to_string(),
            retry_policy: RetryPolicy::new(2, Duration::from_millis(1), 1.0).unwrap(),
            request_timeout: Duration::from_secs(5),
            ..Settings::default()
        };
        VesselService::from_settings(&settings, None, Arc::new(clock()))
    }

    fn event(id: &str, kind: &str, vessel: &str, hours: i64) -> serde_json::Value {
        let start = Utc.with_ymd_and_hms(2025, 11, 10, 6, 0, 0).unwrap();
        let end = start + TtlDuration::hours(hours);
        json!({
            "id": id,
            "type": kind,
            "start": start.to_rfc3339(),
            "end": end.to_rfc3339(),
            "position": {"lat": 57.1, "lon": -2.0},
            "vessel": {"id": vessel, "name": "ATLANTIC DAWN", "flag": "GBR"}
        })
    }

    #[test]
    fn test_bounding_box_from_str() {
        let bbox: BoundingBox = "56.5, 58.5, -3.5, -1.0".parse().unwrap();
        assert_eq!(bbox, BoundingBox::SCOTTISH_COAST);

        assert!("56.5,58.5,-3.5".parse::<BoundingBox>().is_err());
        assert!("a,b,c,d".parse::<BoundingBox>().is_err());
        // inverted latitude range
        assert!("58.5,56.5,-3.5,-1.0".parse::<BoundingBox>().is_err());
    }

    #[test]
    fn test_event_query_rejects_inverted_dates() {
        let query = EventQuery::new(
            NaiveDate::from_ymd_opt(2025, 11, 14).unwrap(),
            NaiveDate::from_ymd_opt(2025, 11, 1).unwrap(),
        );
        assert!(matches!(query.params(), Err(FetchError::InvalidRequest(_))));
    }

    #[test]
    fn test_event_page_parses_next_offset() {
        let page: EventPage = serde_json::from_value(json!({
            "entries": [event("e1", "fishing", "v1", 3)],
            "limit": 1,
            "offset": 0,
            "nextOffset": 1,
            "total": 4
        }))
        .unwrap();

        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.next_offset, Some(1));
        assert_eq!(page.total, Some(4));
        assert!((page.entries[0].duration_hours() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_summary_from_events() {
        let events: Vec<VesselEvent> = serde_json::from_value(json!([
            event("e1", "fishing", "v1", 4),
            event("e2", "fishing", "v2", 2),
            event("e3", "port_visit", "v1", 10),
        ]))
        .unwrap();
        let start = NaiveDate::from_ymd_opt(2025, 11, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 11, 11).unwrap();

        let summary = ActivitySummary::from_events(BoundingBox::NORTH_SEA, start, end, 10, &events);

        assert_eq!(summary.vessel_events, 3);
        assert_eq!(summary.unique_vessels, 2);
        assert!((summary.fishing_hours - 6.0).abs() < 1e-9);
        assert_eq!(summary.events_by_type.get("fishing"), Some(&2));
        assert_eq!(summary.events_by_type.get("port_visit"), Some(&1));
        assert!((summary.avg_daily_activity - 0.3).abs() < 1e-9);
        assert!((summary.pressure_index - 9.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_missing_token_is_hard_failure() {
        let vessels = service("http://127.0.0.1:9", None);
        let query = EventQuery::new(
            NaiveDate::from_ymd_opt(2025, 11, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 11, 14).unwrap(),
        );

        assert!(matches!(
            vessels.events(&query).await,
            Err(FetchError::MissingCredentials { .. })
        ));
        assert!(matches!(
            vessels.activity_summary(BoundingBox::NORTH_SEA, 7).await,
            Err(FetchError::MissingCredentials { .. })
        ));
    }

    #[tokio::test]
    async fn test_events_sends_bearer_token_and_window() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v3/events")
            .match_header("authorization", "Bearer gfw-token")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("start-date".into(), "2025-11-01".into()),
                Matcher::UrlEncoded("end-date".into(), "2025-11-14".into()),
                Matcher::UrlEncoded("lat-min".into(), "56.5".into()),
                Matcher::UrlEncoded("limit".into(), "10".into()),
            ]))
            .with_status(200)
            .with_body(json!({"entries": [event("e1", "fishing", "v1", 2)], "nextOffset": 10, "total": 12}).to_string())
            .create_async()
            .await;
        let vessels = service(&server.url(), Some("gfw-token"));
        let query = EventQuery::new(
            NaiveDate::from_ymd_opt(2025, 11, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 11, 14).unwrap(),
        )
        .bbox(BoundingBox::SCOTTISH_COAST)
        .limit(10);

        let page = vessels.events(&query).await.unwrap();

        assert_eq!(page.status, DataStatus::Live);
        assert_eq!(page.payload.next_offset, Some(10));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unauthorized_token_is_not_masked() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v3/events")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body(r#"{"message": "invalid token"}"#)
            .expect(1)
            .create_async()
            .await;
        let vessels = service(&server.url(), Some("expired"));
        let query = EventQuery::new(
            NaiveDate::from_ymd_opt(2025, 11, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 11, 14).unwrap(),
        );

        let err = vessels.events(&query).await.unwrap_err();

        assert!(matches!(err, FetchError::ClientError { status: 401, .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_activity_summary_follows_pages() {
        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("GET", "/v3/events")
            .match_query(Matcher::UrlEncoded("offset".into(), "0".into()))
            .with_status(200)
            .with_body(
                json!({
                    "entries": [event("e1", "fishing", "v1", 4), event("e2", "encounter", "v2", 1)],
                    "nextOffset": 2
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;
        let second = server
            .mock("GET", "/v3/events")
            .match_query(Matcher::UrlEncoded("offset".into(), "2".into()))
            .with_status(200)
            .with_body(json!({"entries": [event("e3", "fishing", "v3", 2)], "nextOffset": null}).to_string())
            .expect(1)
            .create_async()
            .await;
        let vessels = service(&server.url(), Some("gfw-token"));

        let summary = vessels.activity_summary(BoundingBox::NORTH_SEA, 7).await.unwrap();

        assert_eq!(summary.status, DataStatus::Live);
        assert_eq!(summary.payload.vessel_events, 3);
        assert_eq!(summary.payload.unique_vessels, 3);
        assert!((summary.payload.fishing_hours - 6.0).abs() < 1e-9);
        assert_eq!(summary.payload.start, NaiveDate::from_ymd_opt(2025, 11, 7).unwrap());
        assert_eq!(summary.payload.end, NaiveDate::from_ymd_opt(2025, 11, 14).unwrap());
        assert!(!summary.payload.truncated);
        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn test_activity_summary_degrades_to_empty_on_outage() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v3/events")
            .match_query(Matcher::Any)
            .with_status(504)
            .create_async()
            .await;
        let vessels = service(&server.url(), Some("gfw-token"));

        let summary = vessels.activity_summary(BoundingBox::SCOTTISH_COAST, 30).await.unwrap();

        assert_eq!(summary.status, DataStatus::Fallback);
        assert_eq!(summary.payload.vessel_events, 0);
        assert!((summary.payload.pressure_index - 0.0).abs() < 1e-9);
    }
}
