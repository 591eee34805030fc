//! Scottish Priority Marine Features (ArcGIS FeatureServer) client
//!
//! Layer 1 holds species records and layer 0 holds habitats. The service is
//! public; no credentials are needed.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::{CacheManager, Clock};
use crate::client::{ApiClient, ClientConfig, Resolved};
use crate::config::Settings;
use crate::http::FetchError;

const SPECIES_LAYER: &str = "/1/query";
const HABITAT_LAYER: &str = "/0/query";

/// Filters that together find every turtle record
const TURTLE_QUERIES: [&str; 5] = [
    "SCIENTIFIC LIKE '%Caretta%'",
    "SCIENTIFIC LIKE '%Dermochelys%'",
    "SCIENTIFIC LIKE '%Chelonia%'",
    "COMMON_NAME LIKE '%turtle%'",
    "COMMON_NAME LIKE '%Turtle%'",
];

/// One feature record: attribute table row plus optional geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub attributes: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Value>,
}

impl Feature {
    pub fn object_id(&self) -> Option<i64> {
        self.attributes.get("OBJECTID").and_then(Value::as_i64)
    }

    /// A string attribute, if present and a string
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(Value::as_str)
    }
}

/// Query response body
///
/// `features` is required: ArcGIS reports query errors as a 200 response
/// with an `error` object, which must not be mistaken for an empty result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    pub features: Vec<Feature>,
}

/// Species and habitat lookups
#[derive(Debug, Clone)]
pub struct SpeciesService {
    client: ApiClient,
}

impl SpeciesService {
    pub fn from_settings(settings: &Settings, persistence: Option<CacheManager>, clock: Arc<dyn Clock>) -> Self {
        let config = ClientConfig::new("marine-features", settings.marine_features_base_url.clone())
            .retry_policy(settings.retry_policy)
            .timeout(settings.request_timeout)
            .ttl(settings.ttls.climate)
            .persist_to(persistence)
            .clock(clock);

        Self {
            client: ApiClient::configure(config),
        }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    async fn query(
        &self,
        layer: &str,
        params: Vec<(String, String)>,
    ) -> Result<Resolved<Vec<Feature>>, FetchError> {
        let resolved = self
            .client
            .resolve_as::<FeatureSet, _, _, _>(layer, params, Some(FeatureSet::default()))
            .await?;
        debug!(layer, count = resolved.payload.features.len(), status = ?resolved.status, "feature query resolved");
        Ok(resolved.map(|set| set.features))
    }

    /// Every species record
    pub async fn all_species(&self) -> Result<Resolved<Vec<Feature>>, FetchError> {
        self.query(SPECIES_LAYER, where_params("1=1")).await
    }

    /// Every habitat record
    pub async fn marine_habitats(&self) -> Result<Resolved<Vec<Feature>>, FetchError> {
        self.query(HABITAT_LAYER, where_params("1=1")).await
    }

    /// Turtle records found by scientific or common name, without duplicates
    ///
    /// The filters run concurrently. Records seen by more than one filter
    /// are kept once, by `OBJECTID`; records without one are always kept.
    /// The combined status is the worst of the individual queries.
    pub async fn sea_turtles(&self) -> Result<Resolved<Vec<Feature>>, FetchError> {
        let results = join_all(
            TURTLE_QUERIES
                .iter()
                .map(|filter| self.query(SPECIES_LAYER, where_params(filter))),
        )
        .await;

        let mut seen = HashSet::new();
        let mut merged: Option<Resolved<Vec<Feature>>> = None;
        for result in results {
            let resolved = result?;
            let acc = merged.get_or_insert_with(|| Resolved {
                payload: Vec::new(),
                status: resolved.status,
                stored_at: resolved.stored_at,
            });
            acc.status = acc.status.worst(resolved.status);
            acc.stored_at = match (acc.stored_at, resolved.stored_at) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            for feature in resolved.payload {
                let fresh = match feature.object_id() {
                    Some(id) => seen.insert(id),
                    None => true,
                };
                if fresh {
                    acc.payload.push(feature);
                }
            }
        }

        let merged = merged.ok_or_else(|| FetchError::InvalidRequest("no turtle filters defined".to_string()))?;
        info!(count = merged.payload.len(), status = ?merged.status, "sea turtle records collected");
        Ok(merged)
    }

    /// Species recorded within `radius_km` of a point
    pub async fn species_near(
        &self,
        lat: f64,
        lon: f64,
        radius_km: f64,
    ) -> Result<Resolved<Vec<Feature>>, FetchError> {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(FetchError::InvalidRequest(format!("coordinates out of range: {lat}, {lon}")));
        }
        if !(radius_km.is_finite() && radius_km > 0.0) {
            return Err(FetchError::InvalidRequest(format!("radius must be positive, got {radius_km}")));
        }

        let geometry = json!({
            "x": lon,
            "y": lat,
            "spatialReference": {"wkid": 4326}
        });
        let params = vec![
            ("geometry".to_string(), geometry.to_string()),
            ("geometryType".to_string(), "esriGeometryPoint".to_string()),
            ("inSR".to_string(), "4326".to_string()),
            ("spatialRel".to_string(), "esriSpatialRelIntersects".to_string()),
            ("distance".to_string(), (radius_km * 1000.0).to_string()),
            ("units".to_string(), "esriSRUnit_Meter".to_string()),
            ("outFields".to_string(), "*".to_string()),
            ("f".to_string(), "json".to_string()),
        ];

        self.query(SPECIES_LAYER, params).await
    }
}

fn where_params(filter: &str) -> Vec<(String, String)> {
    vec![
        ("where".to_string(), filter.to_string()),
        ("outFields".to_string(), "*".to_string()),
        ("f".to_string(), "json".to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use crate::client::DataStatus;
    use crate::http::RetryPolicy;
    use mockito::Matcher;
    use std::time::Duration;

    fn service(url: &str) -> SpeciesService {
        let settings = Settings {
            marine_features_base_url: url.to_string(),
            retry_policy: RetryPolicy::new(2, Duration::from_millis(1), 1.0).unwrap(),
            request_timeout: Duration::from_secs(5),
            ..Settings::default()
        };
        SpeciesService::from_settings(&settings, None, Arc::new(ManualClock::default()))
    }

    fn features(ids: &[i64]) -> String {
        let features: Vec<Value> = ids
            .iter()
            .map(|id| json!({"attributes": {"OBJECTID": id, "COMMON_NAME": "Leatherback turtle"}}))
            .collect();
        json!({ "features": features }).to_string()
    }

    #[test]
    fn test_feature_accessors() {
        let feature: Feature = serde_json::from_value(json!({
            "attributes": {"OBJECTID": 7, "SCIENTIFIC": "Dermochelys coriacea"},
            "geometry": {"x": -3.0, "y": 56.0}
        }))
        .unwrap();

        assert_eq!(feature.object_id(), Some(7));
        assert_eq!(feature.attribute("SCIENTIFIC"), Some("Dermochelys coriacea"));
        assert_eq!(feature.attribute("OBJECTID"), None);
        assert!(feature.geometry.is_some());
    }

    #[test]
    fn test_error_body_is_not_a_feature_set() {
        let body = r#"{"error": {"code": 400, "message": "Invalid query"}}"#;
        assert!(serde_json::from_str::<FeatureSet>(body).is_err());
    }

    #[tokio::test]
    async fn test_all_species_queries_layer_one() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/1/query")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("where".into(), "1=1".into()),
                Matcher::UrlEncoded("outFields".into(), "*".into()),
                Matcher::UrlEncoded("f".into(), "json".into()),
            ]))
            .with_status(200)
            .with_body(features(&[1, 2, 3]))
            .expect(1)
            .create_async()
            .await;
        let species = service(&server.url());

        let first = species.all_species().await.unwrap();
        let second = species.all_species().await.unwrap();

        assert_eq!(first.status, DataStatus::Live);
        assert_eq!(first.payload.len(), 3);
        assert_eq!(second.status, DataStatus::Cached);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_habitats_fall_back_to_empty_list() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/0/query")
            .match_query(Matcher::Any)
            .with_status(503)
            .create_async()
            .await;
        let species = service(&server.url());

        let resolved = species.marine_habitats().await.unwrap();

        assert_eq!(resolved.status, DataStatus::Fallback);
        assert!(resolved.payload.is_empty());
    }

    #[tokio::test]
    async fn test_query_error_body_is_hard_failure() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/1/query")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"error": {"code": 400, "message": "Invalid query"}}"#)
            .create_async()
            .await;
        let species = service(&server.url());

        let err = species.all_species().await.unwrap_err();

        assert!(matches!(err, FetchError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_sea_turtles_deduplicates_by_object_id() {
        let mut server = mockito::Server::new_async().await;
        let _caretta = server
            .mock("GET", "/1/query")
            .match_query(Matcher::UrlEncoded("where".into(), TURTLE_QUERIES[0].into()))
            .with_status(200)
            .with_body(features(&[1, 2]))
            .create_async()
            .await;
        let _lower = server
            .mock("GET", "/1/query")
            .match_query(Matcher::UrlEncoded("where".into(), TURTLE_QUERIES[3].into()))
            .with_status(200)
            .with_body(features(&[2, 3]))
            .create_async()
            .await;
        let _rest = server
            .mock("GET", "/1/query")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"features": []}"#)
            .create_async()
            .await;
        let species = service(&server.url());

        let turtles = species.sea_turtles().await.unwrap();

        let mut ids: Vec<i64> = turtles.payload.iter().filter_map(Feature::object_id).collect();
        ids.sort();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(turtles.status, DataStatus::Live);
    }

    #[tokio::test]
    async fn test_sea_turtles_status_is_worst_of_queries() {
        let mut server = mockito::Server::new_async().await;
        let _caretta = server
            .mock("GET", "/1/query")
            .match_query(Matcher::UrlEncoded("where".into(), TURTLE_QUERIES[0].into()))
            .with_status(200)
            .with_body(features(&[1]))
            .create_async()
            .await;
        let _rest = server
            .mock("GET", "/1/query")
            .match_query(Matcher::Any)
            .with_status(500)
            .create_async()
            .await;
        let species = service(&server.url());

        let turtles = species.sea_turtles().await.unwrap();

        assert_eq!(turtles.status, DataStatus::Fallback);
        assert_eq!(turtles.payload.len(), 1);
    }

    #[tokio::test]
    async fn test_species_near_sends_point_geometry_in_metres() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/1/query")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("distance".into(), "25000".into()),
                Matcher::UrlEncoded("units".into(), "esriSRUnit_Meter".into()),
                Matcher::UrlEncoded("geometryType".into(), "esriGeometryPoint".into()),
                Matcher::Regex("spatialReference".into()),
            ]))
            .with_status(200)
            .with_body(features(&[9]))
            .create_async()
            .await;
        let species = service(&server.url());

        let resolved = species.species_near(56.0, -3.0, 25.0).await.unwrap();

        assert_eq!(resolved.payload.len(), 1);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_species_near_rejects_bad_input() {
        let species = service("http://127.0.0.1:9");

        assert!(matches!(
            species.species_near(95.0, 0.0, 10.0).await,
            Err(FetchError::InvalidRequest(_))
        ));
        assert!(matches!(
            species.species_near(56.0, -3.0, 0.0).await,
            Err(FetchError::InvalidRequest(_))
        ));
    }
}
