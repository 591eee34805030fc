//! Cached, retrying client for one upstream API
//!
//! An [`ApiClient`] pairs a [`RetryingRequester`] with a [`TtlCache`] and
//! implements the availability-first lookup used by every connector:
//!
//! 1. serve a fresh cache entry if there is one,
//! 2. otherwise fetch from the upstream and cache the result,
//! 3. if the upstream is down, serve the newest stale entry,
//! 4. failing that, serve the caller's static fallback payload.
//!
//! Steps 3 and 4 mark the result as degraded. Misconfiguration (4xx,
//! missing credentials, unexpected response shape) skips them and is
//! returned as an error.

use chrono::{DateTime, Duration as TtlDuration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::{CacheKey, CacheManager, Clock, SystemClock, TtlCache};
use crate::http::{FetchError, FetchResult, Request, RetryPolicy, RetryingRequester};

/// Where a resolved payload came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataStatus {
    /// Fetched from the upstream just now
    Live,
    /// Served from a cache entry still inside its TTL
    Cached,
    /// Served from an expired cache entry because the upstream failed
    Stale,
    /// The static fallback payload; no real data was available
    Fallback,
}

impl DataStatus {
    /// True when the data did not come from a live or fresh-cached response
    pub fn is_degraded(&self) -> bool {
        matches!(self, DataStatus::Stale | DataStatus::Fallback)
    }

    /// The less trustworthy of two statuses, for results merged from several calls
    pub fn worst(self, other: DataStatus) -> DataStatus {
        fn rank(status: DataStatus) -> u8 {
            match status {
                DataStatus::Live => 0,
                DataStatus::Cached => 1,
                DataStatus::Stale => 2,
                DataStatus::Fallback => 3,
            }
        }
        if rank(other) > rank(self) {
            other
        } else {
            self
        }
    }
}

/// A payload together with its provenance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolved<T> {
    pub payload: T,
    pub status: DataStatus,
    /// When the payload was stored; `None` for fallback data
    pub stored_at: Option<DateTime<Utc>>,
}

impl<T> Resolved<T> {
    pub fn is_degraded(&self) -> bool {
        self.status.is_degraded()
    }

    /// Transforms the payload, keeping the provenance
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Resolved<U> {
        Resolved {
            payload: f(self.payload),
            status: self.status,
            stored_at: self.stored_at,
        }
    }
}

/// Construction parameters for an [`ApiClient`]
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub name: String,
    pub base_url: String,
    pub default_headers: Vec<(String, String)>,
    pub retry_policy: RetryPolicy,
    pub ttl: TtlDuration,
    pub timeout: Duration,
    /// Query parameters left out of cache keys (credentials)
    pub redacted_params: Vec<String>,
    pub persistence: Option<CacheManager>,
    pub clock: Arc<dyn Clock>,
}

impl ClientConfig {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            default_headers: Vec::new(),
            retry_policy: RetryPolicy::default(),
            ttl: TtlDuration::minutes(30),
            timeout: Duration::from_secs(15),
            redacted_params: Vec::new(),
            persistence: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn ttl(mut self, ttl: TtlDuration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn redact(mut self, param: impl Into<String>) -> Self {
        self.redacted_params.push(param.into());
        self
    }

    /// Persists cache entries under `manager`, in a subdirectory named after the client
    pub fn persist_to(mut self, manager: Option<CacheManager>) -> Self {
        self.persistence = manager;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Cached, retrying access to one upstream
#[derive(Debug, Clone)]
pub struct ApiClient {
    name: String,
    base_url: String,
    default_headers: Vec<(String, String)>,
    redacted_params: Vec<String>,
    requester: RetryingRequester,
    cache: Arc<TtlCache>,
}

impl ApiClient {
    /// Builds a client for one upstream
    pub fn configure(config: ClientConfig) -> Self {
        let mut cache = TtlCache::with_clock(config.ttl, config.clock);
        if let Some(manager) = config.persistence {
            cache = cache.with_persistence(manager.scoped(&slug(&config.name)));
        }

        let requester = RetryingRequester::new(config.name.clone(), config.retry_policy)
            .with_timeout(config.timeout);

        Self {
            name: config.name,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            default_headers: config.default_headers,
            redacted_params: config.redacted_params,
            requester,
            cache: Arc::new(cache),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cache(&self) -> &TtlCache {
        &self.cache
    }

    /// Network attempts made so far, retries included
    pub fn attempts(&self) -> u64 {
        self.requester.attempts()
    }

    /// The cache key a call to `path` with `params` maps to
    pub fn cache_key(&self, path: &str, params: &[(String, String)]) -> CacheKey {
        CacheKey::with_redactions(
            path,
            params.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            &self.redacted_params,
        )
    }

    /// Performs one cached, retried GET with no fallback
    pub async fn request<K, V, I>(&self, path: &str, params: I) -> FetchResult
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let params = collect_params(params);
        let key = self.cache_key(path, &params);

        if let Some(payload) = self.cache.get(&key) {
            return Ok(payload);
        }
        self.fetch_fresh::<Value>(&key, path, params).await
    }

    /// Resolves an untyped payload with the full fallback chain
    pub async fn resolve<K, V, I>(
        &self,
        path: &str,
        params: I,
        fallback: Option<Value>,
    ) -> Result<Resolved<Value>, FetchError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.resolve_as(path, params, fallback).await
    }

    /// Resolves a payload that must deserialize as `T`
    ///
    /// A live response that does not match `T` is an `InvalidResponse` error
    /// and is not cached. Cached entries that no longer match are skipped.
    pub async fn resolve_as<T, K, V, I>(
        &self,
        path: &str,
        params: I,
        fallback: Option<T>,
    ) -> Result<Resolved<T>, FetchError>
    where
        T: DeserializeOwned,
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let params = collect_params(params);
        let key = self.cache_key(path, &params);

        if let Some(cached) = self.cache.lookup(&key).filter(|c| !c.is_expired) {
            if let Some(payload) = decode_cached::<T>(&key, cached.data) {
                debug!(service = %self.name, key = %key, "serving fresh cache entry");
                return Ok(Resolved {
                    payload,
                    status: DataStatus::Cached,
                    stored_at: Some(cached.cached_at),
                });
            }
        }

        let error = match self.fetch_fresh::<T>(&key, path, params).await {
            Ok(payload) => {
                return Ok(Resolved {
                    payload,
                    status: DataStatus::Live,
                    stored_at: Some(self.cache.now()),
                });
            }
            Err(e) if e.is_hard_failure() => return Err(e),
            Err(e) => e,
        };

        if let Some(cached) = self.cache.lookup(&key) {
            let (status, cached_at) = if cached.is_expired {
                (DataStatus::Stale, cached.cached_at)
            } else {
                // refreshed by a concurrent caller while this fetch was failing
                (DataStatus::Cached, cached.cached_at)
            };
            if let Some(payload) = decode_cached::<T>(&key, cached.data) {
                if status.is_degraded() {
                    warn!(
                        service = %self.name,
                        key = %key,
                        cached_at = %cached_at,
                        error = %error,
                        "upstream unavailable, serving stale cache entry"
                    );
                }
                return Ok(Resolved {
                    payload,
                    status,
                    stored_at: Some(cached_at),
                });
            }
        }

        match fallback {
            Some(payload) => {
                warn!(
                    service = %self.name,
                    key = %key,
                    error = %error,
                    "upstream unavailable and nothing cached, serving fallback data"
                );
                Ok(Resolved {
                    payload,
                    status: DataStatus::Fallback,
                    stored_at: None,
                })
            }
            None => Err(error),
        }
    }

    /// Fetches from the upstream, validates as `T` and caches the raw body
    async fn fetch_fresh<T: DeserializeOwned>(
        &self,
        key: &CacheKey,
        path: &str,
        params: Vec<(String, String)>,
    ) -> Result<T, FetchError> {
        let mut request = Request::get(format!("{}{}", self.base_url, path)).query(params);
        for (name, value) in &self.default_headers {
            request = request.header(name.clone(), value.clone());
        }

        let body = self.requester.fetch(&request).await?;
        let payload = serde_json::from_value::<T>(body.clone()).map_err(|e| {
            FetchError::InvalidResponse(format!("{} response for {}: {}", self.name, path, e))
        })?;

        self.cache.put(key.clone(), body);
        Ok(payload)
    }
}

fn collect_params<K, V, I>(params: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    params.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}

fn decode_cached<T: DeserializeOwned>(key: &CacheKey, data: Value) -> Option<T> {
    match serde_json::from_value(data) {
        Ok(payload) => Some(payload),
        Err(e) => {
            warn!(key = %key, error = %e, "ignoring cache entry that no longer matches the schema");
            None
        }
    }
}

fn slug(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}
