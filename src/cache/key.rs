//! Canonical cache keys derived from request parameters

use std::fmt;

use url::form_urlencoded;

/// Longest slug kept in a cache file name before the digest
const MAX_SLUG_LEN: usize = 64;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// A deterministic key for one logical upstream request
///
/// Built from the endpoint plus its query parameters sorted by name, so two
/// calls with the same parameter set always share a key no matter what order
/// the caller supplied them in. Names and values are form-urlencoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Builds a key from an endpoint and its parameters
    pub fn new<K, V, I>(endpoint: &str, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::with_redactions(endpoint, params, &[])
    }

    /// Builds a key, leaving out parameters named in `redacted`
    ///
    /// Credentials travel as query parameters for some upstreams; they do not
    /// change the response and must not end up on disk.
    pub fn with_redactions<K, V, I>(endpoint: &str, params: I, redacted: &[String]) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut sorted: Vec<(String, String)> = params
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(k, _)| !redacted.iter().any(|r| r == k))
            .collect();
        // repeated names are all sent upstream, so all of them stay in the key
        sorted.sort();

        if sorted.is_empty() {
            return Self(endpoint.to_string());
        }

        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(&sorted)
            .finish();

        Self(format!("{}?{}", endpoint, query))
    }

    /// Wraps an already-canonical key string
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A filesystem-safe name for this key
    ///
    /// The readable slug can collide after sanitising, so a digest of the full
    /// key is appended.
    pub fn file_stem(&self) -> String {
        let mut slug: String = self
            .0
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
            .collect();
        slug.truncate(MAX_SLUG_LEN);
        format!("{}-{:016x}", slug.trim_matches('_'), fnv1a(self.0.as_bytes()))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(raw: &str) -> Self {
        Self::from_raw(raw)
    }
}

/// 64-bit FNV-1a; stable across builds, unlike `DefaultHasher`
fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(FNV_PRIME)
    })
}
