//! Disk tier for cached API responses
//!
//! Provides a `CacheManager` that stores serializable data to JSON files with
//! expiry timestamps, so stale responses survive restarts and can still be
//! served when an upstream is down.

use chrono::{DateTime, Duration, Utc};
use directories::ProjectDirs;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::CacheKey;

/// Wrapper struct for cached data stored on disk
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry<T> {
    /// The canonical key, kept for inspection of the cache directory
    key: String,
    /// The cached data
    data: T,
    /// When the data was cached
    cached_at: DateTime<Utc>,
    /// When the cache entry expires
    expires_at: DateTime<Utc>,
}

/// Result of reading from cache, including metadata about cache freshness
#[derive(Debug, Clone, PartialEq)]
pub struct CachedData<T> {
    /// The cached data
    pub data: T,
    /// When the data was originally cached
    pub cached_at: DateTime<Utc>,
    /// Whether the cache entry has expired
    pub is_expired: bool,
}

/// Manages reading and writing cached data to disk
///
/// The cache manager stores data as JSON files in an XDG-compliant cache directory
/// (`~/.cache/tidestomes/` on Linux). Each cache entry includes an expiry timestamp,
/// and expired entries are still returned (with `is_expired = true`) to support
/// graceful degradation.
#[derive(Debug, Clone)]
pub struct CacheManager {
    /// Directory where cache files are stored
    cache_dir: PathBuf,
}

impl CacheManager {
    /// Creates a new CacheManager using XDG-compliant cache directory
    ///
    /// Returns `None` if the cache directory cannot be determined (e.g., no home directory).
    pub fn new() -> Option<Self> {
        let project_dirs = ProjectDirs::from("", "", "tidestomes")?;
        let cache_dir = project_dirs.cache_dir().to_path_buf();
        Some(Self { cache_dir })
    }

    /// Creates a new CacheManager with a custom cache directory
    pub fn with_dir(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    /// Returns a manager rooted in a subdirectory, one per upstream
    pub fn scoped(&self, name: &str) -> Self {
        Self {
            cache_dir: self.cache_dir.join(name),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Returns the path to a cache file for the given key
    fn cache_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir.join(format!("{}.json", key.file_stem()))
    }

    /// Ensures the cache directory exists
    fn ensure_dir(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.cache_dir)
    }

    /// Writes data stamped at `cached_at`, expiring `ttl` later
    ///
    /// # Returns
    /// * `Ok(())` on success
    /// * `Err` if directory creation or file writing fails
    pub fn write<T: Serialize>(
        &self,
        key: &CacheKey,
        data: &T,
        cached_at: DateTime<Utc>,
        ttl: Duration,
    ) -> std::io::Result<()> {
        let expires_at = cached_at.checked_add_signed(ttl).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "cache ttl out of range")
        })?;
        self.ensure_dir()?;

        let entry = CacheEntry {
            key: key.to_string(),
            data,
            cached_at,
            expires_at,
        };

        let json = serde_json::to_string_pretty(&entry)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        fs::write(self.cache_path(key), json)?;
        debug!(key = %key, dir = %self.cache_dir.display(), "wrote cache file");
        Ok(())
    }

    /// Reads data from the cache, judging expiry against `now`
    ///
    /// Returns `None` if the cache entry doesn't exist or cannot be parsed.
    /// Returns `Some(CachedData)` with `is_expired = true` if the entry exists but has expired,
    /// allowing for graceful degradation when APIs are unavailable.
    pub fn read<T: DeserializeOwned>(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<CachedData<T>> {
        let path = self.cache_path(key);
        let content = fs::read_to_string(path).ok()?;
        let entry: CacheEntry<T> = serde_json::from_str(&content).ok()?;

        Some(CachedData {
            data: entry.data,
            cached_at: entry.cached_at,
            is_expired: now >= entry.expires_at,
        })
    }

    /// Deletes the file for `key`, if any
    pub fn remove(&self, key: &CacheKey) -> std::io::Result<()> {
        match fs::remove_file(self.cache_path(key)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}
