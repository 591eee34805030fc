//! Response caching for upstream API calls
//!
//! [`TtlCache`] is the in-memory layer every client reads first. It can write
//! through to a [`CacheManager`], which persists entries as JSON files so stale
//! responses are still available after a restart. Expired entries are kept and
//! handed out with an `is_expired` flag, which lets callers fall back to old
//! data when an upstream is unavailable.

mod clock;
mod key;
mod manager;
mod ttl;

pub use clock::{Clock, ManualClock, SystemClock};
pub use key::CacheKey;
pub use manager::{CacheManager, CachedData};
pub use ttl::TtlCache;
