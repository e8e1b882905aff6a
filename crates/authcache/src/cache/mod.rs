//! Version-keyed verification caches.
//!
//! Each cache key embeds the snapshot version stamp it was computed under, so
//! a version bump makes older entries unreachable without any purge. They are
//! reclaimed only by ordinary LRU eviction.

pub mod keys;
pub mod lru;

pub use self::keys::{CachedIdentity, CertKey, PasswordKey, PermissionKey};
pub use self::lru::{CacheStatistics, CacheStatsSnapshot, LruCache};
