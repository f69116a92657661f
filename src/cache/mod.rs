//! Namespaced key/value cache shared by every node.
//!
//! The cache is split in two narrow interfaces:
//!
//! - [`KeyValueStore`]: plain keys with TTL, atomic counters and put-if-absent.
//! - [`HashStore`]: small flat field tables scoped under one cache name.
//!
//! Compound operations (`increment_get` plus TTL, `put_if_absent` plus TTL) are
//! atomic inside the store; callers never lock across two cache calls.
//! There is no enumeration (`size`, `keys`, `values`).

mod key;
mod manager;
mod memory;

pub use key::CacheKey;
pub use manager::{Cache, CacheManager, HashCache};
pub use memory::MemoryStore;

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// TTL reported by [`KeyValueStore::time_to_live`] when the key did not exist.
pub const TTL_ABSENT: i64 = -2;
/// TTL reported by [`KeyValueStore::time_to_live`] when the key never expires.
pub const TTL_PERSISTENT: i64 = -1;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
    #[error("cache value for '{key}' could not be (de)serialized: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("cache value for '{0}' is not an integer")]
    NotAnInteger(String),
}

/// Remaining lifetime of a stored key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    Missing,
    Persistent,
    Expires(Duration),
}

impl Ttl {
    /// Redis-style millisecond encoding (`-2` missing, `-1` persistent).
    #[must_use]
    pub fn as_millis(self) -> i64 {
        match self {
            Self::Missing => TTL_ABSENT,
            Self::Persistent => TTL_PERSISTENT,
            Self::Expires(remaining) => i64::try_from(remaining.as_millis()).unwrap_or(i64::MAX),
        }
    }
}

/// Plain key/value operations. Keys arrive fully qualified (namespace applied).
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>)
        -> Result<(), CacheError>;

    /// Store only when the key is absent. The TTL is applied in the same step.
    async fn put_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError>;

    /// Returns `true` when a value was removed.
    async fn remove(&self, key: &str) -> Result<bool, CacheError>;

    /// Add `delta` (a missing key counts as zero) and re-apply `ttl` atomically.
    async fn increment_get(
        &self,
        key: &str,
        delta: i64,
        ttl: Option<Duration>,
    ) -> Result<i64, CacheError>;

    /// Subtract `delta` and re-apply `ttl` atomically.
    async fn decrement_get(
        &self,
        key: &str,
        delta: i64,
        ttl: Option<Duration>,
    ) -> Result<i64, CacheError>;

    /// Create the key with `seed` when absent, report the TTL it had before the
    /// call, then apply `ttl` when one is given.
    async fn time_to_live(
        &self,
        key: &str,
        seed: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<i64, CacheError>;

    async fn ttl(&self, key: &str) -> Result<Ttl, CacheError>;
}

/// Field tables scoped under one cache name.
#[async_trait]
pub trait HashStore: Send + Sync {
    async fn map_put_all(
        &self,
        name: &str,
        fields: HashMap<String, Vec<u8>>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>;

    /// Set the field only when absent. Returns `true` when this call stored it.
    async fn map_put_if_absent(
        &self,
        name: &str,
        field: &str,
        value: Vec<u8>,
    ) -> Result<bool, CacheError>;

    async fn map_get_field(&self, name: &str, field: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn map_get_all(&self, name: &str) -> Result<HashMap<String, Vec<u8>>, CacheError>;

    async fn map_remove(&self, name: &str, field: &str) -> Result<bool, CacheError>;

    async fn map_remove_all(&self, name: &str) -> Result<(), CacheError>;

    /// Returns `false` when the table does not exist.
    async fn expire_map(&self, name: &str, ttl: Duration) -> Result<bool, CacheError>;
}
