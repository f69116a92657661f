use super::{CacheError, CacheKey, HashStore, KeyValueStore, MemoryStore, Ttl};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Hands out namespaced cache handles over one shared backend.
#[derive(Clone)]
pub struct CacheManager {
    prefix: String,
    kv: Arc<dyn KeyValueStore>,
    hash: Arc<dyn HashStore>,
}

impl CacheManager {
    /// `prefix` is normalized so `iam-web` and `iam_web` share a namespace.
    #[must_use]
    pub fn new(prefix: &str, kv: Arc<dyn KeyValueStore>, hash: Arc<dyn HashStore>) -> Self {
        Self {
            prefix: prefix.trim().replace(['-', ' ', '.'], "_"),
            kv,
            hash,
        }
    }

    /// Manager backed by a fresh in-process store.
    #[must_use]
    pub fn in_memory(prefix: &str) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::new(prefix, store.clone(), store)
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[must_use]
    pub fn cache(&self, name: &str) -> Cache {
        Cache {
            name: self.cache_name(name),
            kv: self.kv.clone(),
        }
    }

    #[must_use]
    pub fn hash_cache(&self, name: &str) -> HashCache {
        HashCache {
            name: self.cache_name(name),
            hash: self.hash.clone(),
        }
    }

    fn cache_name(&self, name: &str) -> String {
        format!("{}:{name}", self.prefix)
    }
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

fn encode<T: Serialize + ?Sized>(key: &str, value: &T) -> Result<Vec<u8>, CacheError> {
    serde_json::to_vec(value).map_err(|source| CacheError::Serialization {
        key: key.to_string(),
        source,
    })
}

fn decode<T: DeserializeOwned>(key: &str, data: &[u8]) -> Result<T, CacheError> {
    serde_json::from_slice(data).map_err(|source| CacheError::Serialization {
        key: key.to_string(),
        source,
    })
}

/// Typed (JSON) view over the key/value interface for one cache name.
#[derive(Clone)]
pub struct Cache {
    name: String,
    kv: Arc<dyn KeyValueStore>,
}

impl Cache {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<T>, CacheError> {
        let full = key.qualified(&self.name);
        debug!("get key={key}");
        match self.kv.get(&full).await? {
            Some(data) => decode(&full, &data).map(Some),
            None => Ok(None),
        }
    }

    pub async fn put<T: Serialize + ?Sized>(
        &self,
        key: &CacheKey,
        value: &T,
    ) -> Result<(), CacheError> {
        let full = key.qualified(&self.name);
        debug!("put key={key}");
        let data = encode(&full, value)?;
        self.kv.put(&full, data, key.ttl()).await
    }

    pub async fn put_if_absent<T: Serialize + ?Sized>(
        &self,
        key: &CacheKey,
        value: &T,
    ) -> Result<bool, CacheError> {
        let full = key.qualified(&self.name);
        let data = encode(&full, value)?;
        self.kv.put_if_absent(&full, data, key.ttl()).await
    }

    pub async fn remove(&self, key: &CacheKey) -> Result<bool, CacheError> {
        debug!("remove key={key}");
        self.kv.remove(&key.qualified(&self.name)).await
    }

    pub async fn increment_get(&self, key: &CacheKey, delta: i64) -> Result<i64, CacheError> {
        self.kv
            .increment_get(&key.qualified(&self.name), delta, key.ttl())
            .await
    }

    pub async fn decrement_get(&self, key: &CacheKey, delta: i64) -> Result<i64, CacheError> {
        self.kv
            .decrement_get(&key.qualified(&self.name), delta, key.ttl())
            .await
    }

    pub async fn time_to_live<T: Serialize + ?Sized>(
        &self,
        key: &CacheKey,
        seed: &T,
    ) -> Result<i64, CacheError> {
        let full = key.qualified(&self.name);
        let data = encode(&full, seed)?;
        self.kv.time_to_live(&full, data, key.ttl()).await
    }

    pub async fn ttl(&self, key: &CacheKey) -> Result<Ttl, CacheError> {
        self.kv.ttl(&key.qualified(&self.name)).await
    }
}

/// Typed (JSON) view over one field table.
#[derive(Clone)]
pub struct HashCache {
    name: String,
    hash: Arc<dyn HashStore>,
}

impl HashCache {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store one field; the field key's TTL, when set, applies to the table.
    pub async fn map_put<T: Serialize + ?Sized>(
        &self,
        field: &CacheKey,
        value: &T,
    ) -> Result<(), CacheError> {
        let mut fields = HashMap::with_capacity(1);
        fields.insert(field.name().to_string(), encode(field.name(), value)?);
        self.hash.map_put_all(&self.name, fields, field.ttl()).await
    }

    pub async fn map_put_all<T: Serialize>(
        &self,
        values: &HashMap<String, T>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let mut fields = HashMap::with_capacity(values.len());
        for (field, value) in values {
            fields.insert(field.clone(), encode(field, value)?);
        }
        self.hash.map_put_all(&self.name, fields, ttl).await
    }

    pub async fn map_put_if_absent<T: Serialize + ?Sized>(
        &self,
        field: &CacheKey,
        value: &T,
    ) -> Result<bool, CacheError> {
        let data = encode(field.name(), value)?;
        self.hash
            .map_put_if_absent(&self.name, field.name(), data)
            .await
    }

    pub async fn map_get_field<T: DeserializeOwned>(
        &self,
        field: &CacheKey,
    ) -> Result<Option<T>, CacheError> {
        match self.hash.map_get_field(&self.name, field.name()).await? {
            Some(data) => decode(field.name(), &data).map(Some),
            None => Ok(None),
        }
    }

    pub async fn map_get_all<T: DeserializeOwned>(&self) -> Result<HashMap<String, T>, CacheError> {
        let mut values = HashMap::new();
        for (field, data) in self.hash.map_get_all(&self.name).await? {
            let value = decode(&field, &data)?;
            values.insert(field, value);
        }
        Ok(values)
    }

    pub async fn map_remove(&self, field: &str) -> Result<bool, CacheError> {
        self.hash.map_remove(&self.name, field).await
    }

    pub async fn map_remove_all(&self) -> Result<(), CacheError> {
        self.hash.map_remove_all(&self.name).await
    }

    pub async fn expire_map(&self, ttl: Duration) -> Result<bool, CacheError> {
        self.hash.expire_map(&self.name, ttl).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Grant {
        principal: String,
        apps: Vec<String>,
    }

    #[test]
    fn prefix_is_normalized() {
        let manager = CacheManager::in_memory("iam-web");
        assert_eq!(manager.prefix(), "iam_web");
        assert_eq!(manager.cache("ticket").name(), "iam_web:ticket");
    }

    #[tokio::test]
    async fn typed_values_round_trip_through_json() -> Result<(), CacheError> {
        let manager = CacheManager::in_memory("test");
        let cache = manager.cache("grants");
        let key = CacheKey::new("alice");
        let grant = Grant {
            principal: "alice".to_string(),
            apps: vec!["portal".to_string()],
        };

        cache.put(&key, &grant).await?;
        assert_eq!(cache.get::<Grant>(&key).await?, Some(grant));
        assert!(manager.cache("other").get::<Grant>(&key).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn counters_share_storage_with_typed_reads() -> Result<(), CacheError> {
        let cache = CacheManager::in_memory("test").cache("counters");
        let key = CacheKey::new("c");
        cache.increment_get(&key, 4).await?;
        assert_eq!(cache.decrement_get(&key, 1).await?, 3);
        assert_eq!(cache.get::<i64>(&key).await?, Some(3));
        Ok(())
    }

    #[tokio::test]
    async fn decode_failure_is_a_serialization_error() -> Result<(), CacheError> {
        let cache = CacheManager::in_memory("test").cache("mixed");
        let key = CacheKey::new("k");
        cache.put(&key, "text").await?;
        assert!(matches!(
            cache.get::<Grant>(&key).await,
            Err(CacheError::Serialization { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn hash_cache_typed_fields() -> Result<(), CacheError> {
        let pool = CacheManager::in_memory("test").hash_cache("pool");
        assert!(pool.map_put_if_absent(&CacheKey::new("0"), "first").await?);
        assert!(!pool.map_put_if_absent(&CacheKey::new("0"), "second").await?);
        pool.map_put(&CacheKey::new("1"), "other").await?;

        let first: Option<String> = pool.map_get_field(&CacheKey::new("0")).await?;
        assert_eq!(first.as_deref(), Some("first"));
        let all: HashMap<String, String> = pool.map_get_all().await?;
        assert_eq!(all.len(), 2);

        pool.map_remove_all().await?;
        let all: HashMap<String, String> = pool.map_get_all().await?;
        assert!(all.is_empty());
        Ok(())
    }
}
