//! In-process cache backend.
//!
//! Every operation runs under a single lock, so compound operations
//! (arithmetic + TTL, put-if-absent + TTL) are atomic. Expiry uses
//! `tokio::time::Instant`, which lets tests drive the clock with
//! `tokio::time::advance`. Expired entries are evicted when read and swept
//! from the whole store on the first write after [`SWEEP_INTERVAL`].

use super::{CacheError, HashStore, KeyValueStore, Ttl, TTL_ABSENT};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

/// Minimum time between two full sweeps of expired entries.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }

    fn ttl(&self, now: Instant) -> Ttl {
        match self.expires_at {
            Some(at) => Ttl::Expires(at.saturating_duration_since(now)),
            None => Ttl::Persistent,
        }
    }
}

#[derive(Debug, Default)]
struct Table {
    fields: HashMap<String, Vec<u8>>,
    expires_at: Option<Instant>,
}

impl Table {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

#[derive(Debug, Default)]
struct Inner {
    values: HashMap<String, Entry>,
    tables: HashMap<String, Table>,
    next_sweep: Option<Instant>,
}

impl Inner {
    /// Drop every expired entry and table once per [`SWEEP_INTERVAL`].
    fn sweep(&mut self, now: Instant) {
        match self.next_sweep {
            Some(at) if now >= at => {
                let before = self.values.len() + self.tables.len();
                self.values.retain(|_, entry| entry.live(now));
                self.tables.retain(|_, table| table.live(now));
                let released = before - self.values.len() - self.tables.len();
                if released > 0 {
                    trace!("swept {released} expired entries");
                }
            }
            Some(_) => return,
            None => {}
        }
        self.next_sweep = Some(now + SWEEP_INTERVAL);
    }

    /// Live entry for `key`; expired entries are evicted on access.
    fn live_entry(&mut self, key: &str, now: Instant) -> Option<&mut Entry> {
        if self.values.get(key).is_some_and(|entry| !entry.live(now)) {
            self.values.remove(key);
        }
        self.values.get_mut(key)
    }

    fn live_table(&mut self, name: &str, now: Instant) -> Option<&mut Table> {
        if self.tables.get(name).is_some_and(|table| !table.live(now)) {
            self.tables.remove(name);
        }
        self.tables.get_mut(name)
    }

    fn add(&mut self, key: &str, delta: i64, ttl: Option<Duration>) -> Result<i64, CacheError> {
        let now = Instant::now();
        self.sweep(now);
        let current = match self.live_entry(key, now) {
            Some(entry) => parse_integer(key, &entry.value)?,
            None => 0,
        };
        let next = current.saturating_add(delta);
        let expires_at = match (ttl, self.values.get(key)) {
            (Some(ttl), _) => Some(now + ttl),
            (None, Some(entry)) => entry.expires_at,
            (None, None) => None,
        };
        self.values.insert(
            key.to_string(),
            Entry {
                value: next.to_string().into_bytes(),
                expires_at,
            },
        );
        Ok(next)
    }
}

fn parse_integer(key: &str, value: &[u8]) -> Result<i64, CacheError> {
    std::str::from_utf8(value)
        .ok()
        .and_then(|text| text.trim().parse::<i64>().ok())
        .ok_or_else(|| CacheError::NotAnInteger(key.to_string()))
}

/// Single-process implementation of both cache interfaces.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut inner = self.inner.lock().await;
        Ok(inner
            .live_entry(key, Instant::now())
            .map(|entry| entry.value.clone()))
    }

    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        trace!("put {key}");
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        inner.sweep(now);
        inner.values.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: ttl.map(|ttl| now + ttl),
            },
        );
        Ok(())
    }

    async fn put_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        inner.sweep(now);
        if inner.live_entry(key, now).is_some() {
            return Ok(false);
        }
        inner.values.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: ttl.map(|ttl| now + ttl),
            },
        );
        Ok(true)
    }

    async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        Ok(inner
            .values
            .remove(key)
            .is_some_and(|entry| entry.live(now)))
    }

    async fn increment_get(
        &self,
        key: &str,
        delta: i64,
        ttl: Option<Duration>,
    ) -> Result<i64, CacheError> {
        self.inner.lock().await.add(key, delta, ttl)
    }

    async fn decrement_get(
        &self,
        key: &str,
        delta: i64,
        ttl: Option<Duration>,
    ) -> Result<i64, CacheError> {
        self.inner
            .lock()
            .await
            .add(key, delta.saturating_neg(), ttl)
    }

    async fn time_to_live(
        &self,
        key: &str,
        seed: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<i64, CacheError> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        inner.sweep(now);
        let previous = match inner.live_entry(key, now) {
            Some(entry) => entry.ttl(now).as_millis(),
            None => {
                inner.values.insert(
                    key.to_string(),
                    Entry {
                        value: seed,
                        expires_at: None,
                    },
                );
                TTL_ABSENT
            }
        };
        if let (Some(ttl), Some(entry)) = (ttl, inner.values.get_mut(key)) {
            entry.expires_at = Some(now + ttl);
        }
        Ok(previous)
    }

    async fn ttl(&self, key: &str) -> Result<Ttl, CacheError> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        Ok(inner
            .live_entry(key, now)
            .map_or(Ttl::Missing, |entry| entry.ttl(now)))
    }
}

#[async_trait]
impl HashStore for MemoryStore {
    async fn map_put_all(
        &self,
        name: &str,
        fields: HashMap<String, Vec<u8>>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        if fields.is_empty() {
            return Ok(());
        }
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        inner.sweep(now);
        if inner.live_table(name, now).is_none() {
            inner.tables.insert(name.to_string(), Table::default());
        }
        if let Some(table) = inner.tables.get_mut(name) {
            table.fields.extend(fields);
            if let Some(ttl) = ttl {
                table.expires_at = Some(now + ttl);
            }
        }
        Ok(())
    }

    async fn map_put_if_absent(
        &self,
        name: &str,
        field: &str,
        value: Vec<u8>,
    ) -> Result<bool, CacheError> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        inner.sweep(now);
        if inner.live_table(name, now).is_none() {
            inner.tables.insert(name.to_string(), Table::default());
        }
        let Some(table) = inner.tables.get_mut(name) else {
            return Ok(false);
        };
        if table.fields.contains_key(field) {
            return Ok(false);
        }
        table.fields.insert(field.to_string(), value);
        Ok(true)
    }

    async fn map_get_field(&self, name: &str, field: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut inner = self.inner.lock().await;
        Ok(inner
            .live_table(name, Instant::now())
            .and_then(|table| table.fields.get(field).cloned()))
    }

    async fn map_get_all(&self, name: &str) -> Result<HashMap<String, Vec<u8>>, CacheError> {
        let mut inner = self.inner.lock().await;
        Ok(inner
            .live_table(name, Instant::now())
            .map(|table| table.fields.clone())
            .unwrap_or_default())
    }

    async fn map_remove(&self, name: &str, field: &str) -> Result<bool, CacheError> {
        let mut inner = self.inner.lock().await;
        Ok(inner
            .live_table(name, Instant::now())
            .is_some_and(|table| table.fields.remove(field).is_some()))
    }

    async fn map_remove_all(&self, name: &str) -> Result<(), CacheError> {
        self.inner.lock().await.tables.remove(name);
        Ok(())
    }

    async fn expire_map(&self, name: &str, ttl: Duration) -> Result<bool, CacheError> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        Ok(match inner.live_table(name, now) {
            Some(table) => {
                table.expires_at = Some(now + ttl);
                true
            }
            None => false,
        })
    }
}
