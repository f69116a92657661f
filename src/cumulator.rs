//! Windowed counters used to bound retry and redirect storms.
//!
//! A counter is keyed by its factor list (principal, client address, ...)
//! and lives for `window` after the last accumulation. Arithmetic and TTL
//! refresh happen in one cache step, so concurrent requests never lose an
//! increment or leave a counter without expiry.

use crate::cache::{Cache, CacheError, CacheKey};
use std::time::Duration;
use tracing::debug;

#[derive(Clone)]
pub struct Cumulator {
    cache: Cache,
    name: String,
    window: Duration,
}

impl Cumulator {
    #[must_use]
    pub fn new(cache: Cache, name: &str, window: Duration) -> Self {
        Self {
            cache,
            name: name.to_string(),
            window,
        }
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    fn key(&self, factors: &[String]) -> CacheKey {
        CacheKey::new(format!("{}:{}", self.name, factors.join(":"))).with_ttl(self.window)
    }

    /// Add `weight` for `factors` and return the running total inside the window.
    ///
    /// # Errors
    /// Returns an error if the cache is unavailable.
    pub async fn accumulate(&self, factors: &[String], weight: u32) -> Result<i64, CacheError> {
        let total = self
            .cache
            .increment_get(&self.key(factors), i64::from(weight))
            .await?;
        debug!("cumulator {} {:?} total={total}", self.name, factors);
        Ok(total)
    }

    /// Current total without accumulating; zero once the window has elapsed.
    ///
    /// # Errors
    /// Returns an error if the cache is unavailable.
    pub async fn cumulative(&self, factors: &[String]) -> Result<i64, CacheError> {
        Ok(self
            .cache
            .get::<i64>(&self.key(factors))
            .await?
            .unwrap_or(0))
    }

    /// # Errors
    /// Returns an error if the cache is unavailable.
    pub async fn reset(&self, factors: &[String]) -> Result<(), CacheError> {
        self.cache.remove(&self.key(factors)).await?;
        Ok(())
    }
}
