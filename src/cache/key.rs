use std::fmt;
use std::time::Duration;

/// Logical cache key with an optional TTL.
///
/// Values are serialized as JSON. A zero TTL means "no expiry".
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheKey {
    name: String,
    ttl: Option<Duration>,
}

impl CacheKey {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ttl: None,
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = (!ttl.is_zero()).then_some(ttl);
        self
    }

    /// Millisecond TTL as carried by session timeouts; `<= 0` disables expiry.
    #[must_use]
    pub fn with_ttl_ms(self, ttl_ms: i64) -> Self {
        match u64::try_from(ttl_ms) {
            Ok(ms) if ms > 0 => self.with_ttl(Duration::from_millis(ms)),
            _ => Self {
                name: self.name,
                ttl: None,
            },
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    #[must_use]
    pub fn has_expire(&self) -> bool {
        self.ttl.is_some()
    }

    /// Fully qualified key inside `cache_name`.
    #[must_use]
    pub fn qualified(&self, cache_name: &str) -> String {
        format!("{cache_name}:{}", self.name)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ttl {
            Some(ttl) => write!(f, "{} (ttl {}ms)", self.name, ttl.as_millis()),
            None => write!(f, "{}", self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_positive_ttl_means_no_expiry() {
        assert!(!CacheKey::new("a").with_ttl_ms(0).has_expire());
        assert!(!CacheKey::new("a").with_ttl_ms(-5).has_expire());
        assert!(!CacheKey::new("a").with_ttl(Duration::ZERO).has_expire());
        assert_eq!(
            CacheKey::new("a").with_ttl_ms(1500).ttl(),
            Some(Duration::from_millis(1500))
        );
    }

    #[test]
    fn qualified_joins_cache_name() {
        assert_eq!(
            CacheKey::new("ST-1").qualified("fastcas:ticket"),
            "fastcas:ticket:ST-1"
        );
    }
}
