//! Cache-backed sessions and ticket bindings.
//!
//! Sessions never live in process memory: every request loads the record
//! from the shared cache, mutates it and saves it back, so any node can serve
//! any request.

mod binding;
mod store;

pub use binding::TicketBindingStore;
pub use store::SessionStore;

use crate::cache::CacheError;
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session '{0}' is already invalid")]
    AlreadyInvalid(String),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("failed to generate random identifier: {0}")]
    Random(String),
}

/// Wall clock in milliseconds since the epoch.
#[must_use]
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
        })
}

/// 32 random bytes, base64url without padding, behind `prefix`.
///
/// # Errors
/// Returns an error if the operating system RNG fails.
pub fn generate_token(prefix: &str) -> Result<String, SessionError> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|err| SessionError::Random(err.to_string()))?;
    Ok(format!("{prefix}{}", Base64UrlUnpadded::encode_string(&bytes)))
}

/// A stored attribute, optionally expiring before the session itself.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at_ms: Option<i64>,
}

impl Attribute {
    fn live(&self, now_ms: i64) -> bool {
        self.expires_at_ms.is_none_or(|at| now_ms < at)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    id: String,
    start_ms: i64,
    #[serde(default)]
    last_access_ms: Option<i64>,
    /// Idle timeout; a negative value never expires.
    timeout_ms: i64,
    #[serde(default)]
    attributes: HashMap<String, Attribute>,
}

impl Session {
    #[must_use]
    pub fn new(id: String, now_ms: i64, timeout_ms: i64) -> Self {
        Self {
            id,
            start_ms: now_ms,
            last_access_ms: None,
            timeout_ms,
            attributes: HashMap::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn start_ms(&self) -> i64 {
        self.start_ms
    }

    #[must_use]
    pub fn last_access_ms(&self) -> Option<i64> {
        self.last_access_ms
    }

    #[must_use]
    pub fn timeout_ms(&self) -> i64 {
        self.timeout_ms
    }

    pub fn touch(&mut self, now_ms: i64) {
        self.last_access_ms = Some(now_ms);
    }

    /// Milliseconds left before the session idles out, measured from the last
    /// access (or the start when never accessed).
    #[must_use]
    pub fn remaining_ms(&self, now_ms: i64) -> i64 {
        if self.timeout_ms < 0 {
            return i64::MAX;
        }
        let since = self.last_access_ms.unwrap_or(self.start_ms);
        self.timeout_ms - (now_ms - since)
    }

    #[must_use]
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.remaining_ms(now_ms) <= 0
    }

    /// Remaining lifetime as a TTL, `None` for sessions that never expire.
    /// Expired sessions report [`Duration::ZERO`].
    #[must_use]
    pub fn remaining(&self, now_ms: i64) -> Option<Duration> {
        if self.timeout_ms < 0 {
            return None;
        }
        let left = u64::try_from(self.remaining_ms(now_ms)).unwrap_or(0);
        Some(Duration::from_millis(left))
    }

    /// Bind `value` under `name`, expiring after `expire` when given.
    ///
    /// # Errors
    /// Returns an error if the value cannot be represented as JSON.
    pub fn bind<T: Serialize + ?Sized>(
        &mut self,
        name: &str,
        value: &T,
        expire: Option<Duration>,
        now_ms: i64,
    ) -> Result<(), serde_json::Error> {
        let expires_at_ms = expire.map(|ttl| {
            now_ms.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
        });
        self.attributes.insert(
            name.to_string(),
            Attribute {
                value: serde_json::to_value(value)?,
                expires_at_ms,
            },
        );
        Ok(())
    }

    /// Live attribute value; expired or mistyped values read as absent.
    #[must_use]
    pub fn get<T: DeserializeOwned>(&self, name: &str, now_ms: i64) -> Option<T> {
        self.attributes
            .get(name)
            .filter(|attribute| attribute.live(now_ms))
            .and_then(|attribute| serde_json::from_value(attribute.value.clone()).ok())
    }

    /// Read and unbind in one step.
    pub fn take<T: DeserializeOwned>(&mut self, name: &str, now_ms: i64) -> Option<T> {
        self.attributes
            .remove(name)
            .filter(|attribute| attribute.live(now_ms))
            .and_then(|attribute| serde_json::from_value(attribute.value).ok())
    }

    pub fn unbind(&mut self, name: &str) -> bool {
        self.attributes.remove(name).is_some()
    }

    /// Live attributes as plain JSON, used when handing session state to a
    /// relying client.
    #[must_use]
    pub fn attributes(&self, now_ms: i64) -> HashMap<String, Value> {
        self.attributes
            .iter()
            .filter(|(_, attribute)| attribute.live(now_ms))
            .map(|(name, attribute)| (name.clone(), attribute.value.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_counts_from_last_access_or_start() {
        let mut session = Session::new("s".to_string(), 1_000, 30_000);
        assert_eq!(session.remaining_ms(11_000), 20_000);
        session.touch(20_000);
        assert_eq!(session.remaining_ms(25_000), 25_000);
        assert!(session.is_expired(50_000));
        assert_eq!(session.remaining(25_000), Some(Duration::from_millis(25_000)));
        assert_eq!(session.remaining(50_000), Some(Duration::ZERO));
        assert_eq!(session.remaining(90_000), Some(Duration::ZERO));
    }

    #[test]
    fn negative_timeout_never_expires() {
        let session = Session::new("s".to_string(), 0, -1);
        assert!(!session.is_expired(i64::MAX / 2));
        assert_eq!(session.remaining(10), None);
    }

    #[test]
    fn relation_attribute_expires_on_its_own() -> Result<(), serde_json::Error> {
        let mut session = Session::new("s".to_string(), 0, 60_000);
        session.bind("index", &3u32, Some(Duration::from_secs(10)), 0)?;
        session.bind("principal", "alice", None, 0)?;

        assert_eq!(session.get::<u32>("index", 9_999), Some(3));
        assert_eq!(session.get::<u32>("index", 10_000), None);
        assert_eq!(session.get::<String>("principal", 59_000).as_deref(), Some("alice"));
        assert_eq!(session.attributes(20_000).len(), 1);
        Ok(())
    }

    #[test]
    fn take_unbinds() -> Result<(), serde_json::Error> {
        let mut session = Session::new("s".to_string(), 0, 60_000);
        session.bind("index", &7u32, None, 0)?;
        assert_eq!(session.take::<u32>("index", 1), Some(7));
        assert_eq!(session.take::<u32>("index", 1), None);
        assert!(!session.unbind("index"));
        Ok(())
    }

    #[test]
    fn generated_tokens_are_prefixed_and_unique() -> Result<(), SessionError> {
        let first = generate_token("ST-")?;
        let second = generate_token("ST-")?;
        assert!(first.starts_with("ST-"));
        assert_eq!(first.len(), 3 + 43);
        assert_ne!(first, second);
        Ok(())
    }
}
