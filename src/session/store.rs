use super::{generate_token, now_ms, Session, SessionError};
use crate::cache::{Cache, CacheKey};
use std::time::Duration;
use tracing::{debug, instrument};

/// Sessions keyed by id inside one cache name. The cache entry's TTL follows
/// the session's remaining lifetime, so idle sessions disappear on their own.
#[derive(Clone)]
pub struct SessionStore {
    cache: Cache,
    timeout: Duration,
}

impl SessionStore {
    #[must_use]
    pub fn new(cache: Cache, timeout: Duration) -> Self {
        Self { cache, timeout }
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn key(id: &str) -> CacheKey {
        CacheKey::new(id)
    }

    /// # Errors
    /// Returns an error if the cache is unavailable or the RNG fails.
    pub async fn create(&self) -> Result<Session, SessionError> {
        let timeout_ms = i64::try_from(self.timeout.as_millis()).unwrap_or(i64::MAX);
        let session = Session::new(generate_token("")?, now_ms(), timeout_ms);
        self.save(&session).await?;
        debug!("created session");
        Ok(session)
    }

    /// Load a live session and record the access.
    ///
    /// # Errors
    /// Returns an error if the cache is unavailable.
    #[instrument(skip_all)]
    pub async fn load(&self, id: &str) -> Result<Option<Session>, SessionError> {
        let Some(mut session) = self.cache.get::<Session>(&Self::key(id)).await? else {
            return Ok(None);
        };
        let now = now_ms();
        if session.is_expired(now) {
            self.cache.remove(&Self::key(id)).await?;
            return Ok(None);
        }
        session.touch(now);
        self.save(&session).await?;
        Ok(Some(session))
    }

    /// Store `session` for its remaining lifetime. A session that has
    /// already idled out is removed instead.
    ///
    /// # Errors
    /// Returns an error if the cache is unavailable.
    pub async fn save(&self, session: &Session) -> Result<(), SessionError> {
        let key = match session.remaining(now_ms()) {
            Some(ttl) if ttl.is_zero() => {
                debug!("dropping expired session instead of saving it");
                self.cache.remove(&Self::key(session.id())).await?;
                return Ok(());
            }
            Some(ttl) => Self::key(session.id()).with_ttl(ttl),
            None => Self::key(session.id()),
        };
        self.cache.put(&key, session).await?;
        Ok(())
    }

    /// # Errors
    /// Returns [`SessionError::AlreadyInvalid`] when no such session exists.
    pub async fn invalidate(&self, id: &str) -> Result<(), SessionError> {
        if self.cache.remove(&Self::key(id)).await? {
            debug!("invalidated session");
            Ok(())
        } else {
            Err(SessionError::AlreadyInvalid(id.to_string()))
        }
    }
}
