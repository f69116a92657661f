use crate::cache::{Cache, CacheError, CacheKey, Ttl};
use std::time::Duration;
use tracing::{debug, instrument};

/// Bidirectional ticket <-> session index.
///
/// Both directions share one TTL so neither side outlives the other, and a
/// consumed marker makes redemption single-use across nodes.
#[derive(Clone)]
pub struct TicketBindingStore {
    cache: Cache,
}

impl TicketBindingStore {
    #[must_use]
    pub fn new(cache: Cache) -> Self {
        Self { cache }
    }

    fn ticket_key(ticket: &str) -> CacheKey {
        CacheKey::new(format!("ticket:{ticket}"))
    }

    fn session_key(session_id: &str) -> CacheKey {
        CacheKey::new(format!("session:{session_id}"))
    }

    fn consumed_key(ticket: &str) -> CacheKey {
        CacheKey::new(format!("consumed:{ticket}"))
    }

    /// Bind `ticket` to `session_id`. Returns once both writes are stored.
    /// A zero `ttl` (session already expired) binds nothing.
    ///
    /// # Errors
    /// Returns an error if the cache is unavailable.
    #[instrument(skip_all)]
    pub async fn bind(
        &self,
        ticket: &str,
        session_id: &str,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        if ttl.is_some_and(|ttl| ttl.is_zero()) {
            debug!("session expired before the ticket could be bound");
            return Ok(());
        }
        let with_ttl = |key: CacheKey| match ttl {
            Some(ttl) => key.with_ttl(ttl),
            None => key,
        };
        self.cache
            .put(&with_ttl(Self::ticket_key(ticket)), session_id)
            .await?;
        self.cache
            .put(&with_ttl(Self::session_key(session_id)), ticket)
            .await?;
        debug!("bound ticket to session");
        Ok(())
    }

    /// # Errors
    /// Returns an error if the cache is unavailable.
    pub async fn session_of(&self, ticket: &str) -> Result<Option<String>, CacheError> {
        self.cache.get(&Self::ticket_key(ticket)).await
    }

    /// # Errors
    /// Returns an error if the cache is unavailable.
    pub async fn ticket_of(&self, session_id: &str) -> Result<Option<String>, CacheError> {
        self.cache.get(&Self::session_key(session_id)).await
    }

    /// # Errors
    /// Returns an error if the cache is unavailable.
    pub async fn remaining(&self, ticket: &str) -> Result<Ttl, CacheError> {
        self.cache.ttl(&Self::ticket_key(ticket)).await
    }

    /// Mark `ticket` as redeemed. Only the first caller while the binding is
    /// live gets `true`.
    ///
    /// # Errors
    /// Returns an error if the cache is unavailable.
    pub async fn consume(&self, ticket: &str) -> Result<bool, CacheError> {
        let marker = match self.remaining(ticket).await? {
            Ttl::Missing => return Ok(false),
            Ttl::Persistent => Self::consumed_key(ticket),
            Ttl::Expires(left) if left.is_zero() => return Ok(false),
            Ttl::Expires(left) => Self::consumed_key(ticket).with_ttl(left),
        };
        self.cache.put_if_absent(&marker, &true).await
    }

    /// Drop the binding for `ticket`, and the reverse entry when it still
    /// points at this ticket.
    ///
    /// # Errors
    /// Returns an error if the cache is unavailable.
    pub async fn unbind(&self, ticket: &str) -> Result<(), CacheError> {
        if let Some(session_id) = self.session_of(ticket).await? {
            if self.ticket_of(&session_id).await?.as_deref() == Some(ticket) {
                self.cache.remove(&Self::session_key(&session_id)).await?;
            }
        }
        self.cache.remove(&Self::ticket_key(ticket)).await?;
        self.cache.remove(&Self::consumed_key(ticket)).await?;
        Ok(())
    }

    /// Drop whatever ticket is bound to `session_id`.
    ///
    /// # Errors
    /// Returns an error if the cache is unavailable.
    pub async fn unbind_session(&self, session_id: &str) -> Result<(), CacheError> {
        match self.ticket_of(session_id).await? {
            Some(ticket) => self.unbind(&ticket).await,
            None => Ok(()),
        }
    }
}
