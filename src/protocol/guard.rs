use super::AuthError;
use crate::cache::CacheError;
use crate::cumulator::Cumulator;
use tracing::warn;

/// Outcome of a guard check, inspected by the caller before redirecting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuardDecision {
    Proceed { attempts: i64 },
    Blocked { attempts: i64 },
}

impl GuardDecision {
    #[must_use]
    pub fn is_blocked(self) -> bool {
        matches!(self, Self::Blocked { .. })
    }
}

/// Bounds client redirect loops between a relying client and the
/// authenticator.
#[derive(Clone)]
pub struct LoopGuard {
    cumulator: Cumulator,
    max: i64,
}

impl LoopGuard {
    #[must_use]
    pub fn new(cumulator: Cumulator, max: i64) -> Self {
        Self { cumulator, max }
    }

    #[must_use]
    pub fn max(&self) -> i64 {
        self.max
    }

    /// Count a failed ticket round trip for `key`. Only invalid tickets add to
    /// the total; other failures are checked against the current total.
    ///
    /// # Errors
    /// Returns an error if the cache is unavailable.
    pub async fn check(&self, key: &str, err: &AuthError) -> Result<GuardDecision, CacheError> {
        let factors = [key.to_string()];
        let attempts = match err {
            AuthError::InvalidGrantTicket(_) => self.cumulator.accumulate(&factors, 1).await?,
            _ => self.cumulator.cumulative(&factors).await?,
        };
        if attempts > self.max {
            warn!("redirect loop guard tripped for {key} after {attempts} attempts");
            Ok(GuardDecision::Blocked { attempts })
        } else {
            Ok(GuardDecision::Proceed { attempts })
        }
    }

    /// # Errors
    /// Returns an error if the cache is unavailable.
    pub async fn reset(&self, key: &str) -> Result<(), CacheError> {
        self.cumulator.reset(&[key.to_string()]).await
    }
}

/// Locks a principal out after repeated failed logins.
#[derive(Clone)]
pub struct FailedLoginLock {
    cumulator: Cumulator,
    max: i64,
}

impl FailedLoginLock {
    #[must_use]
    pub fn new(cumulator: Cumulator, max: i64) -> Self {
        Self { cumulator, max }
    }

    /// # Errors
    /// Returns an error if the cache is unavailable.
    pub async fn is_locked(&self, principal: &str) -> Result<bool, CacheError> {
        Ok(self.cumulator.cumulative(&[principal.to_string()]).await? >= self.max)
    }

    /// # Errors
    /// Returns an error if the cache is unavailable.
    pub async fn record_failure(&self, principal: &str) -> Result<i64, CacheError> {
        self.cumulator.accumulate(&[principal.to_string()], 1).await
    }

    /// # Errors
    /// Returns an error if the cache is unavailable.
    pub async fn reset(&self, principal: &str) -> Result<(), CacheError> {
        self.cumulator.reset(&[principal.to_string()]).await
    }
}
