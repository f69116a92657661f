use crate::cache::CacheError;
use crate::secure::SecureError;
use crate::session::SessionError;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

/// Wire code carried in every response envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetCode {
    Ok,
    Unauthc,
    Unauthz,
    TooManyRequests,
    SecretExpired,
    InvalidCredentials,
    SysErr,
    Unavailable,
    BadRequest,
}

impl RetCode {
    #[must_use]
    pub fn status(self) -> StatusCode {
        match self {
            Self::Ok => StatusCode::OK,
            Self::Unauthc | Self::SecretExpired | Self::InvalidCredentials => {
                StatusCode::UNAUTHORIZED
            }
            Self::Unauthz => StatusCode::FORBIDDEN,
            Self::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            Self::SysErr => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::BadRequest => StatusCode::BAD_REQUEST,
        }
    }
}

impl fmt::Display for RetCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "OK",
            Self::Unauthc => "UNAUTHC",
            Self::Unauthz => "UNAUTHZ",
            Self::TooManyRequests => "TOO_MANY_REQUESTS",
            Self::SecretExpired => "SECRET_EXPIRED",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::SysErr => "SYS_ERR",
            Self::Unavailable => "UNAVAILABLE",
            Self::BadRequest => "BAD_REQUEST",
        };
        f.write_str(name)
    }
}

/// Failures of the ticket protocol.
///
/// `Display` is the sanitized text sent to callers; root causes are logged
/// where the error is raised.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid grant ticket: {0}")]
    InvalidGrantTicket(String),
    #[error("access to the application is not allowed")]
    Unauthorized(String),
    #[error("too many authentication attempts, try again later")]
    TooManyRequests,
    #[error("secret key expired, apply for a new one")]
    SecretExpired,
    #[error("invalid principal or credentials")]
    InvalidCredentials,
    #[error("system error")]
    CacheUnavailable(#[source] CacheError),
    #[error("authentication service temporarily unavailable")]
    Transient(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("system error")]
    Configuration(String),
}

impl AuthError {
    #[must_use]
    pub fn code(&self) -> RetCode {
        match self {
            Self::InvalidGrantTicket(_) => RetCode::Unauthc,
            Self::Unauthorized(_) => RetCode::Unauthz,
            Self::TooManyRequests => RetCode::TooManyRequests,
            Self::SecretExpired => RetCode::SecretExpired,
            Self::InvalidCredentials => RetCode::InvalidCredentials,
            Self::CacheUnavailable(_) | Self::Configuration(_) => RetCode::SysErr,
            Self::Transient(_) => RetCode::Unavailable,
            Self::BadRequest(_) => RetCode::BadRequest,
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.code().status()
    }

    /// Faults of the platform itself rather than of the caller.
    #[must_use]
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::CacheUnavailable(_) | Self::Configuration(_))
    }
}

impl From<CacheError> for AuthError {
    fn from(err: CacheError) -> Self {
        Self::CacheUnavailable(err)
    }
}

impl From<SecureError> for AuthError {
    fn from(err: SecureError) -> Self {
        match err {
            SecureError::SecretExpired => Self::SecretExpired,
            SecureError::InvalidCredentials => Self::InvalidCredentials,
            SecureError::Configuration(detail) | SecureError::Crypto(detail) => {
                Self::Configuration(detail)
            }
            SecureError::Cache(err) => Self::CacheUnavailable(err),
        }
    }
}

impl From<SessionError> for AuthError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::AlreadyInvalid(id) => {
                Self::InvalidGrantTicket(format!("session {id} is no longer valid"))
            }
            SessionError::Cache(err) => Self::CacheUnavailable(err),
            SessionError::Random(detail) => Self::Configuration(detail),
        }
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_wire_codes_and_statuses() {
        let cases = [
            (AuthError::InvalidGrantTicket("x".into()), "UNAUTHC", 401),
            (AuthError::Unauthorized("x".into()), "UNAUTHZ", 403),
            (AuthError::TooManyRequests, "TOO_MANY_REQUESTS", 429),
            (AuthError::SecretExpired, "SECRET_EXPIRED", 401),
            (AuthError::InvalidCredentials, "INVALID_CREDENTIALS", 401),
            (
                AuthError::CacheUnavailable(CacheError::Unavailable("down".into())),
                "SYS_ERR",
                500,
            ),
            (AuthError::Transient("timeout".into()), "UNAVAILABLE", 503),
            (AuthError::BadRequest("x".into()), "BAD_REQUEST", 400),
            (AuthError::Configuration("x".into()), "SYS_ERR", 500),
        ];
        for (err, code, status) in cases {
            assert_eq!(err.code().to_string(), code);
            assert_eq!(err.status().as_u16(), status);
        }
    }

    #[test]
    fn wire_names_match_serde() -> Result<(), serde_json::Error> {
        for code in [
            RetCode::Ok,
            RetCode::Unauthc,
            RetCode::TooManyRequests,
            RetCode::SysErr,
        ] {
            assert_eq!(serde_json::to_string(&code)?, format!("\"{code}\""));
        }
        Ok(())
    }

    #[test]
    fn faults_are_not_downgraded() {
        let err = AuthError::from(SecureError::Cache(CacheError::Unavailable("down".into())));
        assert!(err.is_fault());
        assert_eq!(err.to_string(), "system error");
        assert!(matches!(
            AuthError::from(SecureError::SecretExpired),
            AuthError::SecretExpired
        ));
    }
}
