use super::{AuthError, RespBase, RetCode};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, error, instrument};
use utoipa::ToSchema;

/// Ticket redemption request sent by a relying client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TicketValidateRequest {
    pub ticket: String,
    pub application: String,
}

/// What a redeemed ticket tells the relying client about its principal.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TicketValidateResult {
    pub principal: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub attributes: Map<String, Value>,
    /// Per-session key for client side payload encryption.
    #[serde(default)]
    pub data_cipher_key: String,
    /// Per-session HMAC key for access tokens.
    #[serde(default)]
    pub access_token_sign_key: String,
    /// Absolute expiry of the authenticator session, ms since epoch.
    #[serde(default)]
    pub valid_until_ms: Option<i64>,
}

#[derive(Debug, thiserror::Error)]
pub enum ValidateError {
    #[error("invalid grant ticket: {0}")]
    Invalid(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("validation temporarily unavailable: {0}")]
    Transient(String),
    #[error("validation failed: {0}")]
    Remote(String),
}

impl From<ValidateError> for AuthError {
    fn from(err: ValidateError) -> Self {
        match err {
            ValidateError::Invalid(detail) => Self::InvalidGrantTicket(detail),
            ValidateError::Unauthorized(detail) => Self::Unauthorized(detail),
            ValidateError::Transient(detail) | ValidateError::Remote(detail) => {
                Self::Transient(detail)
            }
        }
    }
}

#[async_trait]
pub trait TicketValidator: Send + Sync {
    /// # Errors
    /// Distinguishes invalid tickets, denied access and transport failures.
    async fn validate(
        &self,
        request: &TicketValidateRequest,
    ) -> Result<TicketValidateResult, ValidateError>;
}

/// Validates tickets against the authenticator's `/validate` endpoint.
#[derive(Clone, Debug)]
pub struct HttpTicketValidator {
    client: Client,
    url: String,
}

impl HttpTicketValidator {
    /// Every call is bounded by `timeout`.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, ValidateError> {
        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|err| ValidateError::Remote(err.to_string()))?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TicketValidator for HttpTicketValidator {
    #[instrument(skip_all, fields(application = %request.application))]
    async fn validate(
        &self,
        request: &TicketValidateRequest,
    ) -> Result<TicketValidateResult, ValidateError> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|err| {
                error!("Ticket validation request failed: {err}");
                if err.is_timeout() || err.is_connect() {
                    ValidateError::Transient(err.to_string())
                } else {
                    ValidateError::Remote(err.to_string())
                }
            })?;

        let status = response.status();
        let body: RespBase = response.json().await.map_err(|err| {
            error!("Unexpected validation response ({status}): {err}");
            if err.is_timeout() {
                ValidateError::Transient(err.to_string())
            } else {
                ValidateError::Remote(format!("{status}: {err}"))
            }
        })?;
        debug!("validation replied {} ({status})", body.code);

        match body.code {
            RetCode::Ok => serde_json::from_value(Value::Object(body.data))
                .map_err(|err| ValidateError::Remote(err.to_string())),
            RetCode::Unauthc => Err(ValidateError::Invalid(body.message)),
            RetCode::Unauthz => Err(ValidateError::Unauthorized(body.message)),
            RetCode::Unavailable | RetCode::TooManyRequests => {
                Err(ValidateError::Transient(body.message))
            }
            _ => Err(ValidateError::Remote(format!("{}: {}", body.code, body.message))),
        }
    }
}
