pub mod authenticator;
pub mod client;
pub mod health;

// common functions for the handlers
use crate::protocol::{AuthError, AuthResponse, ProtocolState, RequestContext};
use axum::{
    http::{HeaderMap, Method, Uri},
    response::{IntoResponse, Response},
};
use tracing::error;

/// Per-request protocol context from the raw request parts.
pub(crate) fn context(method: Method, uri: &Uri, headers: HeaderMap, body: &[u8]) -> RequestContext {
    RequestContext::new(method, uri.path(), uri.query(), headers, body)
}

/// Render an engine outcome. Faults are logged with their cause and answered
/// with the sanitized envelope.
pub(crate) fn render(outcome: Result<AuthResponse, AuthError>) -> Response {
    match outcome {
        Ok(response) => response.into_response(),
        Err(err) => {
            error!("Request failed: {:?}", err);
            AuthResponse::error(&err, ProtocolState::Anonymous).into_response()
        }
    }
}
