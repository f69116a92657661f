use super::{context, render};
use crate::protocol::{
    AuthError, AuthResponse, AuthenticatorEngine, ProtocolState, RespBase,
    TicketValidateRequest,
};
use axum::{
    body::Bytes,
    extract::Extension,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{error, info};

#[utoipa::path(
    get,
    path = "/login",
    params(
        ("service" = String, Query, description = "Application requesting the login"),
        ("redirect_url" = Option<String>, Query, description = "Where to return the ticket")
    ),
    responses(
        (status = 302, description = "Single sign-on, redirect carrying a grant ticket"),
        (status = 401, description = "Login required", body = RespBase),
        (status = 400, description = "Unknown application", body = RespBase)
    ),
    tag = "authenticator",
)]
/// Start a login, or sign straight in when the session is authenticated.
pub async fn login_page(
    Extension(engine): Extension<Arc<AuthenticatorEngine>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let mut ctx = context(method, &uri, headers, &[]);
    render(engine.login_page(&mut ctx).await)
}

#[utoipa::path(
    post,
    path = "/secret/apply",
    request_body = Vec<u8>,
    responses(
        (status = 200, description = "Hex public key leased to the session", body = RespBase)
    ),
    tag = "authenticator",
)]
/// Lease a public key for encrypting credentials.
pub async fn apply_secret(
    Extension(engine): Extension<Arc<AuthenticatorEngine>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut ctx = context(method, &uri, headers, &body);
    render(engine.apply_secret(&mut ctx).await)
}

#[utoipa::path(
    post,
    path = "/login",
    request_body = Vec<u8>,
    responses(
        (status = 302, description = "Authenticated, redirect carrying a grant ticket"),
        (status = 200, description = "Authenticated, ticket URL in the envelope", body = RespBase),
        (status = 401, description = "Invalid credentials or expired secret", body = RespBase),
        (status = 403, description = "Application access denied", body = RespBase),
        (status = 429, description = "Too many failed logins", body = RespBase)
    ),
    tag = "authenticator",
)]
/// Verify encrypted credentials and issue a grant ticket.
pub async fn login(
    Extension(engine): Extension<Arc<AuthenticatorEngine>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut ctx = context(method, &uri, headers, &body);
    render(engine.login(&mut ctx).await)
}

#[utoipa::path(
    post,
    path = "/validate",
    request_body = TicketValidateRequest,
    responses(
        (status = 200, description = "Ticket redeemed", body = RespBase),
        (status = 401, description = "Unknown, expired or used ticket", body = RespBase),
        (status = 403, description = "Application access denied", body = RespBase)
    ),
    tag = "authenticator",
)]
/// Redeem a grant ticket for the principal it was issued to.
pub async fn validate(
    Extension(engine): Extension<Arc<AuthenticatorEngine>>,
    body: Bytes,
) -> Response {
    let request: TicketValidateRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            let err = AuthError::BadRequest(err.to_string());
            return AuthResponse::error(&err, ProtocolState::Anonymous).into_response();
        }
    };

    match engine.validate(&request).await {
        Ok(result) => {
            info!("validated ticket for {}", request.application);
            let body = RespBase::ok(ProtocolState::Authenticated, "ok").with_fields(&result);
            AuthResponse::json(StatusCode::OK, body).into_response()
        }
        Err(err) => {
            if err.is_fault() {
                error!("Ticket validation failed: {:?}", err);
            }
            AuthResponse::error(&err, ProtocolState::Anonymous).into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/logout",
    request_body = Vec<u8>,
    responses(
        (status = 200, description = "Session closed", body = RespBase),
        (status = 302, description = "Session closed, back to the application")
    ),
    tag = "authenticator",
)]
/// Close the authenticator session.
pub async fn logout(
    Extension(engine): Extension<Arc<AuthenticatorEngine>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut ctx = context(method, &uri, headers, &body);
    render(engine.logout(&mut ctx).await)
}
