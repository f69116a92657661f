use super::{context, render};
use crate::protocol::{AuthResponse, ClientEngine, Flow, ProtocolState, RespBase};
use axum::{
    body::Bytes,
    extract::Extension,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::Response,
};
use std::sync::Arc;

/// Ticket callback the authenticator redirects to.
pub async fn authenticator(
    Extension(engine): Extension<Arc<ClientEngine>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let mut ctx = context(method, &uri, headers, &[]);
    render(engine.authenticate(&mut ctx).await)
}

pub async fn logout(
    Extension(engine): Extension<Arc<ClientEngine>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut ctx = context(method, &uri, headers, &body);
    render(engine.logout(&mut ctx).await)
}

pub async fn permits(
    Extension(engine): Extension<Arc<ClientEngine>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let mut ctx = context(method, &uri, headers, &[]);
    render(engine.permits(&mut ctx).await)
}

/// Every other path is a protected resource: it answers with the principal
/// once the session is authenticated.
pub async fn protected(
    Extension(engine): Extension<Arc<ClientEngine>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut ctx = context(method, &uri, headers, &body);
    let outcome = match engine.protect(&mut ctx).await {
        Ok(Flow::Respond(response)) => Ok(response),
        Ok(Flow::Continue) => {
            let principal = ctx
                .session
                .as_ref()
                .map(|session| engine.principal_of(session))
                .unwrap_or_default();
            let body = RespBase::ok(ProtocolState::Authenticated, "ok")
                .with("path", uri.path())
                .with("principal", principal);
            Ok(AuthResponse::json(StatusCode::OK, body).with_cookies(ctx.cookies.drain(..)))
        }
        Err(err) => Err(err),
    };
    render(outcome)
}
