use crate::{
    api::handlers::{authenticator, client, health},
    cache::CacheManager,
    protocol::{AuthenticatorEngine, ClientEngine},
};
use anyhow::Result;
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    response::Json,
    routing::{get, post},
    Extension, Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{debug_span, error, info, Span};
use ulid::Ulid;

pub mod handlers;
mod openapi;
pub use self::openapi::openapi;

const REQUEST_ID: &str = "x-request-id";

/// Routes of the central authenticator.
#[must_use]
pub fn authenticator_router(engine: Arc<AuthenticatorEngine>, caches: CacheManager) -> Router {
    let router = Router::new()
        .route("/health", get(health::health).options(health::health))
        .route(
            "/login",
            get(authenticator::login_page).post(authenticator::login),
        )
        .route("/secret/apply", post(authenticator::apply_secret))
        .route("/validate", post(authenticator::validate))
        .route(
            "/logout",
            get(authenticator::logout).post(authenticator::logout),
        )
        .route("/openapi.json", get(openapi_json))
        .layer(Extension(engine));

    with_layers(router, caches)
}

/// Routes of a relying client. Any path without a route of its own is a
/// protected resource.
#[must_use]
pub fn client_router(engine: Arc<ClientEngine>, caches: CacheManager) -> Router {
    let router = Router::new()
        .route("/health", get(health::health).options(health::health))
        .route("/authenticator", get(client::authenticator))
        .route("/logout", get(client::logout).post(client::logout))
        .route("/permits", get(client::permits))
        .fallback(client::protected)
        .layer(Extension(engine));

    with_layers(router, caches)
}

fn with_layers(router: Router, caches: CacheManager) -> Router {
    router.layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static(REQUEST_ID),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                REQUEST_ID,
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(Extension(caches)),
    )
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(openapi())
}

/// Serve `router` on every interface until ctrl-c.
///
/// # Errors
/// Returns an error if the port cannot be bound or the server fails
pub async fn new(port: u16, router: Router) -> Result<()> {
    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for ctrl-c: {}", err);
            }
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

// span
fn make_span(request: &Request<Body>) -> Span {
    let method = request.method();
    let path = request.uri().path();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or("fallback", MatchedPath::as_str);
    let request_id = request
        .headers()
        .get(REQUEST_ID)
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    debug_span!("http-request", %method, path, route, request_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        NoopCoprocessor, ProtocolConfig, StaticSecurityConfigurer, CLIENT_COOKIE,
    };
    use crate::protocol::{CookieConfig, HttpTicketValidator};
    use crate::secure::{CredentialsSecurer, SecureConfig};
    use axum::{body::to_bytes, http::StatusCode};
    use secrecy::SecretString;
    use std::time::Duration;
    use tower::ServiceExt;

    fn authenticator() -> anyhow::Result<Router> {
        let caches = CacheManager::in_memory("api");
        let securer = CredentialsSecurer::new(
            SecureConfig::new(SecretString::from("private-salt"))
                .with_pool_size(2)
                .with_key_bits(512),
            &caches,
        )?;
        let engine = AuthenticatorEngine::new(
            ProtocolConfig::new("fastcas", "http://sso", "http://sso"),
            &caches,
            Arc::new(securer),
            Arc::new(StaticSecurityConfigurer::default()),
            Arc::new(NoopCoprocessor),
        );
        Ok(authenticator_router(Arc::new(engine), caches))
    }

    fn client() -> anyhow::Result<Router> {
        let caches = CacheManager::in_memory("api");
        let config = ProtocolConfig::new("portal", "http://127.0.0.1:9", "http://portal")
            .with_cookie(CookieConfig::new(CLIENT_COOKIE));
        let validator = HttpTicketValidator::new(&config.validate_url(), Duration::from_secs(1))?;
        let engine = ClientEngine::new(
            config,
            &caches,
            Arc::new(validator),
            Arc::new(StaticSecurityConfigurer::default()),
            Arc::new(NoopCoprocessor),
        );
        Ok(client_router(Arc::new(engine), caches))
    }

    #[tokio::test]
    async fn health_propagates_request_id() -> anyhow::Result<()> {
        let response = authenticator()?
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header(REQUEST_ID, "req-1")
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(REQUEST_ID).and_then(|v| v.to_str().ok()),
            Some("req-1")
        );
        Ok(())
    }

    #[tokio::test]
    async fn request_id_is_minted_when_absent() -> anyhow::Result<()> {
        let response = authenticator()?
            .oneshot(Request::builder().uri("/health").body(Body::empty())?)
            .await?;
        let id = response
            .headers()
            .get(REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        assert!(Ulid::from_string(id).is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn serves_openapi_document() -> anyhow::Result<()> {
        let response = authenticator()?
            .oneshot(Request::builder().uri("/openapi.json").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let doc: serde_json::Value = serde_json::from_slice(&body)?;
        assert!(doc["paths"]["/validate"]["post"].is_object());
        Ok(())
    }

    #[tokio::test]
    async fn malformed_validate_body_is_bad_request() -> anyhow::Result<()> {
        let response = authenticator()?
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/validate")
                    .header("content-type", "application/json")
                    .body(Body::from("{not json"))?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let body: serde_json::Value = serde_json::from_slice(&body)?;
        assert_eq!(body["code"], "BAD_REQUEST");
        Ok(())
    }

    #[tokio::test]
    async fn unknown_ticket_is_unauthenticated() -> anyhow::Result<()> {
        let response = authenticator()?
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/validate")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"ticket":"ST-missing","application":"portal"}"#,
                    ))?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn protected_path_redirects_browsers_to_login() -> anyhow::Result<()> {
        let response = client()?
            .oneshot(
                Request::builder()
                    .uri("/reports/2024")
                    .header("accept", "text/html")
                    .header("user-agent", "Mozilla/5.0")
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response
            .headers()
            .get("location")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        assert!(location.starts_with("http://127.0.0.1:9/login?"));
        assert!(location.contains("service=portal"));
        Ok(())
    }
}
