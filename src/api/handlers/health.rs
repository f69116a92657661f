use crate::cache::{CacheKey, CacheManager};
use crate::session::now_ms;
use crate::GIT_COMMIT_HASH;
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, warn};
use utoipa::ToSchema;

const HEALTH_CACHE_TIMEOUT_SECONDS: u64 = 2;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    cache: String,
}

#[utoipa::path(
    get,
    path= "/health",
    responses (
        (status = 200, description = "Cache store is reachable", body = Health),
        (status = 503, description = "Cache store is unreachable", body = Health)
    ),
    tag = "health",
)]
/// Report build information and whether the cache store answers.
pub async fn health(method: Method, caches: Extension<CacheManager>) -> impl IntoResponse {
    let cache_healthy = probe_cache(&caches.0).await;

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        cache: if cache_healthy {
            "ok".to_string()
        } else {
            "error".to_string()
        },
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let short_hash = if health.commit.len() > 7 {
        &health.commit[0..7]
    } else {
        ""
    };

    let headers = format!("{}:{}:{}", health.name, health.version, short_hash)
        .parse::<HeaderValue>()
        .map(|x_app_header_value| {
            debug!("X-App header: {:?}", x_app_header_value);

            let mut headers = HeaderMap::new();
            headers.insert("X-App", x_app_header_value);
            headers
        })
        .map_err(|err| {
            debug!("Failed to parse X-App header: {}", err);
        })
        .unwrap_or_else(|()| HeaderMap::new());

    if cache_healthy {
        (StatusCode::OK, headers, body)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, headers, body)
    }
}

/// Write and read back a short-lived probe key.
async fn probe_cache(caches: &CacheManager) -> bool {
    let cache = caches.cache("health");
    let key = CacheKey::new("probe").with_ttl(Duration::from_secs(5));
    let probe = async {
        cache.put(&key, &now_ms()).await?;
        cache.get::<i64>(&key).await
    };
    match timeout(Duration::from_secs(HEALTH_CACHE_TIMEOUT_SECONDS), probe).await {
        Ok(Ok(Some(_))) => true,
        Ok(Ok(None)) => {
            warn!("Cache probe key vanished");
            false
        }
        Ok(Err(err)) => {
            error!("Cache probe failed: {}", err);
            false
        }
        Err(_) => {
            warn!("Cache health check timed out");
            false
        }
    }
}
