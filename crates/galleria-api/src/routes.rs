use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use galleria_core::discord::{DiscordClient, RemoteSource};
use galleria_core::storage::{MemoryObjectStore, ObjectStore, R2ObjectStore};
use galleria_core::{GalleryResponse, GallerySynchronizer, SyncRequest, WebhookEvent};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::rate_limit::{
    caller_fingerprint, EndpointRateLimiter, ProtectedEndpoint, RateLimitMetricsSnapshot,
};

const ANONYMOUS_CALLER: &str = "anonymous";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub synchronizer: Arc<GallerySynchronizer>,
    endpoint_rate_limiter: Arc<EndpointRateLimiter>,
}

impl AppState {
    pub fn from_config(config: Arc<AppConfig>) -> Result<Self, AppError> {
        let store: Arc<dyn ObjectStore> = if let Some(r2) = config.r2.clone() {
            Arc::new(R2ObjectStore::new(r2))
        } else {
            tracing::warn!("R2 is not configured; gallery assets are kept in memory only");
            Arc::new(MemoryObjectStore::default())
        };

        let source: Option<Arc<dyn RemoteSource>> = match config.discord.clone() {
            Some(discord) => Some(Arc::new(
                DiscordClient::new(discord).map_err(|error| AppError::Config(error.to_string()))?,
            )),
            None => {
                tracing::warn!("Discord is not configured; syncs will serve cached data only");
                None
            }
        };

        let synchronizer = Arc::new(GallerySynchronizer::new(
            config.sync.clone(),
            store,
            source,
        ));
        Ok(Self::with_synchronizer(config, synchronizer))
    }

    pub fn with_synchronizer(
        config: Arc<AppConfig>,
        synchronizer: Arc<GallerySynchronizer>,
    ) -> Self {
        Self {
            endpoint_rate_limiter: Arc::new(EndpointRateLimiter::from_config(config.as_ref())),
            synchronizer,
            config,
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/gallery", get(get_gallery).post(post_gallery))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    lock_held: bool,
    item_count: usize,
    rate_limit: RateLimitMetricsSnapshot,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        lock_held: state.synchronizer.lock_held(),
        item_count: state.synchronizer.cached_item_count().await,
        rate_limit: state.endpoint_rate_limiter.metrics_snapshot(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct GalleryQuery {
    force: Option<String>,
    validate: Option<String>,
}

async fn get_gallery(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<GalleryQuery>,
) -> Json<GalleryResponse> {
    let mut request = SyncRequest {
        force: is_truthy(query.force.as_deref()),
        validate: is_truthy(query.validate.as_deref()),
    };

    if request.force || request.validate {
        let caller = caller_id(&headers);
        if !state
            .endpoint_rate_limiter
            .allow(ProtectedEndpoint::ForcedSync, caller)
            .await
        {
            request = SyncRequest::default();
        }
    }

    Json(state.synchronizer.sync(request).await)
}

#[derive(Debug, Serialize)]
struct WebhookAck {
    success: bool,
}

async fn post_gallery(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    if let Some(secret) = state.config.webhook_secret.as_deref() {
        let token = extract_bearer_token(&headers)?;
        if !secrets_match(token.as_bytes(), secret.as_bytes()) {
            return Err(AppError::unauthorized("Invalid webhook secret"));
        }
    }

    let event = WebhookEvent::from_slice(&body)
        .map_err(|error| AppError::bad_request(error.to_string()))?;
    if !state.synchronizer.invalidate(&event) {
        return Ok(Json(WebhookAck { success: true }));
    }

    let caller = caller_id(&headers);
    if state
        .endpoint_rate_limiter
        .allow(ProtectedEndpoint::Webhook, caller)
        .await
    {
        let synchronizer = Arc::clone(&state.synchronizer);
        let kind = event.kind().to_string();
        tokio::spawn(async move {
            let response = synchronizer
                .sync(SyncRequest {
                    force: true,
                    validate: false,
                })
                .await;
            tracing::info!(
                event = %kind,
                items = response.total_count,
                success = response.success,
                "Webhook-triggered gallery sync finished"
            );
        });
    } else {
        tracing::info!(
            event = event.kind(),
            caller = caller_fingerprint(caller),
            "Webhook sync not scheduled; the next request will run it"
        );
    }

    Ok(Json(WebhookAck { success: true }))
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let header = headers
        .get("authorization")
        .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?
        .to_str()
        .map_err(|_| AppError::unauthorized("Authorization header is not valid UTF-8"))?;

    let (scheme, token) = header
        .split_once(' ')
        .ok_or_else(|| AppError::unauthorized("Authorization header must be `Bearer <token>`"))?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AppError::unauthorized(
            "Authorization scheme must be `Bearer`",
        ));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::unauthorized("Bearer token is empty"));
    }

    Ok(token)
}

/// Compare without short-circuiting on the first differing byte.
fn secrets_match(provided: &[u8], expected: &[u8]) -> bool {
    if provided.len() != expected.len() {
        return false;
    }
    provided
        .iter()
        .zip(expected)
        .fold(0_u8, |diff, (left, right)| diff | (left ^ right))
        == 0
}

/// First `X-Forwarded-For` hop, or a shared bucket for direct callers.
fn caller_id(headers: &HeaderMap) -> &str {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(ANONYMOUS_CALLER)
}

fn is_truthy(value: Option<&str>) -> bool {
    value.is_some_and(|value| {
        matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "yes"
        )
    })
}
