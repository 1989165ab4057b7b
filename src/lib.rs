//! Taskboard: messages, assignments, and notification fan-out with
//! per-user read state, realtime delivery and device push.

pub mod api;
pub mod auth;
pub mod cli;
pub mod config;
pub mod errors;
pub mod jobs;
pub mod models;
pub mod notification;
pub mod realtime;
pub mod store;

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::{HeaderName, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::get,
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};

use notification::fanout::FanOut;
use notification::push::PushDispatcher;
use realtime::ChannelHub;
use store::postgres::PgStore;
use store::NotificationStore;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub db: PgStore,
    pub notifications: Arc<dyn NotificationStore>,
    pub hub: ChannelHub,
    pub fanout: FanOut,
    pub config: config::Config,
}

impl AppState {
    /// Wire the notification pipeline on top of a Postgres store.
    pub fn new(db: PgStore, push: Arc<dyn PushDispatcher>, config: config::Config) -> Self {
        let notifications: Arc<dyn NotificationStore> = Arc::new(db.clone());
        let hub = ChannelHub::new(&config.environment);
        let fanout = FanOut::new(notifications.clone(), hub.clone(), push);
        Self {
            db,
            notifications,
            hub,
            fanout,
            config,
        }
    }
}

/// Full HTTP application: health probes plus the API under `/api`.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(state.config.cors_origin.clone());

    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readiness_check))
        .nest("/api", api::api_router(state.clone()))
        .fallback(fallback_404)
        .with_state(state)
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024))
        .layer(cors)
        .layer(middleware::from_fn(request_id_middleware))
        .layer(middleware::from_fn(security_headers_middleware))
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn readiness_check(State(state): State<Arc<AppState>>) -> Result<&'static str, StatusCode> {
    sqlx::query("SELECT 1")
        .execute(state.db.pool())
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        })?;
    Ok("ok")
}

fn cors_layer(extra_origin: Option<String>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin, _| {
            let origin = origin.to_str().unwrap_or("");
            extra_origin.as_deref() == Some(origin)
                || origin.starts_with("http://localhost:")
                || origin.starts_with("http://127.0.0.1:")
        }))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static("authorization"),
            HeaderName::from_static(auth::SOCKET_ID_HEADER),
            HeaderName::from_static("x-request-id"),
        ])
}

/// Middleware: injects a unique X-Request-Id into every response.
async fn request_id_middleware(req: Request, next: Next) -> Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

/// Middleware: security headers on every response.
async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert("cache-control", HeaderValue::from_static("no-store"));
    headers.insert("referrer-policy", HeaderValue::from_static("no-referrer"));
    headers.remove("server");
    resp
}
