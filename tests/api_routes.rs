//! Router-level checks that never reach the database: routing, auth
//! rejection, request validation and response headers.
//!
//! The pool is created lazily and no test issues a query.

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceExt;

use taskboard::config::{Config, DEFAULT_PUSH_URL};
use taskboard::store::postgres::PgStore;
use taskboard::AppState;

fn test_config() -> Config {
    Config {
        port: 0,
        database_url: "postgres://localhost/taskboard_test".into(),
        environment: "testing".into(),
        push_url: DEFAULT_PUSH_URL.into(),
        push_timeout_secs: 1,
        push_enabled: false,
        cors_origin: None,
        orphan_prune_secs: 0,
    }
}

fn app() -> Router {
    let cfg = test_config();
    let pool = PgPoolOptions::new()
        .connect_lazy(&cfg.database_url)
        .expect("lazy pool");
    let state = AppState::new(PgStore::from_pool(pool), common::RecordingPush::new(), cfg);
    taskboard::router(Arc::new(state))
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_has_security_and_request_id_headers() {
    let resp = app()
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let headers = resp.headers();
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["x-frame-options"], "DENY");
    assert!(headers.contains_key("x-request-id"));
}

#[tokio::test]
async fn test_protected_routes_require_token() {
    for (method, uri) in [
        ("GET", "/api/me"),
        ("GET", "/api/notifications"),
        ("POST", "/api/notifications/read-all"),
        ("DELETE", "/api/notifications/5"),
        ("GET", "/api/created"),
        ("POST", "/api/new-message"),
    ] {
        let resp = app()
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{method} {uri}");
        assert_eq!(body_json(resp).await["message"], "Unauthenticated.");
    }
}

#[tokio::test]
async fn test_malformed_token_is_rejected_before_lookup() {
    let resp = app()
        .oneshot(
            Request::post("/api/notifications/1/read")
                .header("authorization", "Bearer abc|secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_login_validation_errors_are_422() {
    let resp = app()
        .oneshot(
            Request::post("/api/login")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"email":"not-an-email","password":""}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json = body_json(resp).await;
    assert!(json["errors"]["email"].is_array());
    assert_eq!(json["errors"]["password"][0], "The password field is required.");
}

#[tokio::test]
async fn test_missing_json_field_is_a_field_error() {
    let resp = app()
        .oneshot(
            Request::post("/api/login")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"password":"x"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(resp.headers()["content-type"], "application/json");
    let json = body_json(resp).await;
    assert_eq!(json["errors"]["email"][0], "The email field is required.");
    assert_eq!(json["message"], "The email field is required.");
}

#[tokio::test]
async fn test_broken_json_and_wrong_content_type_are_422() {
    let broken = app()
        .oneshot(
            Request::post("/api/login")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"email": "#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(broken.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body_json(broken).await["errors"]["body"].is_array());

    let plain = app()
        .oneshot(
            Request::post("/api/login")
                .header("content-type", "text/plain")
                .body(Body::from("email=a@example.com"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(plain.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body_json(plain).await["errors"]["body"].is_array());
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let resp = app()
        .oneshot(Request::get("/api/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
