//! Full router against a real database: the message routes must leave the
//! expected notifications behind.
//!
//! Run with `DATABASE_URL=postgres://… cargo test -- --ignored`.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use taskboard::auth::{self, password};
use taskboard::config::{Config, DEFAULT_PUSH_URL};
use taskboard::models::notification::{
    KIND_COMMENT_CREATED, KIND_MESSAGE_ASSIGNED, KIND_MESSAGE_CREATED, KIND_MESSAGE_UPDATED,
};
use taskboard::models::user::NewUser;
use taskboard::store::postgres::PgStore;
use taskboard::AppState;

struct TestApp {
    db: PgStore,
    router: Router,
    status_id: i64,
}

async fn test_app() -> TestApp {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let db = PgStore::connect(&url).await.expect("connect");
    db.migrate().await.expect("migrate");
    let status_id = db.list_statuses().await.unwrap()[0].id;

    let cfg = Config {
        port: 0,
        database_url: url,
        environment: "testing".into(),
        push_url: DEFAULT_PUSH_URL.into(),
        push_timeout_secs: 1,
        push_enabled: false,
        cors_origin: None,
        orphan_prune_secs: 0,
    };
    let state = AppState::new(db.clone(), common::RecordingPush::new(), cfg);
    TestApp {
        db,
        router: taskboard::router(Arc::new(state)),
        status_id,
    }
}

/// Insert a user with `plain` as password and return its id and a bearer token.
async fn user_with_token(db: &PgStore, name: &str, plain: &str) -> (i64, String) {
    let id = db
        .insert_user(&NewUser {
            name: name.to_string(),
            email: format!("{}@example.test", uuid::Uuid::new_v4()),
            password_hash: password::hash_password(plain).unwrap(),
            department_id: None,
            is_admin: false,
        })
        .await
        .unwrap();
    (id, issue_token(db, id).await)
}

async fn issue_token(db: &PgStore, user_id: i64) -> String {
    let secret = auth::generate_secret();
    let token_id = db
        .insert_access_token(user_id, "test", &auth::hash_secret(&secret))
        .await
        .unwrap();
    auth::format_token(token_id, &secret)
}

async fn call(
    app: &TestApp,
    method: &str,
    uri: &str,
    token: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {token}"));
    let req = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = app.router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

/// notification id → sorted recipient user ids, for one message and kind.
async fn notified(db: &PgStore, message_id: i64, kind: &str) -> BTreeMap<i64, Vec<i64>> {
    let rows: Vec<(i64, i64)> = sqlx::query_as(
        r#"SELECT n.id, r.user_id
             FROM notifications n
             JOIN notification_recipients r ON r.notification_id = n.id
            WHERE n.message_id = $1 AND n.type = $2
            ORDER BY n.id, r.user_id"#,
    )
    .bind(message_id)
    .bind(kind)
    .fetch_all(db.pool())
    .await
    .unwrap();

    let mut out: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
    for (nid, uid) in rows {
        out.entry(nid).or_default().push(uid);
    }
    out
}

fn sorted(mut ids: Vec<i64>) -> Vec<i64> {
    ids.sort_unstable();
    ids
}

async fn create_message(
    app: &TestApp,
    token: &str,
    title: &str,
    assignees: &[i64],
    assignee: Option<i64>,
) -> i64 {
    let (status, body) = call(
        app,
        "POST",
        "/api/new-message",
        token,
        Some(json!({
            "title": title,
            "description": "Second floor printer eats paper",
            "priority": "high",
            "status_id": app.status_id,
            "assignees": assignees,
            "assignee": assignee,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["data"]["id"].as_i64().unwrap()
}

#[tokio::test]
#[ignore = "requires PostgreSQL at DATABASE_URL"]
async fn test_new_message_notifies_assignees_once() {
    let app = test_app().await;
    let (_alice, alice_token) = user_with_token(&app.db, "Alice", "secret-pw").await;
    let (bob, _) = user_with_token(&app.db, "Bob", "secret-pw").await;
    let (carol, _) = user_with_token(&app.db, "Carol", "secret-pw").await;

    let id = create_message(&app, &alice_token, "Printer jammed", &[bob, carol], Some(bob)).await;

    let created = notified(&app.db, id, KIND_MESSAGE_CREATED).await;
    assert_eq!(created.len(), 1);
    assert_eq!(created.values().next().unwrap(), &sorted(vec![bob, carol]));
}

#[tokio::test]
#[ignore = "requires PostgreSQL at DATABASE_URL"]
async fn test_comment_notifies_creator_and_other_assignees() {
    let app = test_app().await;
    let (alice, alice_token) = user_with_token(&app.db, "Alice", "secret-pw").await;
    let (bob, bob_token) = user_with_token(&app.db, "Bob", "secret-pw").await;
    let (carol, _) = user_with_token(&app.db, "Carol", "secret-pw").await;
    let id = create_message(&app, &alice_token, "Printer jammed", &[bob, carol], None).await;

    let (status, body) = call(
        &app,
        "POST",
        &format!("/api/messages/{id}/comments"),
        &bob_token,
        Some(json!({ "text": "on it" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    let comments = notified(&app.db, id, KIND_COMMENT_CREATED).await;
    assert_eq!(comments.len(), 1);
    assert_eq!(comments.values().next().unwrap(), &sorted(vec![alice, carol]));
}

#[tokio::test]
#[ignore = "requires PostgreSQL at DATABASE_URL"]
async fn test_update_notifies_everyone_but_the_editor() {
    let app = test_app().await;
    let (alice, alice_token) = user_with_token(&app.db, "Alice", "secret-pw").await;
    let (bob, bob_token) = user_with_token(&app.db, "Bob", "secret-pw").await;
    let (carol, _) = user_with_token(&app.db, "Carol", "secret-pw").await;
    let id = create_message(&app, &alice_token, "Printer jammed", &[bob], Some(bob)).await;

    let (status, body) = call(
        &app,
        "PUT",
        &format!("/api/message-update/{id}"),
        &bob_token,
        Some(json!({
            "title": "Printer jammed again",
            "description": "Still eating paper",
            "priority": "medium",
            "status_id": app.status_id,
            "assignees": [bob, carol],
            "assignee": bob,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let updated = notified(&app.db, id, KIND_MESSAGE_UPDATED).await;
    assert_eq!(updated.len(), 1);
    assert_eq!(updated.values().next().unwrap(), &sorted(vec![alice, carol]));
}

#[tokio::test]
#[ignore = "requires PostgreSQL at DATABASE_URL"]
async fn test_assign_notifies_only_new_assignees() {
    let app = test_app().await;
    let (_alice, alice_token) = user_with_token(&app.db, "Alice", "secret-pw").await;
    let (bob, _) = user_with_token(&app.db, "Bob", "secret-pw").await;
    let (carol, _) = user_with_token(&app.db, "Carol", "secret-pw").await;
    let id = create_message(&app, &alice_token, "Printer jammed", &[bob], None).await;

    let uri = format!("/api/messages/{id}/assign");
    let (status, body) = call(&app, "POST", &uri, &alice_token, Some(json!({ "assignees": [bob, carol] }))).await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let assigned = notified(&app.db, id, KIND_MESSAGE_ASSIGNED).await;
    assert_eq!(assigned.len(), 1);
    assert_eq!(assigned.values().next().unwrap(), &vec![carol]);

    // Nobody new: no second notification.
    let (status, _) = call(&app, "POST", &uri, &alice_token, Some(json!({ "assignees": [carol] }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(notified(&app.db, id, KIND_MESSAGE_ASSIGNED).await.len(), 1);
}

#[tokio::test]
#[ignore = "requires PostgreSQL at DATABASE_URL"]
async fn test_maximal_title_and_name_still_notify() {
    let app = test_app().await;
    let long_name = "A".repeat(255);
    let (_alice, alice_token) = user_with_token(&app.db, &long_name, "secret-pw").await;
    let (bob, bob_token) = user_with_token(&app.db, &"B".repeat(255), "secret-pw").await;
    let title = "t".repeat(255);

    let id = create_message(&app, &alice_token, &title, &[bob], None).await;

    let (status, body) = call(
        &app,
        "POST",
        &format!("/api/messages/{id}/comments"),
        &bob_token,
        Some(json!({ "text": "seen" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    let (status, _) = call(
        &app,
        "PUT",
        &format!("/api/messages/{id}/assign-to-me"),
        &bob_token,
        Some(json!({ "assigned_to": bob })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let titles: Vec<Option<String>> =
        sqlx::query_scalar("SELECT title FROM notifications WHERE message_id = $1 ORDER BY id")
            .bind(id)
            .fetch_all(app.db.pool())
            .await
            .unwrap();
    assert_eq!(titles.len(), 2);
    for t in titles {
        assert_eq!(t.unwrap().chars().count(), 255);
    }
}

#[tokio::test]
#[ignore = "requires PostgreSQL at DATABASE_URL"]
async fn test_departments_are_listed() {
    let app = test_app().await;
    let (_, token) = user_with_token(&app.db, "Alice", "secret-pw").await;
    let name = format!("Facilities {}", uuid::Uuid::new_v4());
    let dept_id: i64 =
        sqlx::query_scalar("INSERT INTO departments (name, color) VALUES ($1, '#ff0000') RETURNING id")
            .bind(&name)
            .fetch_one(app.db.pool())
            .await
            .unwrap();

    let (status, body) = call(&app, "GET", "/api/departments", &token, None).await;
    assert_eq!(status, StatusCode::OK);
    let dept = body
        .as_array()
        .unwrap()
        .iter()
        .find(|d| d["id"] == dept_id)
        .expect("department listed");
    assert_eq!(dept["name"], name.as_str());
    assert_eq!(dept["color"], "#ff0000");
}

#[tokio::test]
#[ignore = "requires PostgreSQL at DATABASE_URL"]
async fn test_change_password_revokes_other_tokens() {
    let app = test_app().await;
    let (alice, current) = user_with_token(&app.db, "Alice", "old-password").await;
    let other = issue_token(&app.db, alice).await;

    let (status, body) = call(
        &app,
        "POST",
        "/api/users/change-password",
        &current,
        Some(json!({ "currentPassword": "wrong-password", "newPassword": "new-password" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["errors"]["currentPassword"][0], "The current password is incorrect.");

    let (status, _) = call(
        &app,
        "POST",
        "/api/users/change-password",
        &current,
        Some(json!({ "currentPassword": "old-password", "newPassword": "short" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, body) = call(
        &app,
        "POST",
        "/api/users/change-password",
        &current,
        Some(json!({ "currentPassword": "old-password", "newPassword": "new-password" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    assert_eq!(call(&app, "GET", "/api/me", &current, None).await.0, StatusCode::OK);
    assert_eq!(call(&app, "GET", "/api/me", &other, None).await.0, StatusCode::UNAUTHORIZED);

    let row = app.db.find_user(alice).await.unwrap().unwrap();
    assert!(password::verify_password("new-password", &row.password_hash).unwrap());
    assert!(!password::verify_password("old-password", &row.password_hash).unwrap());
}
