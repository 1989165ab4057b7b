use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::auth;
use crate::errors::AppError;
use crate::models::message::MessageRow;
use crate::realtime::socket;
use crate::store::postgres::PgStore;
use crate::AppState;

pub mod extract;
pub mod messages;
pub mod notifications;
pub mod push_tokens;
pub mod session;

/// Build the API router.
/// All routes are relative; the caller mounts this under `/api`.
pub fn api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let protected = Router::new()
        .route("/logout", post(session::logout))
        .route("/me", get(session::me))
        .route("/users", get(session::list_users))
        .route("/users/change-password", post(session::change_password))
        .route("/departments", get(session::list_departments))
        .route("/push-tokens", post(push_tokens::register))
        .route(
            "/notifications",
            get(notifications::index).post(notifications::store),
        )
        .route("/notifications/read-all", post(notifications::mark_all_read))
        .route(
            "/notifications/:id",
            get(notifications::show)
                .put(notifications::update)
                .delete(notifications::destroy),
        )
        .route("/notifications/:id/read", post(notifications::mark_read))
        .route("/created", get(messages::created_board))
        .route("/assigned", get(messages::assigned_board))
        .route("/announcement", get(messages::announcement_board))
        .route("/message-statuses", get(messages::statuses))
        .route("/new-message", post(messages::store))
        .route("/message-update/:id", put(messages::update_message))
        .route(
            "/messages/:id",
            get(messages::show)
                .put(messages::set_archived)
                .delete(messages::destroy),
        )
        .route("/messages/:id/assign", post(messages::assign))
        .route("/messages/:id/assign-to-me", put(messages::assign_to_me))
        .route("/messages/:id/comments", post(messages::add_comment))
        .route("/store-activities", post(messages::store_activity))
        .route_layer(middleware::from_fn_with_state(state, auth::require_user));

    Router::new()
        .route("/login", post(session::login))
        // The socket authenticates itself (header or ?token=).
        .route("/ws", get(socket::ws_handler))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
}

// -- Shared handler helpers --

pub(crate) async fn load_message(db: &PgStore, id: i64) -> Result<MessageRow, AppError> {
    db.get_message(id)
        .await?
        .ok_or(AppError::NotFound("message"))
}

/// 422 on `field` when any id does not belong to a user.
pub(crate) async fn ensure_users_exist(
    db: &PgStore,
    field: &str,
    ids: &[i64],
) -> Result<(), AppError> {
    let missing = db.missing_user_ids(ids).await?;
    if missing.is_empty() {
        Ok(())
    } else {
        Err(AppError::invalid(
            field,
            format!("The selected {} is invalid.", field),
        ))
    }
}

/// `{ "message": …, "data": … }` envelope used by mutating endpoints.
pub(crate) fn envelope<T: serde::Serialize>(message: &str, data: T) -> serde_json::Value {
    serde_json::json!({ "message": message, "data": data })
}
