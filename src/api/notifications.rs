use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use validator::Validate;

use super::ensure_users_exist;
use crate::api::extract::ValidatedJson;
use crate::auth::Principal;
use crate::errors::AppError;
use crate::models::notification::{FannedOut, NewNotification, NotificationPatch};
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateNotificationRequest {
    #[validate(length(max = 255, message = "The title field must not be greater than 255 characters."))]
    pub title: Option<String>,
    #[validate(length(min = 1, message = "The body field is required."))]
    pub body: String,
    #[serde(rename = "type")]
    #[validate(length(min = 1, max = 50, message = "The type field must be between 1 and 50 characters."))]
    pub kind: String,
    pub message_id: Option<i64>,
    #[validate(length(min = 1, message = "The user ids field is required."))]
    pub user_ids: Vec<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateNotificationRequest {
    #[validate(length(max = 255, message = "The title field must not be greater than 255 characters."))]
    pub title: Option<String>,
    pub body: Option<String>,
    #[serde(rename = "type")]
    #[validate(length(min = 1, max = 50, message = "The type field must be between 1 and 50 characters."))]
    pub kind: Option<String>,
    pub message_id: Option<i64>,
    /// Replaces the recipient set when present and non-empty.
    pub user_ids: Option<Vec<i64>>,
}

/// GET /api/notifications
pub async fn index(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Value>, AppError> {
    let data = state.notifications.list_for_user(principal.user_id).await?;
    Ok(Json(json!({ "success": true, "data": data })))
}

/// POST /api/notifications
pub async fn store(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ValidatedJson(req): ValidatedJson<CreateNotificationRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    ensure_users_exist(&state.db, "user_ids", &req.user_ids).await?;
    if let Some(message_id) = req.message_id {
        ensure_message_exists(&state, message_id).await?;
    }

    let draft = NewNotification {
        title: req.title,
        body: req.body,
        r#type: req.kind,
        message_id: req.message_id,
        creator_id: principal.user_id,
    };
    let fanned = state.fanout.explicit(&principal, &draft, &req.user_ids).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "data": {
                "notification": fanned.notification,
                "recipients": fanned.recipients,
            }
        })),
    ))
}

/// GET /api/notifications/:id
///
/// Visible to its recipients, its creator and admins.
pub async fn show(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    let notification = state
        .db
        .get_notification(id)
        .await?
        .ok_or(AppError::NotFound("notification"))?;

    let recipient = state.db.recipient_for(id, principal.user_id).await?;
    let is_creator = notification.created_by == Some(principal.user_id);
    if recipient.is_none() && !is_creator && !principal.is_admin {
        return Err(AppError::Forbidden);
    }

    let creator = match notification.created_by {
        Some(uid) => state.db.user_ref(uid).await?,
        None => None,
    };
    let message = match notification.message_id {
        Some(mid) => state.db.message_ref(mid).await?,
        None => None,
    };

    Ok(Json(json!({
        "success": true,
        "data": {
            "notification": notification,
            "recipient": recipient.map(|r| json!({ "id": r.id, "read_at": r.read_at })),
            "creator": creator,
            "message": message,
        }
    })))
}

/// PUT /api/notifications/:id
///
/// Metadata patch plus optional recipient sync. Recipients kept by the sync
/// keep their read state; added ones get a realtime/push delivery.
pub async fn update(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
    ValidatedJson(req): ValidatedJson<UpdateNotificationRequest>,
) -> Result<Json<Value>, AppError> {

    let existing = state
        .db
        .get_notification(id)
        .await?
        .ok_or(AppError::NotFound("notification"))?;
    if existing.created_by != Some(principal.user_id) && !principal.is_admin {
        return Err(AppError::Forbidden);
    }

    let user_ids = req.user_ids.filter(|ids| !ids.is_empty());
    if let Some(ids) = &user_ids {
        ensure_users_exist(&state.db, "user_ids", ids).await?;
    }
    if let Some(message_id) = req.message_id {
        ensure_message_exists(&state, message_id).await?;
    }

    let patch = NotificationPatch {
        title: req.title.filter(|t| !t.is_empty()),
        body: req.body.filter(|b| !b.is_empty()),
        r#type: req.kind,
        message_id: req.message_id,
    };
    let notification = state
        .db
        .update_notification(id, &patch)
        .await?
        .ok_or(AppError::NotFound("notification"))?;

    let mut removed = Vec::new();
    if let Some(ids) = user_ids {
        let sync = state.notifications.update_recipients(id, &ids).await?;
        removed = sync.removed_user_ids;
        if !sync.added.is_empty() {
            let fanned = FannedOut {
                notification: notification.clone(),
                recipients: sync.added,
            };
            state.fanout.deliver_added(&principal, &fanned).await;
        }
    }

    tracing::info!(notification_id = id, removed = removed.len(), "notification updated");

    Ok(Json(json!({ "success": true, "data": notification })))
}

/// POST /api/notifications/:id/read, where `id` is a recipient id.
pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(recipient_id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    let recipient = state
        .notifications
        .mark_read(recipient_id, principal.user_id)
        .await?;
    Ok(Json(json!({
        "success": true,
        "data": "Marked as read",
        "read_at": recipient.read_at,
    })))
}

/// POST /api/notifications/read-all
pub async fn mark_all_read(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Value>, AppError> {
    let count = state.notifications.mark_all_read(principal.user_id).await?;
    Ok(Json(json!({
        "success": true,
        "data": "All notifications marked as read",
        "count": count,
    })))
}

/// DELETE /api/notifications/:id, where `id` is a recipient id.
pub async fn destroy(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(recipient_id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    let removal = state
        .notifications
        .delete_recipient(recipient_id, principal.user_id)
        .await?;
    if removal.notification_deleted {
        tracing::debug!(
            notification_id = removal.notification_id,
            "last recipient dismissed, notification deleted"
        );
    }
    Ok(Json(json!({ "success": true, "data": "Notification deleted" })))
}

async fn ensure_message_exists(state: &AppState, message_id: i64) -> Result<(), AppError> {
    match state.db.message_ref(message_id).await? {
        Some(_) => Ok(()),
        None => Err(AppError::invalid(
            "message_id",
            "The selected message id is invalid.",
        )),
    }
}
