use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::Value;
use validator::Validate;

use super::{ensure_users_exist, envelope, load_message};
use crate::api::extract::ValidatedJson;
use crate::auth::Principal;
use crate::errors::AppError;
use crate::models::message::{
    Board, BoardFilter, MessageDetail, MessageStatus, MessageUpdate, MessageView, NewMessage,
    Priority,
};
use crate::models::{truncate_chars, VARCHAR_MAX};
use crate::AppState;

// ── Boards ────────────────────────────────────────────────────

/// Raw board query string. Empty values count as absent.
#[derive(Debug, Default, Deserialize)]
pub struct BoardQuery {
    pub is_archived: Option<String>,
    pub priority: Option<String>,
    pub status: Option<String>,
    pub creator_id: Option<String>,
}

impl TryFrom<BoardQuery> for BoardFilter {
    type Error = AppError;

    fn try_from(q: BoardQuery) -> Result<Self, Self::Error> {
        let is_archived = match q.is_archived.as_deref() {
            None => None,
            Some("1") | Some("true") | Some("on") | Some("yes") => Some(true),
            Some("0") | Some("false") | Some("off") | Some("no") | Some("") => Some(false),
            Some(_) => {
                return Err(AppError::invalid(
                    "is_archived",
                    "The is archived field must be true or false.",
                ))
            }
        };

        let priority = match filled(q.priority) {
            None => None,
            Some(p) => Some(p.parse::<Priority>().map_err(|_| {
                AppError::invalid("priority", "The selected priority is invalid.")
            })?),
        };

        let creator_id = match filled(q.creator_id) {
            None => None,
            Some(c) => Some(c.parse::<i64>().map_err(|_| {
                AppError::invalid("creator_id", "The creator id field must be an integer.")
            })?),
        };

        Ok(BoardFilter {
            is_archived,
            priority,
            status: filled(q.status),
            creator_id,
        })
    }
}

fn filled(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

async fn board(
    state: &AppState,
    board: Board,
    principal: &Principal,
    query: BoardQuery,
) -> Result<Json<Vec<MessageView>>, AppError> {
    let filter = BoardFilter::try_from(query)?;
    let messages = state.db.list_board(board, principal.user_id, &filter).await?;
    Ok(Json(messages))
}

/// GET /api/created
pub async fn created_board(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<BoardQuery>,
) -> Result<Json<Vec<MessageView>>, AppError> {
    board(&state, Board::Created, &principal, query).await
}

/// GET /api/assigned
pub async fn assigned_board(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<BoardQuery>,
) -> Result<Json<Vec<MessageView>>, AppError> {
    board(&state, Board::Assigned, &principal, query).await
}

/// GET /api/announcement
pub async fn announcement_board(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<BoardQuery>,
) -> Result<Json<Vec<MessageView>>, AppError> {
    board(&state, Board::Announcements, &principal, query).await
}

/// GET /api/message-statuses
pub async fn statuses(State(state): State<Arc<AppState>>) -> Result<Json<Vec<MessageStatus>>, AppError> {
    Ok(Json(state.db.list_statuses().await?))
}

/// GET /api/messages/:id
pub async fn show(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<MessageDetail>, AppError> {
    Ok(Json(detail(&state, id).await?))
}

async fn detail(state: &AppState, id: i64) -> Result<MessageDetail, AppError> {
    state
        .db
        .message_detail(id)
        .await?
        .ok_or(AppError::NotFound("message"))
}

// ── Create / Update ───────────────────────────────────────────

#[derive(Debug, Deserialize, Validate)]
pub struct MessageRequest {
    #[validate(length(min = 1, max = 255, message = "The title field is required and must not be greater than 255 characters."))]
    pub title: String,
    #[validate(length(min = 1, message = "The description field is required."))]
    pub description: String,
    pub priority: Priority,
    pub status_id: i64,
    /// Absent on update means "leave the assignees alone".
    pub assignees: Option<Vec<i64>>,
    /// Single responsible user (`assigned_to`).
    pub assignee: Option<i64>,
    #[serde(default)]
    pub is_announcement: bool,
}

impl MessageRequest {
    async fn check_references(&self, state: &AppState) -> Result<(), AppError> {
        if !state.db.status_exists(self.status_id).await? {
            return Err(AppError::invalid("status_id", "The selected status id is invalid."));
        }
        if let Some(assignees) = &self.assignees {
            ensure_users_exist(&state.db, "assignees", assignees).await?;
        }
        if let Some(assignee) = self.assignee {
            ensure_users_exist(&state.db, "assignee", &[assignee]).await?;
        }
        Ok(())
    }
}

/// POST /api/new-message
pub async fn store(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ValidatedJson(req): ValidatedJson<MessageRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    req.check_references(&state).await?;

    let department_id = state
        .db
        .get_user(principal.user_id)
        .await?
        .and_then(|u| u.department_id);
    let assignees = req.assignees.unwrap_or_default();

    let row = state
        .db
        .create_message(
            &NewMessage {
                title: req.title,
                description: req.description,
                priority: req.priority,
                status_id: req.status_id,
                creator_id: principal.user_id,
                assigned_to: req.assignee,
                department_id,
                is_announcement: req.is_announcement,
            },
            &assignees,
        )
        .await?;

    tracing::info!(message_id = row.id, creator_id = principal.user_id, "message created");

    state.fanout.message_created(&principal, &row, &assignees).await?;

    let detail = detail(&state, row.id).await?;
    Ok((
        StatusCode::CREATED,
        Json(envelope("Message created successfully", detail)),
    ))
}

/// PUT /api/message-update/:id
///
/// Only the creator or an assignee may edit.
pub async fn update_message(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
    ValidatedJson(req): ValidatedJson<MessageRequest>,
) -> Result<Json<Value>, AppError> {

    let message = load_message(&state.db, id).await?;
    let is_creator = message.creator_id == Some(principal.user_id);
    let is_assignee = state
        .db
        .message_assignee_ids(id)
        .await?
        .contains(&principal.user_id);
    if !is_creator && !is_assignee {
        tracing::warn!(message_id = id, user_id = principal.user_id, "message edit denied");
        return Err(AppError::Forbidden);
    }

    req.check_references(&state).await?;

    let update = MessageUpdate {
        title: req.title,
        description: req.description,
        priority: req.priority,
        status_id: req.status_id,
        assigned_to: req.assignee,
        is_announcement: req.is_announcement,
    };
    let row = state
        .db
        .update_message(id, &update, req.assignees.as_deref(), principal.user_id)
        .await?;

    let assignees = state.db.message_assignee_ids(id).await?;
    state
        .fanout
        .message_updated(&principal, &row, &assignees)
        .await?;

    let detail = detail(&state, id).await?;
    Ok(Json(envelope("Message updated successfully", detail)))
}

// ── Assignment / Archive ──────────────────────────────────────

#[derive(Debug, Deserialize, Validate)]
pub struct AssignRequest {
    #[validate(length(min = 1, message = "The assignees field is required."))]
    pub assignees: Vec<i64>,
}

/// POST /api/messages/:id/assign
///
/// Adds assignees without removing existing ones. Turns an announcement
/// into a regular message.
pub async fn assign(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
    ValidatedJson(req): ValidatedJson<AssignRequest>,
) -> Result<Json<Value>, AppError> {
    load_message(&state.db, id).await?;
    ensure_users_exist(&state.db, "assignees", &req.assignees).await?;

    let before = state
        .db
        .assign_users(id, &req.assignees, principal.user_id)
        .await?;

    let row = load_message(&state.db, id).await?;
    state
        .fanout
        .message_assigned(&principal, &row, &before, &req.assignees)
        .await?;

    let detail = detail(&state, id).await?;
    Ok(Json(envelope("Assignees updated successfully", detail)))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ArchiveRequest {
    pub is_archived: bool,
}

/// PUT /api/messages/:id
pub async fn set_archived(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
    ValidatedJson(req): ValidatedJson<ArchiveRequest>,
) -> Result<Json<Value>, AppError> {
    load_message(&state.db, id).await?;
    let row = state
        .db
        .set_archived(id, req.is_archived, principal.user_id)
        .await?;
    Ok(Json(envelope("Message updated successfully", row)))
}

#[derive(Debug, Deserialize, Validate)]
pub struct AssignToMeRequest {
    pub assigned_to: Option<i64>,
}

/// PUT /api/messages/:id/assign-to-me
pub async fn assign_to_me(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
    ValidatedJson(req): ValidatedJson<AssignToMeRequest>,
) -> Result<Json<Value>, AppError> {
    load_message(&state.db, id).await?;
    if let Some(user_id) = req.assigned_to {
        ensure_users_exist(&state.db, "assigned_to", &[user_id]).await?;
    }

    let action = truncate_chars(format!("{} assigned themselves", principal.name), VARCHAR_MAX);
    let row = state
        .db
        .set_single_assignee(id, req.assigned_to, principal.user_id, &action)
        .await?;
    Ok(Json(envelope("Message assigned successfully", row)))
}

// ── Comments / Activities ─────────────────────────────────────

#[derive(Debug, Deserialize, Validate)]
pub struct CommentRequest {
    #[validate(length(min = 1, max = 2000, message = "The text field is required and must not be greater than 2000 characters."))]
    pub text: String,
}

/// POST /api/messages/:id/comments
pub async fn add_comment(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
    ValidatedJson(req): ValidatedJson<CommentRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let message = load_message(&state.db, id).await?;

    let comment = state
        .db
        .add_comment(id, principal.user_id, &req.text)
        .await?;

    let assignees = state.db.message_assignee_ids(id).await?;
    state
        .fanout
        .comment_created(&principal, &message, &assignees, &comment.content)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(envelope("Comment added successfully", comment)),
    ))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ActivityRequest {
    pub message_id: i64,
    #[validate(length(min = 1, max = 255, message = "The action field is required and must not be greater than 255 characters."))]
    pub action: String,
    pub assignee_id: Option<i64>,
}

/// POST /api/store-activities
pub async fn store_activity(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ValidatedJson(req): ValidatedJson<ActivityRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    if state.db.get_message(req.message_id).await?.is_none() {
        return Err(AppError::invalid("message_id", "The selected message id is invalid."));
    }
    if let Some(assignee) = req.assignee_id {
        ensure_users_exist(&state.db, "assignee_id", &[assignee]).await?;
    }

    let activity = state
        .db
        .add_activity(req.message_id, principal.user_id, &req.action, req.assignee_id)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(envelope("Activity created successfully", activity)),
    ))
}

/// DELETE /api/messages/:id
///
/// Creator only. Notifications about the message are deleted with it.
pub async fn destroy(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    let message = load_message(&state.db, id).await?;
    if message.creator_id != Some(principal.user_id) {
        return Err(AppError::Forbidden);
    }
    state.db.delete_message(id).await?;
    tracing::info!(message_id = id, user_id = principal.user_id, "message deleted");
    Ok(Json(envelope("Message deleted successfully", Value::Null)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(pairs: &[(&str, &str)]) -> BoardQuery {
        let mut q = BoardQuery::default();
        for (k, v) in pairs {
            let v = Some(v.to_string());
            match *k {
                "is_archived" => q.is_archived = v,
                "priority" => q.priority = v,
                "status" => q.status = v,
                "creator_id" => q.creator_id = v,
                _ => unreachable!(),
            }
        }
        q
    }

    #[test]
    fn test_empty_query_has_no_filters() {
        let f = BoardFilter::try_from(BoardQuery::default()).unwrap();
        assert!(f.is_archived.is_none());
        assert!(f.priority.is_none());
        assert!(f.status.is_none());
        assert!(f.creator_id.is_none());
    }

    #[test]
    fn test_query_parses_laravel_style_values() {
        let f = BoardFilter::try_from(query(&[
            ("is_archived", "1"),
            ("priority", "Hoch"),
            ("status", "In Progress"),
            ("creator_id", "7"),
        ]))
        .unwrap();
        assert_eq!(f.is_archived, Some(true));
        assert_eq!(f.priority, Some(Priority::High));
        assert_eq!(f.status.as_deref(), Some("In Progress"));
        assert_eq!(f.creator_id, Some(7));
    }

    #[test]
    fn test_blank_values_are_ignored() {
        let f = BoardFilter::try_from(query(&[("priority", " "), ("status", "")])).unwrap();
        assert!(f.priority.is_none());
        assert!(f.status.is_none());
        let f = BoardFilter::try_from(query(&[("is_archived", "")])).unwrap();
        assert_eq!(f.is_archived, Some(false));
    }

    #[test]
    fn test_bad_values_are_rejected() {
        assert!(BoardFilter::try_from(query(&[("priority", "urgent")])).is_err());
        assert!(BoardFilter::try_from(query(&[("creator_id", "me")])).is_err());
        assert!(BoardFilter::try_from(query(&[("is_archived", "maybe")])).is_err());
    }

    #[test]
    fn test_message_request_requires_title() {
        let req: MessageRequest = serde_json::from_value(serde_json::json!({
            "title": "",
            "description": "d",
            "priority": "Mittel",
            "status_id": 1
        }))
        .unwrap();
        assert!(req.validate().is_err());
        assert!(req.assignees.is_none());
        assert!(!req.is_announcement);
    }
}
