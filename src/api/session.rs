use std::sync::Arc;

use axum::{extract::State, Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use validator::Validate;

use crate::api::extract::ValidatedJson;
use crate::auth::{self, password, Principal};
use crate::errors::AppError;
use crate::models::user::{Department, UserPayload};
use crate::AppState;

const DEFAULT_DEVICE: &str = "mobile";

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "The email field must be a valid email address."))]
    pub email: String,
    #[validate(length(min = 1, message = "The password field is required."))]
    pub password: String,
    #[validate(length(max = 255, message = "The device field must not be greater than 255 characters."))]
    pub device: Option<String>,
}

/// POST /api/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<Json<Value>, AppError> {

    let invalid = || AppError::invalid("email", "Invalid credentials");

    let user = state
        .db
        .find_user_by_email(&req.email)
        .await?
        .ok_or_else(invalid)?;

    if !password::verify_password(&req.password, &user.password_hash)? {
        tracing::info!(user_id = user.id, "login rejected: wrong password");
        return Err(invalid());
    }

    let device = req
        .device
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .unwrap_or(DEFAULT_DEVICE);
    let secret = auth::generate_secret();
    let token_id = state
        .db
        .insert_access_token(user.id, device, &auth::hash_secret(&secret))
        .await?;

    let payload = state
        .db
        .get_user(user.id)
        .await?
        .map(UserPayload::from)
        .ok_or(AppError::NotFound("user"))?;

    tracing::info!(user_id = user.id, token_id, device, "user logged in");

    Ok(Json(json!({
        "token": auth::format_token(token_id, &secret),
        "user": payload,
    })))
}

/// POST /api/logout
pub async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Value>, AppError> {
    state.db.delete_access_token(principal.token_id).await?;
    tracing::info!(user_id = principal.user_id, token_id = principal.token_id, "user logged out");
    Ok(Json(json!({ "message": "Logged out" })))
}

/// GET /api/me
pub async fn me(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<UserPayload>, AppError> {
    let user = state
        .db
        .get_user(principal.user_id)
        .await?
        .ok_or(AppError::NotFound("user"))?;
    Ok(Json(user.into()))
}

/// GET /api/users
pub async fn list_users(State(state): State<Arc<AppState>>) -> Result<Json<Vec<UserPayload>>, AppError> {
    let users = state.db.list_users().await?;
    Ok(Json(users.into_iter().map(UserPayload::from).collect()))
}

/// GET /api/departments
pub async fn list_departments(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Department>>, AppError> {
    Ok(Json(state.db.list_departments().await?))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChangePasswordRequest {
    #[serde(rename = "currentPassword")]
    #[validate(length(min = 1, message = "The current password field is required."))]
    pub current_password: String,
    #[serde(rename = "newPassword")]
    #[validate(length(min = 8, message = "The new password field must be at least 8 characters."))]
    pub new_password: String,
}

/// POST /api/users/change-password
///
/// Every other token of the user is revoked; the calling one stays valid.
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ValidatedJson(req): ValidatedJson<ChangePasswordRequest>,
) -> Result<Json<Value>, AppError> {
    let user = state
        .db
        .find_user(principal.user_id)
        .await?
        .ok_or(AppError::NotFound("user"))?;

    if !password::verify_password(&req.current_password, &user.password_hash)? {
        return Err(AppError::invalid(
            "currentPassword",
            "The current password is incorrect.",
        ));
    }

    let hash = password::hash_password(&req.new_password)?;
    let revoked = state
        .db
        .change_password(user.id, &hash, principal.token_id)
        .await?;

    tracing::info!(user_id = user.id, revoked, "password changed");

    Ok(Json(json!({ "message": "Password changed successfully." })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_request_validation() {
        let ok: LoginRequest =
            serde_json::from_value(json!({"email": "a@example.com", "password": "pw"})).unwrap();
        assert!(ok.validate().is_ok());

        let bad: LoginRequest =
            serde_json::from_value(json!({"email": "nope", "password": ""})).unwrap();
        let err = AppError::from(bad.validate().unwrap_err());
        match err {
            AppError::Validation(fields) => {
                assert!(fields.contains_key("email"));
                assert_eq!(fields["password"], vec!["The password field is required."]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_change_password_request_enforces_min_length() {
        let short: ChangePasswordRequest = serde_json::from_value(
            json!({"currentPassword": "old-secret", "newPassword": "short"}),
        )
        .unwrap();
        match AppError::from(short.validate().unwrap_err()) {
            AppError::Validation(fields) => {
                assert_eq!(fields.len(), 1);
                let messages = fields.values().next().unwrap();
                assert_eq!(
                    messages,
                    &vec!["The new password field must be at least 8 characters.".to_string()]
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let ok: ChangePasswordRequest = serde_json::from_value(
            json!({"currentPassword": "old-secret", "newPassword": "long-enough"}),
        )
        .unwrap();
        assert!(ok.validate().is_ok());
    }
}
