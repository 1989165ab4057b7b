use std::sync::Arc;

use axum::{extract::State, Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use validator::Validate;

use crate::api::extract::ValidatedJson;
use crate::auth::Principal;
use crate::errors::AppError;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct PushTokenRequest {
    #[validate(length(min = 1, max = 255, message = "The token field is required."))]
    pub token: String,
}

/// POST /api/push-tokens
///
/// A device token belongs to whoever registered it last.
pub async fn register(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ValidatedJson(req): ValidatedJson<PushTokenRequest>,
) -> Result<Json<Value>, AppError> {
    let token = req.token.trim();
    if token.is_empty() {
        return Err(AppError::invalid("token", "The token field is required."));
    }

    state.db.upsert_push_token(token, principal.user_id).await?;
    tracing::debug!(user_id = principal.user_id, "push token registered");

    Ok(Json(json!({ "success": true })))
}
