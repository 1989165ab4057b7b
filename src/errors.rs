use std::collections::BTreeMap;

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Field name → list of messages, rendered as the `errors` object of a 422.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed")]
    Validation(FieldErrors),

    #[error("unauthenticated")]
    Unauthenticated,

    #[error("forbidden")]
    Forbidden,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Single-field validation failure.
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(field.to_string(), vec![message.into()]);
        AppError::Validation(errors)
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errs: validator::ValidationErrors) -> Self {
        let mut errors = FieldErrors::new();
        for (field, field_errs) in errs.field_errors() {
            let messages = field_errs
                .iter()
                .map(|e| match &e.message {
                    Some(m) => m.to_string(),
                    None => format!("The {} field is invalid.", field),
                })
                .collect();
            errors.insert(field.to_string(), messages);
        }
        AppError::Validation(errors)
    }
}

/// Malformed bodies get the same 422 shape as failed validation rules.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        let detail = rejection.body_text();
        tracing::debug!(error = %detail, "rejected JSON body");
        match rejection {
            JsonRejection::JsonDataError(_) => {
                let (field, message) = json_field_error(&detail);
                AppError::invalid(&field, message)
            }
            JsonRejection::MissingJsonContentType(_) => {
                AppError::invalid("body", "The request body must be sent as application/json.")
            }
            _ => AppError::invalid("body", "The request body is not valid JSON."),
        }
    }
}

const JSON_DATA_PREFIX: &str = "Failed to deserialize the JSON body into the target type: ";

/// Field name and message for a serde error like "missing field `email`"
/// or "user_ids[0]: invalid type: string".
fn json_field_error(detail: &str) -> (String, String) {
    if let Some(rest) = detail.split("missing field `").nth(1) {
        if let Some(field) = rest.split('`').next().filter(|f| !f.is_empty()) {
            return (
                field.to_string(),
                format!("The {} field is required.", field.replace('_', " ")),
            );
        }
    }

    let detail = detail.strip_prefix(JSON_DATA_PREFIX).unwrap_or(detail);
    if let Some((path, _)) = detail.split_once(": ") {
        let field = path.split(['.', '[']).next().unwrap_or(path);
        if !field.is_empty() && !field.contains(' ') {
            return (
                field.to_string(),
                format!("The {} field is invalid.", field.replace('_', " ")),
            );
        }
    }

    ("body".to_string(), "The given data was invalid.".to_string())
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self {
            AppError::Validation(errors) => {
                let first = errors
                    .values()
                    .flat_map(|v| v.iter())
                    .next()
                    .cloned()
                    .unwrap_or_else(|| "The given data was invalid.".to_string());
                let body = Json(json!({
                    "message": first,
                    "errors": errors,
                }));
                return (StatusCode::UNPROCESSABLE_ENTITY, body).into_response();
            }
            AppError::Unauthenticated => (StatusCode::UNAUTHORIZED, "Unauthenticated.".to_string()),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "This action is unauthorized.".to_string()),
            AppError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{} not found", what)),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        (status, Json(json!({ "message": msg }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_validation_error_renders_field_messages() {
        let resp = AppError::invalid("email", "Invalid credentials").into_response();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_json(resp).await;
        assert_eq!(body["message"], "Invalid credentials");
        assert_eq!(body["errors"]["email"][0], "Invalid credentials");
    }

    #[test]
    fn test_json_missing_field_names_the_field() {
        let (field, msg) = json_field_error(
            "Failed to deserialize the JSON body into the target type: missing field `status_id` at line 1 column 20",
        );
        assert_eq!(field, "status_id");
        assert_eq!(msg, "The status id field is required.");
    }

    #[test]
    fn test_json_type_error_uses_path_root() {
        let (field, msg) = json_field_error(
            "Failed to deserialize the JSON body into the target type: user_ids[1]: invalid type: string \"x\", expected i64 at line 1 column 25",
        );
        assert_eq!(field, "user_ids");
        assert_eq!(msg, "The user ids field is invalid.");
    }

    #[test]
    fn test_json_error_without_path_falls_back_to_body() {
        let (field, _) = json_field_error(
            "Failed to deserialize the JSON body into the target type: invalid type: integer `5`, expected struct LoginRequest at line 1 column 1",
        );
        assert_eq!(field, "body");
    }

    #[tokio::test]
    async fn test_forbidden_maps_to_403() {
        let resp = AppError::Forbidden.into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_not_found_names_the_resource() {
        let resp = AppError::NotFound("message").into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body = body_json(resp).await;
        assert_eq!(body["message"], "message not found");
    }

    #[tokio::test]
    async fn test_internal_error_hides_details() {
        let resp = AppError::Internal(anyhow::anyhow!("pool exhausted")).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(resp).await;
        assert_eq!(body["message"], "internal server error");
    }
}
