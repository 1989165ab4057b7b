//! Bearer-token authentication.
//!
//! Tokens are issued as `{token_id}|{secret}`. Only the SHA-256 of the
//! secret is stored, so a leaked table cannot be replayed.

pub mod password;

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use rand::{distributions::Alphanumeric, Rng};
use sha2::{Digest, Sha256};

use crate::errors::AppError;
use crate::store::postgres::PgStore;
use crate::AppState;

pub const SECRET_LEN: usize = 40;
pub const SOCKET_ID_HEADER: &str = "x-socket-id";

/// The authenticated caller, passed explicitly to every operation that
/// depends on who is asking.
#[derive(Debug, Clone, PartialEq)]
pub struct Principal {
    pub user_id: i64,
    pub name: String,
    pub is_admin: bool,
    pub token_id: i64,
    /// Realtime socket of the caller, excluded from its own broadcasts.
    pub socket_id: Option<String>,
}

pub fn generate_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SECRET_LEN)
        .map(char::from)
        .collect()
}

pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn format_token(token_id: i64, secret: &str) -> String {
    format!("{}|{}", token_id, secret)
}

/// Split a presented token into its optional id prefix and the secret.
pub fn split_token(raw: &str) -> Option<(Option<i64>, &str)> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.split_once('|') {
        Some((id, secret)) => {
            let id = id.parse().ok()?;
            (!secret.is_empty()).then_some((Some(id), secret))
        }
        None => Some((None, raw)),
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim())
}

pub fn socket_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SOCKET_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Resolve a presented token to its user.
pub async fn authenticate(db: &PgStore, raw: &str) -> Result<Principal, AppError> {
    let (token_id, secret) = split_token(raw).ok_or(AppError::Unauthenticated)?;

    let row = db
        .find_access_token(&hash_secret(secret))
        .await?
        .ok_or(AppError::Unauthenticated)?;

    if token_id.is_some_and(|id| id != row.token_id) {
        tracing::warn!(token_id = row.token_id, "token id prefix mismatch");
        return Err(AppError::Unauthenticated);
    }

    if let Err(e) = db.touch_access_token(row.token_id).await {
        tracing::warn!(token_id = row.token_id, error = %e, "failed to touch access token");
    }

    Ok(Principal {
        user_id: row.user_id,
        name: row.user_name,
        is_admin: row.is_admin,
        token_id: row.token_id,
        socket_id: None,
    })
}

/// Middleware: requires `Authorization: Bearer <token>` and stores the
/// resulting [`Principal`] in the request extensions.
pub async fn require_user(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let raw = bearer_token(req.headers()).ok_or_else(|| {
        tracing::debug!("missing bearer token");
        AppError::Unauthenticated
    })?;

    let mut principal = authenticate(&state.db, raw).await?;
    principal.socket_id = socket_id(req.headers());

    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_secret_shape() {
        let s = generate_secret();
        assert_eq!(s.len(), SECRET_LEN);
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(s, generate_secret());
    }

    #[test]
    fn test_hash_is_sha256_hex() {
        let h = hash_secret("abc");
        assert_eq!(
            h,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_split_token() {
        assert_eq!(split_token("12|secret"), Some((Some(12), "secret")));
        assert_eq!(split_token("secret"), Some((None, "secret")));
        assert_eq!(split_token("x|secret"), None);
        assert_eq!(split_token("12|"), None);
        assert_eq!(split_token("   "), None);
        assert_eq!(format_token(7, "s"), "7|s");
    }

    #[test]
    fn test_header_helpers() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_none());
        headers.insert("authorization", HeaderValue::from_static("Bearer 3|abc"));
        headers.insert(SOCKET_ID_HEADER, HeaderValue::from_static(" 123.456 "));
        assert_eq!(bearer_token(&headers), Some("3|abc"));
        assert_eq!(socket_id(&headers).as_deref(), Some("123.456"));
    }
}
