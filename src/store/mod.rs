pub mod postgres;

use async_trait::async_trait;

use crate::errors::AppError;
use crate::models::notification::{
    FannedOut, NewNotification, Recipient, RecipientRemoval, RecipientSync, UserNotification,
};

/// Persistence of notifications and their per-user recipient records.
/// Implementations: `PgStore` (PostgreSQL).
///
/// Invariants every implementation upholds:
/// - at most one recipient per (notification, user);
/// - creating a notification and its recipients is one atomic unit;
/// - removing the last recipient of a notification removes the notification
///   in the same atomic unit.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Insert a notification and one recipient per distinct id in `user_ids`.
    async fn create_with_recipients(
        &self,
        draft: &NewNotification,
        user_ids: &[i64],
    ) -> Result<FannedOut, AppError>;

    /// Replace the recipient set of a notification with `user_ids`,
    /// keeping the read state of recipients present before and after.
    async fn update_recipients(
        &self,
        notification_id: i64,
        user_ids: &[i64],
    ) -> Result<RecipientSync, AppError>;

    /// Mark one recipient read. Idempotent; fails with `Forbidden` when the
    /// recipient belongs to someone else.
    async fn mark_read(&self, recipient_id: i64, user_id: i64) -> Result<Recipient, AppError>;

    /// Mark all of a user's unread recipients read. Returns the number changed.
    async fn mark_all_read(&self, user_id: i64) -> Result<u64, AppError>;

    /// Dismiss a recipient; deletes the notification when none remain.
    async fn delete_recipient(
        &self,
        recipient_id: i64,
        user_id: i64,
    ) -> Result<RecipientRemoval, AppError>;

    /// A user's notifications, newest first.
    async fn list_for_user(&self, user_id: i64) -> Result<Vec<UserNotification>, AppError>;

    /// Device push tokens registered to a user.
    async fn push_tokens(&self, user_id: i64) -> Result<Vec<String>, AppError>;
}

/// Recipient operations are only allowed on one's own records.
pub fn ensure_owner(recipient: &Recipient, user_id: i64) -> Result<(), AppError> {
    if recipient.user_id == user_id {
        Ok(())
    } else {
        tracing::warn!(
            recipient_id = recipient.id,
            owner = recipient.user_id,
            requester = user_id,
            "recipient ownership mismatch"
        );
        Err(AppError::Forbidden)
    }
}
