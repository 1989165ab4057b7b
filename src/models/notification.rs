use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::user::UserRef;

pub const KIND_MESSAGE_CREATED: &str = "message_created";
pub const KIND_MESSAGE_UPDATED: &str = "message_updated";
pub const KIND_MESSAGE_ASSIGNED: &str = "message_assigned";
pub const KIND_COMMENT_CREATED: &str = "comment_created";

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq)]
pub struct Notification {
    pub id: i64,
    pub title: Option<String>,
    pub body: String,
    pub r#type: String, // 'type' is a reserved keyword
    pub message_id: Option<i64>,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One user's delivery/read state for a notification.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq)]
pub struct Recipient {
    pub id: i64,
    pub notification_id: i64,
    pub user_id: i64,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Input for `NotificationStore::create_with_recipients`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewNotification {
    pub title: Option<String>,
    pub body: String,
    pub r#type: String,
    pub message_id: Option<i64>,
    pub creator_id: i64,
}

/// Partial metadata update; `None` keeps the current value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationPatch {
    pub title: Option<String>,
    pub body: Option<String>,
    pub r#type: Option<String>,
    pub message_id: Option<i64>,
}

/// A notification together with the recipients created for it.
#[derive(Debug, Clone)]
pub struct FannedOut {
    pub notification: Notification,
    pub recipients: Vec<Recipient>,
}

/// Outcome of `NotificationStore::update_recipients`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecipientSync {
    pub removed_user_ids: Vec<i64>,
    pub added: Vec<Recipient>,
}

/// Outcome of `NotificationStore::delete_recipient`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecipientRemoval {
    pub notification_id: i64,
    /// True when the removed recipient was the last one and the
    /// notification itself was deleted.
    pub notification_deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageRef {
    pub id: i64,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationSummary {
    pub id: i64,
    pub title: Option<String>,
    pub body: String,
    pub r#type: String,
    pub creator: Option<UserRef>,
    pub message: Option<MessageRef>,
    pub created_at: DateTime<Utc>,
}

/// Entry of a user's notification list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserNotification {
    pub recipient_id: i64,
    pub read_at: Option<DateTime<Utc>>,
    pub notification: NotificationSummary,
}

/// Flat join row backing [`UserNotification`].
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserNotificationRow {
    pub recipient_id: i64,
    pub read_at: Option<DateTime<Utc>>,
    pub notification_id: i64,
    pub title: Option<String>,
    pub body: String,
    pub r#type: String,
    pub created_at: DateTime<Utc>,
    pub creator_id: Option<i64>,
    pub creator_name: Option<String>,
    pub creator_email: Option<String>,
    pub message_id: Option<i64>,
    pub message_title: Option<String>,
}

impl From<UserNotificationRow> for UserNotification {
    fn from(row: UserNotificationRow) -> Self {
        let creator = match (row.creator_id, row.creator_name, row.creator_email) {
            (Some(id), Some(name), Some(email)) => Some(UserRef { id, name, email }),
            _ => None,
        };
        let message = match (row.message_id, row.message_title) {
            (Some(id), Some(title)) => Some(MessageRef { id, title }),
            _ => None,
        };
        Self {
            recipient_id: row.recipient_id,
            read_at: row.read_at,
            notification: NotificationSummary {
                id: row.notification_id,
                title: row.title,
                body: row.body,
                r#type: row.r#type,
                creator,
                message,
                created_at: row.created_at,
            },
        }
    }
}

/// Payload of the `notification.created` realtime event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationCreatedEvent {
    /// Recipient id, so the client can mark read / dismiss directly.
    pub id: i64,
    pub read: bool,
    pub message_id: Option<i64>,
    pub message: Option<String>,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub r#type: String,
}

impl NotificationCreatedEvent {
    pub const NAME: &'static str = "notification.created";

    pub fn new(recipient: &Recipient, notification: &Notification) -> Self {
        Self {
            id: recipient.id,
            read: false,
            message_id: notification.message_id,
            message: notification.title.clone(),
            body: notification.body.clone(),
            created_at: notification.created_at,
            r#type: notification.r#type.clone(),
        }
    }
}
