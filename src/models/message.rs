use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message priority. Stored lowercase; the legacy German labels are accepted
/// on input so older mobile clients keep working.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[serde(alias = "Low", alias = "Niedrig")]
    Low,
    #[serde(alias = "Medium", alias = "Mittel")]
    Medium,
    #[serde(alias = "High", alias = "Hoch")]
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" | "niedrig" => Ok(Priority::Low),
            "medium" | "mittel" => Ok(Priority::Medium),
            "high" | "hoch" => Ok(Priority::High),
            _ => Err(()),
        }
    }
}

/// `POST /messages/{id}/assign` turns an announcement into a regular
/// assigned message.
pub const fn assignment_clears_announcement() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MessageRow {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub priority: String,
    pub status_id: i64,
    pub creator_id: Option<i64>,
    pub assigned_to: Option<i64>,
    pub department_id: Option<i64>,
    pub is_archived: bool,
    pub is_announcement: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MessageStatus {
    pub id: i64,
    pub name: String,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, PartialEq)]
pub struct AssigneeRef {
    pub id: i64,
    pub name: String,
    pub assigned_by: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChatMessageRow {
    pub id: i64,
    pub message_id: i64,
    pub user_id: Option<i64>,
    pub user_name: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ActivityRow {
    pub id: i64,
    pub message_id: i64,
    pub user_id: Option<i64>,
    pub user_name: Option<String>,
    pub action: String,
    pub assignee_id: Option<i64>,
    pub assignee_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Message as shown on boards and detail pages.
#[derive(Debug, Clone, Serialize)]
pub struct MessageView {
    #[serde(flatten)]
    pub message: MessageRow,
    pub status: Option<MessageStatus>,
    pub assignees: Vec<AssigneeRef>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageDetail {
    #[serde(flatten)]
    pub view: MessageView,
    pub chat_messages: Vec<ChatMessageRow>,
    pub activities: Vec<ActivityRow>,
}

pub struct NewMessage {
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub status_id: i64,
    pub creator_id: i64,
    pub assigned_to: Option<i64>,
    pub department_id: Option<i64>,
    pub is_announcement: bool,
}

pub struct MessageUpdate {
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub status_id: i64,
    pub assigned_to: Option<i64>,
    pub is_announcement: bool,
}

/// Which board a listing is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Board {
    /// Messages the user created.
    Created,
    /// Messages whose single assignee is the user.
    Assigned,
    /// Messages the user follows as an assignee without being the single
    /// assignee or the creator.
    Announcements,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BoardFilter {
    pub is_archived: Option<bool>,
    pub priority: Option<Priority>,
    /// Status name.
    pub status: Option<String>,
    pub creator_id: Option<i64>,
}
