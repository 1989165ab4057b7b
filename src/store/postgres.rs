use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;

use crate::errors::AppError;
use crate::models::message::{
    assignment_clears_announcement, ActivityRow, AssigneeRef, Board, BoardFilter, ChatMessageRow,
    MessageDetail, MessageRow, MessageStatus, MessageUpdate, MessageView, NewMessage,
};
use crate::models::notification::{
    FannedOut, MessageRef, NewNotification, Notification, NotificationPatch, Recipient,
    RecipientRemoval, RecipientSync, UserNotification, UserNotificationRow,
};
use crate::models::user::{Department, NewUser, UserRef, UserRow, UserWithDepartment};
use crate::notification::recipients::{self, RecipientDiff};
use crate::store::{ensure_owner, NotificationStore};

const NOTIFICATION_COLUMNS: &str =
    "id, title, body, type, message_id, created_by, created_at, updated_at";
const RECIPIENT_COLUMNS: &str = "id, notification_id, user_id, read_at, created_at";
const USER_WITH_DEPARTMENT: &str = r#"SELECT u.id, u.name, u.email, u.is_admin, u.department_id,
       d.name AS department_name, d.color AS department_color
  FROM users u
  LEFT JOIN departments d ON d.id = u.department_id"#;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    // -- User Operations --

    pub async fn insert_user(&self, user: &NewUser) -> anyhow::Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"INSERT INTO users (name, email, password_hash, department_id, is_admin)
               VALUES ($1, $2, $3, $4, $5)
               RETURNING id"#,
        )
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.department_id)
        .bind(user.is_admin)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<UserRow>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, name, email, password_hash, department_id, is_admin, created_at, updated_at FROM users WHERE lower(email) = lower($1)",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_user(&self, id: i64) -> anyhow::Result<Option<UserWithDepartment>> {
        let row = sqlx::query_as::<_, UserWithDepartment>(&format!(
            "{} WHERE u.id = $1",
            USER_WITH_DEPARTMENT
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list_users(&self) -> anyhow::Result<Vec<UserWithDepartment>> {
        let rows = sqlx::query_as::<_, UserWithDepartment>(&format!(
            "{} ORDER BY u.name ASC, u.id ASC",
            USER_WITH_DEPARTMENT
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn find_user(&self, id: i64) -> anyhow::Result<Option<UserRow>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, name, email, password_hash, department_id, is_admin, created_at, updated_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Store a new password hash and revoke every token of the user except
    /// `keep_token_id`. Returns the number of revoked tokens.
    pub async fn change_password(
        &self,
        user_id: i64,
        password_hash: &str,
        keep_token_id: i64,
    ) -> anyhow::Result<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE users SET password_hash = $1, updated_at = NOW() WHERE id = $2")
            .bind(password_hash)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        let revoked = sqlx::query(
            "DELETE FROM personal_access_tokens WHERE user_id = $1 AND id <> $2",
        )
        .bind(user_id)
        .bind(keep_token_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        Ok(revoked)
    }

    pub async fn list_departments(&self) -> anyhow::Result<Vec<Department>> {
        let rows = sqlx::query_as::<_, Department>(
            "SELECT id, name, color FROM departments ORDER BY name ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn user_ref(&self, id: i64) -> anyhow::Result<Option<UserRef>> {
        let row = sqlx::query_as::<_, (i64, String, String)>(
            "SELECT id, name, email FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, name, email)| UserRef { id, name, email }))
    }

    /// Ids from `ids` that do not belong to any user.
    pub async fn missing_user_ids(&self, ids: &[i64]) -> anyhow::Result<Vec<i64>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let found: Vec<i64> = sqlx::query_scalar("SELECT id FROM users WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.iter().copied().filter(|id| !found.contains(id)).collect())
    }

    // -- Access Token Operations --

    pub async fn insert_access_token(
        &self,
        user_id: i64,
        name: &str,
        token_hash: &str,
    ) -> anyhow::Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"INSERT INTO personal_access_tokens (user_id, name, token_hash)
               VALUES ($1, $2, $3)
               RETURNING id"#,
        )
        .bind(user_id)
        .bind(name)
        .bind(token_hash)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn find_access_token(&self, token_hash: &str) -> anyhow::Result<Option<AccessTokenRow>> {
        let row = sqlx::query_as::<_, AccessTokenRow>(
            r#"SELECT t.id AS token_id, t.name AS device, u.id AS user_id, u.name AS user_name,
                      u.is_admin
                 FROM personal_access_tokens t
                 JOIN users u ON u.id = t.user_id
                WHERE t.token_hash = $1"#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn touch_access_token(&self, token_id: i64) -> anyhow::Result<()> {
        sqlx::query("UPDATE personal_access_tokens SET last_used_at = NOW() WHERE id = $1")
            .bind(token_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_access_token(&self, token_id: i64) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM personal_access_tokens WHERE id = $1")
            .bind(token_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // -- Push Token Operations --

    /// Register `token` for `user_id`, taking it over from any previous owner.
    pub async fn upsert_push_token(&self, token: &str, user_id: i64) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO push_tokens (token, user_id)
               VALUES ($1, $2)
               ON CONFLICT (token) DO UPDATE
               SET user_id = EXCLUDED.user_id, updated_at = NOW()"#,
        )
        .bind(token)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // -- Message Status Operations --

    pub async fn list_statuses(&self) -> anyhow::Result<Vec<MessageStatus>> {
        let rows = sqlx::query_as::<_, MessageStatus>(
            "SELECT id, name, color FROM message_statuses ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn status_exists(&self, id: i64) -> anyhow::Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM message_statuses WHERE id = $1)",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    // -- Message Operations --

    /// Insert a message and attach its assignees in one transaction.
    pub async fn create_message(
        &self,
        msg: &NewMessage,
        assignees: &[i64],
    ) -> anyhow::Result<MessageRow> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, MessageRow>(
            r#"INSERT INTO messages (title, description, priority, status_id, creator_id, assigned_to, department_id, is_announcement)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
               RETURNING *"#,
        )
        .bind(&msg.title)
        .bind(&msg.description)
        .bind(msg.priority.as_str())
        .bind(msg.status_id)
        .bind(msg.creator_id)
        .bind(msg.assigned_to)
        .bind(msg.department_id)
        .bind(msg.is_announcement)
        .fetch_one(&mut *tx)
        .await?;

        attach_assignees(&mut tx, row.id, assignees, msg.creator_id).await?;

        tx.commit().await?;
        Ok(row)
    }

    pub async fn get_message(&self, id: i64) -> anyhow::Result<Option<MessageRow>> {
        let row = sqlx::query_as::<_, MessageRow>("SELECT * FROM messages WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn message_ref(&self, id: i64) -> anyhow::Result<Option<MessageRef>> {
        let row = sqlx::query_as::<_, (i64, String)>("SELECT id, title FROM messages WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(id, title)| MessageRef { id, title }))
    }

    pub async fn message_assignee_ids(&self, message_id: i64) -> anyhow::Result<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT user_id FROM message_user WHERE message_id = $1 ORDER BY created_at ASC, user_id ASC",
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Update message fields and, when `assignees` is given, sync the pivot:
    /// unlisted assignees are detached, listed ones attached or refreshed.
    pub async fn update_message(
        &self,
        id: i64,
        update: &MessageUpdate,
        assignees: Option<&[i64]>,
        actor_id: i64,
    ) -> anyhow::Result<MessageRow> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, MessageRow>(
            r#"UPDATE messages
               SET title = $2, description = $3, priority = $4, status_id = $5,
                   assigned_to = $6, is_announcement = $7, updated_at = NOW()
               WHERE id = $1
               RETURNING *"#,
        )
        .bind(id)
        .bind(&update.title)
        .bind(&update.description)
        .bind(update.priority.as_str())
        .bind(update.status_id)
        .bind(update.assigned_to)
        .bind(update.is_announcement)
        .fetch_one(&mut *tx)
        .await?;

        if let Some(assignees) = assignees {
            sqlx::query("DELETE FROM message_user WHERE message_id = $1 AND NOT (user_id = ANY($2))")
                .bind(id)
                .bind(assignees)
                .execute(&mut *tx)
                .await?;
            attach_assignees(&mut tx, id, assignees, actor_id).await?;
        }

        tx.commit().await?;
        Ok(row)
    }

    /// Attach assignees without detaching existing ones and log one
    /// "assigned to" activity per assignee (not duplicated on repeat).
    /// Returns the assignee ids present before the call.
    pub async fn assign_users(
        &self,
        message_id: i64,
        assignees: &[i64],
        actor_id: i64,
    ) -> anyhow::Result<Vec<i64>> {
        let assignees = recipients::distinct(assignees.iter().copied());
        let mut tx = self.pool.begin().await?;

        let before = sqlx::query_scalar::<_, i64>(
            "SELECT user_id FROM message_user WHERE message_id = $1 ORDER BY created_at ASC, user_id ASC",
        )
        .bind(message_id)
        .fetch_all(&mut *tx)
        .await?;

        attach_assignees(&mut tx, message_id, &assignees, actor_id).await?;

        sqlx::query(
            r#"INSERT INTO activities (message_id, user_id, action, assignee_id)
               SELECT $1, $2, 'assigned to', a
                 FROM UNNEST($3::BIGINT[]) AS a
                WHERE NOT EXISTS (
                    SELECT 1 FROM activities x
                     WHERE x.message_id = $1 AND x.user_id = $2
                       AND x.action = 'assigned to' AND x.assignee_id = a
                )"#,
        )
        .bind(message_id)
        .bind(actor_id)
        .bind(&assignees)
        .execute(&mut *tx)
        .await?;

        if assignment_clears_announcement() {
            sqlx::query(
                "UPDATE messages SET is_announcement = false, updated_at = NOW() WHERE id = $1",
            )
            .bind(message_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(before)
    }

    pub async fn set_archived(
        &self,
        message_id: i64,
        archived: bool,
        actor_id: i64,
    ) -> anyhow::Result<MessageRow> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, MessageRow>(
            "UPDATE messages SET is_archived = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(message_id)
        .bind(archived)
        .fetch_one(&mut *tx)
        .await?;

        let action = if archived { "archived message" } else { "unarchived message" };
        insert_activity(&mut tx, message_id, actor_id, action, None).await?;

        tx.commit().await?;
        Ok(row)
    }

    pub async fn set_single_assignee(
        &self,
        message_id: i64,
        assigned_to: Option<i64>,
        actor_id: i64,
        action: &str,
    ) -> anyhow::Result<MessageRow> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, MessageRow>(
            "UPDATE messages SET assigned_to = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(message_id)
        .bind(assigned_to)
        .fetch_one(&mut *tx)
        .await?;

        insert_activity(&mut tx, message_id, actor_id, action, None).await?;

        tx.commit().await?;
        Ok(row)
    }

    /// Insert a comment plus its "added a comment" activity.
    pub async fn add_comment(
        &self,
        message_id: i64,
        user_id: i64,
        content: &str,
    ) -> anyhow::Result<ChatMessageRow> {
        let mut tx = self.pool.begin().await?;
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO chat_messages (message_id, user_id, content) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(message_id)
        .bind(user_id)
        .bind(content)
        .fetch_one(&mut *tx)
        .await?;

        insert_activity(&mut tx, message_id, user_id, "added a comment", None).await?;

        let row = sqlx::query_as::<_, ChatMessageRow>(
            r#"SELECT c.id, c.message_id, c.user_id, u.name AS user_name, c.content, c.created_at
                 FROM chat_messages c
                 LEFT JOIN users u ON u.id = c.user_id
                WHERE c.id = $1"#,
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row)
    }

    pub async fn add_activity(
        &self,
        message_id: i64,
        user_id: i64,
        action: &str,
        assignee_id: Option<i64>,
    ) -> anyhow::Result<ActivityRow> {
        let mut tx = self.pool.begin().await?;
        let id = insert_activity(&mut tx, message_id, user_id, action, assignee_id).await?;
        let row = sqlx::query_as::<_, ActivityRow>(&format!("{} WHERE a.id = $1", ACTIVITY_SELECT))
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(row)
    }

    /// Delete a message. Comments, activities, pivot rows and notifications
    /// linked to it go with it (ON DELETE CASCADE).
    pub async fn delete_message(&self, id: i64) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM messages WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_board(
        &self,
        board: Board,
        user_id: i64,
        filter: &BoardFilter,
    ) -> anyhow::Result<Vec<MessageView>> {
        let board_clause = match board {
            Board::Created => "m.creator_id = $1",
            Board::Assigned => "m.assigned_to = $1",
            Board::Announcements => {
                r#"EXISTS (SELECT 1 FROM message_user mu WHERE mu.message_id = m.id AND mu.user_id = $1)
                   AND m.assigned_to IS DISTINCT FROM $1
                   AND m.creator_id IS DISTINCT FROM $1"#
            }
        };

        let sql = format!(
            r#"SELECT m.* FROM messages m
                 LEFT JOIN message_statuses s ON s.id = m.status_id
                WHERE {}
                  AND ($2::BOOLEAN IS NULL OR m.is_archived = $2)
                  AND ($3::TEXT IS NULL OR m.priority = $3)
                  AND ($4::TEXT IS NULL OR s.name = $4)
                  AND ($5::BIGINT IS NULL OR m.creator_id = $5)
                ORDER BY m.created_at DESC, m.id DESC"#,
            board_clause
        );

        let rows = sqlx::query_as::<_, MessageRow>(&sql)
            .bind(user_id)
            .bind(filter.is_archived)
            .bind(filter.priority.map(|p| p.as_str()))
            .bind(filter.status.as_deref())
            .bind(filter.creator_id)
            .fetch_all(&self.pool)
            .await?;

        self.message_views(rows).await
    }

    pub async fn message_detail(&self, id: i64) -> anyhow::Result<Option<MessageDetail>> {
        let Some(row) = self.get_message(id).await? else {
            return Ok(None);
        };
        let view = self
            .message_views(vec![row])
            .await?
            .pop()
            .ok_or_else(|| anyhow::anyhow!("message view for {} vanished", id))?;

        let chat_messages = sqlx::query_as::<_, ChatMessageRow>(
            r#"SELECT c.id, c.message_id, c.user_id, u.name AS user_name, c.content, c.created_at
                 FROM chat_messages c
                 LEFT JOIN users u ON u.id = c.user_id
                WHERE c.message_id = $1
                ORDER BY c.created_at ASC, c.id ASC"#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let activities = sqlx::query_as::<_, ActivityRow>(&format!(
            "{} WHERE a.message_id = $1 ORDER BY a.created_at ASC, a.id ASC",
            ACTIVITY_SELECT
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(MessageDetail {
            view,
            chat_messages,
            activities,
        }))
    }

    /// Attach statuses and assignees to message rows, preserving row order.
    async fn message_views(&self, rows: Vec<MessageRow>) -> anyhow::Result<Vec<MessageView>> {
        if rows.is_empty() {
            return Ok(vec![]);
        }
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let status_ids: Vec<i64> = recipients::distinct(rows.iter().map(|r| r.status_id));

        let statuses: HashMap<i64, MessageStatus> = sqlx::query_as::<_, MessageStatus>(
            "SELECT id, name, color FROM message_statuses WHERE id = ANY($1)",
        )
        .bind(&status_ids)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|s| (s.id, s))
        .collect();

        let assignee_rows = sqlx::query_as::<_, AssigneeWithMessage>(
            r#"SELECT mu.message_id, u.id, u.name, mu.assigned_by
                 FROM message_user mu
                 JOIN users u ON u.id = mu.user_id
                WHERE mu.message_id = ANY($1)
                ORDER BY mu.created_at ASC, u.id ASC"#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut assignees: HashMap<i64, Vec<AssigneeRef>> = HashMap::new();
        for a in assignee_rows {
            assignees.entry(a.message_id).or_default().push(AssigneeRef {
                id: a.id,
                name: a.name,
                assigned_by: a.assigned_by,
            });
        }

        Ok(rows
            .into_iter()
            .map(|message| MessageView {
                status: statuses.get(&message.status_id).cloned(),
                assignees: assignees.remove(&message.id).unwrap_or_default(),
                message,
            })
            .collect())
    }

    // -- Notification Operations --

    pub async fn get_notification(&self, id: i64) -> anyhow::Result<Option<Notification>> {
        let row = sqlx::query_as::<_, Notification>(&format!(
            "SELECT {} FROM notifications WHERE id = $1",
            NOTIFICATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Apply a metadata patch. Fields left `None` keep their value.
    pub async fn update_notification(
        &self,
        id: i64,
        patch: &NotificationPatch,
    ) -> anyhow::Result<Option<Notification>> {
        let row = sqlx::query_as::<_, Notification>(&format!(
            r#"UPDATE notifications
               SET title = COALESCE($2, title),
                   body = COALESCE($3, body),
                   type = COALESCE($4, type),
                   message_id = COALESCE($5, message_id),
                   updated_at = NOW()
               WHERE id = $1
               RETURNING {}"#,
            NOTIFICATION_COLUMNS
        ))
        .bind(id)
        .bind(patch.title.as_deref())
        .bind(patch.body.as_deref())
        .bind(patch.r#type.as_deref())
        .bind(patch.message_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn recipient_for(
        &self,
        notification_id: i64,
        user_id: i64,
    ) -> anyhow::Result<Option<Recipient>> {
        let row = sqlx::query_as::<_, Recipient>(&format!(
            "SELECT {} FROM notification_recipients WHERE notification_id = $1 AND user_id = $2",
            RECIPIENT_COLUMNS
        ))
        .bind(notification_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

#[async_trait]
impl NotificationStore for PgStore {
    async fn create_with_recipients(
        &self,
        draft: &NewNotification,
        user_ids: &[i64],
    ) -> Result<FannedOut, AppError> {
        let user_ids = recipients::distinct(user_ids.iter().copied());
        let mut tx = self.pool.begin().await?;

        let notification = sqlx::query_as::<_, Notification>(&format!(
            r#"INSERT INTO notifications (title, body, type, message_id, created_by)
               VALUES ($1, $2, $3, $4, $5)
               RETURNING {}"#,
            NOTIFICATION_COLUMNS
        ))
        .bind(draft.title.as_deref())
        .bind(&draft.body)
        .bind(&draft.r#type)
        .bind(draft.message_id)
        .bind(draft.creator_id)
        .fetch_one(&mut *tx)
        .await?;

        let recipients = insert_recipients(&mut tx, notification.id, &user_ids).await?;

        tx.commit().await?;

        tracing::debug!(
            notification_id = notification.id,
            r#type = %notification.r#type,
            recipients = recipients.len(),
            "notification created"
        );

        Ok(FannedOut {
            notification,
            recipients,
        })
    }

    async fn update_recipients(
        &self,
        notification_id: i64,
        user_ids: &[i64],
    ) -> Result<RecipientSync, AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query_scalar::<_, i64>("SELECT id FROM notifications WHERE id = $1 FOR UPDATE")
            .bind(notification_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(AppError::NotFound("notification"))?;

        let existing = sqlx::query_scalar::<_, i64>(
            "SELECT user_id FROM notification_recipients WHERE notification_id = $1 ORDER BY id ASC",
        )
        .bind(notification_id)
        .fetch_all(&mut *tx)
        .await?;

        let diff = RecipientDiff::compute(&existing, user_ids);
        if diff.is_empty() {
            return Ok(RecipientSync::default());
        }

        if !diff.remove.is_empty() {
            sqlx::query(
                "DELETE FROM notification_recipients WHERE notification_id = $1 AND user_id = ANY($2)",
            )
            .bind(notification_id)
            .bind(&diff.remove)
            .execute(&mut *tx)
            .await?;
        }

        let added = insert_recipients(&mut tx, notification_id, &diff.add).await?;

        tx.commit().await?;

        Ok(RecipientSync {
            removed_user_ids: diff.remove,
            added,
        })
    }

    async fn mark_read(&self, recipient_id: i64, user_id: i64) -> Result<Recipient, AppError> {
        let recipient = self.find_recipient(recipient_id).await?;
        ensure_owner(&recipient, user_id)?;

        if recipient.read_at.is_some() {
            return Ok(recipient);
        }

        let updated = sqlx::query_as::<_, Recipient>(&format!(
            r#"UPDATE notification_recipients
               SET read_at = COALESCE(read_at, NOW()), updated_at = NOW()
               WHERE id = $1
               RETURNING {}"#,
            RECIPIENT_COLUMNS
        ))
        .bind(recipient_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::NotFound("notification"))?;

        Ok(updated)
    }

    async fn mark_all_read(&self, user_id: i64) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"UPDATE notification_recipients
               SET read_at = NOW(), updated_at = NOW()
               WHERE user_id = $1 AND read_at IS NULL"#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_recipient(
        &self,
        recipient_id: i64,
        user_id: i64,
    ) -> Result<RecipientRemoval, AppError> {
        let mut tx = self.pool.begin().await?;

        let recipient = sqlx::query_as::<_, Recipient>(&format!(
            "SELECT {} FROM notification_recipients WHERE id = $1",
            RECIPIENT_COLUMNS
        ))
        .bind(recipient_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound("notification"))?;
        ensure_owner(&recipient, user_id)?;

        let notification_id = recipient.notification_id;

        // Sibling dismissals serialize on the parent row, so exactly one of
        // them observes the empty recipient set.
        sqlx::query("SELECT id FROM notifications WHERE id = $1 FOR UPDATE")
            .bind(notification_id)
            .fetch_optional(&mut *tx)
            .await?;

        let deleted = sqlx::query("DELETE FROM notification_recipients WHERE id = $1")
            .bind(recipient_id)
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() == 0 {
            return Err(AppError::NotFound("notification"));
        }

        let remaining = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM notification_recipients WHERE notification_id = $1)",
        )
        .bind(notification_id)
        .fetch_one(&mut *tx)
        .await?;

        if !remaining {
            sqlx::query("DELETE FROM notifications WHERE id = $1")
                .bind(notification_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        Ok(RecipientRemoval {
            notification_id,
            notification_deleted: !remaining,
        })
    }

    async fn list_for_user(&self, user_id: i64) -> Result<Vec<UserNotification>, AppError> {
        let rows = sqlx::query_as::<_, UserNotificationRow>(
            r#"SELECT r.id AS recipient_id, r.read_at,
                      n.id AS notification_id, n.title, n.body, n.type, n.created_at,
                      u.id AS creator_id, u.name AS creator_name, u.email AS creator_email,
                      m.id AS message_id, m.title AS message_title
                 FROM notification_recipients r
                 JOIN notifications n ON n.id = r.notification_id
                 LEFT JOIN users u ON u.id = n.created_by
                 LEFT JOIN messages m ON m.id = n.message_id
                WHERE r.user_id = $1
                ORDER BY n.created_at DESC, r.id DESC"#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(UserNotification::from).collect())
    }

    async fn push_tokens(&self, user_id: i64) -> Result<Vec<String>, AppError> {
        let tokens = sqlx::query_scalar::<_, String>(
            "SELECT token FROM push_tokens WHERE user_id = $1 AND token <> '' ORDER BY id ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tokens)
    }
}

impl PgStore {
    async fn find_recipient(&self, recipient_id: i64) -> Result<Recipient, AppError> {
        sqlx::query_as::<_, Recipient>(&format!(
            "SELECT {} FROM notification_recipients WHERE id = $1",
            RECIPIENT_COLUMNS
        ))
        .bind(recipient_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::NotFound("notification"))
    }
}

// -- Transaction helpers --

type Tx<'a> = sqlx::Transaction<'a, sqlx::Postgres>;

const ACTIVITY_SELECT: &str = r#"SELECT a.id, a.message_id, a.user_id, u.name AS user_name, a.action,
       a.assignee_id, au.name AS assignee_name, a.created_at
  FROM activities a
  LEFT JOIN users u ON u.id = a.user_id
  LEFT JOIN users au ON au.id = a.assignee_id"#;

/// Bulk insert recipients, ignoring users that already have one.
async fn insert_recipients(
    tx: &mut Tx<'_>,
    notification_id: i64,
    user_ids: &[i64],
) -> Result<Vec<Recipient>, sqlx::Error> {
    if user_ids.is_empty() {
        return Ok(vec![]);
    }
    let mut rows = sqlx::query_as::<_, Recipient>(&format!(
        r#"INSERT INTO notification_recipients (notification_id, user_id)
           SELECT $1, u.user_id
             FROM UNNEST($2::BIGINT[]) WITH ORDINALITY AS u(user_id, ord)
            ORDER BY u.ord
           ON CONFLICT (notification_id, user_id) DO NOTHING
           RETURNING {}"#,
        RECIPIENT_COLUMNS
    ))
    .bind(notification_id)
    .bind(user_ids)
    .fetch_all(&mut **tx)
    .await?;
    rows.sort_by_key(|r| r.id);
    Ok(rows)
}

/// Attach (or refresh `assigned_by` of) message assignees.
async fn attach_assignees(
    tx: &mut Tx<'_>,
    message_id: i64,
    assignees: &[i64],
    assigned_by: i64,
) -> Result<(), sqlx::Error> {
    if assignees.is_empty() {
        return Ok(());
    }
    sqlx::query(
        r#"INSERT INTO message_user (message_id, user_id, assigned_by)
           SELECT $1, u, $3 FROM UNNEST($2::BIGINT[]) AS u
           ON CONFLICT (message_id, user_id) DO UPDATE
           SET assigned_by = EXCLUDED.assigned_by, updated_at = NOW()"#,
    )
    .bind(message_id)
    .bind(recipients::distinct(assignees.iter().copied()))
    .bind(assigned_by)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_activity(
    tx: &mut Tx<'_>,
    message_id: i64,
    user_id: i64,
    action: &str,
    assignee_id: Option<i64>,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        r#"INSERT INTO activities (message_id, user_id, action, assignee_id)
           VALUES ($1, $2, $3, $4)
           RETURNING id"#,
    )
    .bind(message_id)
    .bind(user_id)
    .bind(action)
    .bind(assignee_id)
    .fetch_one(&mut **tx)
    .await
}

// -- Row types --

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AccessTokenRow {
    pub token_id: i64,
    pub device: String,
    pub user_id: i64,
    pub user_name: String,
    pub is_admin: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct AssigneeWithMessage {
    message_id: i64,
    id: i64,
    name: String,
    assigned_by: Option<i64>,
}
