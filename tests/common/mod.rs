//! Shared fixtures: an in-memory `NotificationStore` and a push dispatcher
//! that records calls instead of sending them.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use taskboard::auth::Principal;
use taskboard::errors::AppError;
use taskboard::models::message::MessageRow;
use taskboard::models::notification::{
    FannedOut, NewNotification, Notification, Recipient, RecipientRemoval, RecipientSync,
    UserNotification, UserNotificationRow,
};
use taskboard::notification::fanout::FanOut;
use taskboard::notification::push::PushDispatcher;
use taskboard::notification::recipients::{self, RecipientDiff};
use taskboard::realtime::ChannelHub;
use taskboard::store::{ensure_owner, NotificationStore};

// ── Memory store ──────────────────────────────────────────────

/// Same limit as the `notifications.title` column.
const TITLE_COLUMN_CHARS: usize = 255;

#[derive(Default)]
struct Inner {
    next_id: i64,
    notifications: Vec<Notification>,
    recipients: Vec<Recipient>,
    tokens: HashMap<i64, Vec<String>>,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn add_recipient(&mut self, notification_id: i64, user_id: i64) -> Recipient {
        let recipient = Recipient {
            id: self.next_id(),
            notification_id,
            user_id,
            read_at: None,
            created_at: Utc::now(),
        };
        self.recipients.push(recipient.clone());
        recipient
    }
}

/// Same invariants as the Postgres store, without a database.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    create_calls: AtomicUsize,
    fail_token_lookup: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn set_tokens(&self, user_id: i64, tokens: &[&str]) {
        self.inner
            .lock()
            .unwrap()
            .tokens
            .insert(user_id, tokens.iter().map(|t| t.to_string()).collect());
    }

    pub fn fail_token_lookup(&self) {
        self.fail_token_lookup.store(true, Ordering::SeqCst);
    }

    pub fn notification_exists(&self, id: i64) -> bool {
        self.inner
            .lock()
            .unwrap()
            .notifications
            .iter()
            .any(|n| n.id == id)
    }

    pub fn recipients_of(&self, notification_id: i64) -> Vec<Recipient> {
        self.inner
            .lock()
            .unwrap()
            .recipients
            .iter()
            .filter(|r| r.notification_id == notification_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn create_with_recipients(
        &self,
        draft: &NewNotification,
        user_ids: &[i64],
    ) -> Result<FannedOut, AppError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if draft.title.as_ref().is_some_and(|t| t.chars().count() > TITLE_COLUMN_CHARS) {
            return Err(AppError::Internal(anyhow::anyhow!(
                "value too long for notifications.title"
            )));
        }
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();
        let notification = Notification {
            id: inner.next_id(),
            title: draft.title.clone(),
            body: draft.body.clone(),
            r#type: draft.r#type.clone(),
            message_id: draft.message_id,
            created_by: Some(draft.creator_id),
            created_at: now,
            updated_at: now,
        };
        inner.notifications.push(notification.clone());
        let recipients = recipients::distinct(user_ids.iter().copied())
            .into_iter()
            .map(|uid| inner.add_recipient(notification.id, uid))
            .collect();
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
        let mut inner = self.inner.lock().unwrap();
        if !inner.notifications.iter().any(|n| n.id == notification_id) {
            return Err(AppError::NotFound("notification"));
        }
        let existing: Vec<i64> = inner
            .recipients
            .iter()
            .filter(|r| r.notification_id == notification_id)
            .map(|r| r.user_id)
            .collect();
        let diff = RecipientDiff::compute(&existing, user_ids);
        inner
            .recipients
            .retain(|r| r.notification_id != notification_id || !diff.remove.contains(&r.user_id));
        let added = diff
            .add
            .iter()
            .map(|uid| inner.add_recipient(notification_id, *uid))
            .collect();
        Ok(RecipientSync {
            removed_user_ids: diff.remove,
            added,
        })
    }

    async fn mark_read(&self, recipient_id: i64, user_id: i64) -> Result<Recipient, AppError> {
        let mut inner = self.inner.lock().unwrap();
        let recipient = inner
            .recipients
            .iter_mut()
            .find(|r| r.id == recipient_id)
            .ok_or(AppError::NotFound("notification"))?;
        ensure_owner(recipient, user_id)?;
        if recipient.read_at.is_none() {
            recipient.read_at = Some(Utc::now());
        }
        Ok(recipient.clone())
    }

    async fn mark_all_read(&self, user_id: i64) -> Result<u64, AppError> {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();
        let mut count = 0;
        for r in inner
            .recipients
            .iter_mut()
            .filter(|r| r.user_id == user_id && r.read_at.is_none())
        {
            r.read_at = Some(now);
            count += 1;
        }
        Ok(count)
    }

    async fn delete_recipient(
        &self,
        recipient_id: i64,
        user_id: i64,
    ) -> Result<RecipientRemoval, AppError> {
        let mut inner = self.inner.lock().unwrap();
        let recipient = inner
            .recipients
            .iter()
            .find(|r| r.id == recipient_id)
            .cloned()
            .ok_or(AppError::NotFound("notification"))?;
        ensure_owner(&recipient, user_id)?;

        inner.recipients.retain(|r| r.id != recipient_id);
        let remaining = inner
            .recipients
            .iter()
            .any(|r| r.notification_id == recipient.notification_id);
        if !remaining {
            inner
                .notifications
                .retain(|n| n.id != recipient.notification_id);
        }
        Ok(RecipientRemoval {
            notification_id: recipient.notification_id,
            notification_deleted: !remaining,
        })
    }

    async fn list_for_user(&self, user_id: i64) -> Result<Vec<UserNotification>, AppError> {
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<UserNotificationRow> = inner
            .recipients
            .iter()
            .filter(|r| r.user_id == user_id)
            .filter_map(|r| {
                let n = inner.notifications.iter().find(|n| n.id == r.notification_id)?;
                Some(UserNotificationRow {
                    recipient_id: r.id,
                    read_at: r.read_at,
                    notification_id: n.id,
                    title: n.title.clone(),
                    body: n.body.clone(),
                    r#type: n.r#type.clone(),
                    created_at: n.created_at,
                    creator_id: None,
                    creator_name: None,
                    creator_email: None,
                    message_id: None,
                    message_title: None,
                })
            })
            .collect();
        rows.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then(b.recipient_id.cmp(&a.recipient_id))
        });
        Ok(rows.into_iter().map(UserNotification::from).collect())
    }

    async fn push_tokens(&self, user_id: i64) -> Result<Vec<String>, AppError> {
        if self.fail_token_lookup.load(Ordering::SeqCst) {
            return Err(AppError::Internal(anyhow::anyhow!("token table unavailable")));
        }
        Ok(self
            .inner
            .lock()
            .unwrap()
            .tokens
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }
}

// ── Recording push ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct PushCall {
    pub tokens: Vec<String>,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
}

#[derive(Default)]
pub struct RecordingPush {
    calls: Mutex<Vec<PushCall>>,
}

impl RecordingPush {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<PushCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushDispatcher for RecordingPush {
    async fn send(&self, tokens: &[String], title: &str, body: &str, data: serde_json::Value) {
        self.calls.lock().unwrap().push(PushCall {
            tokens: tokens.to_vec(),
            title: title.to_string(),
            body: body.to_string(),
            data,
        });
    }
}

// ── Fixtures ──────────────────────────────────────────────────

pub const ALICE: i64 = 1;
pub const BOB: i64 = 2;
pub const CAROL: i64 = 3;

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub push: Arc<RecordingPush>,
    pub hub: ChannelHub,
    pub fanout: FanOut,
}

pub fn harness() -> Harness {
    let store = MemoryStore::new();
    let push = RecordingPush::new();
    let hub = ChannelHub::new("testing");
    let fanout = FanOut::new(store.clone(), hub.clone(), push.clone());
    Harness {
        store,
        push,
        hub,
        fanout,
    }
}

pub fn principal(user_id: i64, name: &str) -> Principal {
    Principal {
        user_id,
        name: name.to_string(),
        is_admin: false,
        token_id: user_id * 100,
        socket_id: None,
    }
}

pub fn message(id: i64, creator: i64, assigned_to: Option<i64>) -> MessageRow {
    let now = Utc::now();
    MessageRow {
        id,
        title: "Printer jammed".to_string(),
        description: "Second floor printer eats paper".to_string(),
        priority: "high".to_string(),
        status_id: 1,
        creator_id: Some(creator),
        assigned_to,
        department_id: None,
        is_archived: false,
        is_announcement: false,
        created_at: now,
        updated_at: now,
    }
}
