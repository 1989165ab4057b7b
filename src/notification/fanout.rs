//! Turns message lifecycle events into stored notifications and delivers
//! them to each recipient's realtime channel and devices.
//!
//! Storing is part of the request and its errors propagate. Delivery is
//! best effort and only logged.

use std::sync::Arc;

use tracing::warn;

use super::push::{chat_data, PushDispatcher};
use super::recipients;
use super::DeliveryError;
use crate::auth::Principal;
use crate::errors::AppError;
use crate::models::message::MessageRow;
use crate::models::{truncate_chars, VARCHAR_MAX};
use crate::models::notification::{
    FannedOut, NewNotification, NotificationCreatedEvent, Recipient, KIND_COMMENT_CREATED,
    KIND_MESSAGE_ASSIGNED, KIND_MESSAGE_CREATED, KIND_MESSAGE_UPDATED,
};
use crate::realtime::ChannelHub;
use crate::store::NotificationStore;

/// Titles built from a message title and a user name can outgrow the
/// title column; they are cut to fit.
fn generated_title(title: String) -> String {
    truncate_chars(title, VARCHAR_MAX)
}

/// Title and body shown on the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushText {
    pub title: String,
    pub body: String,
}

#[derive(Clone)]
pub struct FanOut {
    store: Arc<dyn NotificationStore>,
    hub: ChannelHub,
    push: Arc<dyn PushDispatcher>,
}

impl FanOut {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        hub: ChannelHub,
        push: Arc<dyn PushDispatcher>,
    ) -> Self {
        Self { store, hub, push }
    }

    pub fn store(&self) -> &Arc<dyn NotificationStore> {
        &self.store
    }

    /// A new message notifies its assignees and its single assignee.
    /// The notification is stored even when nobody is assigned.
    pub async fn message_created(
        &self,
        actor: &Principal,
        message: &MessageRow,
        assignees: &[i64],
    ) -> Result<FannedOut, AppError> {
        let user_ids = recipients::for_message_created(assignees, message.assigned_to);
        let draft = NewNotification {
            title: Some(generated_title(format!("New message: {} from {}", message.title, actor.name))),
            body: message.description.clone(),
            r#type: KIND_MESSAGE_CREATED.to_string(),
            message_id: Some(message.id),
            creator_id: actor.user_id,
        };
        let push = PushText {
            title: "New message received".to_string(),
            body: format!("{} created the message \"{}\".", actor.name, message.title),
        };

        let fanned = self.store.create_with_recipients(&draft, &user_ids).await?;
        self.deliver(&fanned, &push, actor.socket_id.as_deref()).await;
        Ok(fanned)
    }

    /// A comment notifies the assignees and the creator, never the commenter.
    pub async fn comment_created(
        &self,
        actor: &Principal,
        message: &MessageRow,
        assignees: &[i64],
        content: &str,
    ) -> Result<Option<FannedOut>, AppError> {
        let user_ids = recipients::for_comment(assignees, message.creator_id, actor.user_id);
        let draft = NewNotification {
            title: Some(generated_title(format!("{} commented on {}", actor.name, message.title))),
            body: content.to_string(),
            r#type: KIND_COMMENT_CREATED.to_string(),
            message_id: Some(message.id),
            creator_id: actor.user_id,
        };
        let push = PushText {
            title: "New comment".to_string(),
            body: format!("{} commented on \"{}\".", actor.name, message.title),
        };
        self.notify(actor, &draft, &user_ids, &push).await
    }

    /// An edit notifies everyone attached to the message except the editor.
    pub async fn message_updated(
        &self,
        actor: &Principal,
        message: &MessageRow,
        assignees: &[i64],
    ) -> Result<Option<FannedOut>, AppError> {
        let user_ids = recipients::for_message_updated(
            assignees,
            message.assigned_to,
            message.creator_id,
            actor.user_id,
        );
        let draft = NewNotification {
            title: Some(generated_title(format!("{} updated {}", actor.name, message.title))),
            body: message.description.clone(),
            r#type: KIND_MESSAGE_UPDATED.to_string(),
            message_id: Some(message.id),
            creator_id: actor.user_id,
        };
        let push = PushText {
            title: "Message updated".to_string(),
            body: format!("{} updated the message \"{}\".", actor.name, message.title),
        };
        self.notify(actor, &draft, &user_ids, &push).await
    }

    /// Only users who were not assigned before hear about an assignment.
    pub async fn message_assigned(
        &self,
        actor: &Principal,
        message: &MessageRow,
        before: &[i64],
        requested: &[i64],
    ) -> Result<Option<FannedOut>, AppError> {
        let user_ids = recipients::for_assignment(before, requested, actor.user_id);
        let draft = NewNotification {
            title: Some(generated_title(format!("{} assigned you to {}", actor.name, message.title))),
            body: message.description.clone(),
            r#type: KIND_MESSAGE_ASSIGNED.to_string(),
            message_id: Some(message.id),
            creator_id: actor.user_id,
        };
        let push = PushText {
            title: "New assignment".to_string(),
            body: format!("{} assigned you to \"{}\".", actor.name, message.title),
        };
        self.notify(actor, &draft, &user_ids, &push).await
    }

    /// Notification created directly through the API. Always stored, like
    /// `message_created`.
    pub async fn explicit(
        &self,
        actor: &Principal,
        draft: &NewNotification,
        user_ids: &[i64],
    ) -> Result<FannedOut, AppError> {
        let push = PushText {
            title: draft
                .title
                .clone()
                .unwrap_or_else(|| "New notification".to_string()),
            body: draft.body.clone(),
        };
        let fanned = self.store.create_with_recipients(draft, user_ids).await?;
        self.deliver(&fanned, &push, actor.socket_id.as_deref()).await;
        Ok(fanned)
    }

    /// Deliver already-stored recipients, e.g. those added by a recipient sync.
    pub async fn deliver_added(&self, actor: &Principal, fanned: &FannedOut) {
        let push = PushText {
            title: fanned
                .notification
                .title
                .clone()
                .unwrap_or_else(|| "New notification".to_string()),
            body: fanned.notification.body.clone(),
        };
        self.deliver(fanned, &push, actor.socket_id.as_deref()).await;
    }

    async fn notify(
        &self,
        actor: &Principal,
        draft: &NewNotification,
        user_ids: &[i64],
        push: &PushText,
    ) -> Result<Option<FannedOut>, AppError> {
        if user_ids.is_empty() {
            tracing::debug!(r#type = %draft.r#type, "no recipients, notification skipped");
            return Ok(None);
        }
        let fanned = self.store.create_with_recipients(draft, user_ids).await?;
        self.deliver(&fanned, push, actor.socket_id.as_deref()).await;
        Ok(Some(fanned))
    }

    async fn deliver(&self, fanned: &FannedOut, push: &PushText, except_socket: Option<&str>) {
        let data = chat_data(fanned.notification.message_id);
        for recipient in &fanned.recipients {
            if let Err(e) = self.publish(fanned, recipient, except_socket) {
                warn!(
                    notification_id = fanned.notification.id,
                    user_id = recipient.user_id,
                    error = %e,
                    "realtime delivery failed"
                );
            }

            match self.store.push_tokens(recipient.user_id).await {
                Ok(tokens) => {
                    self.push
                        .send(&tokens, &push.title, &push.body, data.clone())
                        .await
                }
                Err(e) => warn!(
                    notification_id = fanned.notification.id,
                    user_id = recipient.user_id,
                    error = %DeliveryError::Tokens(e.to_string()),
                    "push delivery skipped"
                ),
            }
        }
    }

    fn publish(
        &self,
        fanned: &FannedOut,
        recipient: &Recipient,
        except_socket: Option<&str>,
    ) -> Result<usize, DeliveryError> {
        let event = NotificationCreatedEvent::new(recipient, &fanned.notification);
        self.hub.publish(
            &self.hub.user_channel(recipient.user_id),
            NotificationCreatedEvent::NAME,
            &event,
            except_socket,
        )
    }
}
