//! Per-user private channels over WebSocket.
//!
//! Channels are named `{environment}.user.{user_id}`. A socket subscribes to
//! a channel after authorization; `publish` pushes an event frame to every
//! subscribed socket except, optionally, the sender's own.

pub mod socket;

use std::sync::Arc;

use dashmap::DashMap;
use rand::Rng;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::notification::DeliveryError;

/// Outbound frames for one socket, already encoded as JSON text.
pub type SocketSender = mpsc::UnboundedSender<String>;

struct Subscriber {
    socket_id: String,
    tx: SocketSender,
}

/// In-process channel registry shared by the HTTP handlers and socket tasks.
#[derive(Clone)]
pub struct ChannelHub {
    channels: Arc<DashMap<String, Vec<Subscriber>>>,
    environment: Arc<str>,
}

impl ChannelHub {
    pub fn new(environment: &str) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            environment: Arc::from(environment),
        }
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Private channel of `user_id` in this hub's environment.
    pub fn user_channel(&self, user_id: i64) -> String {
        channel_for(&self.environment, user_id)
    }

    /// A user may only listen on their own channel in the server's environment.
    pub fn authorize(&self, user_id: i64, environment: &str, target_user_id: i64) -> bool {
        user_id == target_user_id && environment == &*self.environment
    }

    pub fn authorize_channel(&self, user_id: i64, channel: &str) -> bool {
        match parse_user_channel(channel) {
            Some((env, target)) => self.authorize(user_id, env, target),
            None => false,
        }
    }

    pub fn subscribe(&self, channel: &str, socket_id: &str, tx: SocketSender) {
        let mut subs = self.channels.entry(channel.to_string()).or_default();
        if !subs.iter().any(|s| s.socket_id == socket_id) {
            subs.push(Subscriber {
                socket_id: socket_id.to_string(),
                tx,
            });
        }
    }

    pub fn unsubscribe(&self, channel: &str, socket_id: &str) {
        if let Some(mut subs) = self.channels.get_mut(channel) {
            subs.retain(|s| s.socket_id != socket_id);
        }
        self.channels.remove_if(channel, |_, subs| subs.is_empty());
    }

    /// Drop a socket from every channel. Called when the socket closes.
    pub fn unsubscribe_all(&self, socket_id: &str) {
        for mut entry in self.channels.iter_mut() {
            entry.value_mut().retain(|s| s.socket_id != socket_id);
        }
        self.channels.retain(|_, subs| !subs.is_empty());
    }

    /// Send `event` to every socket on `channel` except `except_socket`.
    /// Returns how many sockets the frame was queued for. Sockets whose
    /// receiver is gone are pruned.
    pub fn publish<T: Serialize>(
        &self,
        channel: &str,
        event: &str,
        payload: &T,
        except_socket: Option<&str>,
    ) -> Result<usize, DeliveryError> {
        let frame = encode_frame(event, Some(channel), payload)?;

        let mut delivered = 0;
        let mut closed = Vec::new();
        if let Some(subs) = self.channels.get(channel) {
            for sub in subs.iter() {
                if Some(sub.socket_id.as_str()) == except_socket {
                    continue;
                }
                if sub.tx.send(frame.clone()).is_ok() {
                    delivered += 1;
                } else {
                    closed.push(sub.socket_id.clone());
                }
            }
        }

        for socket_id in closed {
            self.unsubscribe(channel, &socket_id);
        }

        tracing::debug!(channel, event, delivered, "realtime publish");
        Ok(delivered)
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map(|s| s.len()).unwrap_or(0)
    }
}

pub fn channel_for(environment: &str, user_id: i64) -> String {
    format!("{}.user.{}", environment, user_id)
}

/// Split `{environment}.user.{id}` into its parts.
pub fn parse_user_channel(channel: &str) -> Option<(&str, i64)> {
    let mut parts = channel.splitn(3, '.');
    let env = parts.next().filter(|e| !e.is_empty())?;
    if parts.next()? != "user" {
        return None;
    }
    let id = parts.next()?.parse().ok()?;
    Some((env, id))
}

/// Socket ids look like `123456.7890123`.
pub fn new_socket_id() -> String {
    let mut rng = rand::thread_rng();
    format!(
        "{}.{}",
        rng.gen_range(100_000..1_000_000_000u64),
        rng.gen_range(100_000..1_000_000_000u64)
    )
}

pub fn encode_frame<T: Serialize>(
    event: &str,
    channel: Option<&str>,
    data: &T,
) -> Result<String, serde_json::Error> {
    #[derive(Serialize)]
    struct Frame<'a, T: Serialize> {
        event: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        channel: Option<&'a str>,
        data: &'a T,
    }
    serde_json::to_string(&Frame {
        event,
        channel,
        data,
    })
}
