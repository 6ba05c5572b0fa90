//! Broadcast and presence channel contracts
//!
//! A session uses two channels keyed by its id: a broadcast channel that
//! carries protocol messages and a presence channel that reports which
//! participants currently hold a subscription.
//!
//! Broadcast delivery is at-least-once, ordered per sender only, and never
//! echoes a message back to the subscription that sent it.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::protocol::Message;

/// Metadata a participant tracks on the presence channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceMeta {
    pub user_id: Uuid,
    pub is_host: bool,
    pub online_at: DateTime<Utc>,
}

impl PresenceMeta {
    pub fn new(user_id: Uuid, is_host: bool) -> Self {
        Self {
            user_id,
            is_host,
            online_at: Utc::now(),
        }
    }
}

/// Presence key to every meta tracked under it
pub type PresenceState = HashMap<Uuid, Vec<PresenceMeta>>;

/// A change on the presence channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PresenceEvent {
    Join { key: Uuid, metas: Vec<PresenceMeta> },
    Leave { key: Uuid, metas: Vec<PresenceMeta> },
}

impl PresenceEvent {
    pub fn key(&self) -> Uuid {
        match self {
            PresenceEvent::Join { key, .. } | PresenceEvent::Leave { key, .. } => *key,
        }
    }
}

/// Subscription to a session's broadcast topic
#[async_trait]
pub trait BroadcastChannel: Send + Sync {
    fn topic(&self) -> &str;

    /// Publish to every other subscriber of the topic
    async fn send(&self, message: &Message) -> Result<()>;

    /// Next message from another subscriber.
    ///
    /// Cancel safe. Fails with `ChannelClosed` once the subscription ends.
    async fn recv(&mut self) -> Result<Message>;

    async fn unsubscribe(&mut self) -> Result<()>;
}

/// Subscription to a session's presence topic
#[async_trait]
pub trait PresenceChannel: Send + Sync {
    fn topic(&self) -> &str;

    /// Announce `meta` under `key` until untracked or disconnected
    async fn track(&mut self, key: Uuid, meta: PresenceMeta) -> Result<()>;

    async fn untrack(&mut self) -> Result<()>;

    async fn current_state(&self) -> Result<PresenceState>;

    /// Next join or leave on the topic, including this subscription's own. Cancel safe.
    async fn next_event(&mut self) -> Result<PresenceEvent>;

    async fn unsubscribe(&mut self) -> Result<()>;
}

/// Factory for session channels
#[async_trait]
pub trait Transport: Send + Sync {
    /// Subscribe to the broadcast topic of `session_id`; returns once confirmed
    async fn broadcast(&self, session_id: Uuid) -> Result<Box<dyn BroadcastChannel>>;

    /// Subscribe to the presence topic of `session_id`; returns once confirmed
    async fn presence(&self, session_id: Uuid) -> Result<Box<dyn PresenceChannel>>;
}
