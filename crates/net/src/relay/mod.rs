//! TCP relay transport
//!
//! A relay process forwards broadcasts between subscribers of a topic and
//! keeps the presence table for presence topics. Every channel is its own
//! TCP connection, so a closed connection is a presence leave.

mod client;
mod server;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::channel::{PresenceMeta, PresenceState};
use crate::protocol::Message;

pub use client::{RelayBroadcast, RelayPresence, RelayTransport};
pub use server::RelayServer;

/// Frames exchanged between a channel connection and the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RelayFrame {
    /// First frame of every connection
    Subscribe { topic: String },

    /// Relay confirms the subscription
    Subscribed { topic: String },

    /// Relay refuses the subscription
    Refused { reason: String },

    /// Client publishes to the other subscribers of its topic
    Publish { message: Message },

    /// Relay delivers a message published by another subscriber
    Deliver { message: Message },

    Track { key: Uuid, meta: PresenceMeta },

    Untrack,

    QueryPresence,

    PresenceState { state: PresenceState },

    PresenceJoin { key: Uuid, metas: Vec<PresenceMeta> },

    PresenceLeave { key: Uuid, metas: Vec<PresenceMeta> },

    Unsubscribe,
}
