//! Dark Pot Network Library
//!
//! Carries the session protocol between participants.
//!
//! # Architecture
//!
//! - **Protocol**: typed session messages, JSON on the wire
//! - **Channels**: broadcast and presence contracts per session
//! - **Hub**: in-process transport for engines sharing one process
//! - **Relay**: TCP relay server and client transport, length-prefixed JSON frames
//!
//! # Usage
//!
//! ```ignore
//! let relay = RelayServer::start(addr).await?;
//! let transport = RelayTransport::new(relay.addr());
//!
//! let mut channel = transport.broadcast(session_id).await?;
//! channel.send(&Message::new(user_id, Payload::Ping)).await?;
//! while let Ok(msg) = channel.recv().await {
//!     match msg.payload {
//!         Payload::Pong => { /* handle */ }
//!         _ => {}
//!     }
//! }
//! ```

pub mod channel;
pub mod error;
mod frame;
pub mod hub;
pub mod protocol;
pub mod relay;

pub use channel::{
    BroadcastChannel, PresenceChannel, PresenceEvent, PresenceMeta, PresenceState, Transport,
};
pub use error::{Error, Result};
pub use hub::LocalHub;
pub use protocol::{presence_topic, session_topic, Message, Payload};
pub use relay::{RelayServer, RelayTransport};

/// Default port for Dark Pot relays
pub const DEFAULT_PORT: u16 = 7341;
