//! Dark Pot Core Library
//!
//! Core models, permissions, draw and rotation rules, the replicated
//! session state, and storage for Dark Pot sessions.

pub mod draw;
pub mod error;
pub mod hosting;
pub mod invariants;
pub mod models;
pub mod permissions;
pub mod replica;
pub mod storage;

pub use draw::{draw_card, Draw};
pub use error::{Error, Result};
pub use hosting::*;
pub use models::*;
pub use permissions::*;
pub use replica::{CardRemoval, SelectionApplied, SessionReplica};
pub use storage::{
    purge_session, CardRepository, Database, LocalStateStore, ParticipantRepository,
    PendingCleanup, PurgeReport, SessionRepository, Storage,
};
