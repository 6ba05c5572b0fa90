//! Storage repository traits
//!
//! These traits define the row store the protocol engine depends on,
//! allowing for different implementations (SQLite, mock, remote).

use uuid::Uuid;

use crate::error::Result;
use crate::models::{Card, Participant, Session, SessionUpdate};

/// Session row operations
pub trait SessionRepository {
    /// Insert a new session
    fn insert_session(&self, session: &Session) -> Result<()>;

    /// Find a session by ID
    fn get_session(&self, id: Uuid) -> Result<Option<Session>>;

    /// Update status, selection and activity time; fails with NotFound if absent
    fn update_session(&self, id: Uuid, update: &SessionUpdate) -> Result<()>;

    /// Delete a session row; fails with NotFound if absent
    fn delete_session(&self, id: Uuid) -> Result<()>;

    /// Revert to collecting only while `card_id` is the current selection
    fn clear_selected_card(&self, id: Uuid, card_id: Uuid) -> Result<bool>;
}

/// Participant row operations
pub trait ParticipantRepository {
    /// Add a participant to a session
    fn insert_participant(&self, session_id: Uuid, participant: &Participant) -> Result<()>;

    /// List participants of a session
    fn list_participants(&self, session_id: Uuid) -> Result<Vec<Participant>>;

    /// Remove one participant; fails with NotFound if absent
    fn delete_participant(&self, session_id: Uuid, participant_id: Uuid) -> Result<()>;

    /// Remove every participant of a session
    fn delete_participants_by_session(&self, session_id: Uuid) -> Result<u64>;
}

/// Card row operations
pub trait CardRepository {
    /// Insert a card under a session
    fn insert_card(&self, session_id: Uuid, card: &Card) -> Result<()>;

    /// Find a card by ID
    fn get_card(&self, id: Uuid) -> Result<Option<Card>>;

    /// List cards of a session
    fn list_cards(&self, session_id: Uuid) -> Result<Vec<Card>>;

    /// Set the selected flag of a card
    fn update_card(&self, id: Uuid, selected: bool) -> Result<()>;

    /// Compare-and-swap `selected` from false to true.
    /// Returns false if the card is gone or already selected.
    fn select_card_if_unselected(&self, id: Uuid) -> Result<bool>;

    /// Clear `selected` on every card of a session
    fn clear_selection(&self, session_id: Uuid) -> Result<u64>;

    /// Delete one card; fails with NotFound if absent
    fn delete_card(&self, id: Uuid) -> Result<()>;

    /// Delete a card and, atomically, revert its session if the card was the
    /// selection. Returns whether the session reverted.
    fn delete_card_in_session(&self, session_id: Uuid, id: Uuid) -> Result<bool>;

    /// Delete every card of a session
    fn delete_cards_by_session(&self, session_id: Uuid) -> Result<u64>;
}

/// Combined storage interface
///
/// Provides access to all repository operations.
/// Implementations must be shareable across the engine's tasks.
pub trait Storage: SessionRepository + ParticipantRepository + CardRepository + Send + Sync {}

// Blanket implementation: any type implementing all traits implements Storage
impl<T> Storage for T where
    T: SessionRepository + ParticipantRepository + CardRepository + Send + Sync
{
}
