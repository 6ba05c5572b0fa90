//! Permission system for session operations
//!
//! The host is the only writer of session-level status and selection.
//! Checks here run before any storage or network effect.

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{Card, LocalUser};

/// Actions that can be performed in a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    // Cards
    SubmitCard,
    DeleteOwnCard,
    DeleteAnyCard,

    // Session-level writes
    Draw,
    Reset,
    Rotate,
    Resync,

    // Membership
    Leave,
}

impl SessionAction {
    pub fn describe(self) -> &'static str {
        match self {
            SessionAction::SubmitCard => "submit a card",
            SessionAction::DeleteOwnCard => "delete own card",
            SessionAction::DeleteAnyCard => "delete another participant's card",
            SessionAction::Draw => "draw a card",
            SessionAction::Reset => "reset the session",
            SessionAction::Rotate => "start a new session",
            SessionAction::Resync => "broadcast the session state",
            SessionAction::Leave => "leave the session",
        }
    }
}

/// Permission matrix for host and non-host participants
pub struct PermissionMatrix;

impl PermissionMatrix {
    /// Check if a participant may perform an action
    pub fn can_perform(is_host: bool, action: SessionAction) -> bool {
        match action {
            // Anyone
            SessionAction::SubmitCard | SessionAction::DeleteOwnCard | SessionAction::Leave => true,

            // Host only
            SessionAction::DeleteAnyCard
            | SessionAction::Draw
            | SessionAction::Reset
            | SessionAction::Rotate
            | SessionAction::Resync => is_host,
        }
    }

    /// Fail with an authorization error unless the user may perform the action
    pub fn require(user: &LocalUser, action: SessionAction) -> Result<()> {
        if Self::can_perform(user.is_host, action) {
            Ok(())
        } else {
            Err(Error::Authorization(format!(
                "only the host can {}",
                action.describe()
            )))
        }
    }

    /// Authors may delete their own cards; the host may delete any card
    pub fn can_delete_card(actor_id: Uuid, is_host: bool, card: &Card) -> bool {
        let action = if card.author_id == actor_id {
            SessionAction::DeleteOwnCard
        } else {
            SessionAction::DeleteAnyCard
        };
        Self::can_perform(is_host, action)
    }

    pub fn require_card_delete(user: &LocalUser, card: &Card) -> Result<()> {
        if Self::can_delete_card(user.id, user.is_host, card) {
            Ok(())
        } else {
            Err(Error::Authorization(
                "cannot delete another participant's card".into(),
            ))
        }
    }
}
