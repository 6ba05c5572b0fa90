//! Session model - the shared context for one draw round

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Card, Participant};

/// Lifecycle of a session round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Accepting card submissions, nothing currently selected
    Collecting,
    /// A card was drawn and unselected cards remain
    Picking,
    /// The last unselected card was drawn
    Finished,
}

impl SessionStatus {
    /// Status after drawing from `unselected` candidates (counted before the draw)
    pub fn after_draw(unselected: usize) -> Self {
        if unselected == 1 {
            SessionStatus::Finished
        } else {
            SessionStatus::Picking
        }
    }

    /// Whether this status requires a current selection
    pub fn has_selection(self) -> bool {
        !matches!(self, SessionStatus::Collecting)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Collecting => "collecting",
            SessionStatus::Picking => "picking",
            SessionStatus::Finished => "finished",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "collecting" => Some(SessionStatus::Collecting),
            "picking" => Some(SessionStatus::Picking),
            "finished" => Some(SessionStatus::Finished),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A draw session owned by exactly one host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub name: String,
    pub host_id: Uuid,
    pub status: SessionStatus,
    pub selected_card_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new(name: String, host_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            host_id,
            status: SessionStatus::Collecting,
            selected_card_id: None,
            created_at: now,
            last_activity: now,
        }
    }

    /// Clear any selection and return to collecting
    pub fn revert_to_collecting(&mut self) {
        self.status = SessionStatus::Collecting;
        self.selected_card_id = None;
        self.last_activity = Utc::now();
    }
}

/// Partial update of a session row
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionUpdate {
    pub status: Option<SessionStatus>,
    /// `Some(None)` clears the selection
    pub selected_card_id: Option<Option<Uuid>>,
    pub last_activity: Option<DateTime<Utc>>,
}

impl SessionUpdate {
    /// Update recording a draw result
    pub fn selection(card_id: Uuid, status: SessionStatus) -> Self {
        Self {
            status: Some(status),
            selected_card_id: Some(Some(card_id)),
            last_activity: Some(Utc::now()),
        }
    }

    /// Update returning the session to collecting with no selection
    pub fn collecting() -> Self {
        Self {
            status: Some(SessionStatus::Collecting),
            selected_card_id: Some(None),
            last_activity: Some(Utc::now()),
        }
    }
}

/// Full `{session, participants, cards}` state used for join and resync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session: Session,
    pub participants: Vec<Participant>,
    pub cards: Vec<Card>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_after_draw() {
        assert_eq!(SessionStatus::after_draw(1), SessionStatus::Finished);
        assert_eq!(SessionStatus::after_draw(2), SessionStatus::Picking);
        assert_eq!(SessionStatus::after_draw(10), SessionStatus::Picking);
    }

    #[test]
    fn test_status_wire_names() {
        let json = serde_json::to_string(&SessionStatus::Picking).unwrap();
        assert_eq!(json, "\"picking\"");
        assert_eq!(SessionStatus::parse("finished"), Some(SessionStatus::Finished));
        assert_eq!(SessionStatus::parse("drawing"), None);
    }

    #[test]
    fn test_new_session_is_collecting() {
        let host = Uuid::new_v4();
        let session = Session::new("Retro".to_string(), host);
        assert_eq!(session.status, SessionStatus::Collecting);
        assert_eq!(session.selected_card_id, None);
        assert_eq!(session.host_id, host);
    }
}
