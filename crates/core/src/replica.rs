//! In-memory replica of a session
//!
//! Each participant holds one replica and mutates it from local intents and
//! inbound messages. Every apply operation is idempotent: the transport
//! delivers at least once and only orders messages per sender.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{Card, Participant, Session, SessionSnapshot, SessionStatus};

/// Result of applying a selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionApplied {
    Applied,
    /// The referenced card is not known locally and must be fetched first
    MissingCard,
    /// No live session, or the card was deleted locally
    Ignored,
}

/// Result of removing a card
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardRemoval {
    pub removed: bool,
    /// The removed card was the current selection and the session reverted to collecting
    pub cleared_selection: bool,
}

/// Local copy of `{session, participants, cards}`
#[derive(Debug, Clone, Default)]
pub struct SessionReplica {
    session: Option<Session>,
    participants: Vec<Participant>,
    cards: Vec<Card>,
    /// Ids removed in this session; late duplicates must not resurrect them
    removed_cards: HashSet<Uuid>,
    departed: HashSet<Uuid>,
}

impl SessionReplica {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a freshly created or fetched session
    pub fn start(session: Session, participants: Vec<Participant>, cards: Vec<Card>) -> Self {
        Self {
            session: Some(session),
            participants,
            cards,
            removed_cards: HashSet::new(),
            departed: HashSet::new(),
        }
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session.as_ref().map(|s| s.id)
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    pub fn card(&self, card_id: Uuid) -> Option<&Card> {
        self.cards.iter().find(|c| c.id == card_id)
    }

    pub fn has_participant(&self, id: Uuid) -> bool {
        self.participants.iter().any(|p| p.id == id)
    }

    pub fn has_departed(&self, id: Uuid) -> bool {
        self.departed.contains(&id)
    }

    pub fn unselected_count(&self) -> usize {
        self.cards.iter().filter(|c| !c.selected).count()
    }

    /// The current selection, resolved against the current card collection
    pub fn selected_card(&self) -> Option<&Card> {
        let id = self.session.as_ref()?.selected_card_id?;
        self.card(id)
    }

    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        Some(SessionSnapshot {
            session: self.session.clone()?,
            participants: self.participants.clone(),
            cards: self.cards.clone(),
        })
    }

    /// Adopt an authoritative snapshot wholesale.
    ///
    /// Snapshots for a different session than the live one are stale and ignored.
    pub fn adopt(&mut self, snapshot: SessionSnapshot) -> bool {
        if let Some(current) = &self.session {
            if current.id != snapshot.session.id {
                return false;
            }
        }
        // What the snapshot carries is live again; other tombstones stay
        self.removed_cards
            .retain(|id| !snapshot.cards.iter().any(|c| c.id == *id));
        self.departed
            .retain(|id| !snapshot.participants.iter().any(|p| p.id == *id));

        self.session = Some(snapshot.session);
        self.participants = snapshot.participants;
        self.cards = snapshot.cards;
        true
    }

    /// Append a participant unless already present or known to have left
    pub fn add_participant(&mut self, participant: Participant) -> bool {
        if self.session.is_none()
            || self.departed.contains(&participant.id)
            || self.has_participant(participant.id)
        {
            return false;
        }
        self.participants.push(participant);
        true
    }

    pub fn remove_participant(&mut self, id: Uuid) -> bool {
        self.departed.insert(id);
        let before = self.participants.len();
        self.participants.retain(|p| p.id != id);
        before != self.participants.len()
    }

    /// Append a card unless already present or already deleted
    pub fn add_card(&mut self, card: Card) -> bool {
        if self.session.is_none()
            || self.removed_cards.contains(&card.id)
            || self.card(card.id).is_some()
        {
            return false;
        }
        self.cards.push(card);
        true
    }

    /// Insert or replace a card fetched from storage
    pub fn upsert_card(&mut self, card: Card) -> bool {
        if self.session.is_none() || self.removed_cards.contains(&card.id) {
            return false;
        }
        match self.cards.iter_mut().find(|c| c.id == card.id) {
            Some(existing) => *existing = card,
            None => self.cards.push(card),
        }
        true
    }

    /// Mark a card selected and adopt the status decided by the host
    pub fn apply_selection(&mut self, card_id: Uuid, new_status: SessionStatus) -> SelectionApplied {
        if self.session.is_none() || self.removed_cards.contains(&card_id) {
            return SelectionApplied::Ignored;
        }
        let Some(card) = self.cards.iter_mut().find(|c| c.id == card_id) else {
            return SelectionApplied::MissingCard;
        };
        card.selected = true;

        if let Some(session) = self.session.as_mut() {
            session.status = new_status;
            session.selected_card_id = Some(card_id);
            session.last_activity = Utc::now();
        }
        SelectionApplied::Applied
    }

    /// Drop a card; deleting the current selection reverts to collecting
    pub fn remove_card(&mut self, card_id: Uuid) -> CardRemoval {
        self.removed_cards.insert(card_id);
        let before = self.cards.len();
        self.cards.retain(|c| c.id != card_id);
        let removed = before != self.cards.len();

        let mut cleared_selection = false;
        if let Some(session) = self.session.as_mut() {
            if session.selected_card_id == Some(card_id) {
                session.revert_to_collecting();
                cleared_selection = true;
            }
        }

        CardRemoval {
            removed,
            cleared_selection,
        }
    }

    /// Clear every selection and return to collecting
    pub fn apply_reset(&mut self) {
        for card in &mut self.cards {
            card.selected = false;
        }
        if let Some(session) = self.session.as_mut() {
            session.revert_to_collecting();
        }
    }

    /// Replace the session identity after a rotation planned by the host
    pub fn apply_rotation(&mut self, new_session: Session, participants: Vec<Participant>) {
        self.session = Some(new_session);
        self.participants = participants;
        self.cards.clear();
        self.removed_cards.clear();
        self.departed.clear();
    }

    /// Build the rotated session as seen by a receiver of the announcement
    pub fn rotated_session(
        &self,
        new_session_id: Uuid,
        name: &str,
        id_map: &BTreeMap<Uuid, Uuid>,
        at: DateTime<Utc>,
    ) -> Option<(Session, Vec<Participant>)> {
        let host_id = self.session.as_ref()?.host_id;
        let session = Session {
            id: new_session_id,
            name: name.to_string(),
            host_id,
            status: SessionStatus::Collecting,
            selected_card_id: None,
            created_at: at,
            last_activity: at,
        };
        let participants = id_map
            .values()
            .map(|id| Participant {
                id: *id,
                is_host: *id == host_id,
                joined_at: at,
            })
            .collect();
        Some((session, participants))
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
