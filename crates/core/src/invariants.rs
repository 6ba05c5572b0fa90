//! Developer guardrails and invariants
//!
//! Debug assertions for detecting impossible states during development.
//! These checks are compiled out in release builds.

use uuid::Uuid;

use crate::models::{Card, Participant, Session, SessionSnapshot, SessionStatus};

/// Validate that a session's status and selection agree
pub fn assert_session_invariants(session: &Session) {
    debug_assert!(
        !session.name.trim().is_empty(),
        "Session {} has empty name",
        session.id
    );

    debug_assert!(
        session.status.has_selection() == session.selected_card_id.is_some(),
        "Session {} is {} but selected card is {:?}",
        session.id,
        session.status,
        session.selected_card_id
    );
}

/// Validate that the selection references an existing selected card
pub fn assert_selection_invariants(session: &Session, cards: &[Card]) {
    if let Some(selected_id) = session.selected_card_id {
        let card = cards.iter().find(|c| c.id == selected_id);
        debug_assert!(
            card.map_or(false, |c| c.selected),
            "Session {} selects card {} which is missing or not selected",
            session.id,
            selected_id
        );
    }
}

/// Validate that the roster has exactly one host and it matches the session
pub fn assert_roster_invariants(session: &Session, participants: &[Participant]) {
    let hosts: Vec<&Participant> = participants.iter().filter(|p| p.is_host).collect();
    debug_assert!(
        hosts.len() <= 1,
        "Session {} has {} hosts, expected at most 1",
        session.id,
        hosts.len()
    );

    if let Some(host) = hosts.first() {
        debug_assert!(
            host.id == session.host_id,
            "Session {} host is {} but roster host is {}",
            session.id,
            session.host_id,
            host.id
        );
    }
}

/// Validate a full snapshot before it is sent to peers
pub fn assert_snapshot_invariants(snapshot: &SessionSnapshot) {
    assert_session_invariants(&snapshot.session);
    assert_selection_invariants(&snapshot.session, &snapshot.cards);
    assert_roster_invariants(&snapshot.session, &snapshot.participants);

    debug_assert!(
        snapshot
            .participants
            .iter()
            .any(|p| p.id == snapshot.session.host_id),
        "Session {} host {} missing from roster",
        snapshot.session.id,
        snapshot.session.host_id
    );
}

/// Validate that a freshly rotated session starts clean
pub fn assert_rotated_session(session: &Session, cards: &[Card]) {
    debug_assert!(
        session.status == SessionStatus::Collecting && session.selected_card_id.is_none(),
        "Rotated session {} is not collecting",
        session.id
    );
    debug_assert!(
        cards.is_empty(),
        "Rotated session {} carries {} cards",
        session.id,
        cards.len()
    );
}

/// Validate that an id is not nil
pub fn assert_id_valid(id: Uuid, context: &str) {
    debug_assert!(id != Uuid::nil(), "Nil id in context: {}", context);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_snapshot() -> SessionSnapshot {
        let host = Uuid::new_v4();
        let session = Session::new("Retro".to_string(), host);
        SessionSnapshot {
            session,
            participants: vec![Participant::host(host), Participant::guest(Uuid::new_v4())],
            cards: vec![Card::new(host, "Flaky tests".to_string())],
        }
    }

    #[test]
    fn test_valid_snapshot() {
        assert_snapshot_invariants(&make_snapshot());
    }

    #[test]
    fn test_valid_selection() {
        let mut snapshot = make_snapshot();
        snapshot.cards[0].selected = true;
        snapshot.session.status = SessionStatus::Finished;
        snapshot.session.selected_card_id = Some(snapshot.cards[0].id);
        assert_snapshot_invariants(&snapshot);
    }

    #[test]
    #[should_panic(expected = "is picking but selected card is None")]
    fn test_picking_without_selection() {
        let mut snapshot = make_snapshot();
        snapshot.session.status = SessionStatus::Picking;
        assert_session_invariants(&snapshot.session);
    }

    #[test]
    #[should_panic(expected = "missing or not selected")]
    fn test_selection_of_unselected_card() {
        let mut snapshot = make_snapshot();
        snapshot.session.status = SessionStatus::Picking;
        snapshot.session.selected_card_id = Some(snapshot.cards[0].id);
        assert_selection_invariants(&snapshot.session, &snapshot.cards);
    }

    #[test]
    #[should_panic(expected = "hosts, expected at most 1")]
    fn test_two_hosts() {
        let mut snapshot = make_snapshot();
        snapshot.participants[1].is_host = true;
        assert_roster_invariants(&snapshot.session, &snapshot.participants);
    }
}
