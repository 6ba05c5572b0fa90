//! Session protocol message types
//!
//! Every message carries its sender and send time. On the wire a message is
//! a JSON object `{type, senderId, timestamp, data?}`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use darkpot_core::{Card, Participant, Session, SessionSnapshot, SessionStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Broadcast topic for a session
pub fn session_topic(session_id: Uuid) -> String {
    format!("session:{}", session_id)
}

/// Presence topic for a session
pub fn presence_topic(session_id: Uuid) -> String {
    format!("presence:{}", session_id)
}

/// A protocol message as published on a session topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub sender_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: Payload,
}

impl Message {
    pub fn new(sender_id: Uuid, payload: Payload) -> Self {
        Self {
            sender_id,
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }

    /// Serialize message to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize message from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Message body, tagged by type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Payload {
    /// Joiner asks the host for the session state
    JoinRequest { participant_id: Uuid },

    /// Host answer to one joiner; other receivers ignore it
    JoinAccepted {
        participant_id: Uuid,
        session: Session,
        participants: Vec<Participant>,
        cards: Vec<Card>,
    },

    /// Host refuses a joiner
    JoinRejected { participant_id: Uuid, reason: String },

    ParticipantJoined { participant: Participant },

    ParticipantLeft { participant_id: Uuid },

    CardAdded { card: Card },

    CardSelected {
        card_id: Uuid,
        new_status: SessionStatus,
    },

    CardDeleted { card_id: Uuid },

    SessionReset,

    /// Authoritative snapshot resync
    SessionState(SessionSnapshot),

    /// Session identity rotation, sent on the old topic
    SessionNew {
        session_name: String,
        new_session_id: Uuid,
        old_session_id: Uuid,
        participant_id_map: BTreeMap<Uuid, Uuid>,
    },

    HostLeft,

    Ping,

    Pong,
}

impl Payload {
    pub fn join_accepted(participant_id: Uuid, snapshot: SessionSnapshot) -> Self {
        Payload::JoinAccepted {
            participant_id,
            session: snapshot.session,
            participants: snapshot.participants,
            cards: snapshot.cards,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Payload::JoinRequest { .. } => "JOIN_REQUEST",
            Payload::JoinAccepted { .. } => "JOIN_ACCEPTED",
            Payload::JoinRejected { .. } => "JOIN_REJECTED",
            Payload::ParticipantJoined { .. } => "PARTICIPANT_JOINED",
            Payload::ParticipantLeft { .. } => "PARTICIPANT_LEFT",
            Payload::CardAdded { .. } => "CARD_ADDED",
            Payload::CardSelected { .. } => "CARD_SELECTED",
            Payload::CardDeleted { .. } => "CARD_DELETED",
            Payload::SessionReset => "SESSION_RESET",
            Payload::SessionState(_) => "SESSION_STATE",
            Payload::SessionNew { .. } => "SESSION_NEW",
            Payload::HostLeft => "HOST_LEFT",
            Payload::Ping => "PING",
            Payload::Pong => "PONG",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let sender = Uuid::new_v4();
        let card_id = Uuid::new_v4();
        let msg = Message::new(
            sender,
            Payload::CardSelected {
                card_id,
                new_status: SessionStatus::Picking,
            },
        );

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "CARD_SELECTED");
        assert_eq!(value["senderId"], json!(sender.to_string()));
        assert_eq!(value["data"]["cardId"], json!(card_id.to_string()));
        assert_eq!(value["data"]["newStatus"], "picking");
        assert!(value.get("timestamp").is_some());
    }

    #[test]
    fn test_unit_payload_has_no_data() {
        let msg = Message::new(Uuid::new_v4(), Payload::HostLeft);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "HOST_LEFT");
        assert!(value.get("data").is_none());

        let decoded = Message::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_session_new_roundtrip() {
        let host = Uuid::new_v4();
        let guest = Uuid::new_v4();
        let mut map = BTreeMap::new();
        map.insert(host, host);
        map.insert(guest, Uuid::new_v4());

        let msg = Message::new(
            host,
            Payload::SessionNew {
                session_name: "R2".to_string(),
                new_session_id: Uuid::new_v4(),
                old_session_id: Uuid::new_v4(),
                participant_id_map: map.clone(),
            },
        );

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["data"]["sessionName"], "R2");
        assert_eq!(
            value["data"]["participantIdMap"][host.to_string()],
            json!(host.to_string())
        );

        let decoded = Message::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        match decoded.payload {
            Payload::SessionNew {
                participant_id_map, ..
            } => assert_eq!(participant_id_map, map),
            other => panic!("Wrong payload: {:?}", other),
        }
    }

    #[test]
    fn test_snapshot_payloads() {
        let host = Uuid::new_v4();
        let snapshot = SessionSnapshot {
            session: Session::new("Retro".to_string(), host),
            participants: vec![Participant::host(host)],
            cards: vec![Card::new(host, "Flaky tests".to_string())],
        };

        let joiner = Uuid::new_v4();
        let accepted = Message::new(host, Payload::join_accepted(joiner, snapshot.clone()));
        let value = serde_json::to_value(&accepted).unwrap();
        assert_eq!(value["data"]["participantId"], json!(joiner.to_string()));
        assert_eq!(value["data"]["session"]["name"], "Retro");
        assert_eq!(value["data"]["cards"][0]["content"], "Flaky tests");

        let state = Message::new(host, Payload::SessionState(snapshot.clone()));
        let decoded = Message::from_bytes(&state.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.payload, Payload::SessionState(snapshot));
        assert_eq!(decoded.kind(), "SESSION_STATE");
    }

    #[test]
    fn test_topics() {
        let id = Uuid::new_v4();
        assert_eq!(session_topic(id), format!("session:{}", id));
        assert_eq!(presence_topic(id), format!("presence:{}", id));
    }
}
