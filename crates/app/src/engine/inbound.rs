//! Inbound broadcast messages and presence events

use std::collections::BTreeMap;

use chrono::Utc;
use darkpot_core::invariants::assert_snapshot_invariants;
use darkpot_core::{
    is_host_departure, Error, LocalUser, Participant, SelectionApplied, SessionSnapshot,
    SessionStatus,
};
use darkpot_net::{Message, Payload, PresenceEvent};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{EndReason, HostCheck, Participation, PeerEngine};

impl PeerEngine {
    pub(super) async fn handle_message(&mut self, msg: Message) {
        let Some(user_id) = self.user_id() else {
            return;
        };
        if msg.sender_id == user_id {
            return;
        }

        // Until the snapshot arrives there is nothing to apply deltas to
        if let Some(pending) = self.pending_join.as_mut() {
            if !matches!(
                msg.payload,
                Payload::JoinAccepted { .. } | Payload::JoinRejected { .. } | Payload::HostLeft
            ) {
                pending.buffered.push(msg);
                return;
            }
        }

        debug!(kind = msg.kind(), sender_id = %msg.sender_id, "Inbound message");

        match msg.payload {
            Payload::JoinAccepted {
                participant_id,
                session,
                participants,
                cards,
            } => {
                let snapshot = SessionSnapshot {
                    session,
                    participants,
                    cards,
                };
                let replay = self.on_join_accepted(msg.sender_id, participant_id, snapshot);
                for buffered in replay {
                    self.apply_message(buffered.sender_id, buffered.payload).await;
                }
            }
            payload => self.apply_message(msg.sender_id, payload).await,
        }
    }

    async fn apply_message(&mut self, sender_id: Uuid, payload: Payload) {
        let from_host = self.is_from_host(sender_id);

        match payload {
            Payload::JoinRequest { participant_id } => self.on_join_request(participant_id).await,

            // Only reachable as a late duplicate; the live one is handled before replay
            Payload::JoinAccepted { .. } => {}

            Payload::JoinRejected {
                participant_id,
                reason,
            } => {
                if from_host && Some(participant_id) == self.user_id() {
                    self.on_join_rejected(reason).await;
                }
            }

            Payload::ParticipantJoined { participant } => {
                if from_host {
                    self.replica.add_participant(participant);
                }
            }

            Payload::ParticipantLeft { participant_id } => {
                if from_host || sender_id == participant_id {
                    self.replica.remove_participant(participant_id);
                }
            }

            Payload::CardAdded { card } => {
                if card.author_id == sender_id {
                    self.replica.add_card(card);
                } else {
                    debug!(card_id = %card.id, sender_id = %sender_id, "Ignoring card added for another author");
                }
            }

            Payload::CardSelected {
                card_id,
                new_status,
            } => {
                if from_host {
                    self.on_card_selected(card_id, new_status).await;
                }
            }

            Payload::CardDeleted { card_id } => {
                let by_author = self
                    .replica
                    .card(card_id)
                    .is_some_and(|card| card.author_id == sender_id);
                if from_host || by_author {
                    self.on_card_deleted(card_id).await;
                } else {
                    debug!(card_id = %card_id, sender_id = %sender_id, "Ignoring card delete from a non-author");
                }
            }

            Payload::SessionReset => {
                if from_host {
                    self.replica.apply_reset();
                    self.show_random_picker = false;
                }
            }

            Payload::SessionState(snapshot) => {
                if from_host && !self.replica.adopt(snapshot) {
                    debug!("Ignoring snapshot for another session");
                }
            }

            Payload::SessionNew {
                session_name,
                new_session_id,
                old_session_id,
                participant_id_map,
            } => {
                if from_host {
                    self.on_session_new(
                        &session_name,
                        new_session_id,
                        old_session_id,
                        &participant_id_map,
                    )
                    .await;
                }
            }

            Payload::HostLeft => {
                if from_host && !self.is_host() {
                    self.end_session(EndReason::HostLeft).await;
                }
            }

            Payload::Ping => {
                if self.is_host() {
                    self.publish(Payload::Pong).await;
                }
            }

            Payload::Pong => {
                debug!(sender_id = %sender_id, "Pong");
            }
        }
    }

    fn is_host(&self) -> bool {
        self.user.as_ref().is_some_and(|u| u.is_host)
    }

    /// Host-only messages are accepted from the session's host alone
    fn is_from_host(&self, sender_id: Uuid) -> bool {
        match (self.replica.session(), &self.pending_join) {
            (Some(session), _) => session.host_id == sender_id,
            (None, Some(pending)) => pending.host_id == sender_id,
            (None, None) => false,
        }
    }

    async fn on_join_request(&mut self, participant_id: Uuid) {
        if !self.is_host() {
            return;
        }
        if self.replica.has_departed(participant_id) {
            debug!(participant_id = %participant_id, "Ignoring join request from departed participant");
            return;
        }

        let known = self.replica.has_participant(participant_id);
        if !known && self.replica.participants().len() >= self.config.max_participants {
            warn!(
                participant_id = %participant_id,
                max = self.config.max_participants,
                "Session full, rejecting join"
            );
            self.publish(Payload::JoinRejected {
                participant_id,
                reason: "session is full".into(),
            })
            .await;
            return;
        }

        let participant = Participant::guest(participant_id);
        let added = self.replica.add_participant(participant.clone());

        let Some(snapshot) = self.replica.snapshot() else {
            return;
        };
        assert_snapshot_invariants(&snapshot);
        self.publish(Payload::join_accepted(participant_id, snapshot))
            .await;

        if added {
            self.publish(Payload::ParticipantJoined { participant }).await;
            info!(participant_id = %participant_id, "Participant joined");
        }
    }

    /// Adopt the host's snapshot and hand back what arrived while waiting
    fn on_join_accepted(
        &mut self,
        sender_id: Uuid,
        participant_id: Uuid,
        snapshot: SessionSnapshot,
    ) -> Vec<Message> {
        if Some(participant_id) != self.user_id() || !self.is_from_host(sender_id) {
            return Vec::new();
        }

        let Some(pending) = self.pending_join.take() else {
            // A duplicate of an accept already handled acts as a resync
            self.replica.adopt(snapshot);
            return Vec::new();
        };

        if snapshot.session.id != pending.session_id {
            warn!(session_id = %snapshot.session.id, "Join accepted for another session, ignoring");
            self.pending_join = Some(pending);
            return Vec::new();
        }

        self.replica.adopt(snapshot);
        self.loading = false;

        info!(
            session_id = %pending.session_id,
            buffered = pending.buffered.len(),
            "Join accepted"
        );
        pending.buffered
    }

    async fn on_join_rejected(&mut self, reason: String) {
        if self.pending_join.is_none() {
            return;
        }
        warn!(reason = %reason, "Join rejected");

        let user = self.user.clone();
        self.release_participation(None).await;
        if let Some(user) = user {
            let (session_id, user_id) = (user.session_id, user.id);
            if let Err(e) = self
                .storage
                .run(move |s| s.delete_participant(session_id, user_id))
                .await
            {
                warn!(error = %e, "Failed to remove own participant row");
            }
        }

        self.clear_local_state().await;
        self.ended = Some(EndReason::JoinRejected(reason));
    }

    /// Apply a draw, reading the card through from storage on a local miss
    async fn on_card_selected(&mut self, card_id: Uuid, new_status: SessionStatus) {
        let mut applied = self.replica.apply_selection(card_id, new_status);

        if applied == SelectionApplied::MissingCard {
            match self.storage.run(move |s| s.get_card(card_id)).await {
                Ok(Some(card)) => {
                    self.replica.upsert_card(card);
                    applied = self.replica.apply_selection(card_id, new_status);
                }
                Ok(None) => warn!(card_id = %card_id, "Selected card not found in storage"),
                Err(e) => warn!(card_id = %card_id, error = %e, "Failed to fetch selected card"),
            }
        }

        if applied == SelectionApplied::Applied {
            self.show_random_picker = true;
        }
    }

    /// Remove a card; the host also repairs a stored selection that pointed at it
    async fn on_card_deleted(&mut self, card_id: Uuid) {
        let removal = self.replica.remove_card(card_id);
        if !removal.cleared_selection {
            return;
        }
        self.show_random_picker = false;

        // The deleter may not have seen the draw yet, so its write can miss the selection
        if let (true, Some(session_id)) = (self.is_host(), self.replica.session_id()) {
            match self
                .storage
                .run(move |s| s.clear_selected_card(session_id, card_id))
                .await
            {
                Ok(reverted) => {
                    debug!(card_id = %card_id, reverted, "Selection removed by a delete");
                }
                Err(e) => {
                    warn!(card_id = %card_id, error = %e, "Failed to revert stored selection");
                }
            }
        }
    }

    async fn on_session_new(
        &mut self,
        session_name: &str,
        new_session_id: Uuid,
        old_session_id: Uuid,
        id_map: &BTreeMap<Uuid, Uuid>,
    ) {
        let (Some(user), Some(current)) = (self.user.clone(), self.replica.session_id()) else {
            return;
        };
        if current != old_session_id {
            debug!(old_session_id = %old_session_id, "Ignoring rotation of another session");
            return;
        }

        let Some(new_user_id) = id_map.get(&user.id).copied() else {
            self.end_session(EndReason::NotInRotation).await;
            return;
        };
        let Some((session, participants)) =
            self.replica
                .rotated_session(new_session_id, session_name, id_map, Utc::now())
        else {
            return;
        };

        self.release_participation(None).await;
        self.host_check = None;

        let user = LocalUser::guest(new_user_id, new_session_id);
        self.user = Some(user.clone());
        self.replica.apply_rotation(session, participants);
        self.show_random_picker = false;

        match Participation::acquire(self.transport.as_ref(), new_session_id, &user).await {
            Ok(p) => self.participation = Some(p),
            Err(e) => {
                warn!(session_id = %new_session_id, error = %e, "Failed to follow rotation");
                self.end_session(EndReason::ConnectionLost).await;
                return;
            }
        }
        self.cache_user().await;

        info!(
            old_session_id = %old_session_id,
            new_session_id = %new_session_id,
            participant_id = %new_user_id,
            "Followed session rotation"
        );
    }

    pub(super) async fn broadcast_snapshot(&mut self) {
        if let Some(snapshot) = self.replica.snapshot() {
            assert_snapshot_invariants(&snapshot);
            self.publish(Payload::SessionState(snapshot)).await;
        }
    }

    pub(super) async fn handle_presence(&mut self, event: PresenceEvent) {
        let Some(user_id) = self.user_id() else {
            return;
        };
        let Some(session) = self.replica.session().cloned() else {
            return;
        };
        let key = event.key();
        if key == user_id {
            return;
        }

        match event {
            PresenceEvent::Join { .. } => {
                if key == session.host_id && self.host_check.take().is_some() {
                    info!(host_id = %key, "Host presence restored");
                }
                if session.host_id == user_id && self.replica.has_participant(key) {
                    debug!(participant_id = %key, "Known participant rejoined, sending snapshot");
                    self.broadcast_snapshot().await;
                }
            }
            PresenceEvent::Leave { .. } => {
                if is_host_departure(&session, user_id, key) {
                    if self.host_check.is_none() {
                        info!(
                            host_id = %key,
                            grace_ms = self.config.host_leave_grace.as_millis() as u64,
                            "Host presence lost, confirming"
                        );
                        self.host_check = Some(HostCheck {
                            session_id: session.id,
                            deadline: Instant::now() + self.config.host_leave_grace,
                        });
                    }
                } else if self.replica.remove_participant(key) {
                    info!(participant_id = %key, "Participant left");
                    if session.host_id == user_id {
                        let session_id = session.id;
                        let deleted = self
                            .storage
                            .run(move |s| s.delete_participant(session_id, key))
                            .await;
                        match deleted {
                            Ok(()) | Err(Error::NotFound(_)) => {}
                            Err(e) => warn!(participant_id = %key, error = %e, "Failed to remove participant row"),
                        }
                    }
                }
            }
        }
    }

    /// Re-read presence after the grace period and end the session if the host is still gone
    pub(super) async fn confirm_host_departure(&mut self) {
        let Some(check) = self.host_check.take() else {
            return;
        };
        let Some(session) = self.replica.session().cloned() else {
            return;
        };
        if session.id != check.session_id {
            debug!("Session rotated since the host left presence");
            return;
        }
        let Some(participation) = &self.participation else {
            return;
        };
        if participation.session_id() != check.session_id {
            return;
        }

        let state = participation.presence_state().await;
        match state {
            Ok(state) if state.contains_key(&session.host_id) => {
                info!(host_id = %session.host_id, "Host presence is back");
            }
            Ok(_) => self.end_session(EndReason::HostLeft).await,
            Err(e) => {
                warn!(error = %e, "Presence query failed");
                self.end_session(EndReason::ConnectionLost).await;
            }
        }
    }
}
