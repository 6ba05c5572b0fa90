//! Local intents
//!
//! Each intent validates and authorizes first, then persists, then applies
//! to the replica, then broadcasts. Nothing is broadcast for a write that
//! did not reach storage.

use darkpot_core::invariants::{
    assert_rotated_session, assert_selection_invariants, assert_session_invariants,
};
use darkpot_core::{
    draw_card, Card, Error, LocalUser, Participant, PermissionMatrix, Result, RotationPlan,
    Session, SessionAction, SessionReplica, SessionUpdate,
};
use darkpot_net::Payload;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{EndReason, Participation, PeerEngine, PendingJoin};

impl PeerEngine {
    pub(super) async fn create_session(&mut self, name: &str) -> Result<Session> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Validation("session name is required".into()));
        }
        self.require_idle()?;

        let host_id = Uuid::new_v4();
        let session = Session::new(name.to_string(), host_id);
        let host = Participant::host(host_id);

        let row = session.clone();
        self.storage.run(move |s| s.insert_session(&row)).await?;
        let (session_id, row) = (session.id, host.clone());
        if let Err(e) = self
            .storage
            .run(move |s| s.insert_participant(session_id, &row))
            .await
        {
            let cleanup = self.storage.run(move |s| s.delete_session(session_id)).await;
            if let Err(cleanup) = cleanup {
                warn!(session_id = %session_id, error = %cleanup, "Failed to remove half-created session");
            }
            return Err(e);
        }

        let user = LocalUser::host(host_id, session.id);
        let participation =
            match Participation::acquire(self.transport.as_ref(), session.id, &user).await {
                Ok(p) => p,
                Err(e) => {
                    self.storage.purge(session.id).await;
                    return Err(e.into());
                }
            };

        self.participation = Some(participation);
        self.user = Some(user);
        self.replica = SessionReplica::start(session.clone(), vec![host], Vec::new());
        self.ended = None;
        self.cache_user().await;
        self.cache_hosted_session(session.id, host_id).await;

        info!(session_id = %session.id, name = %session.name, "Session created");
        Ok(session)
    }

    pub(super) async fn join_session(&mut self, session_id: Uuid) -> Result<()> {
        if session_id.is_nil() {
            return Err(Error::Validation("session id is required".into()));
        }
        self.require_idle()?;

        let session = self
            .storage
            .run(move |s| s.get_session(session_id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("session {}", session_id)))?;

        // The own row is written first so the join survives an unreachable host
        let me = Participant::guest(Uuid::new_v4());
        let row = me.clone();
        self.storage
            .run(move |s| s.insert_participant(session_id, &row))
            .await?;
        let me_id = me.id;

        let user = LocalUser::guest(me.id, session_id);
        let participation =
            match Participation::acquire(self.transport.as_ref(), session_id, &user).await {
                Ok(p) => p,
                Err(e) => {
                    if let Err(cleanup) = self
                        .storage
                        .run(move |s| s.delete_participant(session_id, me_id))
                        .await
                    {
                        warn!(error = %cleanup, "Failed to remove own participant row");
                    }
                    return Err(e.into());
                }
            };

        self.participation = Some(participation);
        self.user = Some(user);
        self.ended = None;
        self.loading = true;
        self.pending_join = Some(PendingJoin {
            session_id,
            host_id: session.host_id,
            buffered: Vec::new(),
        });
        self.cache_user().await;

        self.publish(Payload::JoinRequest {
            participant_id: me.id,
        })
        .await;

        info!(session_id = %session_id, participant_id = %me.id, "Join requested");
        Ok(())
    }

    pub(super) async fn submit_card(&mut self, content: &str) -> Result<Card> {
        let content = content.trim();
        if content.is_empty() {
            return Err(Error::Validation("card content is required".into()));
        }
        let (user, session_id) = self.require_session()?;
        PermissionMatrix::require(&user, SessionAction::SubmitCard)?;

        let card = Card::new(user.id, content.to_string());
        let row = card.clone();
        self.storage
            .run(move |s| s.insert_card(session_id, &row))
            .await?;
        self.replica.add_card(card.clone());

        self.publish(Payload::CardAdded { card: card.clone() }).await;

        debug!(card_id = %card.id, "Card submitted");
        Ok(card)
    }

    pub(super) async fn delete_card(&mut self, card_id: Uuid) -> Result<()> {
        let (user, session_id) = self.require_session()?;

        let card = match self.replica.card(card_id).cloned() {
            Some(card) => card,
            None => self
                .storage
                .run(move |s| s.get_card(card_id))
                .await?
                .ok_or_else(|| Error::NotFound(format!("card {}", card_id)))?,
        };
        PermissionMatrix::require_card_delete(&user, &card)?;

        // The card row and a selection pointing at it go together
        let reverted = match self
            .storage
            .run(move |s| s.delete_card_in_session(session_id, card_id))
            .await
        {
            Ok(reverted) => reverted,
            // Already gone: a concurrent delete won and reverted the session with it
            Err(Error::NotFound(_)) => false,
            Err(e) => return Err(e),
        };

        let removal = self.replica.remove_card(card_id);
        if removal.cleared_selection || reverted {
            self.show_random_picker = false;
        }

        self.publish(Payload::CardDeleted { card_id }).await;

        debug!(
            card_id = %card_id,
            cleared_selection = removal.cleared_selection,
            reverted,
            "Card deleted"
        );
        Ok(())
    }

    pub(super) async fn pick_random_card(&mut self) -> Result<Card> {
        let (user, session_id) = self.require_session()?;
        PermissionMatrix::require(&user, SessionAction::Draw)?;

        let draw = draw_card(self.replica.cards(), &mut self.rng)?;

        // Fenced: a card deleted or selected since the replica last saw it cancels the draw
        let card_id = draw.card_id;
        if !self
            .storage
            .run(move |s| s.select_card_if_unselected(card_id))
            .await?
        {
            return Err(Error::Conflict(format!(
                "card {} was deleted or already selected",
                draw.card_id
            )));
        }
        let update = SessionUpdate::selection(draw.card_id, draw.new_status);
        if let Err(e) = self
            .storage
            .run(move |s| s.update_session(session_id, &update))
            .await
        {
            if let Err(revert) = self
                .storage
                .run(move |s| s.update_card(card_id, false))
                .await
            {
                warn!(card_id = %draw.card_id, error = %revert, "Failed to revert card selection");
            }
            return Err(e);
        }

        self.replica.apply_selection(draw.card_id, draw.new_status);
        self.show_random_picker = true;
        if let Some(session) = self.replica.session() {
            assert_session_invariants(session);
            assert_selection_invariants(session, self.replica.cards());
        }

        self.publish(Payload::CardSelected {
            card_id: draw.card_id,
            new_status: draw.new_status,
        })
        .await;

        info!(
            card_id = %draw.card_id,
            candidates = draw.candidates,
            status = %draw.new_status,
            "Card drawn"
        );

        self.replica
            .card(draw.card_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("card {}", draw.card_id)))
    }

    pub(super) async fn reset_session(&mut self) -> Result<()> {
        let (user, session_id) = self.require_session()?;
        PermissionMatrix::require(&user, SessionAction::Reset)?;

        let cleared = self
            .storage
            .run(move |s| {
                let cleared = s.clear_selection(session_id)?;
                s.update_session(session_id, &SessionUpdate::collecting())?;
                Ok(cleared)
            })
            .await?;

        self.replica.apply_reset();
        self.show_random_picker = false;

        self.publish(Payload::SessionReset).await;

        info!(session_id = %session_id, cleared, "Session reset");
        Ok(())
    }

    pub(super) async fn rotate_session(&mut self, name: &str) -> Result<Session> {
        let (user, old_session_id) = self.require_session()?;
        PermissionMatrix::require(&user, SessionAction::Rotate)?;

        let plan = RotationPlan::new(old_session_id, user.id, name, self.replica.participants())?;
        let new_session_id = plan.new_session_id();

        let (row, roster) = (plan.new_session.clone(), plan.participants.clone());
        let written = self
            .storage
            .run(move |s| {
                s.insert_session(&row)?;
                for participant in &roster {
                    s.insert_participant(new_session_id, participant)?;
                }
                Ok(())
            })
            .await;
        if let Err(e) = written {
            self.storage.purge(new_session_id).await;
            return Err(e);
        }

        let report = self.storage.purge(old_session_id).await;
        if !report.is_complete() {
            warn!(session_id = %old_session_id, ?report, "Old session rows were not fully removed");
        }

        let RotationPlan {
            new_session,
            id_map,
            participants,
            ..
        } = plan;

        // Announced on the old topic, which every peer is still listening on
        self.publish(Payload::SessionNew {
            session_name: new_session.name.clone(),
            new_session_id,
            old_session_id,
            participant_id_map: id_map,
        })
        .await;

        self.release_participation(None).await;
        self.host_check = None;

        let user = LocalUser::host(user.id, new_session_id);
        match Participation::acquire(self.transport.as_ref(), new_session_id, &user).await {
            Ok(p) => self.participation = Some(p),
            Err(e) => {
                self.storage.purge(new_session_id).await;
                self.end_session(EndReason::ConnectionLost).await;
                return Err(e.into());
            }
        }

        self.user = Some(user.clone());
        self.replica.apply_rotation(new_session.clone(), participants);
        self.show_random_picker = false;
        assert_rotated_session(&new_session, self.replica.cards());

        self.cache_user().await;
        self.cache_hosted_session(new_session_id, user.id).await;

        info!(
            old_session_id = %old_session_id,
            new_session_id = %new_session_id,
            participants = self.replica.participants().len(),
            "Session rotated"
        );
        Ok(new_session)
    }

    /// Leave the current session. Leaving with no session is a no-op.
    pub(super) async fn leave_session(&mut self) -> Result<()> {
        let Some(user) = self.user.clone() else {
            return Ok(());
        };

        if user.is_host {
            self.release_participation(Some(Payload::HostLeft)).await;

            let report = self.storage.purge(user.session_id).await;
            if report.is_complete() {
                self.cache_update(|store| store.clear_pending_cleanup()).await;
            } else {
                // The marker stays so the next start retries the cleanup
                warn!(session_id = %user.session_id, ?report, "Session rows were not fully removed");
            }
        } else {
            self.release_participation(Some(Payload::ParticipantLeft {
                participant_id: user.id,
            }))
            .await;

            let (session_id, user_id) = (user.session_id, user.id);
            if let Err(e) = self
                .storage
                .run(move |s| s.delete_participant(session_id, user_id))
                .await
            {
                warn!(session_id = %user.session_id, error = %e, "Failed to remove own participant row");
            }
        }

        self.clear_local_state().await;
        self.ended = None;

        info!(session_id = %user.session_id, was_host = user.is_host, "Left session");
        Ok(())
    }

    pub(super) async fn resync(&mut self) -> Result<()> {
        let (user, _) = self.require_session()?;
        PermissionMatrix::require(&user, SessionAction::Resync)?;

        self.broadcast_snapshot().await;
        Ok(())
    }

    fn require_idle(&self) -> Result<()> {
        if self.user.is_some() {
            return Err(Error::Validation("already in a session, leave it first".into()));
        }
        Ok(())
    }
}
