//! Scoped session participation
//!
//! Holds the broadcast and presence subscriptions of one session. Acquired
//! on create/join/rotate, released on leave. If it is dropped without an
//! explicit release (task abort, panic) a best-effort release is spawned.

use darkpot_core::LocalUser;
use darkpot_net::{BroadcastChannel, Message, PresenceChannel, PresenceMeta, PresenceState, Transport};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct Participation {
    session_id: Uuid,
    user_id: Uuid,
    broadcast: Option<Box<dyn BroadcastChannel>>,
    presence: Option<Box<dyn PresenceChannel>>,
}

impl Participation {
    /// Subscribe to both channels of `session_id` and track `user` on presence
    pub async fn acquire(
        transport: &dyn Transport,
        session_id: Uuid,
        user: &LocalUser,
    ) -> darkpot_net::Result<Self> {
        let broadcast = transport.broadcast(session_id).await?;
        let mut presence = transport.presence(session_id).await?;
        presence
            .track(user.id, PresenceMeta::new(user.id, user.is_host))
            .await?;

        info!(session_id = %session_id, user_id = %user.id, "Participation acquired");

        Ok(Self {
            session_id,
            user_id: user.id,
            broadcast: Some(broadcast),
            presence: Some(presence),
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub async fn send(&self, message: &Message) -> darkpot_net::Result<()> {
        match &self.broadcast {
            Some(channel) => channel.send(message).await,
            None => Err(darkpot_net::Error::NotSubscribed),
        }
    }

    pub async fn presence_state(&self) -> darkpot_net::Result<PresenceState> {
        match &self.presence {
            Some(channel) => channel.current_state().await,
            None => Err(darkpot_net::Error::NotSubscribed),
        }
    }

    /// Disjoint access to both channels for the event loop
    pub fn channels_mut(
        &mut self,
    ) -> (
        Option<&mut (dyn BroadcastChannel + 'static)>,
        Option<&mut (dyn PresenceChannel + 'static)>,
    ) {
        (self.broadcast.as_deref_mut(), self.presence.as_deref_mut())
    }

    /// Send an optional farewell, then untrack and unsubscribe
    pub async fn release(mut self, farewell: Option<Message>) {
        if let Some(message) = farewell {
            if let Err(e) = self.send(&message).await {
                warn!(kind = message.kind(), error = %e, "Farewell broadcast failed");
            }
        }

        let broadcast = self.broadcast.take();
        let presence = self.presence.take();
        close_channels(broadcast, presence).await;

        debug!(session_id = %self.session_id, user_id = %self.user_id, "Participation released");
    }
}

async fn close_channels(
    broadcast: Option<Box<dyn BroadcastChannel>>,
    presence: Option<Box<dyn PresenceChannel>>,
) {
    if let Some(mut presence) = presence {
        if let Err(e) = presence.untrack().await {
            debug!(error = %e, "Untrack failed");
        }
        if let Err(e) = presence.unsubscribe().await {
            debug!(error = %e, "Presence unsubscribe failed");
        }
    }
    if let Some(mut broadcast) = broadcast {
        if let Err(e) = broadcast.unsubscribe().await {
            debug!(error = %e, "Broadcast unsubscribe failed");
        }
    }
}

impl Drop for Participation {
    fn drop(&mut self) {
        let broadcast = self.broadcast.take();
        let presence = self.presence.take();
        if broadcast.is_none() && presence.is_none() {
            return;
        }

        warn!(session_id = %self.session_id, "Participation dropped without release");
        // Without a runtime the channels are dropped here, which closes them as well
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(close_channels(broadcast, presence));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use darkpot_net::{LocalHub, Payload};

    #[tokio::test]
    async fn test_acquire_tracks_presence() {
        let hub = LocalHub::new();
        let session = Uuid::new_v4();
        let user = LocalUser::host(Uuid::new_v4(), session);

        let participation = Participation::acquire(&hub, session, &user).await.unwrap();
        assert_eq!(hub.presence_keys(session), vec![user.id]);
        assert_eq!(hub.subscriber_count(session), 1);
        assert!(participation
            .presence_state()
            .await
            .unwrap()
            .contains_key(&user.id));

        participation.release(None).await;
        assert!(hub.presence_keys(session).is_empty());
        assert_eq!(hub.subscriber_count(session), 0);
    }

    #[tokio::test]
    async fn test_release_sends_farewell() {
        let hub = LocalHub::new();
        let session = Uuid::new_v4();
        let mut observer = hub.subscribe_broadcast(session);
        let user = LocalUser::guest(Uuid::new_v4(), session);

        let participation = Participation::acquire(&hub, session, &user).await.unwrap();
        let farewell = Message::new(
            user.id,
            Payload::ParticipantLeft {
                participant_id: user.id,
            },
        );
        participation.release(Some(farewell.clone())).await;

        assert_eq!(observer.recv().await.unwrap(), farewell);
    }

    #[tokio::test]
    async fn test_drop_releases_presence() {
        let hub = LocalHub::new();
        let session = Uuid::new_v4();
        let user = LocalUser::guest(Uuid::new_v4(), session);

        let participation = Participation::acquire(&hub, session, &user).await.unwrap();
        drop(participation);
        tokio::task::yield_now().await;

        assert!(hub.presence_keys(session).is_empty());
    }
}
