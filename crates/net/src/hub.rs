//! In-process transport
//!
//! Engines in one process share a `LocalHub`. Each channel is its own
//! subscription: a broadcast never reaches the subscription that sent it,
//! and a dropped presence subscription leaves its key just like a lost
//! connection would.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::channel::{
    BroadcastChannel, PresenceChannel, PresenceEvent, PresenceMeta, PresenceState, Transport,
};
use crate::error::{Error, Result};
use crate::protocol::{presence_topic, session_topic, Message};

/// Buffered messages per topic before slow subscribers lag
const TOPIC_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct Envelope {
    origin: u64,
    message: Message,
}

struct Topic {
    messages: broadcast::Sender<Envelope>,
    events: broadcast::Sender<PresenceEvent>,
    /// Subscription id to its tracked key and meta
    presence: HashMap<u64, (Uuid, PresenceMeta)>,
    subscribers: usize,
}

impl Topic {
    fn new() -> Self {
        let (messages, _) = broadcast::channel(TOPIC_CAPACITY);
        let (events, _) = broadcast::channel(TOPIC_CAPACITY);
        Self {
            messages,
            events,
            presence: HashMap::new(),
            subscribers: 0,
        }
    }

    fn presence_state(&self) -> PresenceState {
        let mut state = PresenceState::new();
        for (key, meta) in self.presence.values() {
            state.entry(*key).or_default().push(meta.clone());
        }
        state
    }
}

struct HubInner {
    topics: Mutex<HashMap<String, Topic>>,
    next_id: AtomicU64,
    duplicate_delivery: bool,
}

impl HubInner {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Topic>> {
        self.topics.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Drop one subscription; a topic with no subscribers and no presence is removed
    fn release(&self, topic: &str) {
        let mut topics = self.lock();
        let idle = match topics.get_mut(topic) {
            Some(t) => {
                t.subscribers = t.subscribers.saturating_sub(1);
                t.subscribers == 0 && t.presence.is_empty()
            }
            None => false,
        };
        if idle {
            topics.remove(topic);
            debug!(topic, "Topic removed");
        }
    }

    fn untrack(&self, topic: &str, id: u64) {
        let mut topics = self.lock();
        let Some(t) = topics.get_mut(topic) else {
            return;
        };
        if let Some((key, meta)) = t.presence.remove(&id) {
            debug!(topic, key = %key, "Presence leave");
            let _ = t.events.send(PresenceEvent::Leave {
                key,
                metas: vec![meta],
            });
        }
    }
}

/// Shared in-process hub implementing both channel contracts
#[derive(Clone)]
pub struct LocalHub {
    inner: Arc<HubInner>,
}

impl Default for LocalHub {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalHub {
    pub fn new() -> Self {
        Self::build(false)
    }

    /// Deliver every broadcast twice
    pub fn with_duplicate_delivery() -> Self {
        Self::build(true)
    }

    fn build(duplicate_delivery: bool) -> Self {
        Self {
            inner: Arc::new(HubInner {
                topics: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                duplicate_delivery,
            }),
        }
    }

    /// Keys currently tracked on a session's presence topic
    pub fn presence_keys(&self, session_id: Uuid) -> Vec<Uuid> {
        let topics = self.inner.lock();
        let mut keys: Vec<Uuid> = topics
            .get(&presence_topic(session_id))
            .map(|t| t.presence.values().map(|(key, _)| *key).collect())
            .unwrap_or_default();
        keys.sort();
        keys.dedup();
        keys
    }

    /// Topics with at least one live subscription or tracked key
    pub fn topic_count(&self) -> usize {
        self.inner.lock().len()
    }

    /// Live subscriptions on a session's broadcast topic
    pub fn subscriber_count(&self, session_id: Uuid) -> usize {
        self.inner
            .lock()
            .get(&session_topic(session_id))
            .map_or(0, |t| t.subscribers)
    }

    pub fn subscribe_broadcast(&self, session_id: Uuid) -> LocalBroadcast {
        let topic = session_topic(session_id);
        let mut topics = self.inner.lock();
        let t = topics.entry(topic.clone()).or_insert_with(Topic::new);
        t.subscribers += 1;

        LocalBroadcast {
            hub: self.inner.clone(),
            id: self.inner.next_id(),
            tx: t.messages.clone(),
            rx: Some(t.messages.subscribe()),
            topic,
        }
    }

    pub fn subscribe_presence(&self, session_id: Uuid) -> LocalPresence {
        let topic = presence_topic(session_id);
        let mut topics = self.inner.lock();
        let t = topics.entry(topic.clone()).or_insert_with(Topic::new);
        t.subscribers += 1;

        LocalPresence {
            hub: self.inner.clone(),
            id: self.inner.next_id(),
            events: Some(t.events.subscribe()),
            tracked: false,
            topic,
        }
    }
}

#[async_trait]
impl Transport for LocalHub {
    async fn broadcast(&self, session_id: Uuid) -> Result<Box<dyn BroadcastChannel>> {
        Ok(Box::new(self.subscribe_broadcast(session_id)))
    }

    async fn presence(&self, session_id: Uuid) -> Result<Box<dyn PresenceChannel>> {
        Ok(Box::new(self.subscribe_presence(session_id)))
    }
}

/// Broadcast subscription on a `LocalHub`
pub struct LocalBroadcast {
    hub: Arc<HubInner>,
    topic: String,
    id: u64,
    tx: broadcast::Sender<Envelope>,
    rx: Option<broadcast::Receiver<Envelope>>,
}

#[async_trait]
impl BroadcastChannel for LocalBroadcast {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn send(&self, message: &Message) -> Result<()> {
        if self.rx.is_none() {
            return Err(Error::NotSubscribed);
        }

        let copies = if self.hub.duplicate_delivery { 2 } else { 1 };
        for _ in 0..copies {
            // No other receivers is not an error
            let _ = self.tx.send(Envelope {
                origin: self.id,
                message: message.clone(),
            });
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<Message> {
        let rx = self.rx.as_mut().ok_or(Error::NotSubscribed)?;
        loop {
            match rx.recv().await {
                Ok(envelope) if envelope.origin == self.id => continue,
                Ok(envelope) => return Ok(envelope.message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(topic = %self.topic, skipped, "Subscriber lagged, messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return Err(Error::ChannelClosed),
            }
        }
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        if self.rx.take().is_some() {
            self.hub.release(&self.topic);
        }
        Ok(())
    }
}

impl Drop for LocalBroadcast {
    fn drop(&mut self) {
        if self.rx.take().is_some() {
            self.hub.release(&self.topic);
        }
    }
}

/// Presence subscription on a `LocalHub`
pub struct LocalPresence {
    hub: Arc<HubInner>,
    topic: String,
    id: u64,
    events: Option<broadcast::Receiver<PresenceEvent>>,
    tracked: bool,
}

impl LocalPresence {
    fn untrack_now(&mut self) {
        if self.tracked {
            self.hub.untrack(&self.topic, self.id);
            self.tracked = false;
        }
    }
}

#[async_trait]
impl PresenceChannel for LocalPresence {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn track(&mut self, key: Uuid, meta: PresenceMeta) -> Result<()> {
        if self.events.is_none() {
            return Err(Error::NotSubscribed);
        }

        let mut topics = self.hub.lock();
        let t = topics.entry(self.topic.clone()).or_insert_with(Topic::new);
        t.presence.insert(self.id, (key, meta.clone()));
        debug!(topic = %self.topic, key = %key, "Presence join");
        let _ = t.events.send(PresenceEvent::Join {
            key,
            metas: vec![meta],
        });
        self.tracked = true;
        Ok(())
    }

    async fn untrack(&mut self) -> Result<()> {
        self.untrack_now();
        Ok(())
    }

    async fn current_state(&self) -> Result<PresenceState> {
        if self.events.is_none() {
            return Err(Error::NotSubscribed);
        }
        Ok(self
            .hub
            .lock()
            .get(&self.topic)
            .map(Topic::presence_state)
            .unwrap_or_default())
    }

    async fn next_event(&mut self) -> Result<PresenceEvent> {
        let events = self.events.as_mut().ok_or(Error::NotSubscribed)?;
        loop {
            match events.recv().await {
                Ok(event) => return Ok(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(topic = %self.topic, skipped, "Presence subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return Err(Error::ChannelClosed),
            }
        }
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        self.untrack_now();
        if self.events.take().is_some() {
            self.hub.release(&self.topic);
        }
        Ok(())
    }
}

impl Drop for LocalPresence {
    fn drop(&mut self) {
        self.untrack_now();
        if self.events.take().is_some() {
            self.hub.release(&self.topic);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Payload;
    use std::time::Duration;
    use tokio::time::timeout;

    const QUIET: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn test_broadcast_excludes_sender() {
        let hub = LocalHub::new();
        let session = Uuid::new_v4();
        let mut a = hub.subscribe_broadcast(session);
        let mut b = hub.subscribe_broadcast(session);

        let msg = Message::new(Uuid::new_v4(), Payload::Ping);
        a.send(&msg).await.unwrap();

        assert_eq!(b.recv().await.unwrap(), msg);
        assert!(timeout(QUIET, a.recv()).await.is_err());
        assert_eq!(hub.subscriber_count(session), 2);
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let hub = LocalHub::new();
        let a = hub.subscribe_broadcast(Uuid::new_v4());
        let mut b = hub.subscribe_broadcast(Uuid::new_v4());

        a.send(&Message::new(Uuid::new_v4(), Payload::Ping))
            .await
            .unwrap();
        assert!(timeout(QUIET, b.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_delivery() {
        let hub = LocalHub::with_duplicate_delivery();
        let session = Uuid::new_v4();
        let a = hub.subscribe_broadcast(session);
        let mut b = hub.subscribe_broadcast(session);

        let msg = Message::new(Uuid::new_v4(), Payload::SessionReset);
        a.send(&msg).await.unwrap();

        assert_eq!(b.recv().await.unwrap(), msg);
        assert_eq!(b.recv().await.unwrap(), msg);
    }

    #[tokio::test]
    async fn test_unsubscribed_channel_rejects_use() {
        let hub = LocalHub::new();
        let session = Uuid::new_v4();
        let mut a = hub.subscribe_broadcast(session);
        a.unsubscribe().await.unwrap();

        let msg = Message::new(Uuid::new_v4(), Payload::Ping);
        assert!(matches!(a.send(&msg).await, Err(Error::NotSubscribed)));
        assert!(matches!(a.recv().await, Err(Error::NotSubscribed)));
        assert_eq!(hub.subscriber_count(session), 0);
    }

    #[tokio::test]
    async fn test_presence_track_and_untrack() {
        let hub = LocalHub::new();
        let session = Uuid::new_v4();
        let mut observer = hub.subscribe_presence(session);
        let mut peer = hub.subscribe_presence(session);

        let key = Uuid::new_v4();
        peer.track(key, PresenceMeta::new(key, false)).await.unwrap();

        match observer.next_event().await.unwrap() {
            PresenceEvent::Join { key: joined, metas } => {
                assert_eq!(joined, key);
                assert_eq!(metas[0].user_id, key);
            }
            other => panic!("Expected join, got {:?}", other),
        }
        assert!(observer.current_state().await.unwrap().contains_key(&key));
        assert_eq!(hub.presence_keys(session), vec![key]);

        peer.untrack().await.unwrap();
        assert!(matches!(
            observer.next_event().await.unwrap(),
            PresenceEvent::Leave { .. }
        ));
        assert!(observer.current_state().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_presence_leaves() {
        let hub = LocalHub::new();
        let session = Uuid::new_v4();
        let mut observer = hub.subscribe_presence(session);

        let key = Uuid::new_v4();
        {
            let mut peer = hub.subscribe_presence(session);
            peer.track(key, PresenceMeta::new(key, true)).await.unwrap();
        }

        assert!(matches!(
            observer.next_event().await.unwrap(),
            PresenceEvent::Join { .. }
        ));
        let event = observer.next_event().await.unwrap();
        assert!(matches!(event, PresenceEvent::Leave { .. }));
        assert_eq!(event.key(), key);
        assert!(hub.presence_keys(session).is_empty());
    }

    #[tokio::test]
    async fn test_idle_topics_are_pruned() {
        let hub = LocalHub::new();
        let session = Uuid::new_v4();
        let mut messages = hub.subscribe_broadcast(session);
        let mut presence = hub.subscribe_presence(session);
        let key = Uuid::new_v4();
        presence.track(key, PresenceMeta::new(key, true)).await.unwrap();
        assert_eq!(hub.topic_count(), 2);

        messages.unsubscribe().await.unwrap();
        assert_eq!(hub.topic_count(), 1);

        drop(presence);
        assert_eq!(hub.topic_count(), 0);

        // A later subscriber starts from a fresh topic
        let again = hub.subscribe_broadcast(session);
        assert_eq!(hub.subscriber_count(session), 1);
        drop(again);
        assert_eq!(hub.topic_count(), 0);
    }
}
