//! TCP relay server
//!
//! Accepts channel connections, each bound to one topic by its first frame.
//! Broadcasts are forwarded to every other connection on the topic; presence
//! is tracked per connection and dropped when the connection closes.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::RelayFrame;
use crate::channel::{PresenceMeta, PresenceState};
use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};

/// Maximum connections per topic
const MAX_SUBSCRIBERS: usize = 64;

/// Outbound frames buffered per connection
const OUTBOUND_CAPACITY: usize = 64;

type ConnId = u64;

/// Subscribers and presence of one topic
#[derive(Default)]
struct Topic {
    peers: HashMap<ConnId, mpsc::Sender<RelayFrame>>,
    presence: HashMap<ConnId, (Uuid, PresenceMeta)>,
}

impl Topic {
    fn presence_state(&self) -> PresenceState {
        let mut state = PresenceState::new();
        for (key, meta) in self.presence.values() {
            state.entry(*key).or_default().push(meta.clone());
        }
        state
    }
}

/// Relay state shared across tasks
#[derive(Default)]
struct RelayState {
    next_conn: ConnId,
    topics: HashMap<String, Topic>,
}

/// Relay server handle
pub struct RelayServer {
    addr: SocketAddr,
    state: Arc<RwLock<RelayState>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl RelayServer {
    /// Start a relay listening on `addr`; port 0 picks a free port
    pub async fn start(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let bound_addr = listener.local_addr()?;

        info!(addr = %bound_addr, "Relay started");

        let (shutdown_tx, _) = broadcast::channel(1);
        let state = Arc::new(RwLock::new(RelayState::default()));

        let state_clone = state.clone();
        let shutdown = shutdown_tx.clone();
        tokio::spawn(accept_loop(listener, state_clone, shutdown));

        Ok(RelayServer {
            addr: bound_addr,
            state,
            shutdown_tx,
        })
    }

    /// Get the relay's bound address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Number of connections subscribed to `topic`
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.state
            .read()
            .await
            .topics
            .get(topic)
            .map_or(0, |t| t.peers.len())
    }

    /// Shutdown the relay and close every connection
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        info!("Relay shutdown initiated");
    }
}

/// Accept incoming connections
async fn accept_loop(
    listener: TcpListener,
    state: Arc<RwLock<RelayState>>,
    shutdown: broadcast::Sender<()>,
) {
    let mut shutdown_rx = shutdown.subscribe();
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!(addr = %addr, "New connection");
                        let state = state.clone();
                        let shutdown_rx = shutdown.subscribe();
                        tokio::spawn(handle_connection(stream, addr, state, shutdown_rx));
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Accept loop shutting down");
                break;
            }
        }
    }
}

/// Handle a single channel connection
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    state: Arc<RwLock<RelayState>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let (mut reader, mut writer) = tokio::io::split(stream);
    let (msg_tx, msg_rx) = mpsc::channel(OUTBOUND_CAPACITY);

    // First frame must be Subscribe
    let (conn_id, topic) = match handle_subscribe(&mut reader, &state, msg_tx.clone()).await {
        Ok(subscribed) => subscribed,
        Err(e) => {
            warn!(addr = %addr, error = %e, "Subscribe failed");
            let refusal = RelayFrame::Refused {
                reason: e.to_string(),
            };
            let _ = write_frame(&mut writer, &refusal).await;
            return;
        }
    };

    info!(addr = %addr, conn_id, topic = %topic, "Subscribed");

    let writer_handle = tokio::spawn(writer_task(writer, msg_rx));

    // Read loop
    loop {
        tokio::select! {
            result = read_frame::<RelayFrame, _>(&mut reader) => {
                match result {
                    Ok(RelayFrame::Unsubscribe) => {
                        debug!(conn_id, "Unsubscribe requested");
                        break;
                    }
                    Ok(frame) => {
                        handle_frame(frame, conn_id, &topic, &msg_tx, &state).await;
                    }
                    Err(Error::ConnectionClosed) => {
                        debug!(conn_id, "Connection closed");
                        break;
                    }
                    Err(e) => {
                        warn!(conn_id, error = %e, "Read error");
                        break;
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                debug!(conn_id, "Connection closing for shutdown");
                break;
            }
        }
    }

    // Cleanup
    remove_connection(&state, conn_id, &topic).await;
    drop(msg_tx);
    let _ = writer_handle.await;

    info!(conn_id, topic = %topic, "Connection closed");
}

/// Handle the subscribe frame
async fn handle_subscribe(
    reader: &mut ReadHalf<TcpStream>,
    state: &Arc<RwLock<RelayState>>,
    tx: mpsc::Sender<RelayFrame>,
) -> Result<(ConnId, String)> {
    match read_frame::<RelayFrame, _>(reader).await? {
        RelayFrame::Subscribe { topic } => {
            if !(topic.starts_with("session:") || topic.starts_with("presence:")) {
                return Err(Error::Rejected(format!("Unknown topic {}", topic)));
            }

            let mut s = state.write().await;
            let conn_id = s.next_conn;
            s.next_conn += 1;

            let entry = s.topics.entry(topic.clone()).or_default();
            if entry.peers.len() >= MAX_SUBSCRIBERS {
                return Err(Error::Rejected("Topic full".into()));
            }
            // Confirmation is queued ahead of any delivery to this connection
            let _ = tx.try_send(RelayFrame::Subscribed {
                topic: topic.clone(),
            });
            entry.peers.insert(conn_id, tx);

            Ok((conn_id, topic))
        }
        _ => Err(Error::Protocol("Expected Subscribe".into())),
    }
}

/// Writer task - sends frames to the connection
async fn writer_task(mut writer: WriteHalf<TcpStream>, mut rx: mpsc::Receiver<RelayFrame>) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &frame).await {
            debug!(error = %e, "Write failed");
            break;
        }
    }
}

/// Handle an incoming frame
async fn handle_frame(
    frame: RelayFrame,
    conn_id: ConnId,
    topic: &str,
    reply: &mpsc::Sender<RelayFrame>,
    state: &Arc<RwLock<RelayState>>,
) {
    match frame {
        RelayFrame::Publish { message } => {
            debug!(conn_id, kind = message.kind(), "Relaying message");
            broadcast_to_topic(state, topic, RelayFrame::Deliver { message }, Some(conn_id)).await;
        }
        RelayFrame::Track { key, meta } => {
            {
                let mut s = state.write().await;
                if let Some(t) = s.topics.get_mut(topic) {
                    t.presence.insert(conn_id, (key, meta.clone()));
                }
            }
            let join = RelayFrame::PresenceJoin {
                key,
                metas: vec![meta],
            };
            broadcast_to_topic(state, topic, join, None).await;
        }
        RelayFrame::Untrack => untrack(state, conn_id, topic).await,
        RelayFrame::QueryPresence => {
            let presence = state
                .read()
                .await
                .topics
                .get(topic)
                .map(Topic::presence_state)
                .unwrap_or_default();
            let _ = reply
                .send(RelayFrame::PresenceState { state: presence })
                .await;
        }
        _ => {
            debug!(conn_id, "Ignoring unexpected frame");
        }
    }
}

/// Drop a connection's presence and announce the leave
async fn untrack(state: &Arc<RwLock<RelayState>>, conn_id: ConnId, topic: &str) {
    let removed = {
        let mut s = state.write().await;
        s.topics
            .get_mut(topic)
            .and_then(|t| t.presence.remove(&conn_id))
    };

    if let Some((key, meta)) = removed {
        let leave = RelayFrame::PresenceLeave {
            key,
            metas: vec![meta],
        };
        broadcast_to_topic(state, topic, leave, Some(conn_id)).await;
    }
}

/// Remove a connection from its topic
async fn remove_connection(state: &Arc<RwLock<RelayState>>, conn_id: ConnId, topic: &str) {
    untrack(state, conn_id, topic).await;

    let mut s = state.write().await;
    let empty = match s.topics.get_mut(topic) {
        Some(t) => {
            t.peers.remove(&conn_id);
            t.peers.is_empty()
        }
        None => false,
    };
    if empty {
        s.topics.remove(topic);
    }
}

/// Send to every connection on a topic, optionally excluding one
async fn broadcast_to_topic(
    state: &Arc<RwLock<RelayState>>,
    topic: &str,
    frame: RelayFrame,
    except: Option<ConnId>,
) {
    let s = state.read().await;
    let Some(t) = s.topics.get(topic) else {
        return;
    };
    for (id, tx) in &t.peers {
        if except != Some(*id) {
            let _ = tx.send(frame.clone()).await;
        }
    }
}
