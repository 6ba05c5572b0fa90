//! Protocol engine
//!
//! One engine per participant. Local intents and inbound channel events are
//! serialized onto a single event loop that owns the session replica, so the
//! in-memory state is never mutated concurrently. Every write is persisted
//! first, applied to the replica second, and broadcast last. Storage runs on
//! the blocking pool so a busy database never stalls the loop.

mod handle;
mod inbound;
mod intents;
mod participation;
mod store;
mod view;


use std::sync::Arc;
use std::time::Duration;

use darkpot_core::{
    Card, Database, Error, LocalStateStore, LocalUser, PendingCleanup, Result, Session, SessionReplica, Storage,
};
use darkpot_net::{BroadcastChannel, Message, Payload, PresenceChannel, PresenceEvent, Transport};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use handle::EngineHandle;
pub use participation::Participation;
use store::{with_cache, Store};
pub use view::{EndReason, ViewState};

/// Queued intents before callers wait
const COMMAND_CAPACITY: usize = 64;

pub(crate) type Reply<T> = oneshot::Sender<Result<T>>;

/// Intents from the View Layer, each with its reply
pub(crate) enum Command {
    CreateSession { name: String, reply: Reply<Session> },
    JoinSession { session_id: Uuid, reply: Reply<()> },
    SubmitCard { content: String, reply: Reply<Card> },
    DeleteCard { card_id: Uuid, reply: Reply<()> },
    PickRandomCard { reply: Reply<Card> },
    ResetSession { reply: Reply<()> },
    RotateSession { name: String, reply: Reply<Session> },
    LeaveSession { reply: Reply<()> },
    AcknowledgeDrawUiClosed { reply: Reply<()> },
    Resync { reply: Reply<()> },
}

/// Engine tuning
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_participants: usize,
    /// How long a presence-detected host leave waits for the host to reappear
    pub host_leave_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_participants: 32,
            host_leave_grace: Duration::from_millis(3000),
        }
    }
}

/// A join waiting for the host's answer
struct PendingJoin {
    session_id: Uuid,
    host_id: Uuid,
    /// Messages that arrived before the snapshot; replayed after adoption
    buffered: Vec<Message>,
}

/// A host presence leave waiting to be confirmed
#[derive(Debug, Clone, Copy)]
struct HostCheck {
    session_id: Uuid,
    deadline: Instant,
}

/// What woke the event loop
enum Step {
    Command(Command),
    Inbound(darkpot_net::Result<Message>),
    Presence(darkpot_net::Result<PresenceEvent>),
    HostCheck,
}

pub struct PeerEngine {
    storage: Store,
    transport: Arc<dyn Transport>,
    cache: Option<Arc<Database>>,
    config: EngineConfig,
    rng: StdRng,

    user: Option<LocalUser>,
    replica: SessionReplica,
    participation: Option<Participation>,
    pending_join: Option<PendingJoin>,
    host_check: Option<HostCheck>,

    loading: bool,
    error: Option<String>,
    show_random_picker: bool,
    ended: Option<EndReason>,

    cmd_rx: mpsc::Receiver<Command>,
    view_tx: watch::Sender<ViewState>,
}

impl PeerEngine {
    pub fn new(
        storage: Arc<dyn Storage>,
        transport: Arc<dyn Transport>,
        config: EngineConfig,
    ) -> (Self, EngineHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (view_tx, view_rx) = watch::channel(ViewState::default());

        let engine = Self {
            storage: Store::new(storage),
            transport,
            cache: None,
            config,
            rng: StdRng::from_entropy(),
            user: None,
            replica: SessionReplica::new(),
            participation: None,
            pending_join: None,
            host_check: None,
            loading: false,
            error: None,
            show_random_picker: false,
            ended: None,
            cmd_rx,
            view_tx,
        };

        (engine, EngineHandle::new(cmd_tx, view_rx))
    }

    /// Persist the local user and pending cleanup marker in `cache`
    pub fn with_cache(mut self, cache: Arc<Database>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run until every handle is dropped, then leave the current session
    pub async fn run(mut self) {
        loop {
            let step = {
                let (broadcast, presence) = match self.participation.as_mut() {
                    Some(p) => p.channels_mut(),
                    None => (None, None),
                };
                let deadline = self.host_check.map(|c| c.deadline);

                tokio::select! {
                    cmd = self.cmd_rx.recv() => match cmd {
                        Some(cmd) => Step::Command(cmd),
                        None => break,
                    },
                    msg = next_message(broadcast) => Step::Inbound(msg),
                    event = next_presence(presence) => Step::Presence(event),
                    _ = host_check_due(deadline) => Step::HostCheck,
                }
            };

            match step {
                Step::Command(cmd) => self.handle_command(cmd).await,
                Step::Inbound(Ok(msg)) => self.handle_message(msg).await,
                Step::Presence(Ok(event)) => self.handle_presence(event).await,
                Step::Inbound(Err(e)) | Step::Presence(Err(e)) => {
                    warn!(error = %e, "Session channel failed");
                    self.end_session(EndReason::ConnectionLost).await;
                }
                Step::HostCheck => self.confirm_host_departure().await,
            }

            self.publish_view();
        }

        info!("Engine handles dropped, shutting down");
        if let Err(e) = self.leave_session().await {
            warn!(error = %e, "Leave on shutdown failed");
        }
        self.publish_view();
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::CreateSession { name, reply } => {
                let result = self.create_session(&name).await;
                self.reply(reply, result);
            }
            Command::JoinSession { session_id, reply } => {
                let result = self.join_session(session_id).await;
                self.reply(reply, result);
            }
            Command::SubmitCard { content, reply } => {
                let result = self.submit_card(&content).await;
                self.reply(reply, result);
            }
            Command::DeleteCard { card_id, reply } => {
                let result = self.delete_card(card_id).await;
                self.reply(reply, result);
            }
            Command::PickRandomCard { reply } => {
                let result = self.pick_random_card().await;
                self.reply(reply, result);
            }
            Command::ResetSession { reply } => {
                let result = self.reset_session().await;
                self.reply(reply, result);
            }
            Command::RotateSession { name, reply } => {
                let result = self.rotate_session(&name).await;
                self.reply(reply, result);
            }
            Command::LeaveSession { reply } => {
                let result = self.leave_session().await;
                self.reply(reply, result);
            }
            Command::AcknowledgeDrawUiClosed { reply } => {
                self.show_random_picker = false;
                self.reply(reply, Ok(()));
            }
            Command::Resync { reply } => {
                let result = self.resync().await;
                self.reply(reply, result);
            }
        }
    }

    /// Record the outcome for the view and answer the caller
    fn reply<T>(&mut self, reply: Reply<T>, result: Result<T>) {
        match &result {
            Ok(_) => self.error = None,
            Err(e) => {
                if e.is_local_rejection() {
                    debug!(error = %e, "Intent rejected");
                } else {
                    warn!(error = %e, "Intent failed");
                }
                self.error = Some(e.to_string());
            }
        }
        // Callers that read the view after the reply see the outcome
        self.publish_view();
        let _ = reply.send(result);
    }

    fn publish_view(&self) {
        let next = ViewState {
            user: self.user.clone(),
            session: self.replica.session().cloned(),
            participants: self.replica.participants().to_vec(),
            cards: self.replica.cards().to_vec(),
            selected_card: self.replica.selected_card().cloned(),
            loading: self.loading,
            error: self.error.clone(),
            show_random_picker: self.show_random_picker,
            ended: self.ended.clone(),
        };
        self.view_tx.send_if_modified(|view| {
            if *view == next {
                false
            } else {
                *view = next;
                true
            }
        });
    }

    fn user_id(&self) -> Option<Uuid> {
        self.user.as_ref().map(|u| u.id)
    }

    /// Local user and live session id, or a validation error
    fn require_session(&self) -> Result<(LocalUser, Uuid)> {
        match (&self.user, self.replica.session_id()) {
            (Some(user), Some(session_id)) => Ok((user.clone(), session_id)),
            _ => Err(Error::Validation("not in a session".into())),
        }
    }

    /// Broadcast on the current session topic. Failures are logged only.
    async fn publish(&self, payload: Payload) {
        let (Some(user_id), Some(participation)) = (self.user_id(), &self.participation) else {
            debug!(kind = payload.kind(), "No participation, message not sent");
            return;
        };

        let message = Message::new(user_id, payload);
        if let Err(e) = participation.send(&message).await {
            warn!(kind = message.kind(), error = %e, "Broadcast failed, peers drift until resync");
        }
    }

    async fn release_participation(&mut self, farewell: Option<Payload>) {
        if let Some(participation) = self.participation.take() {
            let farewell = match (farewell, self.user_id()) {
                (Some(payload), Some(user_id)) => Some(Message::new(user_id, payload)),
                _ => None,
            };
            participation.release(farewell).await;
        }
    }

    /// Drop all local session state and report why
    async fn end_session(&mut self, reason: EndReason) {
        info!(reason = %reason, "Session ended");
        self.release_participation(None).await;
        self.clear_local_state().await;
        self.ended = Some(reason);
    }

    async fn clear_local_state(&mut self) {
        self.user = None;
        self.replica.clear();
        self.pending_join = None;
        self.host_check = None;
        self.loading = false;
        self.show_random_picker = false;
        self.cache_update(|store| store.clear_user()).await;
    }

    /// Best-effort write to the local cache
    async fn cache_update<F>(&self, f: F)
    where
        F: FnOnce(&LocalStateStore<'_>) -> Result<()> + Send + 'static,
    {
        if let Some(cache) = &self.cache {
            if let Err(e) = with_cache(cache.clone(), f).await {
                warn!(error = %e, "Local cache update failed");
            }
        }
    }

    async fn cache_user(&self) {
        if let Some(user) = self.user.clone() {
            self.cache_update(move |store| store.save_user(&user)).await;
        }
    }

    async fn cache_hosted_session(&self, session_id: Uuid, host_id: Uuid) {
        let marker = PendingCleanup::new(session_id, host_id);
        self.cache_update(move |store| store.record_pending_cleanup(&marker))
            .await;
    }
}

async fn next_message(
    channel: Option<&mut (dyn BroadcastChannel + 'static)>,
) -> darkpot_net::Result<Message> {
    match channel {
        Some(channel) => channel.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_presence(
    channel: Option<&mut (dyn PresenceChannel + 'static)>,
) -> darkpot_net::Result<PresenceEvent> {
    match channel {
        Some(channel) => channel.next_event().await,
        None => std::future::pending().await,
    }
}

async fn host_check_due(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
