//! Cloneable handle for issuing intents to a running engine

use darkpot_core::{Card, Error, Result, Session};
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use super::view::ViewState;
use super::{Command, Reply};

#[derive(Clone)]
pub struct EngineHandle {
    cmd_tx: mpsc::Sender<Command>,
    view_rx: watch::Receiver<ViewState>,
}

impl EngineHandle {
    pub(super) fn new(cmd_tx: mpsc::Sender<Command>, view_rx: watch::Receiver<ViewState>) -> Self {
        Self { cmd_tx, view_rx }
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(command(reply_tx))
            .await
            .map_err(|_| Error::Transport("engine is not running".into()))?;
        reply_rx
            .await
            .map_err(|_| Error::Transport("engine stopped before replying".into()))?
    }

    /// Create a session and become its host
    pub async fn create_session(&self, name: impl Into<String>) -> Result<Session> {
        let name = name.into();
        self.request(|reply| Command::CreateSession { name, reply })
            .await
    }

    /// Join an existing session; acceptance arrives asynchronously in the view
    pub async fn join_session(&self, session_id: Uuid) -> Result<()> {
        self.request(|reply| Command::JoinSession { session_id, reply })
            .await
    }

    pub async fn submit_card(&self, content: impl Into<String>) -> Result<Card> {
        let content = content.into();
        self.request(|reply| Command::SubmitCard { content, reply })
            .await
    }

    pub async fn delete_card(&self, card_id: Uuid) -> Result<()> {
        self.request(|reply| Command::DeleteCard { card_id, reply })
            .await
    }

    /// Host only: draw one unselected card at random
    pub async fn pick_random_card(&self) -> Result<Card> {
        self.request(|reply| Command::PickRandomCard { reply }).await
    }

    /// Host only: clear every selection and return to collecting
    pub async fn reset_session(&self) -> Result<()> {
        self.request(|reply| Command::ResetSession { reply }).await
    }

    /// Host only: replace the session identity, keeping the roster
    pub async fn rotate_session(&self, name: impl Into<String>) -> Result<Session> {
        let name = name.into();
        self.request(|reply| Command::RotateSession { name, reply })
            .await
    }

    pub async fn leave_session(&self) -> Result<()> {
        self.request(|reply| Command::LeaveSession { reply }).await
    }

    pub async fn acknowledge_draw_ui_closed(&self) -> Result<()> {
        self.request(|reply| Command::AcknowledgeDrawUiClosed { reply })
            .await
    }

    /// Host only: broadcast a full snapshot to every participant
    pub async fn resync(&self) -> Result<()> {
        self.request(|reply| Command::Resync { reply }).await
    }

    /// Current view state
    pub fn view(&self) -> ViewState {
        self.view_rx.borrow().clone()
    }

    pub fn subscribe_view(&self) -> watch::Receiver<ViewState> {
        self.view_rx.clone()
    }
}
