//! View state published to the View Layer

use darkpot_core::{Card, LocalUser, Participant, Session};

/// Why the local participant is no longer in a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    HostLeft,
    JoinRejected(String),
    ConnectionLost,
    /// A rotation announcement did not carry a new id for this participant
    NotInRotation,
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndReason::HostLeft => f.write_str("the host left, session ended"),
            EndReason::JoinRejected(reason) => write!(f, "join rejected: {}", reason),
            EndReason::ConnectionLost => f.write_str("connection to the session was lost"),
            EndReason::NotInRotation => f.write_str("not included in the new session"),
        }
    }
}

/// Everything the View Layer renders
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewState {
    pub user: Option<LocalUser>,
    pub session: Option<Session>,
    pub participants: Vec<Participant>,
    pub cards: Vec<Card>,
    pub selected_card: Option<Card>,
    pub loading: bool,
    pub error: Option<String>,
    pub show_random_picker: bool,
    pub ended: Option<EndReason>,
}

impl ViewState {
    pub fn is_host(&self) -> bool {
        self.user.as_ref().is_some_and(|u| u.is_host)
    }

    pub fn in_session(&self) -> bool {
        self.session.is_some()
    }
}
