//! Participant model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A member of a session. Exactly one participant per session is the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: Uuid,
    pub is_host: bool,
    pub joined_at: DateTime<Utc>,
}

impl Participant {
    pub fn new(id: Uuid, is_host: bool) -> Self {
        Self {
            id,
            is_host,
            joined_at: Utc::now(),
        }
    }

    pub fn host(id: Uuid) -> Self {
        Self::new(id, true)
    }

    pub fn guest(id: Uuid) -> Self {
        Self::new(id, false)
    }
}
