//! Local user model

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The participant identity held by this process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalUser {
    pub id: Uuid,
    pub is_host: bool,
    pub session_id: Uuid,
}

impl LocalUser {
    pub fn host(id: Uuid, session_id: Uuid) -> Self {
        Self {
            id,
            is_host: true,
            session_id,
        }
    }

    pub fn guest(id: Uuid, session_id: Uuid) -> Self {
        Self {
            id,
            is_host: false,
            session_id,
        }
    }
}
