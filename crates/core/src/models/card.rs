//! Card model - a submitted topic proposal

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A topic proposal eligible for selection until drawn or deleted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: Uuid,
    /// May reference a participant id that was rotated away
    pub author_id: Uuid,
    pub content: String,
    pub selected: bool,
    pub created_at: DateTime<Utc>,
}

impl Card {
    pub fn new(author_id: Uuid, content: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            author_id,
            content,
            selected: false,
            created_at: Utc::now(),
        }
    }
}
