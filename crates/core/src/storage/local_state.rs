//! Best-effort local cache
//!
//! Keeps the current user and, while hosting, a marker naming the session
//! that must be cleaned up if this process dies without leaving.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use super::parse::OptionalExt;
use crate::error::Result;
use crate::models::LocalUser;

const CACHED_USER_KEY: &str = "cached_user";
const PENDING_CLEANUP_KEY: &str = "pending_cleanup";

/// A hosted session whose rows must be purged if the host never left cleanly
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCleanup {
    pub session_id: Uuid,
    pub host_id: Uuid,
    pub recorded_at: DateTime<Utc>,
}

impl PendingCleanup {
    pub fn new(session_id: Uuid, host_id: Uuid) -> Self {
        Self {
            session_id,
            host_id,
            recorded_at: Utc::now(),
        }
    }

    /// Markers older than `max_age` are abandoned rather than acted on
    pub fn is_fresh(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        now - self.recorded_at <= max_age
    }
}

/// Local key/value state store
pub struct LocalStateStore<'a> {
    conn: &'a Connection,
}

impl<'a> LocalStateStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.conn.execute(
            "INSERT INTO local_state (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at",
            params![key, json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM local_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM local_state WHERE key = ?1", params![key])?;
        Ok(())
    }

    #[instrument(skip(self, user), fields(user_id = %user.id, session_id = %user.session_id))]
    pub fn save_user(&self, user: &LocalUser) -> Result<()> {
        self.put(CACHED_USER_KEY, user)
    }

    pub fn load_user(&self) -> Result<Option<LocalUser>> {
        self.get(CACHED_USER_KEY)
    }

    pub fn clear_user(&self) -> Result<()> {
        self.remove(CACHED_USER_KEY)
    }

    #[instrument(skip(self, marker), fields(session_id = %marker.session_id))]
    pub fn record_pending_cleanup(&self, marker: &PendingCleanup) -> Result<()> {
        self.put(PENDING_CLEANUP_KEY, marker)
    }

    pub fn pending_cleanup(&self) -> Result<Option<PendingCleanup>> {
        self.get(PENDING_CLEANUP_KEY)
    }

    pub fn clear_pending_cleanup(&self) -> Result<()> {
        self.remove(PENDING_CLEANUP_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_freshness() {
        let now = Utc::now();
        let mut marker = PendingCleanup::new(Uuid::new_v4(), Uuid::new_v4());
        marker.recorded_at = now - Duration::seconds(60);
        assert!(marker.is_fresh(Duration::minutes(5), now));

        marker.recorded_at = now - Duration::minutes(6);
        assert!(!marker.is_fresh(Duration::minutes(5), now));
    }
}
