//! Session storage operations

use chrono::Utc;
use rusqlite::{params, Connection, Row};
use tracing::instrument;
use uuid::Uuid;

use super::parse::{parse_datetime, parse_status, parse_uuid, parse_uuid_opt, OptionalExt};
use crate::error::{Error, Result};
use crate::models::{Session, SessionStatus, SessionUpdate};

pub struct SessionStore<'a> {
    conn: &'a Connection,
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        name: row.get(1)?,
        host_id: parse_uuid(&row.get::<_, String>(2)?)?,
        status: parse_status(&row.get::<_, String>(3)?)?,
        selected_card_id: parse_uuid_opt(row.get::<_, Option<String>>(4)?)?,
        created_at: parse_datetime(&row.get::<_, String>(5)?)?,
        last_activity: parse_datetime(&row.get::<_, String>(6)?)?,
    })
}

impl<'a> SessionStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert a new session row
    #[instrument(skip(self, session), fields(session_id = %session.id, name = %session.name))]
    pub fn insert(&self, session: &Session) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sessions (id, name, host_id, status, selected_card_id, created_at, last_activity)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                session.id.to_string(),
                session.name,
                session.host_id.to_string(),
                session.status.as_str(),
                session.selected_card_id.map(|id| id.to_string()),
                session.created_at.to_rfc3339(),
                session.last_activity.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Find a session by ID
    #[instrument(skip(self))]
    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Session>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, host_id, status, selected_card_id, created_at, last_activity
             FROM sessions WHERE id = ?1",
        )?;

        let session = stmt
            .query_row(params![id.to_string()], session_from_row)
            .optional()?;

        Ok(session)
    }

    /// Apply a partial update; fields left as `None` keep their stored value
    #[instrument(skip(self, update))]
    pub fn update(&self, id: Uuid, update: &SessionUpdate) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE sessions SET
                status = COALESCE(?1, status),
                selected_card_id = CASE WHEN ?2 THEN ?3 ELSE selected_card_id END,
                last_activity = COALESCE(?4, last_activity)
             WHERE id = ?5",
            params![
                update.status.map(|s| s.as_str()),
                update.selected_card_id.is_some(),
                update.selected_card_id.flatten().map(|c| c.to_string()),
                update.last_activity.map(|t| t.to_rfc3339()),
                id.to_string(),
            ],
        )?;

        if changed == 0 {
            return Err(Error::NotFound(format!("session {}", id)));
        }
        Ok(())
    }

    /// Delete a session row; fails with NotFound if absent
    #[instrument(skip(self))]
    pub fn delete(&self, id: Uuid) -> Result<()> {
        let changed = self
            .conn
            .execute("DELETE FROM sessions WHERE id = ?1", params![id.to_string()])?;
        if changed == 0 {
            return Err(Error::NotFound(format!("session {}", id)));
        }
        Ok(())
    }

    /// Revert to collecting if `card_id` is still the selection.
    /// Returns whether the row changed.
    #[instrument(skip(self))]
    pub fn clear_selected_card(&self, id: Uuid, card_id: Uuid) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE sessions SET status = ?1, selected_card_id = NULL, last_activity = ?2
             WHERE id = ?3 AND selected_card_id = ?4",
            params![
                SessionStatus::Collecting.as_str(),
                Utc::now().to_rfc3339(),
                id.to_string(),
                card_id.to_string()
            ],
        )?;
        Ok(changed > 0)
    }
}
