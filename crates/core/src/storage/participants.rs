//! Participant storage operations

use rusqlite::{params, Connection};
use tracing::instrument;
use uuid::Uuid;

use super::parse::{parse_datetime, parse_uuid};
use crate::error::{Error, Result};
use crate::models::Participant;

pub struct ParticipantStore<'a> {
    conn: &'a Connection,
}

impl<'a> ParticipantStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Add a participant to a session
    #[instrument(skip(self, participant), fields(participant_id = %participant.id, is_host = participant.is_host))]
    pub fn insert(&self, session_id: Uuid, participant: &Participant) -> Result<()> {
        self.conn.execute(
            "INSERT INTO participants (id, session_id, is_host, joined_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                participant.id.to_string(),
                session_id.to_string(),
                participant.is_host as i32,
                participant.joined_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// List participants of a session in join order
    #[instrument(skip(self))]
    pub fn list_for_session(&self, session_id: Uuid) -> Result<Vec<Participant>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, is_host, joined_at FROM participants
             WHERE session_id = ?1
             ORDER BY joined_at, id",
        )?;

        let participants = stmt
            .query_map(params![session_id.to_string()], |row| {
                Ok(Participant {
                    id: parse_uuid(&row.get::<_, String>(0)?)?,
                    is_host: row.get::<_, i32>(1)? != 0,
                    joined_at: parse_datetime(&row.get::<_, String>(2)?)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(participants)
    }

    /// Remove one participant from a session
    #[instrument(skip(self))]
    pub fn delete(&self, session_id: Uuid, id: Uuid) -> Result<()> {
        let changed = self.conn.execute(
            "DELETE FROM participants WHERE session_id = ?1 AND id = ?2",
            params![session_id.to_string(), id.to_string()],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("participant {}", id)));
        }
        Ok(())
    }

    /// Remove every participant of a session
    #[instrument(skip(self))]
    pub fn delete_for_session(&self, session_id: Uuid) -> Result<u64> {
        let changed = self.conn.execute(
            "DELETE FROM participants WHERE session_id = ?1",
            params![session_id.to_string()],
        )?;
        Ok(changed as u64)
    }
}
