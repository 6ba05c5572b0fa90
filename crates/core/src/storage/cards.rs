//! Card storage operations

use rusqlite::{params, Connection, Row};
use tracing::instrument;
use uuid::Uuid;

use super::parse::{parse_datetime, parse_uuid, OptionalExt};
use crate::error::{Error, Result};
use crate::models::Card;

pub struct CardStore<'a> {
    conn: &'a Connection,
}

fn card_from_row(row: &Row<'_>) -> rusqlite::Result<Card> {
    Ok(Card {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        author_id: parse_uuid(&row.get::<_, String>(1)?)?,
        content: row.get(2)?,
        selected: row.get::<_, i32>(3)? != 0,
        created_at: parse_datetime(&row.get::<_, String>(4)?)?,
    })
}

impl<'a> CardStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert a card under a session
    #[instrument(skip(self, card), fields(card_id = %card.id, author_id = %card.author_id))]
    pub fn insert(&self, session_id: Uuid, card: &Card) -> Result<()> {
        self.conn.execute(
            "INSERT INTO cards (id, session_id, author_id, content, selected, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                card.id.to_string(),
                session_id.to_string(),
                card.author_id.to_string(),
                card.content,
                card.selected as i32,
                card.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Find a card by ID
    #[instrument(skip(self))]
    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Card>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, author_id, content, selected, created_at FROM cards WHERE id = ?1",
        )?;
        let card = stmt
            .query_row(params![id.to_string()], card_from_row)
            .optional()?;
        Ok(card)
    }

    /// List cards of a session in submission order
    #[instrument(skip(self))]
    pub fn list_for_session(&self, session_id: Uuid) -> Result<Vec<Card>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, author_id, content, selected, created_at FROM cards
             WHERE session_id = ?1
             ORDER BY created_at, id",
        )?;
        let cards = stmt
            .query_map(params![session_id.to_string()], card_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(cards)
    }

    /// Set the selected flag of one card
    #[instrument(skip(self))]
    pub fn set_selected(&self, id: Uuid, selected: bool) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE cards SET selected = ?1 WHERE id = ?2",
            params![selected as i32, id.to_string()],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("card {}", id)));
        }
        Ok(())
    }

    /// Mark a card selected only if it still exists and is unselected.
    /// Returns false when a concurrent delete or draw got there first.
    #[instrument(skip(self))]
    pub fn select_if_unselected(&self, id: Uuid) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE cards SET selected = 1 WHERE id = ?1 AND selected = 0",
            params![id.to_string()],
        )?;
        Ok(changed == 1)
    }

    /// Clear the selected flag on every card of a session
    #[instrument(skip(self))]
    pub fn clear_selection(&self, session_id: Uuid) -> Result<u64> {
        let changed = self.conn.execute(
            "UPDATE cards SET selected = 0 WHERE session_id = ?1 AND selected = 1",
            params![session_id.to_string()],
        )?;
        Ok(changed as u64)
    }

    /// Delete one card
    #[instrument(skip(self))]
    pub fn delete(&self, id: Uuid) -> Result<()> {
        let changed = self
            .conn
            .execute("DELETE FROM cards WHERE id = ?1", params![id.to_string()])?;
        if changed == 0 {
            return Err(Error::NotFound(format!("card {}", id)));
        }
        Ok(())
    }

    /// Delete every card of a session
    #[instrument(skip(self))]
    pub fn delete_for_session(&self, session_id: Uuid) -> Result<u64> {
        let changed = self.conn.execute(
            "DELETE FROM cards WHERE session_id = ?1",
            params![session_id.to_string()],
        )?;
        Ok(changed as u64)
    }
}
