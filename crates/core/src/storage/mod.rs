//! SQLite storage layer for Dark Pot

mod cards;
mod local_state;
mod migrations;
mod parse;
mod participants;
mod sessions;
mod traits;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::Connection;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Card, Participant, Session, SessionUpdate};

pub use cards::CardStore;
pub use local_state::{LocalStateStore, PendingCleanup};
pub use participants::ParticipantStore;
pub use sessions::SessionStore;
pub use traits::{CardRepository, ParticipantRepository, SessionRepository, Storage};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Main database handle
///
/// Several processes may open the same file; every engine in one process
/// may share one handle.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create database at the given path
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init()?;
        Ok(db)
    }

    /// Open in-memory database (for testing)
    #[instrument]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init()?;
        Ok(db)
    }

    /// Initialize database schema via migrations
    fn init(&self) -> Result<()> {
        migrations::run_migrations(&self.lock())?;
        Ok(())
    }

    // A panicked writer leaves the connection usable; SQLite rolls back on its own
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Get current schema version
    pub fn schema_version(&self) -> u32 {
        migrations::applied_version(&self.lock()).unwrap_or(0)
    }

    /// Run `f` against the local state cache
    pub fn with_local_state<T>(
        &self,
        f: impl FnOnce(&LocalStateStore<'_>) -> Result<T>,
    ) -> Result<T> {
        let conn = self.lock();
        let store = LocalStateStore::new(&conn);
        f(&store)
    }
}

// Implement repository traits for Database
// This enables using Database through the trait interface

impl SessionRepository for Database {
    fn insert_session(&self, session: &Session) -> Result<()> {
        SessionStore::new(&self.lock()).insert(session)
    }

    fn get_session(&self, id: Uuid) -> Result<Option<Session>> {
        SessionStore::new(&self.lock()).find_by_id(id)
    }

    fn update_session(&self, id: Uuid, update: &SessionUpdate) -> Result<()> {
        SessionStore::new(&self.lock()).update(id, update)
    }

    fn delete_session(&self, id: Uuid) -> Result<()> {
        SessionStore::new(&self.lock()).delete(id)
    }

    fn clear_selected_card(&self, id: Uuid, card_id: Uuid) -> Result<bool> {
        SessionStore::new(&self.lock()).clear_selected_card(id, card_id)
    }
}

impl ParticipantRepository for Database {
    fn insert_participant(&self, session_id: Uuid, participant: &Participant) -> Result<()> {
        ParticipantStore::new(&self.lock()).insert(session_id, participant)
    }

    fn list_participants(&self, session_id: Uuid) -> Result<Vec<Participant>> {
        ParticipantStore::new(&self.lock()).list_for_session(session_id)
    }

    fn delete_participant(&self, session_id: Uuid, participant_id: Uuid) -> Result<()> {
        ParticipantStore::new(&self.lock()).delete(session_id, participant_id)
    }

    fn delete_participants_by_session(&self, session_id: Uuid) -> Result<u64> {
        ParticipantStore::new(&self.lock()).delete_for_session(session_id)
    }
}

impl CardRepository for Database {
    fn insert_card(&self, session_id: Uuid, card: &Card) -> Result<()> {
        CardStore::new(&self.lock()).insert(session_id, card)
    }

    fn get_card(&self, id: Uuid) -> Result<Option<Card>> {
        CardStore::new(&self.lock()).find_by_id(id)
    }

    fn list_cards(&self, session_id: Uuid) -> Result<Vec<Card>> {
        CardStore::new(&self.lock()).list_for_session(session_id)
    }

    fn update_card(&self, id: Uuid, selected: bool) -> Result<()> {
        CardStore::new(&self.lock()).set_selected(id, selected)
    }

    fn select_card_if_unselected(&self, id: Uuid) -> Result<bool> {
        CardStore::new(&self.lock()).select_if_unselected(id)
    }

    fn clear_selection(&self, session_id: Uuid) -> Result<u64> {
        CardStore::new(&self.lock()).clear_selection(session_id)
    }

    fn delete_card(&self, id: Uuid) -> Result<()> {
        CardStore::new(&self.lock()).delete(id)
    }

    fn delete_card_in_session(&self, session_id: Uuid, id: Uuid) -> Result<bool> {
        let conn = self.lock();
        let tx = conn.unchecked_transaction()?;
        CardStore::new(&tx).delete(id)?;
        let reverted = SessionStore::new(&tx).clear_selected_card(session_id, id)?;
        tx.commit()?;
        Ok(reverted)
    }

    fn delete_cards_by_session(&self, session_id: Uuid) -> Result<u64> {
        CardStore::new(&self.lock()).delete_for_session(session_id)
    }
}

/// What a session purge managed to delete
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PurgeReport {
    pub cards: Option<u64>,
    pub participants: Option<u64>,
    pub session: bool,
}

impl PurgeReport {
    pub fn is_complete(&self) -> bool {
        self.cards.is_some() && self.participants.is_some() && self.session
    }
}

/// Delete cards, then participants, then the session row.
///
/// Each step runs even if an earlier one failed; failures are logged only.
#[instrument(skip(storage))]
pub fn purge_session<S: Storage + ?Sized>(storage: &S, session_id: Uuid) -> PurgeReport {
    let mut report = PurgeReport::default();

    match storage.delete_cards_by_session(session_id) {
        Ok(n) => report.cards = Some(n),
        Err(e) => warn!(error = %e, "Failed to delete session cards"),
    }

    match storage.delete_participants_by_session(session_id) {
        Ok(n) => report.participants = Some(n),
        Err(e) => warn!(error = %e, "Failed to delete session participants"),
    }

    match storage.delete_session(session_id) {
        Ok(()) => report.session = true,
        Err(e) => warn!(error = %e, "Failed to delete session row"),
    }

    debug!(?report, "Session purge finished");
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::hosting::RotationPlan;
    use crate::models::{LocalUser, SessionStatus};

    fn seeded() -> (Database, Session, Uuid) {
        let db = Database::open_in_memory().unwrap();
        let host = Uuid::new_v4();
        let session = Session::new("Retro".to_string(), host);
        db.insert_session(&session).unwrap();
        db.insert_participant(session.id, &Participant::host(host))
            .unwrap();
        (db, session, host)
    }

    #[test]
    fn test_schema_version() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.schema_version(), 3);
    }

    #[test]
    fn test_open_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("darkpot.db");

        let host = Uuid::new_v4();
        let session = Session::new("Retro".to_string(), host);
        {
            let db = Database::open(&path).unwrap();
            db.insert_session(&session).unwrap();
        }

        let db = Database::open(&path).unwrap();
        assert_eq!(db.get_session(session.id).unwrap(), Some(session));
    }

    #[test]
    fn test_session_roundtrip_and_update() {
        let (db, session, _) = seeded();
        assert_eq!(db.get_session(session.id).unwrap().as_ref(), Some(&session));

        let card = Card::new(session.host_id, "Onboarding".to_string());
        db.insert_card(session.id, &card).unwrap();
        db.update_session(
            session.id,
            &SessionUpdate::selection(card.id, SessionStatus::Finished),
        )
        .unwrap();

        let stored = db.get_session(session.id).unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Finished);
        assert_eq!(stored.selected_card_id, Some(card.id));
        assert_eq!(stored.name, "Retro");

        db.update_session(session.id, &SessionUpdate::collecting())
            .unwrap();
        let stored = db.get_session(session.id).unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Collecting);
        assert_eq!(stored.selected_card_id, None);
    }

    #[test]
    fn test_update_missing_session() {
        let db = Database::open_in_memory().unwrap();
        let result = db.update_session(Uuid::new_v4(), &SessionUpdate::collecting());
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_participant_ids_scoped_by_session() {
        let (db, session, host) = seeded();
        let other = Session::new("Other".to_string(), host);
        db.insert_session(&other).unwrap();
        db.insert_participant(other.id, &Participant::host(host))
            .unwrap();

        // Same id in the same session is rejected
        assert!(db
            .insert_participant(session.id, &Participant::host(host))
            .is_err());

        let guest = Uuid::new_v4();
        db.insert_participant(session.id, &Participant::guest(guest))
            .unwrap();
        assert_eq!(db.list_participants(session.id).unwrap().len(), 2);
        assert_eq!(db.list_participants(other.id).unwrap().len(), 1);

        db.delete_participant(session.id, guest).unwrap();
        assert!(matches!(
            db.delete_participant(session.id, guest),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_select_card_compare_and_swap() {
        let (db, session, host) = seeded();
        let card = Card::new(host, "Budget".to_string());
        db.insert_card(session.id, &card).unwrap();

        assert!(db.select_card_if_unselected(card.id).unwrap());
        assert!(!db.select_card_if_unselected(card.id).unwrap());
        assert!(db.get_card(card.id).unwrap().unwrap().selected);

        db.delete_card(card.id).unwrap();
        assert!(!db.select_card_if_unselected(card.id).unwrap());
        assert!(matches!(db.delete_card(card.id), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_clear_selection() {
        let (db, session, host) = seeded();
        let a = Card::new(host, "A".to_string());
        let b = Card::new(host, "B".to_string());
        db.insert_card(session.id, &a).unwrap();
        db.insert_card(session.id, &b).unwrap();
        db.update_card(a.id, true).unwrap();
        db.update_card(b.id, true).unwrap();

        assert_eq!(db.clear_selection(session.id).unwrap(), 2);
        assert!(db
            .list_cards(session.id)
            .unwrap()
            .iter()
            .all(|c| !c.selected));
    }

    #[test]
    fn test_purge_session() {
        let (db, session, host) = seeded();
        db.insert_card(session.id, &Card::new(host, "A".to_string()))
            .unwrap();
        db.insert_participant(session.id, &Participant::guest(Uuid::new_v4()))
            .unwrap();

        let report = purge_session(&db, session.id);
        assert!(report.is_complete());
        assert_eq!(report.cards, Some(1));
        assert_eq!(report.participants, Some(2));
        assert_eq!(db.get_session(session.id).unwrap(), None);
    }

    #[test]
    fn test_purge_of_missing_session() {
        let db = Database::open_in_memory().unwrap();
        let report = purge_session(&db, Uuid::new_v4());
        assert_eq!(report.cards, Some(0));
        assert_eq!(report.participants, Some(0));
        assert!(!report.session);
        assert!(matches!(
            db.delete_session(Uuid::new_v4()),
            Err(Error::NotFound(_))
        ));
    }

    /// Database wrapper whose named operations fail
    struct FaultyStorage {
        db: Database,
        failing: &'static [&'static str],
    }

    impl FaultyStorage {
        fn check(&self, op: &str) -> Result<()> {
            if self.failing.contains(&op) {
                return Err(Error::Transport(format!("{} unavailable", op)));
            }
            Ok(())
        }
    }

    impl SessionRepository for FaultyStorage {
        fn insert_session(&self, session: &Session) -> Result<()> {
            self.check("insert_session")?;
            self.db.insert_session(session)
        }
        fn get_session(&self, id: Uuid) -> Result<Option<Session>> {
            self.db.get_session(id)
        }
        fn update_session(&self, id: Uuid, update: &SessionUpdate) -> Result<()> {
            self.check("update_session")?;
            self.db.update_session(id, update)
        }
        fn delete_session(&self, id: Uuid) -> Result<()> {
            self.check("delete_session")?;
            self.db.delete_session(id)
        }
        fn clear_selected_card(&self, id: Uuid, card_id: Uuid) -> Result<bool> {
            self.db.clear_selected_card(id, card_id)
        }
    }

    impl ParticipantRepository for FaultyStorage {
        fn insert_participant(&self, session_id: Uuid, participant: &Participant) -> Result<()> {
            self.db.insert_participant(session_id, participant)
        }
        fn list_participants(&self, session_id: Uuid) -> Result<Vec<Participant>> {
            self.db.list_participants(session_id)
        }
        fn delete_participant(&self, session_id: Uuid, participant_id: Uuid) -> Result<()> {
            self.db.delete_participant(session_id, participant_id)
        }
        fn delete_participants_by_session(&self, session_id: Uuid) -> Result<u64> {
            self.check("delete_participants_by_session")?;
            self.db.delete_participants_by_session(session_id)
        }
    }

    impl CardRepository for FaultyStorage {
        fn insert_card(&self, session_id: Uuid, card: &Card) -> Result<()> {
            self.db.insert_card(session_id, card)
        }
        fn get_card(&self, id: Uuid) -> Result<Option<Card>> {
            self.db.get_card(id)
        }
        fn list_cards(&self, session_id: Uuid) -> Result<Vec<Card>> {
            self.db.list_cards(session_id)
        }
        fn update_card(&self, id: Uuid, selected: bool) -> Result<()> {
            self.db.update_card(id, selected)
        }
        fn select_card_if_unselected(&self, id: Uuid) -> Result<bool> {
            self.db.select_card_if_unselected(id)
        }
        fn clear_selection(&self, session_id: Uuid) -> Result<u64> {
            self.db.clear_selection(session_id)
        }
        fn delete_card(&self, id: Uuid) -> Result<()> {
            self.db.delete_card(id)
        }
        fn delete_card_in_session(&self, session_id: Uuid, id: Uuid) -> Result<bool> {
            self.db.delete_card_in_session(session_id, id)
        }
        fn delete_cards_by_session(&self, session_id: Uuid) -> Result<u64> {
            self.check("delete_cards_by_session")?;
            self.db.delete_cards_by_session(session_id)
        }
    }

    #[test]
    fn test_purge_runs_every_step_after_a_failure() {
        let (db, session, host) = seeded();
        let card = Card::new(host, "A".to_string());
        db.insert_card(session.id, &card).unwrap();

        let storage = FaultyStorage {
            db,
            failing: &["delete_cards_by_session"],
        };
        let report = purge_session(&storage, session.id);

        assert_eq!(report.cards, None);
        assert_eq!(report.participants, Some(1));
        assert!(report.session);
        assert!(!report.is_complete());
        assert!(storage.db.get_session(session.id).unwrap().is_none());
        assert!(storage.db.list_participants(session.id).unwrap().is_empty());
        assert!(storage.db.get_card(card.id).unwrap().is_some());

        let storage = FaultyStorage {
            db: storage.db,
            failing: &["delete_participants_by_session", "delete_session"],
        };
        let report = purge_session(&storage, session.id);
        assert_eq!(report.cards, Some(1));
        assert_eq!(report.participants, None);
        assert!(!report.session);
    }

    #[test]
    fn test_delete_card_in_session_reverts_selection() {
        let (db, session, host) = seeded();
        let drawn = Card::new(host, "A".to_string());
        let other = Card::new(host, "B".to_string());
        db.insert_card(session.id, &drawn).unwrap();
        db.insert_card(session.id, &other).unwrap();
        db.update_card(drawn.id, true).unwrap();
        db.update_session(
            session.id,
            &SessionUpdate::selection(drawn.id, SessionStatus::Finished),
        )
        .unwrap();

        assert!(!db.delete_card_in_session(session.id, other.id).unwrap());
        let stored = db.get_session(session.id).unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Finished);
        assert_eq!(stored.selected_card_id, Some(drawn.id));

        assert!(db.delete_card_in_session(session.id, drawn.id).unwrap());
        let stored = db.get_session(session.id).unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Collecting);
        assert_eq!(stored.selected_card_id, None);
        assert!(db.get_card(drawn.id).unwrap().is_none());

        // A missing card rolls back and leaves the session alone
        assert!(matches!(
            db.delete_card_in_session(session.id, drawn.id),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_clear_selected_card_is_fenced() {
        let (db, session, host) = seeded();
        let a = Card::new(host, "A".to_string());
        let b = Card::new(host, "B".to_string());
        db.insert_card(session.id, &a).unwrap();
        db.insert_card(session.id, &b).unwrap();
        db.update_session(
            session.id,
            &SessionUpdate::selection(b.id, SessionStatus::Picking),
        )
        .unwrap();

        assert!(!db.clear_selected_card(session.id, a.id).unwrap());
        assert_eq!(
            db.get_session(session.id).unwrap().unwrap().selected_card_id,
            Some(b.id)
        );
        assert!(db.clear_selected_card(session.id, b.id).unwrap());
        assert_eq!(
            db.get_session(session.id).unwrap().unwrap().status,
            SessionStatus::Collecting
        );
    }

    #[test]
    fn test_rotation_rewrites_rows() {
        let (db, session, host) = seeded();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        db.insert_participant(session.id, &Participant::guest(a))
            .unwrap();
        db.insert_participant(session.id, &Participant::guest(b))
            .unwrap();
        db.insert_card(session.id, &Card::new(a, "Old topic".to_string()))
            .unwrap();

        let roster = db.list_participants(session.id).unwrap();
        let plan = RotationPlan::new(session.id, host, "R2", &roster).unwrap();
        db.insert_session(&plan.new_session).unwrap();
        for p in &plan.participants {
            db.insert_participant(plan.new_session_id(), p).unwrap();
        }
        purge_session(&db, session.id);

        assert_eq!(db.get_session(session.id).unwrap(), None);
        assert!(db.list_participants(session.id).unwrap().is_empty());
        assert!(db.list_cards(session.id).unwrap().is_empty());

        let new_id = plan.new_session_id();
        let stored = db.get_session(new_id).unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Collecting);
        assert_eq!(stored.host_id, host);
        assert!(db.list_cards(new_id).unwrap().is_empty());

        let ids: Vec<Uuid> = db
            .list_participants(new_id)
            .unwrap()
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids.len(), 3);
        assert!(ids.contains(&host));
        assert!(ids.contains(&plan.id_map[&a]));
        assert!(ids.contains(&plan.id_map[&b]));
    }

    #[test]
    fn test_local_state_cache() {
        let db = Database::open_in_memory().unwrap();
        let user = LocalUser::host(Uuid::new_v4(), Uuid::new_v4());
        let marker = PendingCleanup::new(user.session_id, user.id);

        db.with_local_state(|store| {
            assert_eq!(store.load_user()?, None);
            store.save_user(&user)?;
            store.record_pending_cleanup(&marker)?;
            Ok(())
        })
        .unwrap();

        let (loaded, pending) = db
            .with_local_state(|store| Ok((store.load_user()?, store.pending_cleanup()?)))
            .unwrap();
        assert_eq!(loaded, Some(user));
        assert_eq!(pending, Some(marker));

        db.with_local_state(|store| {
            store.clear_user()?;
            store.clear_pending_cleanup()
        })
        .unwrap();
        assert_eq!(db.with_local_state(|s| s.load_user()).unwrap(), None);
    }
}
