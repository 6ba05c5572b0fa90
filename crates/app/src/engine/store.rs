//! Storage calls off the event loop
//!
//! The row store is synchronous and may wait on a busy database, so every
//! call runs on tokio's blocking pool and the engine awaits the result.

use std::sync::Arc;

use darkpot_core::{purge_session, Database, Error, LocalStateStore, PurgeReport, Result, Storage};
use tokio::task;
use tracing::warn;
use uuid::Uuid;

#[derive(Clone)]
pub(crate) struct Store {
    inner: Arc<dyn Storage>,
}

impl Store {
    pub fn new(inner: Arc<dyn Storage>) -> Self {
        Self { inner }
    }

    /// Run one storage operation on the blocking pool
    pub async fn run<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Storage) -> Result<T> + Send + 'static,
    {
        let storage = self.inner.clone();
        task::spawn_blocking(move || op(storage.as_ref()))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(format!("storage task failed: {}", e))))?
    }

    /// Delete every row of a session; failed steps are logged and reported
    pub async fn purge(&self, session_id: Uuid) -> PurgeReport {
        match self.run(move |s| Ok(purge_session(s, session_id))).await {
            Ok(report) => report,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Session purge did not run");
                PurgeReport::default()
            }
        }
    }
}

/// Run `f` against the local cache on the blocking pool
pub(crate) async fn with_cache<F>(cache: Arc<Database>, f: F) -> Result<()>
where
    F: FnOnce(&LocalStateStore<'_>) -> Result<()> + Send + 'static,
{
    task::spawn_blocking(move || cache.with_local_state(f))
        .await
        .map_err(|e| Error::Io(std::io::Error::other(format!("cache task failed: {}", e))))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use darkpot_core::{Participant, ParticipantRepository, Session, SessionRepository};

    #[tokio::test(flavor = "current_thread")]
    async fn test_run_and_purge_off_the_runtime_thread() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let store = Store::new(db.clone());
        let host = Participant::host(Uuid::new_v4());
        let session = Session::new("Retro".into(), host.id);
        let row = session.clone();

        let caller = std::thread::current().id();
        let worker = store
            .run(move |s| {
                s.insert_session(&row)?;
                s.insert_participant(row.id, &host)?;
                Ok(std::thread::current().id())
            })
            .await
            .unwrap();
        assert_ne!(worker, caller);
        assert!(db.get_session(session.id).unwrap().is_some());

        let report = store.purge(session.id).await;
        assert!(report.is_complete());
        assert!(db.get_session(session.id).unwrap().is_none());

        let missing = store.run(move |s| s.delete_session(session.id)).await;
        assert!(matches!(missing, Err(Error::NotFound(_))));
    }
}
