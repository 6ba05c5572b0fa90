//! Startup cleanup of sessions abandoned by a crashed host

use chrono::{Duration, Utc};
use darkpot_core::{purge_session, Database, PurgeReport, Result, Storage};
use tracing::{info, warn};

/// Purge the session a previous run was hosting when it died.
///
/// Fresh markers trigger a purge; stale ones are discarded. Either way the
/// marker and the cached user are cleared, since that process is gone.
pub fn run_startup_cleanup(
    cache: &Database,
    storage: &dyn Storage,
    max_age: Duration,
) -> Result<Option<PurgeReport>> {
    let Some(marker) = cache.with_local_state(|store| store.pending_cleanup())? else {
        return Ok(None);
    };

    let report = if marker.is_fresh(max_age, Utc::now()) {
        info!(session_id = %marker.session_id, "Cleaning up session left by a previous run");
        let report = purge_session(storage, marker.session_id);
        if !report.is_complete() {
            warn!(session_id = %marker.session_id, ?report, "Startup cleanup was partial");
        }
        Some(report)
    } else {
        info!(
            session_id = %marker.session_id,
            recorded_at = %marker.recorded_at,
            "Discarding stale cleanup marker"
        );
        None
    };

    cache.with_local_state(|store| {
        store.clear_pending_cleanup()?;
        store.clear_user()
    })?;

    Ok(report)
}
