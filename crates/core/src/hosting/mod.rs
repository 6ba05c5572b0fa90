//! Host continuity rules
//!
//! A session has exactly one host for its lifetime. There is no failover:
//! when the host goes away the session ends. The only way the host carries
//! a roster forward is a rotation into a fresh session.

use std::collections::BTreeMap;

use chrono::Utc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{Participant, Session};

/// Everything a host needs to write and announce for a rotation
#[derive(Debug, Clone)]
pub struct RotationPlan {
    pub old_session_id: Uuid,
    pub new_session: Session,
    /// Old participant id to new participant id; the host maps to itself
    pub id_map: BTreeMap<Uuid, Uuid>,
    /// Remapped participants to insert under the new session
    pub participants: Vec<Participant>,
}

impl RotationPlan {
    /// Plan a rotation of `old_session_id` into a new session named `name`.
    ///
    /// `roster` is the authoritative participant list of the old session.
    /// The host keeps its id; every other participant gets a fresh one.
    pub fn new(
        old_session_id: Uuid,
        host_id: Uuid,
        name: &str,
        roster: &[Participant],
    ) -> Result<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Validation("session name is required".into()));
        }

        let mut new_session = Session::new(name.to_string(), host_id);
        // Guard against an id collision with the session being replaced
        while new_session.id == old_session_id {
            new_session.id = Uuid::new_v4();
        }

        let joined_at = Utc::now();
        let mut id_map = BTreeMap::new();
        let mut participants = Vec::with_capacity(roster.len() + 1);

        id_map.insert(host_id, host_id);
        participants.push(Participant {
            id: host_id,
            is_host: true,
            joined_at,
        });

        for p in roster.iter().filter(|p| p.id != host_id) {
            if id_map.contains_key(&p.id) {
                continue;
            }
            let new_id = Uuid::new_v4();
            id_map.insert(p.id, new_id);
            participants.push(Participant {
                id: new_id,
                is_host: false,
                joined_at,
            });
        }

        Ok(Self {
            old_session_id,
            new_session,
            id_map,
            participants,
        })
    }

    pub fn new_session_id(&self) -> Uuid {
        self.new_session.id
    }
}

/// Whether a presence leave for `leaving_key` means the host of `session` is gone,
/// as observed by the participant `observer_id`. The host never declares itself gone.
pub fn is_host_departure(session: &Session, observer_id: Uuid, leaving_key: Uuid) -> bool {
    leaving_key == session.host_id && observer_id != session.host_id
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster(host: Uuid, guests: &[Uuid]) -> Vec<Participant> {
        let mut list = vec![Participant::host(host)];
        list.extend(guests.iter().map(|id| Participant::guest(*id)));
        list
    }

    #[test]
    fn test_rotation_keeps_host_and_remaps_guests() {
        let host = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let old = Uuid::new_v4();

        let plan = RotationPlan::new(old, host, "R2", &roster(host, &[a, b])).unwrap();

        assert_eq!(plan.id_map.len(), 3);
        assert_eq!(plan.id_map[&host], host);
        assert_ne!(plan.id_map[&a], a);
        assert_ne!(plan.id_map[&b], b);
        assert_ne!(plan.id_map[&a], plan.id_map[&b]);
        assert_ne!(plan.new_session_id(), old);
        assert_eq!(plan.new_session.name, "R2");
        assert_eq!(plan.new_session.host_id, host);

        let ids: Vec<Uuid> = plan.participants.iter().map(|p| p.id).collect();
        assert_eq!(ids.len(), 3);
        assert!(ids.contains(&host));
        assert!(ids.contains(&plan.id_map[&a]));
        assert!(ids.contains(&plan.id_map[&b]));
        assert_eq!(plan.participants.iter().filter(|p| p.is_host).count(), 1);
    }

    #[test]
    fn test_rotation_includes_host_missing_from_roster() {
        let host = Uuid::new_v4();
        let a = Uuid::new_v4();
        let plan =
            RotationPlan::new(Uuid::new_v4(), host, "R2", &[Participant::guest(a)]).unwrap();
        assert!(plan.participants.iter().any(|p| p.id == host && p.is_host));
        assert_eq!(plan.participants.len(), 2);
    }

    #[test]
    fn test_rotation_requires_name() {
        let host = Uuid::new_v4();
        assert!(matches!(
            RotationPlan::new(Uuid::new_v4(), host, "   ", &[]),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_host_departure() {
        let host = Uuid::new_v4();
        let guest = Uuid::new_v4();
        let session = Session::new("Retro".to_string(), host);

        assert!(is_host_departure(&session, guest, host));
        assert!(!is_host_departure(&session, host, host));
        assert!(!is_host_departure(&session, host, guest));
        assert!(!is_host_departure(&session, guest, Uuid::new_v4()));
    }
}
