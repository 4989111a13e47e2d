use crate::error::{ContestError, ContestResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A user's membership in one trip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripMember {
    pub user_id: String,
    pub trip_id: String,
    pub display_name: String,
    pub is_organizer: bool,
    pub joined_at: DateTime<Utc>,
}

impl TripMember {
    pub fn new(trip_id: &str, user_id: &str, display_name: &str, is_organizer: bool) -> Self {
        Self {
            user_id: user_id.to_string(),
            trip_id: trip_id.to_string(),
            display_name: display_name.to_string(),
            is_organizer,
            joined_at: Utc::now(),
        }
    }
}

/// Resolves users to trip members. The engine asks this before every
/// participant-scoped operation.
pub trait MembershipService: Send + Sync {
    fn member(&self, trip_id: &str, user_id: &str) -> Option<TripMember>;

    fn members(&self, trip_id: &str) -> Vec<TripMember>;

    fn is_organizer(&self, trip_id: &str, user_id: &str) -> bool {
        self.member(trip_id, user_id).map_or(false, |m| m.is_organizer)
    }
}

/// In-memory trip roster keyed by (trip, user)
#[derive(Debug, Default)]
pub struct TripRoster {
    members: RwLock<BTreeMap<(String, String), TripMember>>,
}

impl TripRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_members(members: impl IntoIterator<Item = TripMember>) -> Self {
        let roster = Self::new();
        {
            let mut map = roster.write();
            for m in members {
                map.insert((m.trip_id.clone(), m.user_id.clone()), m);
            }
        }
        roster
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<(String, String), TripMember>> {
        self.members.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<(String, String), TripMember>> {
        self.members.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a member. Returns false (and changes nothing) if already present,
    /// except that an organizer flag is never downgraded by a re-join.
    pub fn join(&self, member: TripMember) -> bool {
        insert_or_promote(&mut self.write(), member)
    }

    /// `actor` adds `user_id` to a trip. The first member of a trip becomes its
    /// organizer; adding someone else or granting organizer rights needs an
    /// existing organizer. Decided and applied under one write lock.
    /// Returns the stored member and whether it is new.
    pub fn enroll(
        &self,
        trip_id: &str,
        actor: &str,
        user_id: &str,
        display_name: &str,
        wants_organizer: bool,
    ) -> ContestResult<(TripMember, bool)> {
        let mut map = self.write();
        let founding = !map.keys().any(|(trip, _)| trip == trip_id);

        if !founding && (user_id != actor || wants_organizer) {
            let actor_organizes = map
                .get(&(trip_id.to_string(), actor.to_string()))
                .map_or(false, |m| m.is_organizer);
            if !actor_organizes {
                return Err(ContestError::NotOrganizer {
                    user: actor.to_string(),
                    trip: trip_id.to_string(),
                });
            }
        }

        let member = TripMember::new(trip_id, user_id, display_name, founding || wants_organizer);
        let is_new = insert_or_promote(&mut map, member.clone());
        let stored = map
            .get(&(trip_id.to_string(), user_id.to_string()))
            .cloned()
            .unwrap_or(member);
        Ok((stored, is_new))
    }

    pub fn all_members(&self) -> Vec<TripMember> {
        self.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

fn insert_or_promote(map: &mut BTreeMap<(String, String), TripMember>, member: TripMember) -> bool {
    let key = (member.trip_id.clone(), member.user_id.clone());
    match map.get_mut(&key) {
        Some(existing) => {
            if member.is_organizer && !existing.is_organizer {
                existing.is_organizer = true;
            }
            false
        }
        None => {
            map.insert(key, member);
            true
        }
    }
}

impl MembershipService for TripRoster {
    fn member(&self, trip_id: &str, user_id: &str) -> Option<TripMember> {
        self.read()
            .get(&(trip_id.to_string(), user_id.to_string()))
            .cloned()
    }

    fn members(&self, trip_id: &str) -> Vec<TripMember> {
        self.read()
            .values()
            .filter(|m| m.trip_id == trip_id)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_and_lookup() {
        let roster = TripRoster::new();
        assert!(roster.join(TripMember::new("napa", "olivia", "Olivia", true)));
        assert!(roster.join(TripMember::new("napa", "sam", "Sam", false)));
        assert!(roster.join(TripMember::new("sonoma", "sam", "Sam", false)));

        assert!(roster.is_organizer("napa", "olivia"));
        assert!(!roster.is_organizer("napa", "sam"));
        assert!(roster.member("napa", "nobody").is_none());
        assert_eq!(roster.members("napa").len(), 2);
        assert_eq!(roster.len(), 3);
    }

    #[test]
    fn test_rejoin_is_a_noop_but_can_promote() {
        let roster = TripRoster::new();
        assert!(roster.join(TripMember::new("napa", "sam", "Sam", false)));
        assert!(!roster.join(TripMember::new("napa", "sam", "Sammy", false)));
        assert_eq!(roster.member("napa", "sam").unwrap().display_name, "Sam");

        assert!(!roster.join(TripMember::new("napa", "sam", "Sam", true)));
        assert!(roster.is_organizer("napa", "sam"));

        assert!(!roster.join(TripMember::new("napa", "sam", "Sam", false)));
        assert!(roster.is_organizer("napa", "sam"));
    }

    #[test]
    fn test_enroll_founder_and_permissions() {
        let roster = TripRoster::new();
        let (founder, is_new) = roster.enroll("napa", "olivia", "olivia", "Olivia", false).unwrap();
        assert!(is_new);
        assert!(founder.is_organizer);

        // Second self-join is a plain member
        let (sam, _) = roster.enroll("napa", "sam", "sam", "Sam", false).unwrap();
        assert!(!sam.is_organizer);

        let err = roster.enroll("napa", "sam", "rae", "Rae", false).unwrap_err();
        assert_eq!(err.kind(), "NotOrganizer");
        let err = roster.enroll("napa", "sam", "sam", "Sam", true).unwrap_err();
        assert_eq!(err.kind(), "NotOrganizer");
        assert!(!roster.is_organizer("napa", "sam"));

        let (rae, is_new) = roster.enroll("napa", "olivia", "rae", "Rae", true).unwrap();
        assert!(is_new);
        assert!(rae.is_organizer);
    }

    #[test]
    fn test_concurrent_founders_elect_one_organizer() {
        let roster = std::sync::Arc::new(TripRoster::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let roster = roster.clone();
                std::thread::spawn(move || {
                    let user = format!("user{}", i);
                    roster.enroll("napa", &user, &user, &user, false).unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let organizers = roster.members("napa").iter().filter(|m| m.is_organizer).count();
        assert_eq!(organizers, 1);
        assert_eq!(roster.members("napa").len(), 8);
    }

    #[test]
    fn test_from_members() {
        let roster = TripRoster::from_members(vec![
            TripMember::new("napa", "olivia", "Olivia", true),
            TripMember::new("napa", "sam", "Sam", false),
        ]);
        assert_eq!(roster.all_members().len(), 2);
    }
}
