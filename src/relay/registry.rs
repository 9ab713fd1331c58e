use std::collections::HashMap;

use crate::error::{RelayError, Result};

use super::protocol::Participant;

/// The set of participants sharing one session id, keyed by user id
#[derive(Debug, Clone)]
pub struct Room {
    pub session_id: String,
    participants: HashMap<String, Participant>,
}

impl Room {
    fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            participants: HashMap::new(),
        }
    }

    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    pub fn get(&self, user_id: &str) -> Option<&Participant> {
        self.participants.get(user_id)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}

/// Admission check consulted by [`Registry::register`] before a participant
/// is inserted. `room` is `None` when the session has no room yet.
pub trait AdmissionPolicy: Send + Sync {
    fn admit(&self, room: Option<&Room>, candidate: &Participant) -> std::result::Result<(), String>;
}

/// Admits everyone; extra participants of either role coexist.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenAdmission;

impl AdmissionPolicy for OpenAdmission {
    fn admit(&self, _room: Option<&Room>, _candidate: &Participant) -> std::result::Result<(), String> {
        Ok(())
    }
}

/// At most one `user` and one `expert` per room. A user re-registering
/// keeps their own seat.
#[derive(Debug, Default, Clone, Copy)]
pub struct OneSeatPerRole;

impl AdmissionPolicy for OneSeatPerRole {
    fn admit(&self, room: Option<&Room>, candidate: &Participant) -> std::result::Result<(), String> {
        let Some(room) = room else {
            return Ok(());
        };

        let occupied = room
            .participants()
            .any(|p| p.role == candidate.role && p.user_id != candidate.user_id);

        if occupied {
            Err(format!("the {} seat is already taken", candidate.role))
        } else {
            Ok(())
        }
    }
}

/// Process-local store of session id -> room.
///
/// Not internally synchronized; the owner serializes access.
pub struct Registry {
    rooms: HashMap<String, Room>,
    policy: Box<dyn AdmissionPolicy>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::with_policy(Box::new(OpenAdmission))
    }

    pub fn with_policy(policy: Box<dyn AdmissionPolicy>) -> Self {
        Self {
            rooms: HashMap::new(),
            policy,
        }
    }

    /// Register a participant, creating the room if needed.
    /// Overwrites any existing record for the same user id.
    pub fn register(&mut self, session_id: &str, participant: Participant) -> Result<()> {
        self.policy
            .admit(self.rooms.get(session_id), &participant)
            .map_err(|reason| RelayError::AdmissionDenied {
                session_id: session_id.to_string(),
                reason,
            })?;

        let room = self
            .rooms
            .entry(session_id.to_string())
            .or_insert_with(|| Room::new(session_id));

        tracing::debug!(
            session_id = %session_id,
            user_id = %participant.user_id,
            role = %participant.role,
            replaced = room.participants.contains_key(&participant.user_id),
            "Participant registered"
        );

        room.participants.insert(participant.user_id.clone(), participant);
        Ok(())
    }

    /// Remove a participant. Deletes the room once it is empty.
    pub fn unregister(&mut self, session_id: &str, user_id: &str) -> Option<Participant> {
        let room = self.rooms.get_mut(session_id)?;
        let removed = room.participants.remove(user_id);

        if room.is_empty() {
            self.rooms.remove(session_id);
            tracing::debug!(session_id = %session_id, "Room emptied and removed");
        }

        removed
    }

    /// Drop a room regardless of who is still in it
    pub fn remove_room(&mut self, session_id: &str) -> Option<Room> {
        self.rooms.remove(session_id)
    }

    /// Participants ordered by join time. Empty for an unknown session.
    pub fn list_participants(&self, session_id: &str) -> Vec<Participant> {
        let mut participants: Vec<Participant> = self
            .rooms
            .get(session_id)
            .map(|room| room.participants().cloned().collect())
            .unwrap_or_default();

        participants.sort_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        participants
    }

    pub fn contains(&self, session_id: &str, user_id: &str) -> bool {
        self.participant(session_id, user_id).is_some()
    }

    pub fn participant(&self, session_id: &str, user_id: &str) -> Option<&Participant> {
        self.rooms.get(session_id).and_then(|room| room.get(user_id))
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::protocol::Role;
    use chrono::Utc;

    fn participant(connection_id: &str, user_id: &str, role: Role) -> Participant {
        Participant {
            connection_id: connection_id.to_string(),
            user_id: user_id.to_string(),
            role,
            joined_at: Utc::now(),
        }
    }

    #[test]
    fn test_register_creates_room() {
        let mut registry = Registry::new();
        registry.register("s1", participant("c1", "u1", Role::User)).unwrap();

        assert_eq!(registry.room_count(), 1);
        assert!(registry.contains("s1", "u1"));
        assert_eq!(registry.list_participants("s1").len(), 1);
    }

    #[test]
    fn test_register_same_user_overwrites() {
        let mut registry = Registry::new();
        registry.register("s1", participant("c1", "u1", Role::User)).unwrap();
        registry.register("s1", participant("c2", "u1", Role::Expert)).unwrap();

        let participants = registry.list_participants("s1");
        assert_eq!(participants.len(), 1);
        assert_eq!(participants[0].connection_id, "c2");
        assert_eq!(participants[0].role, Role::Expert);
    }

    #[test]
    fn test_unregister_last_participant_removes_room() {
        let mut registry = Registry::new();
        registry.register("s1", participant("c1", "u1", Role::User)).unwrap();
        registry.register("s1", participant("c2", "e1", Role::Expert)).unwrap();

        let removed = registry.unregister("s1", "u1");
        assert_eq!(removed.map(|p| p.user_id), Some("u1".to_string()));
        assert_eq!(registry.room_count(), 1);

        registry.unregister("s1", "e1");
        assert_eq!(registry.room_count(), 0);
        assert!(registry.list_participants("s1").is_empty());
        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn test_unregister_unknown_returns_none() {
        let mut registry = Registry::new();
        assert!(registry.unregister("nope", "u1").is_none());

        registry.register("s1", participant("c1", "u1", Role::User)).unwrap();
        assert!(registry.unregister("s1", "ghost").is_none());
        assert_eq!(registry.room_count(), 1);
    }

    #[test]
    fn test_list_unknown_session_is_empty() {
        let registry = Registry::new();
        assert!(registry.list_participants("missing").is_empty());
        assert!(!registry.contains("missing", "u1"));
    }

    #[test]
    fn test_remove_room_is_unconditional() {
        let mut registry = Registry::new();
        registry.register("s1", participant("c1", "u1", Role::User)).unwrap();
        registry.register("s1", participant("c2", "e1", Role::Expert)).unwrap();

        let room = registry.remove_room("s1").unwrap();
        assert_eq!(room.len(), 2);
        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn test_open_admission_allows_extra_participants() {
        let mut registry = Registry::new();
        registry.register("s1", participant("c1", "u1", Role::User)).unwrap();
        registry.register("s1", participant("c2", "u2", Role::User)).unwrap();

        let users = registry
            .list_participants("s1")
            .iter()
            .filter(|p| p.role == Role::User)
            .count();
        assert_eq!(users, 2);
    }

    #[test]
    fn test_one_seat_per_role_rejects_second_user() {
        let mut registry = Registry::with_policy(Box::new(OneSeatPerRole));
        registry.register("s1", participant("c1", "u1", Role::User)).unwrap();
        registry.register("s1", participant("c2", "e1", Role::Expert)).unwrap();

        let result = registry.register("s1", participant("c3", "u2", Role::User));
        assert!(matches!(result, Err(RelayError::AdmissionDenied { .. })));
        assert_eq!(registry.list_participants("s1").len(), 2);

        // the seat holder may rejoin
        registry.register("s1", participant("c4", "u1", Role::User)).unwrap();
        assert_eq!(
            registry.participant("s1", "u1").map(|p| p.connection_id.as_str()),
            Some("c4")
        );
    }
}
