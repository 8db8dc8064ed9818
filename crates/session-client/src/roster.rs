//! Roster and host synchronizer.
//!
//! The relay is the single writer of membership and host role; this view
//! only applies its broadcasts in receipt order. At most one entry carries
//! the host flag: every host change clears the old flag before setting the
//! new one.

use common::protocol::{ParticipantInfo, RoomMetadata};
use common::types::{now_millis, SocketId};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct Roster {
    local_id: SocketId,
    /// Entries in the order they became known.
    participants: Vec<ParticipantInfo>,
    is_local_host: bool,
}

impl Roster {
    /// Seed from a join ack. Returns the peers to offer to: every other
    /// member already in the room.
    pub fn seed(
        local_id: SocketId,
        local_nickname: &str,
        room: &RoomMetadata,
        others: Vec<ParticipantInfo>,
    ) -> (Self, Vec<ParticipantInfo>) {
        let mut roster = Self {
            local_id: local_id.clone(),
            participants: Vec::with_capacity(others.len() + 1),
            is_local_host: false,
        };

        for participant in &others {
            if participant.socket_id != local_id {
                roster.upsert(participant.clone());
            }
        }
        roster.upsert(ParticipantInfo {
            socket_id: local_id,
            nickname: local_nickname.to_string(),
            is_host: false,
            join_time: now_millis(),
        });
        roster.set_host(&room.host.socket_id, &room.host.nickname);

        let peers = roster
            .participants
            .iter()
            .filter(|p| p.socket_id != roster.local_id)
            .cloned()
            .collect();

        info!(
            target: "client.roster",
            participants = roster.participants.len(),
            is_host = roster.is_local_host,
            "Roster seeded"
        );

        (roster, peers)
    }

    /// Apply a host change. Returns true if the local participant became host.
    pub fn apply_change_host(&mut self, socket_id: &SocketId, nickname: &str) -> bool {
        let was_host = self.is_local_host;
        self.set_host(socket_id, nickname);

        info!(
            target: "client.roster",
            new_host = %socket_id,
            is_local = self.is_local_host,
            "Host changed"
        );
        self.is_local_host && !was_host
    }

    /// Insert a newly joined participant. Links are not created here; the
    /// newcomer offers.
    pub fn apply_joined(&mut self, participant: ParticipantInfo) {
        if participant.socket_id == self.local_id {
            return;
        }
        let claims_host = participant.is_host && self.host().is_none();
        let socket_id = participant.socket_id.clone();
        let nickname = participant.nickname.clone();

        self.upsert(ParticipantInfo {
            is_host: false,
            ..participant
        });
        if claims_host {
            self.set_host(&socket_id, &nickname);
        }

        debug!(
            target: "client.roster",
            socket_id = %socket_id,
            participants = self.participants.len(),
            "Participant joined"
        );
    }

    /// Remove a departed participant.
    pub fn apply_quit(&mut self, socket_id: &SocketId) -> Option<ParticipantInfo> {
        let position = self
            .participants
            .iter()
            .position(|p| &p.socket_id == socket_id)?;
        let removed = self.participants.remove(position);

        debug!(
            target: "client.roster",
            socket_id = %socket_id,
            was_host = removed.is_host,
            participants = self.participants.len(),
            "Participant left"
        );
        Some(removed)
    }

    #[must_use]
    pub fn local_id(&self) -> &SocketId {
        &self.local_id
    }

    #[must_use]
    pub fn is_local_host(&self) -> bool {
        self.is_local_host
    }

    #[must_use]
    pub fn host(&self) -> Option<&ParticipantInfo> {
        self.participants.iter().find(|p| p.is_host)
    }

    #[must_use]
    pub fn get(&self, socket_id: &SocketId) -> Option<&ParticipantInfo> {
        self.participants.iter().find(|p| &p.socket_id == socket_id)
    }

    #[must_use]
    pub fn nickname(&self, socket_id: &SocketId) -> Option<&str> {
        self.get(socket_id).map(|p| p.nickname.as_str())
    }

    #[must_use]
    pub fn participants(&self) -> &[ParticipantInfo] {
        &self.participants
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    fn upsert(&mut self, participant: ParticipantInfo) {
        match self
            .participants
            .iter_mut()
            .find(|p| p.socket_id == participant.socket_id)
        {
            Some(existing) => {
                existing.nickname = participant.nickname;
            }
            None => self.participants.push(participant),
        }
    }

    /// Clear every host flag, then mark `socket_id` (inserting it if the
    /// announcement arrived before its join).
    fn set_host(&mut self, socket_id: &SocketId, nickname: &str) {
        for participant in &mut self.participants {
            participant.is_host = false;
        }

        match self
            .participants
            .iter_mut()
            .find(|p| &p.socket_id == socket_id)
        {
            Some(participant) => participant.is_host = true,
            None => self.participants.push(ParticipantInfo {
                socket_id: socket_id.clone(),
                nickname: nickname.to_string(),
                is_host: true,
                join_time: now_millis(),
            }),
        }

        self.is_local_host = socket_id == &self.local_id;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::types::{RoomId, Visibility};

    fn participant(id: &str, is_host: bool, join_time: i64) -> ParticipantInfo {
        ParticipantInfo {
            socket_id: SocketId::from(id),
            nickname: format!("nick-{id}"),
            is_host,
            join_time,
        }
    }

    fn room(host: ParticipantInfo) -> RoomMetadata {
        RoomMetadata {
            id: RoomId::from("room-1"),
            title: "Study".to_string(),
            category: "cs".to_string(),
            host,
            max_participants: 4,
            visibility: Visibility::Public,
            created_at: 0,
            in_progress: false,
            question_list_id: "q".to_string(),
            question_list_contents: vec!["one".to_string()],
            current_index: 0,
        }
    }

    fn host_count(roster: &Roster) -> usize {
        roster.participants().iter().filter(|p| p.is_host).count()
    }

    #[test]
    fn test_seed_as_guest_offers_to_everyone_else() {
        let a = participant("a", true, 1);
        let b = participant("b", false, 2);
        let (roster, peers) = Roster::seed(
            SocketId::from("me"),
            "me",
            &room(a.clone()),
            vec![a, b],
        );

        assert_eq!(roster.len(), 3);
        assert!(!roster.is_local_host());
        assert_eq!(roster.host().map(|p| p.socket_id.as_str()), Some("a"));
        assert_eq!(peers.len(), 2);
        assert!(peers.iter().all(|p| p.socket_id.as_str() != "me"));
        assert_eq!(host_count(&roster), 1);
    }

    #[test]
    fn test_seed_as_host_of_empty_room() {
        let me = participant("me", true, 1);
        let (roster, peers) = Roster::seed(SocketId::from("me"), "me", &room(me), Vec::new());

        assert!(roster.is_local_host());
        assert!(peers.is_empty());
        assert_eq!(host_count(&roster), 1);
    }

    #[test]
    fn test_change_host_to_local() {
        let a = participant("a", true, 1);
        let (mut roster, _) = Roster::seed(SocketId::from("me"), "me", &room(a.clone()), vec![a]);

        assert!(roster.apply_change_host(&SocketId::from("me"), "me"));
        assert!(roster.is_local_host());
        assert!(!roster.get(&SocketId::from("a")).unwrap().is_host);
        assert_eq!(host_count(&roster), 1);
    }

    #[test]
    fn test_change_host_to_other_clears_previous_flag() {
        let a = participant("a", true, 1);
        let b = participant("b", false, 2);
        let (mut roster, _) = Roster::seed(SocketId::from("me"), "me", &room(a.clone()), vec![a, b]);

        assert!(!roster.apply_change_host(&SocketId::from("b"), "nick-b"));
        roster.apply_quit(&SocketId::from("a"));

        assert!(roster.get(&SocketId::from("b")).unwrap().is_host);
        assert!(!roster.is_local_host());
        assert_eq!(host_count(&roster), 1);
    }

    #[test]
    fn test_change_host_before_join_inserts_entry() {
        let a = participant("a", true, 1);
        let (mut roster, _) = Roster::seed(SocketId::from("me"), "me", &room(a.clone()), vec![a]);

        roster.apply_change_host(&SocketId::from("late"), "latecomer");

        let late = roster.get(&SocketId::from("late")).unwrap();
        assert!(late.is_host);
        assert_eq!(late.nickname, "latecomer");
        assert_eq!(host_count(&roster), 1);

        // The join that follows does not duplicate or demote the entry
        roster.apply_joined(participant("late", false, 3));
        assert_eq!(roster.len(), 3);
        assert!(roster.get(&SocketId::from("late")).unwrap().is_host);
    }

    #[test]
    fn test_joined_participant_is_never_a_second_host() {
        let a = participant("a", true, 1);
        let (mut roster, _) = Roster::seed(SocketId::from("me"), "me", &room(a.clone()), vec![a]);

        roster.apply_joined(participant("c", true, 5));

        assert_eq!(host_count(&roster), 1);
        assert_eq!(roster.host().map(|p| p.socket_id.as_str()), Some("a"));
    }

    #[test]
    fn test_quit_unknown_is_none() {
        let a = participant("a", true, 1);
        let (mut roster, _) = Roster::seed(SocketId::from("me"), "me", &room(a.clone()), vec![a]);
        assert!(roster.apply_quit(&SocketId::from("ghost")).is_none());
        assert_eq!(roster.len(), 2);
    }
}
