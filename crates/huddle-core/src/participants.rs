use crate::events::ParticipantInfo;
use crate::privileges::Role;
use huddle_media::UserId;

/// Participants of the current session.
///
/// Written only by the session event loop. Read by the façade, which hands
/// out clones.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    participants: Vec<ParticipantInfo>,
    active_speakers: Vec<UserId>,
    local_id: Option<UserId>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_local_id(&mut self, id: UserId) {
        self.local_id = Some(id);
        for p in &mut self.participants {
            p.is_myself = p.user_id == id;
        }
    }

    pub fn local_id(&self) -> Option<UserId> {
        self.local_id
    }

    pub fn myself(&self) -> Option<&ParticipantInfo> {
        self.local_id.and_then(|id| self.participant(id))
    }

    /// Role of the local user; attendee until the join is confirmed.
    pub fn local_role(&self) -> Role {
        self.myself().map(|p| p.role).unwrap_or_default()
    }

    /// Insert or replace. Returns `true` when the participant is new.
    pub fn upsert(&mut self, mut info: ParticipantInfo) -> bool {
        info.is_myself = self.local_id == Some(info.user_id);
        match self.participant_mut(info.user_id) {
            Some(existing) => {
                *existing = info;
                false
            }
            None => {
                self.participants.push(info);
                true
            }
        }
    }

    pub fn remove(&mut self, id: UserId) -> Option<ParticipantInfo> {
        self.active_speakers.retain(|s| *s != id);
        let index = self.participants.iter().position(|p| p.user_id == id)?;
        Some(self.participants.remove(index))
    }

    pub fn participants(&self) -> &[ParticipantInfo] {
        &self.participants
    }

    pub fn participant(&self, id: UserId) -> Option<&ParticipantInfo> {
        self.participants.iter().find(|p| p.user_id == id)
    }

    pub fn participant_mut(&mut self, id: UserId) -> Option<&mut ParticipantInfo> {
        self.participants.iter_mut().find(|p| p.user_id == id)
    }

    pub fn contains(&self, id: UserId) -> bool {
        self.participant(id).is_some()
    }

    /// Participants admitted to the meeting, excluding the waiting room.
    pub fn in_meeting(&self) -> impl Iterator<Item = &ParticipantInfo> {
        self.participants.iter().filter(|p| !p.in_waiting_room)
    }

    pub fn waiting(&self) -> impl Iterator<Item = &ParticipantInfo> {
        self.participants.iter().filter(|p| p.in_waiting_room)
    }

    pub fn is_host_or_cohost(&self, id: UserId) -> bool {
        self.participant(id).is_some_and(|p| p.role.is_privileged())
    }

    pub fn set_active_speakers(&mut self, ids: Vec<UserId>) {
        self.active_speakers = ids;
    }

    pub fn active_speakers(&self) -> &[UserId] {
        &self.active_speakers
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn clear(&mut self) {
        self.participants.clear();
        self.active_speakers.clear();
        self.local_id = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_participant(id: u64, name: &str) -> ParticipantInfo {
        ParticipantInfo::new(UserId(id), name, Role::Attendee)
    }

    #[test]
    fn add_and_retrieve_participant() {
        let mut roster = Roster::new();
        assert!(roster.upsert(make_participant(1, "Alice")));
        assert_eq!(roster.participant_count(), 1);
        assert_eq!(roster.participant(UserId(1)).unwrap().name, "Alice");
    }

    #[test]
    fn upsert_replaces_existing_entry() {
        let mut roster = Roster::new();
        roster.upsert(make_participant(1, "Alice"));
        assert!(!roster.upsert(make_participant(1, "Alice B.")));
        assert_eq!(roster.participant_count(), 1);
        assert_eq!(roster.participant(UserId(1)).unwrap().name, "Alice B.");
    }

    #[test]
    fn remove_participant_drops_speaker_entry() {
        let mut roster = Roster::new();
        roster.upsert(make_participant(1, "Alice"));
        roster.upsert(make_participant(2, "Bob"));
        roster.set_active_speakers(vec![UserId(1), UserId(2)]);
        assert!(roster.remove(UserId(1)).is_some());
        assert!(roster.remove(UserId(1)).is_none());
        assert_eq!(roster.active_speakers(), &[UserId(2)]);
        assert!(roster.participant(UserId(2)).is_some());
    }

    #[test]
    fn local_user_is_flagged() {
        let mut roster = Roster::new();
        roster.upsert(make_participant(1, "Alice"));
        roster.set_local_id(UserId(1));
        roster.upsert(make_participant(2, "Bob"));
        assert!(roster.myself().unwrap().is_myself);
        assert!(!roster.participant(UserId(2)).unwrap().is_myself);
        assert_eq!(roster.local_role(), Role::Attendee);
    }

    #[test]
    fn waiting_room_members_are_split_out() {
        let mut roster = Roster::new();
        roster.upsert(make_participant(1, "Alice"));
        let mut waiting = make_participant(2, "Bob");
        waiting.in_waiting_room = true;
        roster.upsert(waiting);
        assert_eq!(roster.in_meeting().count(), 1);
        assert_eq!(roster.waiting().map(|p| p.user_id).collect::<Vec<_>>(), vec![UserId(2)]);
    }

    #[test]
    fn clear_resets_everything() {
        let mut roster = Roster::new();
        roster.set_local_id(UserId(9));
        roster.upsert(make_participant(1, "Alice"));
        roster.set_active_speakers(vec![UserId(1)]);
        roster.clear();
        assert_eq!(roster.participant_count(), 0);
        assert!(roster.active_speakers().is_empty());
        assert!(roster.local_id().is_none());
    }
}
