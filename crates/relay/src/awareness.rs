// Presence of one room as seen by the relay.
//
// Records are keyed by participant id and merged last-writer-wins by the
// publisher's clock. A participant may be connected through several sessions
// (tabs, processes); its record is removed only when the last of those
// sessions leaves.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use codesync_common::protocol::RoomFrame;
use codesync_common::types::AwarenessRecord;

#[derive(Debug, Clone)]
struct PresenceEntry {
    clock: u64,
    record: Option<AwarenessRecord>,
    /// Local sessions that published for this participant.
    sessions: HashSet<Uuid>,
}

#[derive(Debug, Default)]
pub struct RoomPresence {
    entries: HashMap<String, PresenceEntry>,
}

impl RoomPresence {
    /// Merge a record. `session` is `None` for records relayed from another
    /// relay instance. Returns `true` when the record replaced the stored one.
    pub fn update(
        &mut self,
        session: Option<Uuid>,
        participant_id: &str,
        clock: u64,
        record: Option<AwarenessRecord>,
    ) -> bool {
        let entry = self.entries.entry(participant_id.to_string()).or_insert_with(|| {
            PresenceEntry { clock: 0, record: None, sessions: HashSet::new() }
        });
        if let Some(session) = session {
            entry.sessions.insert(session);
        }
        if clock <= entry.clock {
            return false;
        }
        entry.clock = clock;
        entry.record = record;
        true
    }

    /// Forget `session`. Returns removal frames for every participant whose
    /// last session it was.
    pub fn remove_session(&mut self, session: Uuid) -> Vec<RoomFrame> {
        let mut removals = Vec::new();
        self.entries.retain(|participant_id, entry| {
            if !entry.sessions.remove(&session) || !entry.sessions.is_empty() {
                return true;
            }
            if entry.record.is_some() {
                removals.push(RoomFrame::Awareness {
                    participant_id: participant_id.clone(),
                    clock: entry.clock + 1,
                    record: None,
                });
            }
            false
        });
        removals
    }

    /// Current records as awareness frames, ordered by participant id.
    pub fn frames(&self) -> Vec<RoomFrame> {
        let mut frames: Vec<(&String, &PresenceEntry)> =
            self.entries.iter().filter(|(_, entry)| entry.record.is_some()).collect();
        frames.sort_by(|a, b| a.0.cmp(b.0));
        frames
            .into_iter()
            .map(|(participant_id, entry)| RoomFrame::Awareness {
                participant_id: participant_id.clone(),
                clock: entry.clock,
                record: entry.record.clone(),
            })
            .collect()
    }

    /// Participants with a live record.
    pub fn participant_count(&self) -> usize {
        self.entries.values().filter(|entry| entry.record.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> AwarenessRecord {
        AwarenessRecord {
            participant_id: id.to_string(),
            display_name: id.to_uppercase(),
            color: "#98C379".to_string(),
            cursor: None,
            is_agent: false,
        }
    }

    #[test]
    fn newer_clock_wins() {
        let mut presence = RoomPresence::default();
        let session = Uuid::new_v4();
        assert!(presence.update(Some(session), "alice", 2, Some(record("alice"))));
        assert!(!presence.update(Some(session), "alice", 1, None));
        assert_eq!(presence.participant_count(), 1);
    }

    #[test]
    fn participant_leaves_with_its_last_session() {
        let mut presence = RoomPresence::default();
        let tab_a = Uuid::new_v4();
        let tab_b = Uuid::new_v4();
        presence.update(Some(tab_a), "alice", 5, Some(record("alice")));
        presence.update(Some(tab_b), "alice", 6, Some(record("alice")));

        assert!(presence.remove_session(tab_a).is_empty());
        assert_eq!(presence.participant_count(), 1);

        let removals = presence.remove_session(tab_b);
        assert_eq!(
            removals,
            vec![RoomFrame::Awareness { participant_id: "alice".into(), clock: 7, record: None }]
        );
        assert_eq!(presence.participant_count(), 0);
    }

    #[test]
    fn relayed_records_are_not_owned_by_local_sessions() {
        let mut presence = RoomPresence::default();
        let local = Uuid::new_v4();
        presence.update(Some(local), "alice", 1, Some(record("alice")));
        presence.update(None, "bob", 1, Some(record("bob")));

        presence.remove_session(local);
        let frames = presence.frames();
        assert_eq!(frames.len(), 1);
        assert!(matches!(&frames[0], RoomFrame::Awareness { participant_id, .. } if participant_id == "bob"));
    }

    #[test]
    fn frames_skip_removed_participants() {
        let mut presence = RoomPresence::default();
        presence.update(None, "bob", 1, Some(record("bob")));
        presence.update(None, "bob", 2, None);
        assert!(presence.frames().is_empty());
    }
}
