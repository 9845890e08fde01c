// Presence board: the local participant's record plus the last record heard
// from every remote participant in the room.
//
// Remote records merge last-writer-wins per participant id, ordered by the
// publisher's clock. A `None` record is a removal and is kept as a tombstone
// until the next disconnect, so a delayed older record cannot resurrect it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::watch;

use codesync_common::protocol::RoomFrame;
use codesync_common::types::AwarenessRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    clock: u64,
    record: Option<AwarenessRecord>,
}

#[derive(Debug, Default)]
struct BoardState {
    local: Option<Entry>,
    remote: HashMap<String, Entry>,
}

impl BoardState {
    fn merged(&self) -> Vec<AwarenessRecord> {
        let mut records: Vec<AwarenessRecord> = self
            .local
            .iter()
            .chain(self.remote.values())
            .filter_map(|entry| entry.record.clone())
            .collect();
        records.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));
        records
    }
}

#[derive(Clone)]
pub struct PresenceBoard {
    participant_id: Arc<str>,
    state: Arc<Mutex<BoardState>>,
    merged: watch::Sender<Vec<AwarenessRecord>>,
    /// Latest local frame, observed by the session driver.
    outgoing: watch::Sender<Option<RoomFrame>>,
}

impl PresenceBoard {
    pub fn new(participant_id: impl Into<String>) -> Self {
        let participant_id: String = participant_id.into();
        let (merged, _) = watch::channel(Vec::new());
        let (outgoing, _) = watch::channel(None);
        Self {
            participant_id: Arc::from(participant_id),
            state: Arc::new(Mutex::new(BoardState::default())),
            merged,
            outgoing,
        }
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    /// Overwrite the local record and queue it for the room.
    pub fn publish(&self, mut record: AwarenessRecord) {
        record.participant_id = self.participant_id.to_string();
        let frame = {
            let mut state = self.lock();
            let last = state.local.as_ref().map_or(0, |entry| entry.clock);
            let clock = next_clock(last);
            state.local = Some(Entry { clock, record: Some(record.clone()) });
            self.merged.send_replace(state.merged());
            RoomFrame::Awareness {
                participant_id: self.participant_id.to_string(),
                clock,
                record: Some(record),
            }
        };
        self.outgoing.send_replace(Some(frame));
    }

    /// Merge a record received from the room. Returns `true` when the merged
    /// set changed.
    pub fn apply_remote(
        &self,
        participant_id: &str,
        clock: u64,
        record: Option<AwarenessRecord>,
    ) -> bool {
        // Another session of this participant; the local record wins here.
        if participant_id == &*self.participant_id {
            return false;
        }

        let mut state = self.lock();
        if let Some(existing) = state.remote.get(participant_id) {
            if existing.clock >= clock {
                return false;
            }
        } else if record.is_none() {
            return false;
        }

        state.remote.insert(participant_id.to_string(), Entry { clock, record });
        self.merged.send_replace(state.merged());
        true
    }

    /// Forget everything heard from the room (transport lost).
    pub fn clear_remote(&self) {
        let mut state = self.lock();
        if state.remote.is_empty() {
            return;
        }
        state.remote.clear();
        self.merged.send_replace(state.merged());
    }

    /// Current merged record set, local record included.
    pub fn records(&self) -> Vec<AwarenessRecord> {
        self.merged.borrow().clone()
    }

    /// Receives the full merged set on every change, removals included.
    pub fn subscribe(&self) -> watch::Receiver<Vec<AwarenessRecord>> {
        self.merged.subscribe()
    }

    /// Frame announcing the local record, if one was published.
    pub fn local_frame(&self) -> Option<RoomFrame> {
        self.outgoing.borrow().clone()
    }

    pub(crate) fn watch_local(&self) -> watch::Receiver<Option<RoomFrame>> {
        self.outgoing.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, BoardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Monotonic per-publisher clock that also orders records across processes
/// of the same participant.
fn next_clock(last: u64) -> u64 {
    let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
    now.max(last + 1)
}
