// Rooms served by one relay instance.
//
// Each room keeps an authoritative replica of the document (actor 0, never
// edits), the presence records of its participants, and the outbound channel
// of every connected session. Frames from one session are applied to the
// room and relayed to the others; the backbone carries the same frames to
// the other relay instances.
//
// With a backbone, a room opened on this instance first asks the other
// instances for its history. Handshakes arriving meanwhile are answered once
// a reply comes in or `CATCH_UP_WINDOW` passes, so a session never sees an
// empty room that already has content elsewhere.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use codesync_common::crdt::{ActorId, ReplicatedText, VersionVector};
use codesync_common::protocol::{is_supported_protocol_version, RoomFrame};

use crate::awareness::RoomPresence;
use crate::backbone::{Backbone, BackboneEnvelope};

/// Actor id of the relay's own replica. Client actors are never zero.
const RELAY_ACTOR: ActorId = 0;

/// How long a new room waits for history from other instances.
pub const CATCH_UP_WINDOW: Duration = Duration::from_millis(250);

/// Minimum spacing of history requests for operations stuck waiting on parents.
const REPAIR_INTERVAL: Duration = Duration::from_secs(1);

/// What the connection should do after a frame was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Continue,
    Close,
}

#[derive(Debug)]
struct SessionHandle {
    participant_id: Option<String>,
    outbound: mpsc::UnboundedSender<RoomFrame>,
}

#[derive(Debug)]
struct Room {
    replica: ReplicatedText,
    presence: RoomPresence,
    sessions: HashMap<Uuid, SessionHandle>,
    /// Set while the room has no sessions.
    empty_since: Option<Instant>,
    /// Handshakes held back while the room fetches history from other instances.
    catch_up: Option<Vec<(Uuid, VersionVector)>>,
    last_repair: Option<Instant>,
}

impl Room {
    fn new() -> Self {
        Self {
            replica: ReplicatedText::new(RELAY_ACTOR),
            presence: RoomPresence::default(),
            sessions: HashMap::new(),
            empty_since: Some(Instant::now()),
            catch_up: None,
            last_repair: None,
        }
    }

    /// Server side of the handshake: our vector, the ops the session lacks,
    /// then current presence.
    fn answer_sync(&self, session_id: Uuid, state_vector: &VersionVector) {
        let ops = self.replica.ops_since(state_vector);
        self.send_to(session_id, RoomFrame::SyncStep1 { state_vector: self.replica.version_vector().clone() });
        self.send_to(session_id, RoomFrame::SyncStep2 { ops });
        for frame in self.presence.frames() {
            self.send_to(session_id, frame);
        }
    }

    fn send_to(&self, session_id: Uuid, frame: RoomFrame) {
        if let Some(session) = self.sessions.get(&session_id) {
            // A closed receiver means the connection is going away; leave() cleans up.
            let _ = session.outbound.send(frame);
        }
    }

    fn broadcast(&self, frame: &RoomFrame, except: Option<Uuid>) {
        for (session_id, session) in &self.sessions {
            if Some(*session_id) == except {
                continue;
            }
            let _ = session.outbound.send(frame.clone());
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomStats {
    pub room_key: String,
    pub sessions: usize,
    pub participants: usize,
    pub operations: usize,
    pub pending_operations: usize,
    pub chars: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HubStats {
    pub instance_id: Uuid,
    pub rooms: usize,
    pub sessions: usize,
    pub participants: usize,
    pub room_details: Vec<RoomStats>,
}

struct HubInner {
    instance_id: Uuid,
    rooms: Mutex<HashMap<String, Room>>,
    backbone: Option<Arc<dyn Backbone>>,
}

#[derive(Clone)]
pub struct RoomHub {
    inner: Arc<HubInner>,
}

impl Default for RoomHub {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomHub {
    /// Hub serving rooms on this instance only.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Hub sharing its rooms with other instances attached to `backbone`.
    /// Call [`RoomHub::spawn_backbone_listener`] to receive their frames.
    pub fn with_backbone(backbone: Arc<dyn Backbone>) -> Self {
        Self::build(Some(backbone))
    }

    fn build(backbone: Option<Arc<dyn Backbone>>) -> Self {
        Self {
            inner: Arc::new(HubInner {
                instance_id: Uuid::new_v4(),
                rooms: Mutex::new(HashMap::new()),
                backbone,
            }),
        }
    }

    pub fn instance_id(&self) -> Uuid {
        self.inner.instance_id
    }

    /// Register a new session in `room_key`, creating the room on first use.
    pub async fn join(&self, room_key: &str) -> (Uuid, mpsc::UnboundedReceiver<RoomFrame>) {
        let session_id = Uuid::new_v4();
        let (outbound, receiver) = mpsc::unbounded_channel();
        let mut rooms = self.inner.rooms.lock().await;
        let created = !rooms.contains_key(room_key);
        let room = rooms.entry(room_key.to_string()).or_insert_with(Room::new);
        room.sessions.insert(session_id, SessionHandle { participant_id: None, outbound });
        room.empty_since = None;
        if created && self.inner.backbone.is_some() {
            self.start_catch_up(room_key, room);
        }
        info!(room = room_key, session = %session_id, sessions = room.sessions.len(), "session joined");
        (session_id, receiver)
    }

    fn start_catch_up(&self, room_key: &str, room: &mut Room) {
        room.catch_up = Some(Vec::new());
        self.send_envelope(
            room_key,
            RoomFrame::SyncStep1 { state_vector: room.replica.version_vector().clone() },
            None,
        );

        let hub = self.clone();
        let room_key = room_key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(CATCH_UP_WINDOW).await;
            let mut rooms = hub.inner.rooms.lock().await;
            if let Some(room) = rooms.get_mut(&room_key) {
                hub.finish_catch_up(&room_key, room);
            }
        });
    }

    fn finish_catch_up(&self, room_key: &str, room: &mut Room) {
        let Some(deferred) = room.catch_up.take() else {
            return;
        };
        debug!(room = room_key, ops = room.replica.op_count(), waiting = deferred.len(), "room caught up");
        for (session_id, state_vector) in deferred {
            if room.sessions.contains_key(&session_id) {
                room.answer_sync(session_id, &state_vector);
            }
        }
    }

    /// Apply one frame received from `session_id`.
    pub async fn handle(&self, room_key: &str, session_id: Uuid, frame: RoomFrame) -> FrameOutcome {
        let mut rooms = self.inner.rooms.lock().await;
        let Some(room) = rooms.get_mut(room_key) else {
            return FrameOutcome::Close;
        };
        if !room.sessions.contains_key(&session_id) {
            return FrameOutcome::Close;
        }

        match frame {
            RoomFrame::Hello { participant_id, protocol_version } => {
                if !is_supported_protocol_version(&protocol_version) {
                    warn!(room = room_key, session = %session_id, %protocol_version, "unsupported protocol version");
                    room.send_to(
                        session_id,
                        RoomFrame::error(
                            "unsupported_protocol",
                            format!("protocol version '{protocol_version}' is not supported"),
                            false,
                        ),
                    );
                    return FrameOutcome::Close;
                }
                debug!(room = room_key, session = %session_id, participant = %participant_id, "hello");
                if let Some(session) = room.sessions.get_mut(&session_id) {
                    session.participant_id = Some(participant_id);
                }
            }
            RoomFrame::SyncStep1 { state_vector } => {
                if let Some(deferred) = room.catch_up.as_mut() {
                    debug!(room = room_key, session = %session_id, "sync step 1 held until caught up");
                    deferred.push((session_id, state_vector));
                } else {
                    debug!(room = room_key, session = %session_id, "sync step 1");
                    room.answer_sync(session_id, &state_vector);
                }
            }
            RoomFrame::SyncStep2 { ops } | RoomFrame::Update { ops } => {
                match room.replica.apply_remote(ops) {
                    Ok(Some(change)) => {
                        let frame = RoomFrame::Update { ops: change.ops };
                        room.broadcast(&frame, Some(session_id));
                        self.publish(room_key, frame);
                    }
                    Ok(None) => {}
                    Err(error) => {
                        warn!(room = room_key, session = %session_id, error = %error, "rejected operations");
                        room.send_to(
                            session_id,
                            RoomFrame::error("malformed_operation", error.to_string(), false),
                        );
                        return FrameOutcome::Close;
                    }
                }
            }
            RoomFrame::Awareness { participant_id, clock, record } => {
                if room.presence.update(Some(session_id), &participant_id, clock, record.clone()) {
                    let frame = RoomFrame::Awareness { participant_id, clock, record };
                    room.broadcast(&frame, Some(session_id));
                    self.publish(room_key, frame);
                }
            }
            RoomFrame::AwarenessQuery => {
                for frame in room.presence.frames() {
                    room.send_to(session_id, frame);
                }
            }
            RoomFrame::Ping => room.send_to(session_id, RoomFrame::Pong),
            RoomFrame::Pong => {}
            RoomFrame::Error { code, message, .. } => {
                debug!(room = room_key, session = %session_id, %code, %message, "client reported error");
            }
        }
        FrameOutcome::Continue
    }

    /// Remove a session, announcing the departure of participants that have
    /// no session left.
    pub async fn leave(&self, room_key: &str, session_id: Uuid) {
        let mut rooms = self.inner.rooms.lock().await;
        let Some(room) = rooms.get_mut(room_key) else {
            return;
        };
        self.remove_session(room_key, room, session_id);
    }

    /// Disconnect every session of `room_key`. The room state is kept.
    pub async fn drop_sessions(&self, room_key: &str) -> usize {
        let mut rooms = self.inner.rooms.lock().await;
        let Some(room) = rooms.get_mut(room_key) else {
            return 0;
        };
        let session_ids: Vec<Uuid> = room.sessions.keys().copied().collect();
        for session_id in &session_ids {
            self.remove_session(room_key, room, *session_id);
        }
        session_ids.len()
    }

    fn remove_session(&self, room_key: &str, room: &mut Room, session_id: Uuid) {
        let Some(session) = room.sessions.remove(&session_id) else {
            return;
        };
        for frame in room.presence.remove_session(session_id) {
            room.broadcast(&frame, None);
            self.publish(room_key, frame);
        }
        if room.sessions.is_empty() {
            room.empty_since = Some(Instant::now());
        }
        info!(
            room = room_key,
            session = %session_id,
            participant = session.participant_id.as_deref().unwrap_or("-"),
            sessions = room.sessions.len(),
            "session left"
        );
    }

    /// Drop rooms that have had no sessions for at least `idle`.
    pub async fn sweep_idle(&self, idle: Duration) -> usize {
        let mut rooms = self.inner.rooms.lock().await;
        let before = rooms.len();
        rooms.retain(|room_key, room| match room.empty_since {
            Some(since) if since.elapsed() >= idle => {
                info!(room = %room_key, "dropping idle room");
                false
            }
            _ => true,
        });
        before - rooms.len()
    }

    pub async fn stats(&self) -> HubStats {
        let rooms = self.inner.rooms.lock().await;
        let mut room_details: Vec<RoomStats> = rooms
            .iter()
            .map(|(room_key, room)| RoomStats {
                room_key: room_key.clone(),
                sessions: room.sessions.len(),
                participants: room.presence.participant_count(),
                operations: room.replica.op_count(),
                pending_operations: room.replica.pending_len(),
                chars: room.replica.len(),
            })
            .collect();
        room_details.sort_by(|a, b| a.room_key.cmp(&b.room_key));
        HubStats {
            instance_id: self.inner.instance_id,
            rooms: room_details.len(),
            sessions: room_details.iter().map(|r| r.sessions).sum(),
            participants: room_details.iter().map(|r| r.participants).sum(),
            room_details,
        }
    }

    /// Text of the room's replica, if the room exists.
    pub async fn snapshot(&self, room_key: &str) -> Option<String> {
        self.inner.rooms.lock().await.get(room_key).map(|room| room.replica.snapshot())
    }

    /// In-process connection to a room: frames sent on the returned sender
    /// are handled as if they came over a socket, and the receiver yields the
    /// frames the room sends back. The session leaves when the sender is
    /// dropped.
    pub async fn connect_local(
        &self,
        room_key: &str,
    ) -> (mpsc::UnboundedSender<RoomFrame>, mpsc::UnboundedReceiver<RoomFrame>) {
        let (session_id, outbound) = self.join(room_key).await;
        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();
        let hub = self.clone();
        let room_key = room_key.to_string();
        tokio::spawn(async move {
            while let Some(frame) = inbound_rx.recv().await {
                if hub.handle(&room_key, session_id, frame).await == FrameOutcome::Close {
                    break;
                }
            }
            hub.leave(&room_key, session_id).await;
        });
        (inbound_tx, outbound)
    }

    /// Start applying frames published by other instances. Returns `None`
    /// when the hub has no backbone.
    pub fn spawn_backbone_listener(&self) -> Option<JoinHandle<()>> {
        let backbone = self.inner.backbone.as_ref()?;
        let mut receiver = backbone.subscribe();
        let hub = self.clone();
        Some(tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(envelope) => hub.apply_envelope(envelope).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "backbone listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }))
    }

    async fn apply_envelope(&self, envelope: BackboneEnvelope) {
        let instance_id = self.inner.instance_id;
        if envelope.origin_instance == instance_id
            || envelope.target_instance.is_some_and(|target| target != instance_id)
        {
            return;
        }
        let BackboneEnvelope { origin_instance, room_key, frame, target_instance } = envelope;
        let mut rooms = self.inner.rooms.lock().await;
        // Rooms without local sessions are not mirrored; joining one catches up.
        let Some(room) = rooms.get_mut(&room_key) else {
            return;
        };
        match frame {
            RoomFrame::SyncStep1 { state_vector } => {
                if room.catch_up.is_some() {
                    return;
                }
                let ops = room.replica.ops_since(&state_vector);
                debug!(room = %room_key, peer = %origin_instance, ops = ops.len(), "answering history request");
                self.send_envelope(&room_key, RoomFrame::SyncStep2 { ops }, Some(origin_instance));
                for frame in room.presence.frames() {
                    self.send_envelope(&room_key, frame, Some(origin_instance));
                }
            }
            RoomFrame::SyncStep2 { ops } | RoomFrame::Update { ops } => {
                match room.replica.apply_remote(ops) {
                    Ok(Some(change)) => {
                        room.broadcast(&RoomFrame::Update { ops: change.ops }, None);
                    }
                    Ok(None) => {}
                    Err(error) => {
                        warn!(room = %room_key, error = %error, "rejected backbone operations");
                    }
                }
                if target_instance.is_some() {
                    self.finish_catch_up(&room_key, room);
                } else if room.replica.pending_len() > 0 && room.catch_up.is_none() {
                    self.request_missing_history(&room_key, room);
                }
            }
            RoomFrame::Awareness { participant_id, clock, record } => {
                if room.presence.update(None, &participant_id, clock, record.clone()) {
                    room.broadcast(&RoomFrame::Awareness { participant_id, clock, record }, None);
                }
            }
            other => debug!(room = %room_key, kind = other.kind(), "ignoring backbone frame"),
        }
    }

    fn request_missing_history(&self, room_key: &str, room: &mut Room) {
        if room.last_repair.is_some_and(|at| at.elapsed() < REPAIR_INTERVAL) {
            return;
        }
        room.last_repair = Some(Instant::now());
        debug!(room = room_key, pending = room.replica.pending_len(), "asking other instances for missing operations");
        self.send_envelope(
            room_key,
            RoomFrame::SyncStep1 { state_vector: room.replica.version_vector().clone() },
            None,
        );
    }

    fn publish(&self, room_key: &str, frame: RoomFrame) {
        self.send_envelope(room_key, frame, None);
    }

    fn send_envelope(&self, room_key: &str, frame: RoomFrame, target_instance: Option<Uuid>) {
        if let Some(backbone) = &self.inner.backbone {
            backbone.publish(BackboneEnvelope {
                origin_instance: self.inner.instance_id,
                room_key: room_key.to_string(),
                frame,
                target_instance,
            });
        }
    }
}
