// Frames of the codesync-room.v1 protocol. One JSON object per WebSocket
// text message; the room is addressed by the URL path, never by the frame.

use serde::{Deserialize, Serialize};

use crate::crdt::{Operation, VersionVector};
use crate::types::AwarenessRecord;

pub const CURRENT_PROTOCOL_VERSION: &str = "codesync-room.v1";
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &[CURRENT_PROTOCOL_VERSION];

pub const ROOM_KEY_PREFIX: &str = "codesync-";

#[must_use]
pub fn is_supported_protocol_version(version: &str) -> bool {
    SUPPORTED_PROTOCOL_VERSIONS.contains(&version)
}

/// Room key shared by every participant editing `document_id`.
pub fn room_key(document_id: &str) -> String {
    format!("{ROOM_KEY_PREFIX}{document_id}")
}

pub fn document_id_from_room_key(room_key: &str) -> Option<&str> {
    room_key.strip_prefix(ROOM_KEY_PREFIX).filter(|id| !id.is_empty())
}

/// URL path of a room on the relay.
pub fn room_path(room_key: &str) -> String {
    format!("/rooms/{room_key}")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomFrame {
    /// Client -> Server: first frame of every connection.
    Hello { participant_id: String, protocol_version: String },

    /// Bidirectional: "this is what I have".
    SyncStep1 { state_vector: VersionVector },

    /// Bidirectional: answer to a step 1 with every operation the asker lacks.
    /// Receiving it completes the handshake.
    SyncStep2 { ops: Vec<Operation> },

    /// Bidirectional: operations authored or relayed after the handshake.
    Update { ops: Vec<Operation> },

    /// Bidirectional: presence of one participant. `record: None` removes it.
    Awareness {
        participant_id: String,
        clock: u64,
        #[serde(default)]
        record: Option<AwarenessRecord>,
    },

    /// Client -> Server: resend every known presence record.
    AwarenessQuery,

    Ping,
    Pong,

    /// Server -> Client.
    Error { code: String, message: String, retryable: bool },
}

impl RoomFrame {
    pub fn error(code: &str, message: impl Into<String>, retryable: bool) -> Self {
        Self::Error { code: code.to_string(), message: message.into(), retryable }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::SyncStep1 { .. } => "sync_step1",
            Self::SyncStep2 { .. } => "sync_step2",
            Self::Update { .. } => "update",
            Self::Awareness { .. } => "awareness",
            Self::AwarenessQuery => "awareness_query",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Error { .. } => "error",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
