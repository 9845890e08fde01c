// Fan-out between relay instances serving the same rooms.
//
// Every frame a hub relays to its own sessions is also published on the
// backbone, tagged with the publishing instance. Hubs apply envelopes from
// other instances and never republish them. A hub that opens a room publishes
// a `sync_step1` for it; hubs already holding the room answer with a
// `sync_step2` addressed to that hub alone.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use codesync_common::protocol::RoomFrame;

const BACKBONE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackboneEnvelope {
    pub origin_instance: Uuid,
    pub room_key: String,
    pub frame: RoomFrame,
    /// Instance the envelope is meant for; `None` addresses every instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_instance: Option<Uuid>,
}

pub trait Backbone: Send + Sync {
    fn publish(&self, envelope: BackboneEnvelope);

    fn subscribe(&self) -> broadcast::Receiver<BackboneEnvelope>;
}

/// Backbone for hubs living in one process.
#[derive(Debug, Clone)]
pub struct BroadcastBackbone {
    sender: broadcast::Sender<BackboneEnvelope>,
}

impl Default for BroadcastBackbone {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastBackbone {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BACKBONE_CAPACITY);
        Self { sender }
    }
}

impl Backbone for BroadcastBackbone {
    fn publish(&self, envelope: BackboneEnvelope) {
        if self.sender.send(envelope).is_err() {
            debug!("backbone has no subscribers");
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<BackboneEnvelope> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribers_receive_published_envelopes() {
        let backbone = BroadcastBackbone::new();
        let mut rx = backbone.subscribe();
        let envelope = BackboneEnvelope {
            origin_instance: Uuid::new_v4(),
            room_key: "codesync-1".into(),
            frame: RoomFrame::Ping,
            target_instance: None,
        };
        backbone.publish(envelope.clone());
        assert_eq!(rx.try_recv().expect("envelope"), envelope);
    }

    #[test]
    fn envelopes_serialize_with_the_frame_inline() {
        let envelope = BackboneEnvelope {
            origin_instance: Uuid::nil(),
            room_key: "codesync-1".into(),
            frame: RoomFrame::AwarenessQuery,
            target_instance: None,
        };
        let json = serde_json::to_value(&envelope).expect("serialize");
        assert_eq!(json["frame"]["type"], "awareness_query");
        assert_eq!(json["room_key"], "codesync-1");
        assert!(json.get("target_instance").is_none());

        let decoded: BackboneEnvelope = serde_json::from_value(json).expect("deserialize");
        assert_eq!(decoded, envelope);
    }
}
