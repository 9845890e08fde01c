// Transport seam between a room session and the relay.
//
// A connector opens one link per connection attempt. The link is a pair of
// frame channels; dropping the sender closes the connection, and the
// receiver yields `None` once the remote side has gone away.

pub mod reconnect;
pub mod ws;

use async_trait::async_trait;
use tokio::sync::mpsc;

use codesync_common::protocol::RoomFrame;

pub use reconnect::{ConnectionMachine, ConnectionState, InvalidTransition, ReconnectPolicy};
pub use ws::WebSocketConnector;

#[derive(Debug)]
pub struct Link {
    pub outgoing: mpsc::UnboundedSender<RoomFrame>,
    pub incoming: mpsc::UnboundedReceiver<RoomFrame>,
}

impl Link {
    pub fn new(
        outgoing: mpsc::UnboundedSender<RoomFrame>,
        incoming: mpsc::UnboundedReceiver<RoomFrame>,
    ) -> Self {
        Self { outgoing, incoming }
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a fresh connection to `room_key`.
    async fn connect(&self, room_key: &str) -> anyhow::Result<Link>;
}
