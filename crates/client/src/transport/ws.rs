// WebSocket connector: one JSON text frame per `RoomFrame`.

use std::net::IpAddr;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, warn};
use url::Url;

use codesync_common::protocol::room::room_path;
use codesync_common::protocol::RoomFrame;

use super::{Connector, Link};

#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    base_url: Url,
}

impl WebSocketConnector {
    /// `relay_url` must use `wss`; plain `ws` is accepted only for loopback hosts.
    pub fn new(relay_url: &str) -> Result<Self> {
        let base_url = Url::parse(relay_url)
            .map_err(|error| anyhow!("invalid relay_url `{relay_url}`: {error}"))?;
        match base_url.scheme() {
            "wss" => {}
            "ws" if is_loopback_host(base_url.host_str()) => {}
            _ => {
                return Err(anyhow!(
                    "relay_url must use wss (ws is allowed only for localhost testing)"
                ))
            }
        }
        Ok(Self { base_url })
    }

    pub fn room_url(&self, room_key: &str) -> Result<Url> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}{}", room_path(room_key)))
            .with_context(|| format!("invalid room url for `{room_key}`"))
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, room_key: &str) -> Result<Link> {
        let url = self.room_url(room_key)?;
        let (socket, _) = connect_async(url.as_str())
            .await
            .with_context(|| format!("failed to connect to {url}"))?;
        let (mut sink, mut stream) = socket.split();

        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<RoomFrame>();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel::<RoomFrame>();

        tokio::spawn(async move {
            while let Some(frame) = outgoing_rx.recv().await {
                let json = match frame.to_json() {
                    Ok(json) => json,
                    Err(error) => {
                        warn!(?error, kind = frame.kind(), "dropping unencodable frame");
                        continue;
                    }
                };
                if sink.send(WsMessage::text(json)).await.is_err() {
                    return;
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let text = match message {
                    Ok(WsMessage::Text(text)) => text,
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => continue,
                    Err(error) => {
                        debug!(?error, "websocket read failed");
                        break;
                    }
                };
                match RoomFrame::from_json(text.as_str()) {
                    Ok(frame) => {
                        if incoming_tx.send(frame).is_err() {
                            break;
                        }
                    }
                    Err(error) => warn!(?error, "ignoring malformed room frame"),
                }
            }
        });

        Ok(Link::new(outgoing_tx, incoming_rx))
    }
}

fn is_loopback_host(host: Option<&str>) -> bool {
    let Some(host) = host else {
        return false;
    };
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .is_ok_and(|addr| addr.is_loopback())
}
