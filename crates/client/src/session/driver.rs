// Connection driver of a room session.

use std::ops::ControlFlow;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use codesync_common::crdt::{Author, Operation};
use codesync_common::protocol::{RoomFrame, CURRENT_PROTOCOL_VERSION};

use crate::bootstrap::{Bootstrap, BootstrapOutcome};
use crate::engine::{PresenceBoard, SharedDocument};
use crate::transport::{ConnectionMachine, ConnectionState, Connector, Link, ReconnectPolicy};

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Shutdown,
    Lost,
    /// The relay refused this session; reconnecting would replay the same frames.
    Rejected,
}

pub(super) struct Driver {
    pub(super) room_key: String,
    pub(super) participant_id: String,
    pub(super) author: Author,
    pub(super) doc: SharedDocument,
    pub(super) presence: PresenceBoard,
    pub(super) connector: Arc<dyn Connector>,
    pub(super) machine: ConnectionMachine,
    pub(super) policy: ReconnectPolicy,
    pub(super) outbox: mpsc::UnboundedReceiver<Vec<Operation>>,
    pub(super) local_presence: watch::Receiver<Option<RoomFrame>>,
    pub(super) bootstrap: Bootstrap,
    pub(super) bootstrap_tx: watch::Sender<Option<BootstrapOutcome>>,
    pub(super) failure_tx: watch::Sender<Option<String>>,
    pub(super) shutdown: broadcast::Receiver<()>,
}

impl Driver {
    pub(super) async fn run(mut self) {
        loop {
            self.enter(ConnectionState::Connecting);
            let connected = tokio::select! {
                _ = self.shutdown.recv() => break,
                connected = self.connector.connect(&self.room_key) => connected,
            };

            match connected {
                Ok(link) => {
                    let exit = self.run_connection(link).await;
                    self.presence.clear_remote();
                    self.machine.close();
                    match exit {
                        Exit::Shutdown => break,
                        Exit::Rejected => {
                            error!(room = %self.room_key, "relay rejected the session; giving up");
                            break;
                        }
                        Exit::Lost => warn!(room = %self.room_key, "connection lost; reconnecting"),
                    }
                }
                Err(error) => {
                    warn!(room = %self.room_key, error = %format!("{error:#}"), "connect failed");
                    self.machine.close();
                }
            }

            self.enter(ConnectionState::Backoff);
            tokio::select! {
                _ = self.shutdown.recv() => break,
                _ = sleep(self.policy.interval) => {}
            }
        }
        self.machine.close();
        debug!(room = %self.room_key, "session driver stopped");
    }

    async fn run_connection(&mut self, link: Link) -> Exit {
        let Link { outgoing, mut incoming } = link;
        self.enter(ConnectionState::OpenUnsynced);

        // Everything queued so far is covered by the handshake below.
        while self.outbox.try_recv().is_ok() {}

        let mut opening = vec![
            RoomFrame::Hello {
                participant_id: self.participant_id.clone(),
                protocol_version: CURRENT_PROTOCOL_VERSION.to_string(),
            },
            RoomFrame::SyncStep1 { state_vector: self.doc.version_vector() },
        ];
        let _ = self.local_presence.borrow_and_update();
        opening.extend(self.presence.local_frame());
        for frame in opening {
            if let ControlFlow::Break(exit) = send(&outgoing, frame) {
                return exit;
            }
        }

        loop {
            let step = tokio::select! {
                _ = self.shutdown.recv() => {
                    self.flush(&outgoing);
                    ControlFlow::Break(Exit::Shutdown)
                }
                frame = incoming.recv() => match frame {
                    Some(frame) => self.handle_frame(frame, &outgoing).await,
                    None => ControlFlow::Break(Exit::Lost),
                },
                Some(ops) = self.outbox.recv() => send(&outgoing, RoomFrame::Update { ops }),
                Ok(()) = self.local_presence.changed() => {
                    let frame = self.local_presence.borrow_and_update().clone();
                    match frame {
                        Some(frame) => send(&outgoing, frame),
                        None => ControlFlow::Continue(()),
                    }
                }
            };
            if let ControlFlow::Break(exit) = step {
                return exit;
            }
        }
    }

    async fn handle_frame(
        &mut self,
        frame: RoomFrame,
        outgoing: &mpsc::UnboundedSender<RoomFrame>,
    ) -> ControlFlow<Exit> {
        match frame {
            RoomFrame::SyncStep1 { state_vector } => {
                let ops = self.doc.ops_since(&state_vector);
                send(outgoing, RoomFrame::SyncStep2 { ops })
            }
            RoomFrame::SyncStep2 { ops } => {
                self.apply(ops);
                if self.machine.state() != ConnectionState::OpenUnsynced {
                    return ControlFlow::Continue(());
                }
                self.enter(ConnectionState::Synced);
                info!(room = %self.room_key, chars = self.doc.len(), "room synced");

                if !self.bootstrap.is_complete() {
                    let outcome = tokio::select! {
                        outcome = self.bootstrap.complete(&self.doc, &self.author) => outcome,
                        _ = self.shutdown.recv() => {
                            self.flush(outgoing);
                            return ControlFlow::Break(Exit::Shutdown);
                        }
                    };
                    self.bootstrap_tx.send_replace(Some(outcome));
                }
                ControlFlow::Continue(())
            }
            RoomFrame::Update { ops } => {
                self.apply(ops);
                ControlFlow::Continue(())
            }
            RoomFrame::Awareness { participant_id, clock, record } => {
                self.presence.apply_remote(&participant_id, clock, record);
                ControlFlow::Continue(())
            }
            RoomFrame::AwarenessQuery => match self.presence.local_frame() {
                Some(frame) => send(outgoing, frame),
                None => ControlFlow::Continue(()),
            },
            RoomFrame::Ping => send(outgoing, RoomFrame::Pong),
            RoomFrame::Pong | RoomFrame::Hello { .. } => ControlFlow::Continue(()),
            RoomFrame::Error { code, message, retryable } => {
                warn!(room = %self.room_key, %code, %message, retryable, "relay reported an error");
                if retryable {
                    ControlFlow::Continue(())
                } else {
                    self.failure_tx.send_replace(Some(format!("{code}: {message}")));
                    ControlFlow::Break(Exit::Rejected)
                }
            }
        }
    }

    fn apply(&self, ops: Vec<Operation>) {
        if ops.is_empty() {
            return;
        }
        if let Err(error) = self.doc.apply_remote(ops) {
            warn!(room = %self.room_key, %error, "rejected operations from the room");
        }
    }

    /// Send whatever is still queued before the connection goes away.
    fn flush(&mut self, outgoing: &mpsc::UnboundedSender<RoomFrame>) {
        while let Ok(ops) = self.outbox.try_recv() {
            if outgoing.send(RoomFrame::Update { ops }).is_err() {
                break;
            }
        }
    }

    fn enter(&mut self, state: ConnectionState) {
        if let Err(error) = self.machine.transition(state) {
            warn!(room = %self.room_key, %error, "unexpected connection transition");
        }
    }
}

fn send(outgoing: &mpsc::UnboundedSender<RoomFrame>, frame: RoomFrame) -> ControlFlow<Exit> {
    match outgoing.send(frame) {
        Ok(()) => ControlFlow::Continue(()),
        Err(_) => ControlFlow::Break(Exit::Lost),
    }
}
