// Bootstrap coordinator: decides, once per replica, whether the persisted
// snapshot seeds the room.
//
// The snapshot fetch starts when the room opens and runs concurrently with
// connecting. The decision waits for the first completed sync handshake, so
// content already held by peers is visible before the emptiness check.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use codesync_common::crdt::Author;

use crate::engine::{SeedAttempt, SharedDocument};
use crate::services::{DocumentStore, ServiceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// The snapshot was inserted and replicated to the room.
    Seeded,
    /// Peers already provided content; the snapshot was discarded.
    SkippedPeerState,
    /// Nothing persisted and nothing in the room. The document stays empty.
    EmptySnapshot,
    /// The storage service could not provide a snapshot.
    SnapshotUnavailable,
    /// Bootstrap already ran for this replica.
    AlreadyBootstrapped,
}

impl BootstrapOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Seeded => "seeded",
            Self::SkippedPeerState => "skipped_peer_state",
            Self::EmptySnapshot => "empty_snapshot",
            Self::SnapshotUnavailable => "snapshot_unavailable",
            Self::AlreadyBootstrapped => "already_bootstrapped",
        }
    }
}

pub struct Bootstrap {
    document_id: String,
    fetch: Option<JoinHandle<Result<String, ServiceError>>>,
}

impl Bootstrap {
    /// Start fetching the snapshot of `document_id` in the background.
    pub fn start(document_id: impl Into<String>, store: Arc<dyn DocumentStore>) -> Self {
        let document_id: String = document_id.into();
        let fetch_id = document_id.clone();
        let fetch = tokio::spawn(async move { store.get_snapshot(&fetch_id).await });
        Self { document_id, fetch: Some(fetch) }
    }

    pub fn is_complete(&self) -> bool {
        self.fetch.is_none()
    }

    /// Finish bootstrap against `doc`. Must be called after the handshake
    /// completed; every call after the first returns `AlreadyBootstrapped`.
    pub async fn complete(&mut self, doc: &SharedDocument, author: &Author) -> BootstrapOutcome {
        let Some(fetch) = self.fetch.take() else {
            return BootstrapOutcome::AlreadyBootstrapped;
        };

        let snapshot = match fetch.await {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(error)) => {
                warn!(document = %self.document_id, %error, "snapshot fetch failed; not seeding");
                return BootstrapOutcome::SnapshotUnavailable;
            }
            Err(error) => {
                warn!(document = %self.document_id, %error, "snapshot fetch task failed");
                return BootstrapOutcome::SnapshotUnavailable;
            }
        };

        let outcome = decide(doc, author, &snapshot);
        match outcome {
            BootstrapOutcome::Seeded => info!(
                document = %self.document_id,
                chars = snapshot.chars().count(),
                "seeded room from snapshot"
            ),
            other => debug!(document = %self.document_id, outcome = other.as_str(), "bootstrap"),
        }
        outcome
    }
}

impl Drop for Bootstrap {
    fn drop(&mut self) {
        if let Some(fetch) = self.fetch.take() {
            fetch.abort();
        }
    }
}

fn decide(doc: &SharedDocument, author: &Author, snapshot: &str) -> BootstrapOutcome {
    match doc.seed_if_empty(author, snapshot) {
        SeedAttempt::Seeded(_) => BootstrapOutcome::Seeded,
        SeedAttempt::NotEmpty => BootstrapOutcome::SkippedPeerState,
        SeedAttempt::Nothing if snapshot.is_empty() => BootstrapOutcome::EmptySnapshot,
        // The identical seed is already in the room but its text was deleted.
        SeedAttempt::Nothing => BootstrapOutcome::SkippedPeerState,
    }
}
