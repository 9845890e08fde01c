// The local replica of one room, shared between the session driver, the
// ghost agent, and whatever UI drives local edits.
//
// All access goes through short synchronous lock sections. Locally authored
// operations are pushed to the outbox inside the same section that created
// them, so the outbox order always matches per-actor sequence order.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use codesync_common::crdt::{
    ActorId, Author, Operation, ReplicatedText, TextError, Transaction, VersionVector,
};
use codesync_common::delta::DocChange;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Outcome of [`SharedDocument::seed_if_empty`].
#[derive(Debug, Clone, PartialEq)]
pub enum SeedAttempt {
    Seeded(DocChange),
    /// The replica already has visible content (from peers or local typing).
    NotEmpty,
    /// Nothing to seed, or the identical seed was already integrated.
    Nothing,
}

#[derive(Clone)]
pub struct SharedDocument {
    room_key: Arc<str>,
    replica: Arc<Mutex<ReplicatedText>>,
    changes: broadcast::Sender<DocChange>,
    outbox: mpsc::UnboundedSender<Vec<Operation>>,
}

impl SharedDocument {
    /// New empty replica plus the receiving end of its outbox.
    pub fn new(
        room_key: impl Into<String>,
        actor: ActorId,
    ) -> (Self, mpsc::UnboundedReceiver<Vec<Operation>>) {
        let (outbox, outbox_rx) = mpsc::unbounded_channel();
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let room_key: String = room_key.into();
        let doc = Self {
            room_key: Arc::from(room_key),
            replica: Arc::new(Mutex::new(ReplicatedText::new(actor))),
            changes,
            outbox,
        };
        (doc, outbox_rx)
    }

    pub fn room_key(&self) -> &str {
        &self.room_key
    }

    pub fn actor(&self) -> ActorId {
        self.lock().actor()
    }

    pub fn snapshot(&self) -> String {
        self.lock().snapshot()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn version_vector(&self) -> VersionVector {
        self.lock().version_vector().clone()
    }

    pub fn ops_since(&self, remote: &VersionVector) -> Vec<Operation> {
        self.lock().ops_since(remote)
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending_len()
    }

    /// Change events for every committed local transaction and remote batch.
    pub fn subscribe(&self) -> broadcast::Receiver<DocChange> {
        self.changes.subscribe()
    }

    /// Apply `f` as one local transaction and replicate the result.
    pub fn edit<E, F>(&self, author: &Author, f: F) -> Result<Option<DocChange>, E>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<(), E>,
    {
        let mut replica = self.lock();
        let change = replica.transact(author, f)?;
        if let Some(change) = &change {
            self.publish_local(change);
        }
        Ok(change)
    }

    pub fn insert(
        &self,
        author: &Author,
        position: usize,
        text: &str,
    ) -> Result<Option<DocChange>, TextError> {
        self.edit(author, |tx| tx.insert(position, text))
    }

    pub fn delete(
        &self,
        author: &Author,
        position: usize,
        len: usize,
    ) -> Result<Option<DocChange>, TextError> {
        self.edit(author, |tx| tx.delete(position, len))
    }

    /// Integrate operations from the room. Nothing is sent back out.
    pub fn apply_remote(&self, ops: Vec<Operation>) -> Result<Option<DocChange>, TextError> {
        let mut replica = self.lock();
        let change = replica.apply_remote(ops)?;
        if let Some(change) = &change {
            let _ = self.changes.send(change.clone());
        }
        Ok(change)
    }

    /// Seed `snapshot` if, and only if, the replica has no visible content.
    /// The emptiness check and the seed happen under one lock.
    pub fn seed_if_empty(&self, author: &Author, snapshot: &str) -> SeedAttempt {
        let mut replica = self.lock();
        if !replica.is_empty() {
            return SeedAttempt::NotEmpty;
        }
        match replica.seed(author, &self.room_key, snapshot) {
            Some(change) => {
                self.publish_local(&change);
                SeedAttempt::Seeded(change)
            }
            None => SeedAttempt::Nothing,
        }
    }

    fn publish_local(&self, change: &DocChange) {
        if self.outbox.send(change.ops.clone()).is_err() {
            debug!(room = %self.room_key, "outbox closed; local ops stay in the replica log");
        }
        let _ = self.changes.send(change.clone());
    }

    fn lock(&self) -> MutexGuard<'_, ReplicatedText> {
        self.replica.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
