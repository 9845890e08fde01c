// Replicated growable array over characters.
//
// Every character is an element with a globally unique `OpId`. Inserts name
// the element they follow; deletes only tombstone. Two replicas that have
// integrated the same set of operations hold the same element order.

use std::collections::HashSet;

use thiserror::Error;

use super::id::{seed_actor, ActorId, IdSpan, OpId, VersionVector};
use super::op::{OpKind, Operation};
use super::origin::{Author, EditOrigin};
use crate::delta::{ChangeSource, Delta, DocChange};

/// Buffered remote operations kept per actor; past this the actor's backlog is
/// dropped and re-fetched by the next handshake.
pub const MAX_PENDING_PER_ACTOR: usize = 1024;

/// Buffered remote operations kept across all actors.
pub const MAX_PENDING_OPS: usize = 16 * 1024;

/// Longest delete span accepted from a peer.
pub const MAX_SPAN_LEN: u64 = 1 << 32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TextError {
    #[error("position {position} is past the end of the document (length {len})")]
    PositionOutOfRange { position: usize, len: usize },
    #[error("range {start}..{end} is outside the document (length {len})")]
    RangeOutOfBounds { start: usize, end: usize, len: usize },
    #[error("malformed operation {actor:x}/{seq}: {reason}")]
    MalformedOperation { actor: ActorId, seq: u64, reason: &'static str },
}

#[derive(Debug, Clone)]
struct Element {
    id: OpId,
    ch: char,
    deleted: bool,
}

/// Element ids a mutation inserted or tombstoned, for building its delta.
#[derive(Debug, Default)]
struct Touched {
    inserted: HashSet<OpId>,
    removed: HashSet<OpId>,
}

/// State captured when a transaction opens.
#[derive(Debug, Clone, Copy)]
struct Checkpoint {
    clock: u64,
    own_seq: u64,
    log_len: usize,
    live_len: usize,
}

#[derive(Debug, Clone)]
pub struct ReplicatedText {
    actor: ActorId,
    /// Highest Lamport counter seen from any actor.
    clock: u64,
    elements: Vec<Element>,
    live_len: usize,
    versions: VersionVector,
    /// Integrated operations in integration order; every prefix is causally closed.
    log: Vec<Operation>,
    /// Remote operations waiting on an earlier seq or an unknown element.
    pending: Vec<Operation>,
}

impl ReplicatedText {
    pub fn new(actor: ActorId) -> Self {
        Self {
            actor,
            clock: 0,
            elements: Vec::new(),
            live_len: 0,
            versions: VersionVector::new(),
            log: Vec::new(),
            pending: Vec::new(),
        }
    }

    pub fn actor(&self) -> ActorId {
        self.actor
    }

    /// Visible length in characters.
    pub fn len(&self) -> usize {
        self.live_len
    }

    pub fn is_empty(&self) -> bool {
        self.live_len == 0
    }

    pub fn snapshot(&self) -> String {
        self.elements.iter().filter(|el| !el.deleted).map(|el| el.ch).collect()
    }

    pub fn version_vector(&self) -> &VersionVector {
        &self.versions
    }

    pub fn op_count(&self) -> usize {
        self.log.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Operations integrated here that a peer at `remote` has not seen, in an
    /// order the peer can apply without buffering.
    pub fn ops_since(&self, remote: &VersionVector) -> Vec<Operation> {
        self.log.iter().filter(|op| !remote.has_seen(op.actor, op.seq)).cloned().collect()
    }

    pub fn insert(
        &mut self,
        author: &Author,
        position: usize,
        text: &str,
    ) -> Result<Option<DocChange>, TextError> {
        self.transact(author, |tx| tx.insert(position, text))
    }

    pub fn delete(
        &mut self,
        author: &Author,
        position: usize,
        len: usize,
    ) -> Result<Option<DocChange>, TextError> {
        self.transact(author, |tx| tx.delete(position, len))
    }

    /// Run `f` as one atomic edit.
    ///
    /// When `f` returns `Ok`, every step commits and a single change event
    /// covering all of them is returned (`None` if nothing changed). When it
    /// returns `Err`, every step already taken is rolled back.
    pub fn transact<E, F>(&mut self, author: &Author, f: F) -> Result<Option<DocChange>, E>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<(), E>,
    {
        let checkpoint = Checkpoint {
            clock: self.clock,
            own_seq: self.versions.get(self.actor),
            log_len: self.log.len(),
            live_len: self.live_len,
        };
        let origin = author.origin_now();

        let mut tx = Transaction {
            doc: self,
            origin,
            ops: Vec::new(),
            inserted: HashSet::new(),
            tombstoned: Vec::new(),
        };
        let outcome = f(&mut tx);
        let Transaction { origin, ops, inserted, tombstoned, .. } = tx;

        if let Err(error) = outcome {
            self.rollback(checkpoint, &tombstoned);
            return Err(error);
        }
        if ops.is_empty() {
            return Ok(None);
        }

        let touched = Touched { inserted, removed: tombstoned.into_iter().collect() };
        let delta = self.delta_for(&touched);
        Ok(Some(DocChange { origin, source: ChangeSource::Local, delta, ops }))
    }

    /// Integrate operations received from peers.
    ///
    /// The whole batch is validated before anything is applied. Operations
    /// already integrated are skipped; operations whose dependencies are
    /// missing wait in the pending buffer.
    pub fn apply_remote(&mut self, ops: Vec<Operation>) -> Result<Option<DocChange>, TextError> {
        for op in &ops {
            validate(op)?;
        }

        let mut touched = Touched::default();
        let mut applied = Vec::new();
        let mut deferred = false;
        for op in ops {
            if self.versions.has_seen(op.actor, op.seq) {
                continue;
            }
            if self.try_integrate(&op, &mut touched) {
                applied.push(op);
            } else {
                deferred = true;
                self.buffer(op);
            }
        }
        if !applied.is_empty() && (deferred || !self.pending.is_empty()) {
            self.drain_pending(&mut applied, &mut touched);
        }

        let Some(last) = applied.last() else {
            return Ok(None);
        };
        let origin = last.origin.clone();
        let delta = self.delta_for(&touched);
        Ok(Some(DocChange { origin, source: ChangeSource::Remote, delta, ops: applied }))
    }

    /// Seed an empty replica with `snapshot` as a single insert at position 0.
    ///
    /// The operation is derived only from `room_key` and `snapshot`, so every
    /// participant seeding the same room with the same text produces the same
    /// operation and peers integrate it once.
    pub fn seed(&mut self, author: &Author, room_key: &str, snapshot: &str) -> Option<DocChange> {
        if snapshot.is_empty() || self.live_len > 0 {
            return None;
        }
        let actor = seed_actor(room_key, snapshot);
        if self.versions.has_seen(actor, 1) {
            return None;
        }

        let op = Operation {
            actor,
            seq: 1,
            origin: author.origin_now(),
            kind: OpKind::Insert { id: OpId::new(1, actor), parent: None, text: snapshot.to_string() },
        };
        let mut touched = Touched::default();
        if !self.try_integrate(&op, &mut touched) {
            return None;
        }
        let delta = self.delta_for(&touched);
        Some(DocChange { origin: op.origin.clone(), source: ChangeSource::Local, delta, ops: vec![op] })
    }

    fn buffer(&mut self, op: Operation) {
        let mut backlog = 0;
        for queued in self.pending.iter().filter(|p| p.actor == op.actor) {
            if queued.seq == op.seq {
                return;
            }
            backlog += 1;
        }
        if backlog >= MAX_PENDING_PER_ACTOR {
            self.pending.retain(|p| p.actor != op.actor);
            return;
        }
        if self.pending.len() >= MAX_PENDING_OPS {
            return;
        }
        self.pending.push(op);
    }

    fn drain_pending(&mut self, applied: &mut Vec<Operation>, touched: &mut Touched) {
        loop {
            let mut progressed = false;
            let mut waiting = Vec::with_capacity(self.pending.len());
            for op in std::mem::take(&mut self.pending) {
                if self.versions.has_seen(op.actor, op.seq) {
                    continue;
                }
                if self.try_integrate(&op, touched) {
                    progressed = true;
                    applied.push(op);
                } else {
                    waiting.push(op);
                }
            }
            self.pending = waiting;
            if !progressed || self.pending.is_empty() {
                break;
            }
        }
    }

    /// Integrate `op` if its dependencies are present. Returns `false` (and
    /// leaves the replica untouched) otherwise.
    fn try_integrate(&mut self, op: &Operation, touched: &mut Touched) -> bool {
        if op.seq != self.versions.get(op.actor) + 1 {
            return false;
        }
        match &op.kind {
            OpKind::Insert { id, parent, text } => {
                let mut index = match parent {
                    None => 0,
                    Some(parent) => match self.index_of(*parent) {
                        Some(found) => found + 1,
                        None => return false,
                    },
                };
                if self.index_of(*id).is_none() {
                    while index < self.elements.len() && self.elements[index].id > *id {
                        index += 1;
                    }
                    let run = run_elements(*id, text);
                    let count = run.len();
                    touched.inserted.extend(run.iter().map(|el| el.id));
                    self.elements.splice(index..index, run);
                    self.live_len += count;
                    self.clock = self.clock.max(id.counter + count as u64 - 1);
                }
            }
            OpKind::Delete { targets } => {
                let Some(wanted) = span_total(targets) else {
                    return false;
                };
                let known = self
                    .elements
                    .iter()
                    .filter(|el| targets.iter().any(|span| span.contains(el.id)))
                    .count() as u64;
                if known < wanted {
                    return false;
                }
                for el in &mut self.elements {
                    if !el.deleted && targets.iter().any(|span| span.contains(el.id)) {
                        el.deleted = true;
                        self.live_len -= 1;
                        touched.removed.insert(el.id);
                    }
                }
            }
        }
        self.versions.set(op.actor, op.seq);
        self.log.push(op.clone());
        true
    }

    /// Net visible change of a mutation, read off the element list in one pass.
    fn delta_for(&self, touched: &Touched) -> Delta {
        let mut delta = Delta::new();
        for el in &self.elements {
            if touched.inserted.contains(&el.id) {
                if !el.deleted {
                    delta.insert_char(el.ch);
                }
            } else if touched.removed.contains(&el.id) {
                delta.delete(1);
            } else if !el.deleted {
                delta.retain(1);
            }
        }
        delta.trim_trailing_retain();
        delta
    }

    fn index_of(&self, id: OpId) -> Option<usize> {
        self.elements.iter().position(|el| el.id == id)
    }

    /// Element index of the `visible`-th live character.
    fn live_index(&self, visible: usize) -> Option<usize> {
        self.elements
            .iter()
            .enumerate()
            .filter(|(_, el)| !el.deleted)
            .nth(visible)
            .map(|(index, _)| index)
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.versions.get(self.actor) + 1;
        self.versions.set(self.actor, seq);
        seq
    }

    fn rollback(&mut self, checkpoint: Checkpoint, tombstoned: &[OpId]) {
        let actor = self.actor;
        self.elements.retain(|el| !(el.id.actor == actor && el.id.counter > checkpoint.clock));
        if !tombstoned.is_empty() {
            let revived: HashSet<OpId> = tombstoned.iter().copied().collect();
            for el in &mut self.elements {
                if revived.contains(&el.id) {
                    el.deleted = false;
                }
            }
        }
        self.clock = checkpoint.clock;
        self.versions.set(actor, checkpoint.own_seq);
        self.log.truncate(checkpoint.log_len);
        self.live_len = checkpoint.live_len;
    }
}

fn run_elements(first: OpId, text: &str) -> Vec<Element> {
    text.chars()
        .enumerate()
        .map(|(i, ch)| Element { id: first.offset(i as u64), ch, deleted: false })
        .collect()
}

/// Number of ids covered by `targets`, `None` on overflow.
fn span_total(targets: &[IdSpan]) -> Option<u64> {
    targets.iter().try_fold(0u64, |total, span| total.checked_add(span.len))
}

fn validate(op: &Operation) -> Result<(), TextError> {
    let malformed = |reason| TextError::MalformedOperation { actor: op.actor, seq: op.seq, reason };
    if op.seq == 0 {
        return Err(malformed("sequence numbers start at 1"));
    }
    match &op.kind {
        OpKind::Insert { id, text, .. } => {
            if text.is_empty() {
                return Err(malformed("empty insert"));
            }
            if id.actor != op.actor {
                return Err(malformed("insert id belongs to another actor"));
            }
            if id.counter == 0 {
                return Err(malformed("counters start at 1"));
            }
            if id.counter.checked_add(text.chars().count() as u64).is_none() {
                return Err(malformed("counter overflow"));
            }
        }
        OpKind::Delete { targets } => {
            if targets.is_empty() || targets.iter().any(|span| span.len == 0) {
                return Err(malformed("empty delete"));
            }
            if targets.iter().any(|span| span.start == 0) {
                return Err(malformed("counters start at 1"));
            }
            if targets.iter().any(|span| span.len > MAX_SPAN_LEN || span.end().is_none()) {
                return Err(malformed("delete span out of range"));
            }
            if span_total(targets).is_none() {
                return Err(malformed("delete span out of range"));
            }
        }
    }
    Ok(())
}

/// Open edit on a [`ReplicatedText`]; see [`ReplicatedText::transact`].
pub struct Transaction<'a> {
    doc: &'a mut ReplicatedText,
    origin: EditOrigin,
    ops: Vec<Operation>,
    inserted: HashSet<OpId>,
    tombstoned: Vec<OpId>,
}

impl Transaction<'_> {
    pub fn len(&self) -> usize {
        self.doc.live_len
    }

    pub fn is_empty(&self) -> bool {
        self.doc.live_len == 0
    }

    /// Current text including this transaction's earlier steps.
    pub fn text(&self) -> String {
        self.doc.snapshot()
    }

    pub fn origin(&self) -> &EditOrigin {
        &self.origin
    }

    pub fn insert(&mut self, position: usize, text: &str) -> Result<(), TextError> {
        let len = self.doc.live_len;
        if position > len {
            return Err(TextError::PositionOutOfRange { position, len });
        }
        if text.is_empty() {
            return Ok(());
        }

        let doc = &mut *self.doc;
        let (index, parent) = if position == 0 {
            (0, None)
        } else {
            let at = doc
                .live_index(position - 1)
                .ok_or(TextError::PositionOutOfRange { position, len })?;
            (at + 1, Some(doc.elements[at].id))
        };

        // A fresh counter is above everything this replica has seen, so the
        // run sits directly after its parent.
        let id = OpId::new(doc.clock + 1, doc.actor);
        let run = run_elements(id, text);
        let count = run.len();
        self.inserted.extend(run.iter().map(|el| el.id));
        doc.elements.splice(index..index, run);
        doc.live_len += count;
        doc.clock += count as u64;

        let op = Operation {
            actor: doc.actor,
            seq: doc.next_seq(),
            origin: self.origin.clone(),
            kind: OpKind::Insert { id, parent, text: text.to_string() },
        };
        doc.log.push(op.clone());
        self.ops.push(op);
        Ok(())
    }

    pub fn delete(&mut self, position: usize, len: usize) -> Result<(), TextError> {
        let doc_len = self.doc.live_len;
        let end = position.saturating_add(len);
        if end > doc_len {
            return Err(TextError::RangeOutOfBounds { start: position, end, len: doc_len });
        }
        if len == 0 {
            return Ok(());
        }

        let doc = &mut *self.doc;
        let mut targets: Vec<IdSpan> = Vec::new();
        let mut visible = 0;
        for el in &mut doc.elements {
            if el.deleted {
                continue;
            }
            if visible >= end {
                break;
            }
            if visible >= position {
                el.deleted = true;
                self.tombstoned.push(el.id);
                let extended = targets.last_mut().is_some_and(|span| span.try_extend(el.id));
                if !extended {
                    targets.push(IdSpan::single(el.id));
                }
            }
            visible += 1;
        }
        doc.live_len -= len;

        let op = Operation {
            actor: doc.actor,
            seq: doc.next_seq(),
            origin: self.origin.clone(),
            kind: OpKind::Delete { targets },
        };
        doc.log.push(op.clone());
        self.ops.push(op);
        Ok(())
    }

    /// Delete `len` characters at `position` and insert `text` in their place.
    pub fn replace(&mut self, position: usize, len: usize, text: &str) -> Result<(), TextError> {
        self.delete(position, len)?;
        self.insert(position, text)
    }
}
