use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{ActorId, IdSpan, OpId};
use super::origin::EditOrigin;

/// What an operation does to the sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OpKind {
    /// Insert a run of characters. Character `i` has id `id.offset(i)` and is
    /// anchored after character `i - 1`; the first one is anchored after
    /// `parent` (`None` = document start).
    Insert {
        id: OpId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<OpId>,
        text: String,
    },
    /// Tombstone the listed characters.
    Delete { targets: Vec<IdSpan> },
}

/// One replicated mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub actor: ActorId,
    /// Per-actor contiguous sequence number, starting at 1.
    pub seq: u64,
    pub origin: EditOrigin,
    #[serde(flatten)]
    pub kind: OpKind,
}

impl Operation {
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.origin.timestamp
    }

    /// Highest Lamport counter this operation introduces, if any.
    pub fn max_counter(&self) -> Option<u64> {
        match &self.kind {
            OpKind::Insert { id, text, .. } => {
                let len = text.chars().count() as u64;
                (len > 0).then(|| id.counter + len - 1)
            }
            OpKind::Delete { .. } => None,
        }
    }
}
