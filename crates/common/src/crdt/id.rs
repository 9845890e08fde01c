use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Identifies one replica instance (or one seed source).
pub type ActorId = u64;

/// High bit marks actors derived from seed content rather than a live replica.
pub const SEED_ACTOR_BIT: ActorId = 1 << 63;

/// Mask a random value into the live-replica actor space.
pub fn replica_actor(raw: u64) -> ActorId {
    let actor = raw & !SEED_ACTOR_BIT;
    // 0 is reserved for relay-side stores that never author edits.
    if actor == 0 {
        1
    } else {
        actor
    }
}

/// Actor that authors the bootstrap seed of `room_key` with `snapshot`.
///
/// Two participants seeding the same room from the same snapshot derive the
/// same actor, so their seed operations are identical and deduplicate.
pub fn seed_actor(room_key: &str, snapshot: &str) -> ActorId {
    let mut hasher = Sha256::new();
    hasher.update(room_key.as_bytes());
    hasher.update([0u8]);
    hasher.update(snapshot.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes) | SEED_ACTOR_BIT
}

pub fn is_seed_actor(actor: ActorId) -> bool {
    actor & SEED_ACTOR_BIT != 0
}

/// Identity of one inserted character: Lamport counter, then actor.
///
/// The derived ordering compares `counter` first and breaks ties by `actor`,
/// which is the sibling order every replica applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpId {
    pub counter: u64,
    pub actor: ActorId,
}

impl OpId {
    pub const fn new(counter: u64, actor: ActorId) -> Self {
        Self { counter, actor }
    }

    /// Id of the `offset`-th character of a run starting at `self`.
    pub const fn offset(self, offset: u64) -> Self {
        Self { counter: self.counter + offset, actor: self.actor }
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:x}", self.counter, self.actor)
    }
}

/// Contiguous run of character ids from one actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdSpan {
    pub actor: ActorId,
    pub start: u64,
    pub len: u64,
}

impl IdSpan {
    pub fn single(id: OpId) -> Self {
        Self { actor: id.actor, start: id.counter, len: 1 }
    }

    /// One past the last counter, or `None` if the span runs off the counter space.
    pub fn end(&self) -> Option<u64> {
        self.start.checked_add(self.len)
    }

    pub fn contains(&self, id: OpId) -> bool {
        id.actor == self.actor
            && id.counter >= self.start
            && self.end().is_some_and(|end| id.counter < end)
    }

    pub fn ids(&self) -> impl Iterator<Item = OpId> + '_ {
        (0..self.len).map(move |i| OpId::new(self.start + i, self.actor))
    }

    /// Extend in place when `id` directly follows this span.
    pub fn try_extend(&mut self, id: OpId) -> bool {
        if id.actor == self.actor && self.end() == Some(id.counter) {
            self.len += 1;
            true
        } else {
            false
        }
    }
}

/// Per-actor count of contiguous operations integrated (`seq` high-water mark).
///
/// On the wire this is a JSON object keyed by the decimal actor id. Keys are
/// written as strings explicitly so the vector survives being nested inside
/// tagged frames.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionVector(BTreeMap<ActorId, u64>);

impl Serialize for VersionVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(actor, seq)| (actor.to_string(), *seq)))
    }
}

impl<'de> Deserialize<'de> for VersionVector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, u64>::deserialize(deserializer)?;
        let mut versions = BTreeMap::new();
        for (key, seq) in raw {
            let actor = key
                .parse::<ActorId>()
                .map_err(|_| de::Error::custom(format!("invalid actor id `{key}`")))?;
            if seq > 0 {
                versions.insert(actor, seq);
            }
        }
        Ok(Self(versions))
    }
}

impl VersionVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, actor: ActorId) -> u64 {
        self.0.get(&actor).copied().unwrap_or(0)
    }

    pub fn set(&mut self, actor: ActorId, seq: u64) {
        if seq == 0 {
            self.0.remove(&actor);
        } else {
            self.0.insert(actor, seq);
        }
    }

    pub fn has_seen(&self, actor: ActorId, seq: u64) -> bool {
        seq <= self.get(actor)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ActorId, u64)> + '_ {
        self.0.iter().map(|(actor, seq)| (*actor, *seq))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_ids_order_by_counter_then_actor() {
        assert!(OpId::new(2, 1) > OpId::new(1, 9));
        assert!(OpId::new(1, 9) > OpId::new(1, 2));
    }

    #[test]
    fn seed_actor_is_deterministic_and_disjoint_from_replicas() {
        let a = seed_actor("codesync-7", "abc");
        let b = seed_actor("codesync-7", "abc");
        let c = seed_actor("codesync-7", "abcd");
        let d = seed_actor("codesync-8", "abc");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert!(is_seed_actor(a));
        assert!(!is_seed_actor(replica_actor(u64::MAX)));
        assert_eq!(replica_actor(SEED_ACTOR_BIT), 1);
    }

    #[test]
    fn span_extends_only_with_the_next_counter_of_the_same_actor() {
        let mut span = IdSpan::single(OpId::new(4, 1));
        assert!(span.try_extend(OpId::new(5, 1)));
        assert!(!span.try_extend(OpId::new(7, 1)));
        assert!(!span.try_extend(OpId::new(6, 2)));
        assert_eq!(span.ids().collect::<Vec<_>>(), vec![OpId::new(4, 1), OpId::new(5, 1)]);
        assert!(span.contains(OpId::new(5, 1)));
        assert!(!span.contains(OpId::new(6, 1)));
    }

    #[test]
    fn span_at_the_top_of_the_counter_space_does_not_overflow() {
        let span = IdSpan { actor: 7, start: 2, len: u64::MAX };
        assert_eq!(span.end(), None);
        assert!(!span.contains(OpId::new(3, 7)));
        let mut last = IdSpan { actor: 7, start: u64::MAX, len: 1 };
        assert!(!last.try_extend(OpId::new(0, 7)));
    }

    #[test]
    fn version_vector_serializes_as_a_map() {
        let mut vv = VersionVector::new();
        vv.set(3, 7);
        assert!(vv.has_seen(3, 7));
        assert!(!vv.has_seen(3, 8));
        assert!(!vv.has_seen(4, 1));
        let json = serde_json::to_string(&vv).expect("vv should serialize");
        assert_eq!(json, r#"{"3":7}"#);
        let decoded: VersionVector = serde_json::from_str(&json).expect("vv should parse");
        assert_eq!(decoded, vv);
    }
}
