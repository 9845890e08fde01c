// Change events: the net visible-text effect of a mutation as a
// retain/insert/delete list. Deltas are for observers only and are never
// fed back into the replicated document.

use serde::{Deserialize, Serialize};

use crate::crdt::op::Operation;
use crate::crdt::origin::EditOrigin;

/// One step of a delta. Lengths count characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    Retain(usize),
    Insert(String),
    Delete(usize),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Delta {
    segments: Vec<Segment>,
}

impl Delta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn retain(&mut self, len: usize) {
        if len == 0 {
            return;
        }
        match self.segments.last_mut() {
            Some(Segment::Retain(existing)) => *existing += len,
            _ => self.segments.push(Segment::Retain(len)),
        }
    }

    pub fn insert(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        match self.segments.last_mut() {
            Some(Segment::Insert(existing)) => existing.push_str(text),
            _ => self.segments.push(Segment::Insert(text.to_string())),
        }
    }

    pub fn insert_char(&mut self, ch: char) {
        match self.segments.last_mut() {
            Some(Segment::Insert(existing)) => existing.push(ch),
            _ => self.segments.push(Segment::Insert(ch.to_string())),
        }
    }

    pub fn delete(&mut self, len: usize) {
        if len == 0 {
            return;
        }
        match self.segments.last_mut() {
            Some(Segment::Delete(existing)) => *existing += len,
            _ => self.segments.push(Segment::Delete(len)),
        }
    }

    /// Drop a final retain; an implicit tail is kept by `apply_to`.
    pub fn trim_trailing_retain(&mut self) {
        if matches!(self.segments.last(), Some(Segment::Retain(_))) {
            self.segments.pop();
        }
    }

    pub fn inserted_chars(&self) -> usize {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Insert(text) => text.chars().count(),
                _ => 0,
            })
            .sum()
    }

    pub fn deleted_chars(&self) -> usize {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Delete(len) => *len,
                _ => 0,
            })
            .sum()
    }

    /// Apply to a plain-text mirror (an editor buffer, a test oracle).
    /// Returns `None` when the delta reaches past the end of `base`.
    pub fn apply_to(&self, base: &str) -> Option<String> {
        let mut source = base.chars();
        let mut out = String::with_capacity(base.len());
        for segment in &self.segments {
            match segment {
                Segment::Retain(len) => {
                    for _ in 0..*len {
                        out.push(source.next()?);
                    }
                }
                Segment::Insert(text) => out.push_str(text),
                Segment::Delete(len) => {
                    for _ in 0..*len {
                        source.next()?;
                    }
                }
            }
        }
        out.extend(source);
        Some(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSource {
    /// Authored through this replica (including the bootstrap seed).
    Local,
    /// Integrated from a peer.
    Remote,
}

/// Emitted once per committed transaction or remote batch.
#[derive(Debug, Clone, PartialEq)]
pub struct DocChange {
    pub origin: EditOrigin,
    pub source: ChangeSource,
    pub delta: Delta,
    pub ops: Vec<Operation>,
}

impl DocChange {
    pub fn is_local(&self) -> bool {
        self.source == ChangeSource::Local
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(segments: &[Segment]) -> Delta {
        let mut delta = Delta::new();
        for segment in segments {
            match segment {
                Segment::Retain(len) => delta.retain(*len),
                Segment::Insert(text) => delta.insert(text),
                Segment::Delete(len) => delta.delete(*len),
            }
        }
        delta
    }

    #[test]
    fn adjacent_segments_of_one_kind_merge() {
        let mut d = Delta::new();
        d.retain(2);
        d.retain(1);
        d.insert_char('x');
        d.insert("yz");
        d.delete(1);
        d.delete(0);
        d.delete(2);
        assert_eq!(
            d.segments(),
            &[Segment::Retain(3), Segment::Insert("xyz".into()), Segment::Delete(3)]
        );
        assert_eq!(d.inserted_chars(), 3);
        assert_eq!(d.deleted_chars(), 3);
    }

    #[test]
    fn trailing_retain_is_dropped() {
        let mut d = delta(&[Segment::Insert("a".into()), Segment::Retain(4)]);
        d.trim_trailing_retain();
        assert_eq!(d.segments(), &[Segment::Insert("a".into())]);
    }

    #[test]
    fn delta_applies_to_a_mirror() {
        let cases = [
            ("", delta(&[Segment::Insert("fn main() {}\n".into())]), "fn main() {}\n"),
            (
                "def foo():\n    pass\n",
                delta(&[Segment::Retain(15), Segment::Insert("return 1".into()), Segment::Delete(4)]),
                "def foo():\n    return 1\n",
            ),
            ("🙂 hello", delta(&[Segment::Retain(3), Segment::Delete(4), Segment::Insert("i".into())]), "🙂 hi"),
        ];
        for (old, d, new) in cases {
            assert_eq!(d.apply_to(old).as_deref(), Some(new), "old={old:?}");
        }
    }

    #[test]
    fn apply_rejects_overlong_delta() {
        let mut delta = Delta::new();
        delta.retain(10);
        delta.insert("x");
        assert_eq!(delta.apply_to("short"), None);
    }

    #[test]
    fn delta_serializes_like_a_segment_list() {
        let d = delta(&[Segment::Retain(1), Segment::Insert("X".into())]);
        let json = serde_json::to_string(&d).expect("delta should serialize");
        assert_eq!(json, r#"[{"retain":1},{"insert":"X"}]"#);
    }
}
