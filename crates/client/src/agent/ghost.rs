// Line-oriented edits on behalf of the ghost agent.
//
// Lines are 1-based and separated by '\n'. A document always has at least one
// line, and a trailing newline starts an empty last line. Every public edit is
// a single transaction on the replica: it either lands completely, replicates
// to the room and produces one change event, or leaves the document untouched.

use thiserror::Error;

use codesync_common::crdt::{Author, TextError, Transaction};
use codesync_common::delta::DocChange;
use codesync_common::types::{AnalysisReport, AwarenessRecord, LineFix};

use crate::engine::SharedDocument;

pub const GHOST_PARTICIPANT_ID: &str = "codesync-ghost";
pub const GHOST_DISPLAY_NAME: &str = "Ghost Agent";
const GHOST_COLOR: &str = "#C678DD";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FixError {
    #[error("line {line} is outside the document (1..={line_count})")]
    LineOutOfRange { line: usize, line_count: usize },
    #[error(transparent)]
    Text(#[from] TextError),
}

/// Result of a batch of fixes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FixReport {
    /// Lines fixed, in the order the fixes were applied.
    pub applied: Vec<usize>,
    pub rejected: Vec<(LineFix, FixError)>,
    /// Change event of the batch; `None` when nothing was applied.
    pub change: Option<DocChange>,
}

impl FixReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Handle the analysis layer uses to edit a room's document.
#[derive(Clone)]
pub struct GhostAgent {
    doc: SharedDocument,
    author: Author,
}

impl GhostAgent {
    pub fn new(doc: SharedDocument) -> Self {
        Self::with_author(doc, Author::agent(GHOST_PARTICIPANT_ID))
    }

    pub fn with_author(doc: SharedDocument, author: Author) -> Self {
        Self { doc, author }
    }

    pub fn author(&self) -> &Author {
        &self.author
    }

    pub fn line_count(&self) -> usize {
        line_count(&self.doc.snapshot())
    }

    /// Presence record announcing the agent in the room.
    pub fn presence(&self) -> AwarenessRecord {
        AwarenessRecord {
            participant_id: self.author.id.clone(),
            display_name: GHOST_DISPLAY_NAME.to_string(),
            color: GHOST_COLOR.to_string(),
            cursor: None,
            is_agent: true,
        }
    }

    /// Replace line `line` with `fixed_text`. If `fixed_text` has no leading
    /// whitespace, the old line's indentation is kept.
    pub fn apply_fix_at_line(
        &self,
        line: usize,
        fixed_text: &str,
    ) -> Result<Option<DocChange>, FixError> {
        self.doc.edit(&self.author, |tx| replace_line(tx, line, fixed_text))
    }

    /// Apply `fixes` as one transaction, highest line first so earlier
    /// replacements never shift the lines later fixes refer to. Fixes naming
    /// a line outside the document are skipped and reported.
    pub fn apply_multiple_fixes(&self, fixes: &[LineFix]) -> Result<FixReport, FixError> {
        let mut ordered: Vec<&LineFix> = fixes.iter().collect();
        ordered.sort_by(|a, b| b.line.cmp(&a.line));

        let mut applied = Vec::new();
        let mut rejected = Vec::new();
        let change = self.doc.edit(&self.author, |tx| {
            for fix in ordered {
                match replace_line(tx, fix.line, &fix.text) {
                    Ok(()) => applied.push(fix.line),
                    Err(error @ FixError::LineOutOfRange { .. }) => {
                        rejected.push((fix.clone(), error));
                    }
                    Err(error) => return Err(error),
                }
            }
            Ok::<(), FixError>(())
        })?;

        if !rejected.is_empty() {
            tracing::warn!(
                room = self.doc.room_key(),
                rejected = rejected.len(),
                "ghost fixes outside the document were skipped"
            );
        }
        Ok(FixReport { applied, rejected, change })
    }

    /// Insert `text` as a new line after `after_line`; `0` inserts before the
    /// first line.
    pub fn insert_line(&self, after_line: usize, text: &str) -> Result<Option<DocChange>, FixError> {
        self.doc.edit(&self.author, |tx| {
            let current = tx.text();
            let count = line_count(&current);
            if after_line > count {
                return Err(FixError::LineOutOfRange { line: after_line, line_count: count });
            }
            if after_line == 0 {
                tx.insert(0, &format!("{text}\n"))?;
            } else {
                let (start, len) = line_span(&current, after_line)
                    .ok_or(FixError::LineOutOfRange { line: after_line, line_count: count })?;
                tx.insert(start + len, &format!("\n{text}"))?;
            }
            Ok(())
        })
    }

    /// Apply every suggestion of `report` that carries a line and a fix.
    pub fn apply_suggestions(&self, report: &AnalysisReport) -> Result<FixReport, FixError> {
        self.apply_multiple_fixes(&report.fixes())
    }
}

fn replace_line(tx: &mut Transaction<'_>, line: usize, fixed_text: &str) -> Result<(), FixError> {
    let current = tx.text();
    let count = line_count(&current);
    let (start, len) =
        line_span(&current, line).ok_or(FixError::LineOutOfRange { line, line_count: count })?;

    let old_line: String = current.chars().skip(start).take(len).collect();
    let indent = indentation(&old_line);
    let replacement = if fixed_text.is_empty() || !indentation(fixed_text).is_empty() {
        fixed_text.to_string()
    } else {
        format!("{indent}{fixed_text}")
    };
    tx.replace(start, len, &replacement)?;
    Ok(())
}

fn line_count(text: &str) -> usize {
    text.split('\n').count()
}

/// Character offset and length of the 1-based `line`.
fn line_span(text: &str, line: usize) -> Option<(usize, usize)> {
    if line == 0 {
        return None;
    }
    let mut start = 0;
    for (index, content) in text.split('\n').enumerate() {
        let len = content.chars().count();
        if index + 1 == line {
            return Some((start, len));
        }
        start += len + 1;
    }
    None
}

fn indentation(line: &str) -> &str {
    let content = line.trim_start_matches([' ', '\t']);
    &line[..line.len() - content.len()]
}
