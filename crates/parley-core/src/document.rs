//! Live document contract.
//!
//! The engine never owns editor buffers. It talks to them through
//! [`DocumentHandle`], and obtains handles through a [`DocumentProvider`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::sync::Arc;

/// Zero-based line and character (in `char`s) position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }

    /// The position reached after inserting `text` at `self`.
    pub fn advance(self, text: &str) -> Self {
        let mut line = self.line;
        let mut character = self.character;
        for ch in text.chars() {
            if ch == '\n' {
                line += 1;
                character = 0;
            } else {
                character += 1;
            }
        }
        Self { line, character }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub fn new(start_line: u32, start_character: u32, end_line: u32, end_character: u32) -> Self {
        Self {
            start: Position::new(start_line, start_character),
            end: Position::new(end_line, end_character),
        }
    }

    pub fn empty(at: Position) -> Self {
        Self { start: at, end: at }
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Replace `range` with `text`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextEdit {
    pub range: Range,
    pub text: String,
}

impl TextEdit {
    pub fn replace(range: Range, text: impl Into<String>) -> Self {
        Self {
            range,
            text: text.into(),
        }
    }

    pub fn insert(at: Position, text: impl Into<String>) -> Self {
        Self::replace(Range::empty(at), text)
    }

    /// Lines covered by the replacement text once the edit has landed.
    pub fn touched_lines(&self) -> RangeInclusive<u32> {
        let start = self.range.start.line;
        let newlines = self.text.matches('\n').count() as u32;
        start..=start + newlines
    }
}

/// All edits targeting one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentEdit {
    pub uri: String,
    pub edits: Vec<TextEdit>,
}

/// A set of document edits produced by one agent progress chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceEdit {
    pub documents: Vec<DocumentEdit>,
}

impl WorkspaceEdit {
    pub fn single(uri: impl Into<String>, edits: Vec<TextEdit>) -> Self {
        Self {
            documents: vec![DocumentEdit {
                uri: uri.into(),
                edits,
            }],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.documents.iter().all(|d| d.edits.is_empty())
    }
}

/// Immutable copy of a document taken at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSnapshot {
    pub uri: String,
    pub text: String,
    pub alternative_version_id: u64,
}

/// A live, user-editable document.
///
/// The alternative version id moves forward on every edit and moves back to
/// the previous value on undo, so "is the document newer than checkpoint X"
/// is a plain integer comparison.
pub trait DocumentHandle: Send + Sync {
    fn uri(&self) -> &str;

    fn get_value(&self) -> String;

    fn set_value(&self, text: &str);

    /// Applies non-overlapping edits expressed against the current text.
    ///
    /// With `compute_undo` the edits join the currently open undo group.
    fn execute_edits(
        &self,
        source: &str,
        edits: &[TextEdit],
        compute_undo: bool,
    ) -> anyhow::Result<()>;

    /// Closes the open undo group; the next edit starts a new one.
    fn push_undo_stop(&self);

    /// Reverts the most recent undo group. Returns `false` when there is none.
    fn undo(&self) -> bool;

    fn can_undo(&self) -> bool;

    fn alternative_version_id(&self) -> u64;

    fn create_snapshot(&self) -> DocumentSnapshot;
}

/// Resolves document handles by uri, opening them when needed.
#[async_trait]
pub trait DocumentProvider: Send + Sync {
    async fn open(&self, uri: &str) -> anyhow::Result<Arc<dyn DocumentHandle>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_advance() {
        let start = Position::new(2, 4);
        assert_eq!(start.advance("abc"), Position::new(2, 7));
        assert_eq!(start.advance("a\nbc"), Position::new(3, 2));
        assert_eq!(start.advance("\n"), Position::new(3, 0));
    }

    #[test]
    fn test_touched_lines() {
        let edit = TextEdit::replace(Range::new(3, 0, 5, 0), "one\ntwo\n");
        assert_eq!(edit.touched_lines(), 3..=5);

        let edit = TextEdit::insert(Position::new(7, 1), "x");
        assert_eq!(edit.touched_lines(), 7..=7);
    }
}
