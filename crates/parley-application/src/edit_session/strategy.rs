//! Per-document edit application: instant or typed out, with undo back to a
//! checkpoint.

use parley_core::config::TypingConfig;
use parley_core::document::{DocumentHandle, Range, TextEdit};
use parley_core::error::{ParleyError, Result};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Source tag passed to `execute_edits`.
pub const EDIT_SOURCE: &str = "parley.edit";

static WORD_CHUNK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\S+\s*|\s+").expect("word pattern is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyState {
    Idle,
    Editing,
    Applied,
    Cancelled,
}

impl StrategyState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Applied | Self::Cancelled)
    }
}

/// Lines whose highlight changed after a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecorationDelta {
    pub added: Vec<u32>,
    pub removed: Vec<u32>,
}

impl DecorationDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// How a batch ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub decorations: DecorationDelta,
    /// The token fired before every chunk landed.
    pub interrupted: bool,
}

/// Applies one edit session's batches to one document.
#[derive(Debug)]
pub struct EditStrategy {
    uri: String,
    state: StrategyState,
    checkpoint: u64,
    edit_count: usize,
    decorations: BTreeSet<u32>,
    showing_diff: bool,
}

impl EditStrategy {
    /// `checkpoint` is the document's alternative version id before the
    /// session first touched it.
    pub fn new(uri: impl Into<String>, checkpoint: u64) -> Self {
        Self {
            uri: uri.into(),
            state: StrategyState::Idle,
            checkpoint,
            edit_count: 0,
            decorations: BTreeSet::new(),
            showing_diff: false,
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn state(&self) -> StrategyState {
        self.state
    }

    pub fn checkpoint(&self) -> u64 {
        self.checkpoint
    }

    pub fn edit_count(&self) -> usize {
        self.edit_count
    }

    pub fn decorations(&self) -> &BTreeSet<u32> {
        &self.decorations
    }

    pub fn has_diff(&self) -> bool {
        self.edit_count > 0
    }

    pub fn showing_diff(&self) -> bool {
        self.showing_diff
    }

    /// Flips the diff view. Stays off while there is nothing to compare.
    pub fn toggle_diff(&mut self) -> bool {
        self.showing_diff = self.has_diff() && !self.showing_diff;
        self.showing_diff
    }

    /// Applies `edits`, expressed against the document's current text.
    ///
    /// With a reveal duration the replacement text is typed out in word
    /// chunks spread over it; without one everything lands in one call.
    pub async fn apply_batch(
        &mut self,
        document: &dyn DocumentHandle,
        edits: &[TextEdit],
        reveal: Option<Duration>,
        typing: &TypingConfig,
        token: &CancellationToken,
    ) -> Result<BatchOutcome> {
        if self.state.is_terminal() {
            return Err(ParleyError::invalid_state(format!(
                "edits for '{}' already {:?}",
                self.uri, self.state
            )));
        }
        if edits.is_empty() {
            return Ok(BatchOutcome {
                decorations: DecorationDelta::default(),
                interrupted: false,
            });
        }

        if self.state == StrategyState::Idle {
            document.push_undo_stop();
            self.state = StrategyState::Editing;
        }

        let interrupted = match reveal {
            Some(duration) => {
                apply_progressively(document, edits, duration, typing, token).await?
            }
            None => {
                document.execute_edits(EDIT_SOURCE, edits, true)?;
                false
            }
        };
        self.edit_count += edits.len();

        // An interrupted batch is about to be reverted; its ranges no longer
        // describe what is in the document.
        let decorations = if interrupted {
            DecorationDelta::default()
        } else {
            self.render_decorations(edits)
        };
        tracing::debug!(
            "[EditSession] {} edit(s) on {} (+{} decorated line(s))",
            edits.len(),
            self.uri,
            decorations.added.len()
        );
        Ok(BatchOutcome {
            decorations,
            interrupted,
        })
    }

    /// Records the lines touched by a landed batch and returns only the ones
    /// not already decorated.
    fn render_decorations(&mut self, edits: &[TextEdit]) -> DecorationDelta {
        let added = landed_lines(edits)
            .into_iter()
            .filter(|line| self.decorations.insert(*line))
            .collect();
        DecorationDelta {
            added,
            removed: Vec::new(),
        }
    }

    /// Drops every decoration without touching the document.
    pub fn clear_decorations(&mut self) -> DecorationDelta {
        let removed = std::mem::take(&mut self.decorations).into_iter().collect();
        self.showing_diff = false;
        DecorationDelta {
            added: Vec::new(),
            removed,
        }
    }

    /// Keeps the edits.
    pub fn apply(&mut self, document: &dyn DocumentHandle) -> Result<DecorationDelta> {
        if self.state.is_terminal() {
            return Err(ParleyError::invalid_state(format!(
                "edits for '{}' already {:?}",
                self.uri, self.state
            )));
        }
        document.push_undo_stop();
        self.state = StrategyState::Applied;
        Ok(self.clear_decorations())
    }

    /// Reverts the document to the checkpoint.
    ///
    /// Everything newer than the checkpoint is undone, including user edits
    /// that interleaved with the session's edits.
    pub fn cancel(&mut self, document: &dyn DocumentHandle) -> Result<DecorationDelta> {
        if self.state.is_terminal() {
            return Err(ParleyError::invalid_state(format!(
                "edits for '{}' already {:?}",
                self.uri, self.state
            )));
        }
        let undone = undo_changes(document, self.checkpoint);
        tracing::info!(
            "[EditSession] Reverted {} to version {} ({} undo step(s))",
            self.uri,
            self.checkpoint,
            undone
        );
        self.state = StrategyState::Cancelled;
        Ok(self.clear_decorations())
    }
}

/// Undoes while the document is newer than `target` and has history left.
/// Returns the number of undo steps taken.
pub fn undo_changes(document: &dyn DocumentHandle, target: u64) -> usize {
    let mut steps = 0;
    while document.alternative_version_id() > target && document.can_undo() {
        if !document.undo() {
            break;
        }
        steps += 1;
    }
    steps
}

/// Splits replacement text into word-sized chunks, keeping trailing
/// whitespace with its word.
pub fn word_chunks(text: &str) -> Vec<&str> {
    WORD_CHUNK.find_iter(text).map(|m| m.as_str()).collect()
}

/// Types the edits out. Returns `true` when cancelled midway.
async fn apply_progressively(
    document: &dyn DocumentHandle,
    edits: &[TextEdit],
    duration: Duration,
    typing: &TypingConfig,
    token: &CancellationToken,
) -> Result<bool> {
    let mut ordered: Vec<&TextEdit> = edits.iter().collect();
    // Bottom-up keeps the ranges of the remaining edits valid.
    ordered.sort_by(|a, b| b.range.start.cmp(&a.range.start));

    let words: usize = ordered.iter().map(|e| word_chunks(&e.text).len()).sum();
    let secs = duration.as_secs_f64();
    let rate = if secs > 0.0 {
        typing.clamp(words as f64 / secs)
    } else {
        typing.max_words_per_second
    };
    // A rate that is not positive and finite types without pausing.
    let interval = Duration::try_from_secs_f64(rate.recip()).unwrap_or(Duration::ZERO);

    for edit in ordered {
        if !edit.range.is_empty() {
            document.execute_edits(EDIT_SOURCE, &[TextEdit::replace(edit.range, "")], true)?;
        }

        let mut cursor = edit.range.start;
        for chunk in word_chunks(&edit.text) {
            if token.is_cancelled() {
                return Ok(true);
            }
            document.execute_edits(EDIT_SOURCE, &[TextEdit::insert(cursor, chunk)], true)?;
            cursor = cursor.advance(chunk);

            tokio::select! {
                _ = token.cancelled() => return Ok(true),
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
    Ok(false)
}

/// Lines covered by each edit's text after the whole batch landed.
fn landed_lines(edits: &[TextEdit]) -> BTreeSet<u32> {
    let mut ordered: Vec<&TextEdit> = edits.iter().collect();
    ordered.sort_by(|a, b| a.range.start.cmp(&b.range.start));

    let mut lines = BTreeSet::new();
    let mut shift: i64 = 0;
    for edit in ordered {
        let touched = edit.touched_lines();
        let start = (*touched.start() as i64 + shift).max(0) as u32;
        let end = (*touched.end() as i64 + shift).max(0) as u32;
        lines.extend(start..=end);
        shift += line_growth(edit.range, &edit.text);
    }
    lines
}

fn line_growth(range: Range, text: &str) -> i64 {
    let inserted = text.matches('\n').count() as i64;
    let removed = i64::from(range.end.line) - i64::from(range.start.line);
    inserted - removed
}

#[cfg(test)]
#[path = "strategy_test.rs"]
mod tests;
