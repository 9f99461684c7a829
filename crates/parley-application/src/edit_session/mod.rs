//! Live edit sessions.
//!
//! An [`EditSessionCoordinator`] takes the edits an [`EditProvider`] streams
//! for a response and applies them to live documents through one
//! [`EditStrategy`] per document. Each document is checkpointed on first
//! touch so the whole session can be reverted.
//!
//! [`EditProvider`]: parley_core::agent::EditProvider

mod coordinator;
mod pace;
mod strategy;

pub use coordinator::{
    DecorationChange, EditCodeblockTextModels, EditSessionCoordinator, EditSessionStatus,
};
pub use pace::{InstantPace, MovingAveragePace, PaceFactory, TypingPace};
pub use strategy::{
    BatchOutcome, DecorationDelta, EDIT_SOURCE, EditStrategy, StrategyState, undo_changes,
    word_chunks,
};
