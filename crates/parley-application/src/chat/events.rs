//! Events published by [`ChatService`](super::ChatService).

use parley_core::session::Vote;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisposeReason {
    InitializationFailed,
    Cleared,
}

/// Something the user did with a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UserAction {
    Vote { vote: Vote },
    Copy { codeblock_index: usize },
    Insert { codeblock_index: usize },
    Command { command_id: String },
    RunInTerminal { codeblock_index: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatServiceEvent {
    SessionDisposed {
        session_id: String,
        reason: DisposeReason,
    },
    UserAction {
        session_id: String,
        request_id: String,
        action: UserAction,
    },
}

/// One entry of the persisted history listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub session_id: String,
    pub title: String,
    /// Milliseconds since the Unix epoch.
    pub last_message_date: i64,
}

/// A session handed over from another workspace, ready to restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferredSessionData {
    pub session_id: String,
    pub source_workspace: Option<String>,
    pub pending_input: Option<String>,
}
