//! Response types: progress fragments, agent results and outcome classification.

use crate::document::{Range, TextEdit};
use serde::{Deserialize, Serialize};

/// One incremental unit of agent output.
///
/// Renderers are expected to match on this exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressFragment {
    Markdown {
        content: String,
    },
    /// Summary of edits the agent made or proposes for a document.
    TextEdit {
        uri: String,
        edits: Vec<TextEdit>,
    },
    Reference {
        uri: String,
        #[serde(default)]
        range: Option<Range>,
    },
    FileTree {
        root: FileTreeNode,
    },
    Confirmation {
        title: String,
        message: String,
        #[serde(default)]
        data: serde_json::Value,
    },
}

impl ProgressFragment {
    pub fn markdown(content: impl Into<String>) -> Self {
        Self::Markdown {
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTreeNode {
    pub label: String,
    pub uri: String,
    #[serde(default)]
    pub children: Vec<FileTreeNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub message: String,
    #[serde(default)]
    pub response_is_incomplete: bool,
    #[serde(default)]
    pub response_is_filtered: bool,
}

impl ErrorDetails {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseTimings {
    #[serde(default)]
    pub first_progress_ms: Option<u64>,
    pub total_elapsed_ms: u64,
}

/// What an agent invocation settled with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    #[serde(default)]
    pub error_details: Option<ErrorDetails>,
    #[serde(default)]
    pub timings: Option<ResponseTimings>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl AgentResult {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error_details: Some(ErrorDetails::new(message)),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseOutcome {
    Success,
    Error,
    ErrorWithPartialOutput,
    Filtered,
    Cancelled,
}

impl ResponseOutcome {
    /// Classifies a settled request.
    ///
    /// Cancellation wins over everything; a filtered error wins over a plain
    /// one; an error after some progress is reported as partial output.
    pub fn classify(
        error_details: Option<&ErrorDetails>,
        had_progress: bool,
        cancelled: bool,
    ) -> Self {
        if cancelled {
            return Self::Cancelled;
        }
        match error_details {
            Some(details) if details.response_is_filtered => Self::Filtered,
            Some(_) if had_progress => Self::ErrorWithPartialOutput,
            Some(_) => Self::Error,
            None => Self::Success,
        }
    }
}

/// A suggested next message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Followup {
    pub message: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vote {
    Up,
    Down,
}

/// Accumulated agent output for one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatResponse {
    pub fragments: Vec<ProgressFragment>,
    pub is_complete: bool,
    pub is_canceled: bool,
    pub result: Option<AgentResult>,
    pub outcome: Option<ResponseOutcome>,
    pub followups: Vec<Followup>,
    pub vote: Option<Vote>,
}

impl ChatResponse {
    /// Concatenated markdown content, used for history and plain-text views.
    pub fn to_markdown(&self) -> String {
        self.fragments
            .iter()
            .filter_map(|fragment| match fragment {
                ProgressFragment::Markdown { content } => Some(content.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn error_details(&self) -> Option<&ErrorDetails> {
        self.result.as_ref().and_then(|r| r.error_details.as_ref())
    }
}
