//! Plain-data snapshot of a session, as written to the persisted table.
//!
//! Older snapshots stored messages and response entries as bare strings.
//! Those still decode and are upgraded to structured values on load.

use super::model::WelcomeMessage;
use super::request::{ParsedRequest, ResolvedVariable};
use super::response::{AgentResult, Followup, ProgressFragment, ResponseOutcome, Vote};
use serde::{Deserialize, Serialize};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializableSession {
    #[serde(default = "legacy_version")]
    pub version: u32,
    pub session_id: String,
    /// Milliseconds since the Unix epoch.
    pub creation_date: i64,
    #[serde(default)]
    pub transferred_from: Option<String>,
    #[serde(default)]
    pub welcome_message: Option<WelcomeMessage>,
    #[serde(default)]
    pub requests: Vec<SerializableRequest>,
}

fn legacy_version() -> u32 {
    1
}

impl SerializableSession {
    /// Display title: the first request's text, trimmed to one line.
    pub fn title(&self) -> String {
        self.requests
            .first()
            .map(|r| {
                let text = r.message.text();
                text.lines().next().unwrap_or_default().trim().to_string()
            })
            .unwrap_or_default()
    }

    /// Timestamp of the newest request, or the creation date when empty.
    pub fn last_message_date(&self) -> i64 {
        self.requests
            .iter()
            .map(|r| r.timestamp)
            .max()
            .unwrap_or(self.creation_date)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializableRequest {
    pub request_id: String,
    pub message: SerializedMessage,
    #[serde(default)]
    pub variables: Vec<ResolvedVariable>,
    #[serde(default)]
    pub attempt: u32,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub response: Option<Vec<SerializedFragment>>,
    #[serde(default)]
    pub result: Option<AgentResult>,
    #[serde(default)]
    pub outcome: Option<ResponseOutcome>,
    #[serde(default)]
    pub followups: Vec<Followup>,
    #[serde(default)]
    pub is_canceled: bool,
    #[serde(default)]
    pub vote: Option<Vote>,
}

/// A request message, either structured or a legacy plain string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SerializedMessage {
    Parsed(ParsedRequest),
    Legacy(String),
}

impl SerializedMessage {
    pub fn text(&self) -> &str {
        match self {
            SerializedMessage::Parsed(parsed) => &parsed.text,
            SerializedMessage::Legacy(text) => text,
        }
    }

    pub fn upgrade(self) -> ParsedRequest {
        match self {
            SerializedMessage::Parsed(parsed) => parsed,
            SerializedMessage::Legacy(text) => ParsedRequest::plain(text),
        }
    }
}

/// A response entry, either structured or a legacy markdown string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SerializedFragment {
    Fragment(ProgressFragment),
    Legacy(String),
}

impl SerializedFragment {
    pub fn upgrade(self) -> ProgressFragment {
        match self {
            SerializedFragment::Fragment(fragment) => fragment,
            SerializedFragment::Legacy(content) => ProgressFragment::Markdown { content },
        }
    }
}
