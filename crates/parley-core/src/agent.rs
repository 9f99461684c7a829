//! Agent-side contracts: chat agents, variable resolvers and edit providers.
//!
//! Implementations live outside the engine. Progress flows back through
//! unbounded channels so the engine observes fragments in the order the agent
//! produced them.

use crate::document::WorkspaceEdit;
use crate::session::{
    AgentResult, Followup, ParsedRequest, ProgressFragment, ResolvedVariable, VariableValue,
    WelcomeMessage,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub type ProgressSender = mpsc::UnboundedSender<ProgressFragment>;
pub type EditProgressSender = mpsc::UnboundedSender<EditProgress>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashCommand {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMetadata {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// The agent used when a message mentions none.
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub commands: Vec<SlashCommand>,
}

impl AgentMetadata {
    pub fn has_command(&self, name: &str) -> bool {
        self.commands.iter().any(|c| c.name == name)
    }
}

/// Everything an agent needs to answer one request.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentRequest {
    pub session_id: String,
    pub request_id: String,
    pub agent_id: String,
    pub message: String,
    pub command: Option<String>,
    pub variables: Vec<ResolvedVariable>,
    pub attempt: u32,
}

/// A completed earlier turn with the same agent.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub request: ParsedRequest,
    pub command: Option<String>,
    pub response: Vec<ProgressFragment>,
    pub result: Option<AgentResult>,
}

#[async_trait]
pub trait ChatAgent: Send + Sync {
    fn metadata(&self) -> &AgentMetadata;

    /// Produces a response, streaming fragments through `progress`.
    ///
    /// Implementations should stop producing output once `token` is cancelled.
    async fn invoke(
        &self,
        request: AgentRequest,
        progress: ProgressSender,
        history: Vec<HistoryEntry>,
        token: CancellationToken,
    ) -> anyhow::Result<AgentResult>;

    async fn provide_welcome_message(
        &self,
        _token: CancellationToken,
    ) -> anyhow::Result<Option<WelcomeMessage>> {
        Ok(None)
    }

    async fn provide_followups(
        &self,
        _request: AgentRequest,
        _result: AgentResult,
        _token: CancellationToken,
    ) -> anyhow::Result<Vec<Followup>> {
        Ok(Vec::new())
    }
}

/// Resolves `#name` mentions to values.
#[async_trait]
pub trait VariableResolver: Send + Sync {
    async fn resolve(
        &self,
        name: &str,
        arg: Option<&str>,
        raw_text: &str,
        session_id: &str,
        token: CancellationToken,
    ) -> anyhow::Result<Option<Vec<VariableValue>>>;
}

/// Identifies the response (and code block) an edit request belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseRef {
    pub session_id: String,
    pub request_id: String,
    pub codeblock_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditRequest {
    pub message: String,
    /// Documents the edit is scoped to. Exactly one is accepted.
    pub context: Vec<String>,
}

/// One streamed chunk of proposed edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditProgress {
    pub edit: WorkspaceEdit,
    /// Streamed chunks are revealed progressively; final ones land at once.
    pub progressive: bool,
}

#[async_trait]
pub trait EditProvider: Send + Sync {
    async fn provide_edits(
        &self,
        response: ResponseRef,
        request: EditRequest,
        progress: EditProgressSender,
        token: CancellationToken,
    ) -> anyhow::Result<()>;
}
