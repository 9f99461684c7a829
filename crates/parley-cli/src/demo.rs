//! Built-in collaborators so the CLI works without a model backend.

use async_trait::async_trait;
use parley_core::agent::{
    AgentMetadata, AgentRequest, ChatAgent, EditProgress, EditProgressSender, EditProvider,
    EditRequest, HistoryEntry, ProgressSender, ResponseRef, SlashCommand,
};
use parley_core::document::{
    DocumentHandle, DocumentProvider, Position, Range, TextEdit, WorkspaceEdit,
};
use parley_core::session::{AgentResult, Followup, ProgressFragment, WelcomeMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const WORD_DELAY: Duration = Duration::from_millis(40);

/// Streams the message back word by word. `/shout` answers in capitals.
pub struct EchoAgent {
    metadata: AgentMetadata,
}

impl EchoAgent {
    pub fn new() -> Self {
        Self {
            metadata: AgentMetadata {
                id: "echo".to_string(),
                name: "Echo".to_string(),
                description: "Repeats what you say".to_string(),
                is_default: true,
                commands: vec![SlashCommand {
                    name: "shout".to_string(),
                    description: "Reply in capitals".to_string(),
                }],
            },
        }
    }
}

#[async_trait]
impl ChatAgent for EchoAgent {
    fn metadata(&self) -> &AgentMetadata {
        &self.metadata
    }

    async fn invoke(
        &self,
        request: AgentRequest,
        progress: ProgressSender,
        history: Vec<HistoryEntry>,
        token: CancellationToken,
    ) -> anyhow::Result<AgentResult> {
        let reply = match request.command.as_deref() {
            Some("shout") => request.message.to_uppercase(),
            _ => request.message.clone(),
        };
        let reply = if history.is_empty() {
            reply
        } else {
            format!("{} (turn {})", reply, history.len() + 1)
        };

        for word in reply.split_inclusive(' ') {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(WORD_DELAY) => {}
            }
            progress.send(ProgressFragment::markdown(word))?;
        }
        Ok(AgentResult::default())
    }

    async fn provide_welcome_message(
        &self,
        _token: CancellationToken,
    ) -> anyhow::Result<Option<WelcomeMessage>> {
        Ok(Some(WelcomeMessage {
            content: vec!["Say something and I will say it back.".to_string()],
            sample_questions: Vec::new(),
        }))
    }

    async fn provide_followups(
        &self,
        request: AgentRequest,
        _result: AgentResult,
        _token: CancellationToken,
    ) -> anyhow::Result<Vec<Followup>> {
        if request.command.is_some() {
            return Ok(Vec::new());
        }
        Ok(vec![Followup {
            message: request.message,
            title: Some("Say it louder".to_string()),
            agent_id: Some(self.metadata.id.clone()),
            command: Some("shout".to_string()),
        }])
    }
}

/// Proposes one edit per occurrence of `find` in the target document.
pub struct FindReplaceProvider {
    documents: Arc<dyn DocumentProvider>,
    find: String,
    replace: String,
}

impl FindReplaceProvider {
    pub fn new(documents: Arc<dyn DocumentProvider>, find: &str, replace: &str) -> Self {
        Self {
            documents,
            find: find.to_string(),
            replace: replace.to_string(),
        }
    }
}

#[async_trait]
impl EditProvider for FindReplaceProvider {
    async fn provide_edits(
        &self,
        _response: ResponseRef,
        request: EditRequest,
        progress: EditProgressSender,
        token: CancellationToken,
    ) -> anyhow::Result<()> {
        let Some(uri) = request.context.first() else {
            anyhow::bail!("edit request has no target");
        };
        let text = self.documents.open(uri).await?.get_value();

        for edit in replacements(&text, &self.find, &self.replace) {
            tokio::select! {
                _ = token.cancelled() => return Ok(()),
                _ = tokio::time::sleep(WORD_DELAY * 4) => {}
            }
            progress.send(EditProgress {
                edit: WorkspaceEdit::single(uri.clone(), vec![edit]),
                progressive: true,
            })?;
        }
        Ok(())
    }
}

/// Replacements for every occurrence, last first so each range stays valid
/// after the ones before it landed.
pub fn replacements(text: &str, find: &str, replace: &str) -> Vec<TextEdit> {
    if find.is_empty() {
        return Vec::new();
    }
    let mut edits: Vec<TextEdit> = text
        .match_indices(find)
        .map(|(offset, found)| {
            let start = position_at(text, offset);
            let end = start.advance(found);
            TextEdit::replace(Range { start, end }, replace)
        })
        .collect();
    edits.reverse();
    edits
}

fn position_at(text: &str, offset: usize) -> Position {
    Position::new(0, 0).advance(&text[..offset])
}
