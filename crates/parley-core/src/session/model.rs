//! The conversational state machine for one chat session.

use super::event::{RemovalReason, SessionChange};
use super::request::{ChatRequest, ParsedRequest, ResolvedVariable};
use super::response::{AgentResult, ChatResponse, Followup, ProgressFragment, ResponseOutcome, Vote};
use super::snapshot::{
    SNAPSHOT_VERSION, SerializableRequest, SerializableSession, SerializedFragment,
    SerializedMessage,
};
use crate::error::{ParleyError, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Initialization lifecycle of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum InitState {
    Uninitialized,
    Initializing,
    Ready,
    Failed(String),
}

impl InitState {
    /// `true` once the session is either usable or permanently unusable.
    pub fn is_settled(&self) -> bool {
        matches!(self, InitState::Ready | InitState::Failed(_))
    }
}

/// Greeting shown before the first request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WelcomeMessage {
    pub content: Vec<String>,
    #[serde(default)]
    pub sample_questions: Vec<Followup>,
}

/// One conversation: ordered request/response pairs plus lifecycle state.
///
/// Requests reference their session by id only; the model is the sole owner
/// of its requests. Every mutation is announced on the change channel.
#[derive(Debug)]
pub struct SessionModel {
    session_id: String,
    created_at: DateTime<Utc>,
    requests: Vec<ChatRequest>,
    welcome_message: Option<WelcomeMessage>,
    transferred_from: Option<String>,
    init_state: watch::Sender<InitState>,
    changes: broadcast::Sender<SessionChange>,
}

impl SessionModel {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self::with_created_at(session_id, Utc::now())
    }

    pub fn with_created_at(session_id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        let (init_state, _) = watch::channel(InitState::Uninitialized);
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            session_id: session_id.into(),
            created_at,
            requests: Vec::new(),
            welcome_message: None,
            transferred_from: None,
            init_state,
            changes,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn requests(&self) -> &[ChatRequest] {
        &self.requests
    }

    pub fn request(&self, request_id: &str) -> Option<&ChatRequest> {
        self.requests.iter().find(|r| r.request_id == request_id)
    }

    pub fn welcome_message(&self) -> Option<&WelcomeMessage> {
        self.welcome_message.as_ref()
    }

    pub fn transferred_from(&self) -> Option<&str> {
        self.transferred_from.as_deref()
    }

    pub fn set_transferred_from(&mut self, workspace_id: Option<String>) {
        self.transferred_from = workspace_id;
    }

    pub fn init_state(&self) -> InitState {
        self.init_state.borrow().clone()
    }

    /// A receiver that observes initialization without holding the model.
    pub fn watch_init_state(&self) -> watch::Receiver<InitState> {
        self.init_state.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionChange> {
        self.changes.subscribe()
    }

    fn emit(&self, change: SessionChange) {
        // No subscribers is fine.
        let _ = self.changes.send(change);
    }

    // ============================================================================
    // Lifecycle
    // ============================================================================

    /// `Uninitialized → Initializing`. Any other state is left untouched.
    pub fn start_initialization(&mut self) {
        if *self.init_state.borrow() == InitState::Uninitialized {
            self.init_state.send_replace(InitState::Initializing);
        }
    }

    /// Makes the session usable.
    ///
    /// Fails with `InitializationError` (and moves to `Failed`) when no default
    /// agent is available. A second initialization is rejected.
    pub fn initialize(
        &mut self,
        default_agent: Option<&str>,
        welcome_message: Option<WelcomeMessage>,
    ) -> Result<()> {
        if self.init_state.borrow().is_settled() {
            return Err(ParleyError::invalid_state(format!(
                "session '{}' is already initialized",
                self.session_id
            )));
        }

        if default_agent.is_none() {
            let message = "no default agent is registered".to_string();
            self.init_state
                .send_replace(InitState::Failed(message.clone()));
            return Err(ParleyError::InitializationError(message));
        }

        self.welcome_message = welcome_message;
        self.init_state.send_replace(InitState::Ready);
        self.emit(SessionChange::Initialized);
        Ok(())
    }

    /// Moves the session to `Failed` for reasons outside `initialize`.
    pub fn fail_initialization(&mut self, message: impl Into<String>) {
        self.init_state
            .send_replace(InitState::Failed(message.into()));
    }

    // ============================================================================
    // Requests
    // ============================================================================

    /// Appends a new request with an empty response and returns its id.
    pub fn add_request(
        &mut self,
        message: ParsedRequest,
        variables: Vec<ResolvedVariable>,
        attempt: u32,
        agent_id: Option<String>,
        command: Option<String>,
    ) -> Result<String> {
        if *self.init_state.borrow() != InitState::Ready {
            return Err(ParleyError::invalid_state(format!(
                "session '{}' is not ready",
                self.session_id
            )));
        }

        let request_id = format!("request_{}", uuid::Uuid::new_v4());
        self.requests.push(ChatRequest {
            request_id: request_id.clone(),
            session_id: self.session_id.clone(),
            message,
            variables,
            attempt,
            agent_id,
            command,
            timestamp: Utc::now().timestamp_millis(),
            response: ChatResponse::default(),
        });
        self.emit(SessionChange::RequestAdded {
            request_id: request_id.clone(),
        });
        Ok(request_id)
    }

    /// Appends a fragment to the request's response, preserving call order.
    ///
    /// Unknown requests and completed responses are ignored.
    pub fn accept_response_progress(&mut self, request_id: &str, fragment: ProgressFragment) {
        let session_id = self.session_id.clone();
        let Some(request) = self.request_mut(request_id) else {
            tracing::warn!(
                "[SessionModel] Dropping progress for unknown request {} in session {}",
                request_id,
                session_id
            );
            return;
        };
        if request.response.is_complete {
            tracing::debug!(
                "[SessionModel] Dropping progress for completed request {}",
                request_id
            );
            return;
        }

        request.response.fragments.push(fragment.clone());
        self.emit(SessionChange::ProgressAppended {
            request_id: request_id.to_string(),
            fragment,
        });
    }

    /// Attaches the terminal agent result.
    pub fn set_response(
        &mut self,
        request_id: &str,
        result: AgentResult,
        outcome: ResponseOutcome,
    ) -> Result<()> {
        let request = self.try_request_mut(request_id)?;
        request.response.result = Some(result);
        request.response.outcome = Some(outcome);
        Ok(())
    }

    /// Marks the response complete. Completion happens exactly once.
    pub fn complete_response(&mut self, request_id: &str) -> Result<()> {
        let request = self.try_request_mut(request_id)?;
        if request.response.is_complete {
            return Err(ParleyError::invalid_state(format!(
                "response for '{}' is already complete",
                request_id
            )));
        }
        request.response.is_complete = true;
        self.emit(SessionChange::ResponseCompleted {
            request_id: request_id.to_string(),
        });
        Ok(())
    }

    /// Marks the response as canceled and complete.
    pub fn cancel_request(&mut self, request_id: &str) -> Result<()> {
        let request = self.try_request_mut(request_id)?;
        request.response.is_canceled = true;
        request.response.outcome = Some(ResponseOutcome::Cancelled);
        if !request.response.is_complete {
            request.response.is_complete = true;
            self.emit(SessionChange::ResponseCompleted {
                request_id: request_id.to_string(),
            });
        }
        Ok(())
    }

    /// Excises a request. Callers cancel any in-flight work first.
    pub fn remove_request(
        &mut self,
        request_id: &str,
        reason: RemovalReason,
    ) -> Result<ChatRequest> {
        let index = self
            .requests
            .iter()
            .position(|r| r.request_id == request_id)
            .ok_or_else(|| ParleyError::unknown_request(&self.session_id, request_id))?;
        let request = self.requests.remove(index);
        self.emit(SessionChange::RequestRemoved {
            request_id: request_id.to_string(),
            reason,
        });
        Ok(request)
    }

    /// Takes ownership of a request that was removed from another session.
    pub fn adopt_request(&mut self, mut request: ChatRequest) {
        request.session_id = self.session_id.clone();
        let request_id = request.request_id.clone();
        self.requests.push(request);
        self.emit(SessionChange::RequestAdded { request_id });
    }

    pub fn set_followups(&mut self, request_id: &str, followups: Vec<Followup>) -> Result<()> {
        let request = self.try_request_mut(request_id)?;
        request.response.followups = followups;
        self.emit(SessionChange::FollowupsChanged {
            request_id: request_id.to_string(),
        });
        Ok(())
    }

    pub fn set_vote(&mut self, request_id: &str, vote: Option<Vote>) -> Result<()> {
        let request = self.try_request_mut(request_id)?;
        request.response.vote = vote;
        self.emit(SessionChange::VoteChanged {
            request_id: request_id.to_string(),
            vote,
        });
        Ok(())
    }

    fn request_mut(&mut self, request_id: &str) -> Option<&mut ChatRequest> {
        self.requests.iter_mut().find(|r| r.request_id == request_id)
    }

    fn try_request_mut(&mut self, request_id: &str) -> Result<&mut ChatRequest> {
        let session_id = self.session_id.clone();
        self.request_mut(request_id)
            .ok_or_else(|| ParleyError::unknown_request(session_id, request_id))
    }

    // ============================================================================
    // Snapshots
    // ============================================================================

    pub fn to_snapshot(&self) -> SerializableSession {
        SerializableSession {
            version: SNAPSHOT_VERSION,
            session_id: self.session_id.clone(),
            creation_date: self.created_at.timestamp_millis(),
            transferred_from: self.transferred_from.clone(),
            welcome_message: self.welcome_message.clone(),
            requests: self
                .requests
                .iter()
                .map(|r| SerializableRequest {
                    request_id: r.request_id.clone(),
                    message: SerializedMessage::Parsed(r.message.clone()),
                    variables: r.variables.clone(),
                    attempt: r.attempt,
                    agent_id: r.agent_id.clone(),
                    command: r.command.clone(),
                    timestamp: r.timestamp,
                    response: Some(
                        r.response
                            .fragments
                            .iter()
                            .cloned()
                            .map(SerializedFragment::Fragment)
                            .collect(),
                    ),
                    result: r.response.result.clone(),
                    outcome: r.response.outcome,
                    followups: r.response.followups.clone(),
                    is_canceled: r.response.is_canceled,
                    vote: r.response.vote,
                })
                .collect(),
        }
    }

    /// Rebuilds a session from a snapshot.
    ///
    /// The result is `Uninitialized`; restored responses are complete.
    pub fn from_snapshot(snapshot: SerializableSession) -> Result<Self> {
        let created_at = Utc
            .timestamp_millis_opt(snapshot.creation_date)
            .single()
            .ok_or_else(|| {
                ParleyError::malformed(
                    &snapshot.session_id,
                    format!("invalid creation date {}", snapshot.creation_date),
                )
            })?;

        let session_id = snapshot.session_id;
        let mut model = Self::with_created_at(session_id.clone(), created_at);
        model.transferred_from = snapshot.transferred_from;
        model.welcome_message = snapshot.welcome_message;
        model.requests = snapshot
            .requests
            .into_iter()
            .map(|r| ChatRequest {
                request_id: r.request_id,
                session_id: session_id.clone(),
                message: r.message.upgrade(),
                variables: r.variables,
                attempt: r.attempt,
                agent_id: r.agent_id,
                command: r.command,
                timestamp: r.timestamp,
                response: ChatResponse {
                    fragments: r
                        .response
                        .unwrap_or_default()
                        .into_iter()
                        .map(SerializedFragment::upgrade)
                        .collect(),
                    is_complete: true,
                    is_canceled: r.is_canceled,
                    result: r.result,
                    outcome: r.outcome,
                    followups: r.followups,
                    vote: r.vote,
                },
            })
            .collect();
        Ok(model)
    }
}

#[cfg(test)]
#[path = "model_test.rs"]
mod tests;
