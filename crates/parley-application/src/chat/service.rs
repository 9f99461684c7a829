//! The chat session service.
//!
//! Owns every live [`SessionModel`] and is the only writer of session
//! content while a request is in flight. Sending lives in `dispatch.rs`.

use super::events::{ChatServiceEvent, DisposeReason, HistoryItem, TransferredSessionData, UserAction};
use crate::pending::PendingOperations;
use crate::registry::{AgentRegistry, ParseScope, VariableRegistry};
use chrono::Utc;
use parley_core::agent::AgentMetadata;
use parley_core::config::EngineConfig;
use parley_core::error::{ParleyError, Result};
use parley_core::parser::parse_request;
use parley_core::session::{
    AgentResult, ChatRequest, InitState, ProgressFragment, RemovalReason, ResponseOutcome,
    SerializableSession, SessionChange, SessionModel,
};
use parley_core::storage::BlobStore;
use parley_infrastructure::{PersistedSessionStore, TransferEntry, TransferStore};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::{RwLock, broadcast};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// A live session shared between the service and its in-flight requests.
pub type SharedSession = Arc<RwLock<SessionModel>>;

pub(crate) struct ServiceState {
    pub(crate) config: EngineConfig,
    pub(crate) agents: AgentRegistry,
    pub(crate) variables: VariableRegistry,
    pub(crate) sessions: RwLock<HashMap<String, SharedSession>>,
    pub(crate) pending: PendingOperations,
    persisted: PersistedSessionStore,
    transfers: TransferStore,
    /// Session handed to this workspace, until it is restored.
    transferred: Mutex<Option<TransferEntry>>,
    events: broadcast::Sender<ChatServiceEvent>,
}

/// Entry point for everything that happens to chat sessions.
///
/// Cloning is cheap; clones share the same session table.
#[derive(Clone)]
pub struct ChatService {
    pub(crate) state: Arc<ServiceState>,
}

impl ChatService {
    /// Creates the service and claims any session transferred to this
    /// workspace.
    ///
    /// `workspace_store` holds the persisted session table;
    /// `global_store` is shared by all workspaces and holds transfers.
    pub async fn new(
        config: EngineConfig,
        agents: AgentRegistry,
        variables: VariableRegistry,
        workspace_store: Arc<dyn BlobStore>,
        global_store: Arc<dyn BlobStore>,
    ) -> Self {
        let persisted = PersistedSessionStore::new(workspace_store, config.max_persisted_sessions);
        let transfers = TransferStore::new(global_store, config.transfer_ttl());

        let transferred = match transfers.take_for(&config.workspace_id).await {
            Ok(Some(entry)) => {
                tracing::info!(
                    "[ChatService] Claimed transferred session {} for workspace {}",
                    entry.session.session_id,
                    config.workspace_id
                );
                Some(entry)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("[ChatService] Could not read transferred sessions: {}", e);
                None
            }
        };

        if agents.is_empty() {
            tracing::warn!("[ChatService] No agents registered; sessions will fail to initialize");
        }

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(ServiceState {
                config,
                agents,
                variables,
                sessions: RwLock::new(HashMap::new()),
                pending: PendingOperations::new(),
                persisted,
                transfers,
                transferred: Mutex::new(transferred),
                events,
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.state.config
    }

    pub fn agents(&self) -> Vec<AgentMetadata> {
        self.state.agents.metadata()
    }

    pub(crate) fn parse_scope(&self) -> ParseScope<'_> {
        ParseScope {
            agents: &self.state.agents,
            variables: &self.state.variables,
        }
    }

    pub(crate) fn emit(&self, event: ChatServiceEvent) {
        // No subscribers is fine.
        let _ = self.state.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatServiceEvent> {
        self.state.events.subscribe()
    }

    // ============================================================================
    // Session lifecycle
    // ============================================================================

    /// Creates a session and starts initializing it in the background.
    ///
    /// Returns the new session id immediately; sends wait for initialization.
    pub async fn start_session(&self) -> String {
        let session_id = format!("session_{}", Uuid::new_v4());
        self.install_session(SessionModel::new(session_id.clone()))
            .await;
        tracing::info!("[ChatService] Started session {}", session_id);
        session_id
    }

    pub async fn get_session(&self, session_id: &str) -> Option<SharedSession> {
        self.state.sessions.read().await.get(session_id).cloned()
    }

    pub async fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn subscribe_session(
        &self,
        session_id: &str,
    ) -> Option<broadcast::Receiver<SessionChange>> {
        let session = self.get_session(session_id).await?;
        let receiver = session.read().await.subscribe();
        Some(receiver)
    }

    /// Returns the live session, or brings it back from a pending transfer
    /// or the persisted table.
    pub async fn get_or_restore_session(&self, session_id: &str) -> Result<Option<SharedSession>> {
        if let Some(session) = self.get_session(session_id).await {
            return Ok(Some(session));
        }

        let snapshot = match self.take_transferred(session_id) {
            Some(snapshot) => Some(snapshot),
            None => self
                .state
                .persisted
                .load()
                .await?
                .into_iter()
                .find(|s| s.session_id == session_id),
        };
        let Some(snapshot) = snapshot else {
            return Ok(None);
        };

        let model = match SessionModel::from_snapshot(snapshot) {
            Ok(model) => model,
            Err(e) => {
                tracing::warn!("[ChatService] Cannot restore session {}: {}", session_id, e);
                return Ok(None);
            }
        };
        tracing::info!(
            "[ChatService] Restoring session {} ({} requests)",
            session_id,
            model.requests().len()
        );
        Ok(Some(self.install_session(model).await))
    }

    async fn install_session(&self, mut model: SessionModel) -> SharedSession {
        let session_id = model.session_id().to_string();
        let session = {
            let mut sessions = self.state.sessions.write().await;
            if let Some(existing) = sessions.get(&session_id) {
                return existing.clone();
            }
            model.start_initialization();
            let session = Arc::new(RwLock::new(model));
            sessions.insert(session_id.clone(), session.clone());
            session
        };

        let service = self.clone();
        let initializing = session.clone();
        tokio::spawn(async move {
            service.initialize_session(session_id, initializing).await;
        });
        session
    }

    async fn initialize_session(&self, session_id: String, session: SharedSession) {
        let default_agent = self.state.agents.default_agent();
        let welcome = match &default_agent {
            Some(agent) => match agent
                .provide_welcome_message(CancellationToken::new())
                .await
            {
                Ok(welcome) => welcome,
                Err(e) => {
                    tracing::warn!(
                        "[ChatService] Welcome message for {} failed: {:#}",
                        session_id,
                        e
                    );
                    None
                }
            },
            None => None,
        };

        let default_id = default_agent.map(|agent| agent.metadata().id.clone());
        let result = session
            .write()
            .await
            .initialize(default_id.as_deref(), welcome);

        match result {
            Ok(()) => tracing::debug!("[ChatService] Session {} is ready", session_id),
            Err(e) if e.is_initialization_error() => {
                tracing::error!(
                    "[ChatService] Session {} failed to initialize: {}",
                    session_id,
                    e
                );
                {
                    let mut sessions = self.state.sessions.write().await;
                    if sessions
                        .get(&session_id)
                        .is_some_and(|current| Arc::ptr_eq(current, &session))
                    {
                        sessions.remove(&session_id);
                    }
                }
                self.emit(ChatServiceEvent::SessionDisposed {
                    session_id,
                    reason: DisposeReason::InitializationFailed,
                });
            }
            Err(e) => tracing::warn!("[ChatService] Initializing {}: {}", session_id, e),
        }
    }

    /// Resolves the session and waits until it has initialized.
    pub(crate) async fn ready_session(&self, session_id: &str) -> Result<SharedSession> {
        let session = self
            .get_session(session_id)
            .await
            .ok_or_else(|| ParleyError::unknown_session(session_id))?;

        let mut init = session.read().await.watch_init_state();
        let settled = init.wait_for(InitState::is_settled).await.map_err(|_| {
            ParleyError::internal(format!(
                "session '{}' was dropped during initialization",
                session_id
            ))
        })?;
        let state = InitState::clone(&settled);
        drop(settled);

        match state {
            InitState::Failed(message) => Err(ParleyError::InitializationError(message)),
            _ => Ok(session),
        }
    }

    /// Drops the session from the live table, keeping its content in the
    /// persisted history.
    pub async fn clear_session(&self, session_id: &str) -> Result<()> {
        let session = self
            .state
            .sessions
            .write()
            .await
            .remove(session_id)
            .ok_or_else(|| ParleyError::unknown_session(session_id))?;

        self.state.pending.cancel(session_id);

        let snapshot = session.read().await.to_snapshot();
        if !snapshot.requests.is_empty() {
            if let Err(e) = self.state.persisted.save_merged(vec![snapshot]).await {
                tracing::warn!(
                    "[ChatService] Could not persist cleared session {}: {}",
                    session_id,
                    e
                );
            }
        }

        tracing::info!("[ChatService] Cleared session {}", session_id);
        self.emit(ChatServiceEvent::SessionDisposed {
            session_id: session_id.to_string(),
            reason: DisposeReason::Cleared,
        });
        Ok(())
    }

    /// Cancels every in-flight request. Used on shutdown.
    pub fn dispose(&self) {
        self.state.pending.cancel_all();
    }

    // ============================================================================
    // Requests
    // ============================================================================

    pub fn has_pending_request(&self, session_id: &str) -> bool {
        self.state.pending.contains(session_id)
    }

    /// Signals the session's in-flight request and marks its response
    /// canceled. Returns `false` when nothing was in flight.
    ///
    /// Already-applied side effects (edits) are not rolled back.
    pub async fn cancel_current_request_for_session(&self, session_id: &str) -> bool {
        if !self.state.pending.cancel(session_id) {
            tracing::debug!("[ChatService] Nothing to cancel in session {}", session_id);
            return false;
        }

        if let Some(session) = self.get_session(session_id).await {
            let mut model = session.write().await;
            let in_flight = model
                .requests()
                .iter()
                .rev()
                .find(|r| !r.response.is_complete)
                .map(|r| r.request_id.clone());
            if let Some(request_id) = in_flight {
                if let Err(e) = model.cancel_request(&request_id) {
                    tracing::warn!("[ChatService] Cancel {}: {}", request_id, e);
                }
            }
        }

        tracing::info!("[ChatService] Cancelled request in session {}", session_id);
        true
    }

    /// Removes a request, cancelling it first when it is still running.
    pub async fn remove_request(&self, session_id: &str, request_id: &str) -> Result<()> {
        let session = self
            .get_session(session_id)
            .await
            .ok_or_else(|| ParleyError::unknown_session(session_id))?;

        let in_flight = {
            let model = session.read().await;
            let request = model
                .request(request_id)
                .ok_or_else(|| ParleyError::unknown_request(session_id, request_id))?;
            !request.response.is_complete
        };
        if in_flight {
            self.cancel_current_request_for_session(session_id).await;
        }

        session
            .write()
            .await
            .remove_request(request_id, RemovalReason::Removal)?;
        Ok(())
    }

    /// Inserts a request taken from another session.
    pub async fn adopt_request(&self, session_id: &str, request: ChatRequest) -> Result<()> {
        let session = self.ready_session(session_id).await?;
        session.write().await.adopt_request(request);
        Ok(())
    }

    /// Moves a completed request from one session to another.
    pub async fn move_request(
        &self,
        from_session_id: &str,
        to_session_id: &str,
        request_id: &str,
    ) -> Result<()> {
        let target = self.ready_session(to_session_id).await?;
        let source = self
            .get_session(from_session_id)
            .await
            .ok_or_else(|| ParleyError::unknown_session(from_session_id))?;

        {
            let model = source.read().await;
            let request = model
                .request(request_id)
                .ok_or_else(|| ParleyError::unknown_request(from_session_id, request_id))?;
            if !request.response.is_complete {
                return Err(ParleyError::invalid_state(format!(
                    "request '{}' is still in flight",
                    request_id
                )));
            }
        }

        let request = source
            .write()
            .await
            .remove_request(request_id, RemovalReason::Adoption)?;
        target.write().await.adopt_request(request);
        Ok(())
    }

    /// Records a finished exchange that did not go through an agent.
    pub async fn add_complete_request(
        &self,
        session_id: &str,
        message: &str,
        fragments: Vec<ProgressFragment>,
        result: Option<AgentResult>,
    ) -> Result<String> {
        let session = self.ready_session(session_id).await?;
        let parsed = parse_request(message, &self.parse_scope());
        let agent_id = parsed
            .agent()
            .map(str::to_string)
            .or_else(|| {
                self.state
                    .agents
                    .default_agent()
                    .map(|agent| agent.metadata().id.clone())
            });
        let command = parsed.command().map(str::to_string);

        let mut model = session.write().await;
        let request_id = model.add_request(parsed, Vec::new(), 0, agent_id, command)?;
        let had_progress = !fragments.is_empty();
        for fragment in fragments {
            model.accept_response_progress(&request_id, fragment);
        }
        let result = result.unwrap_or_default();
        let outcome = ResponseOutcome::classify(result.error_details.as_ref(), had_progress, false);
        model.set_response(&request_id, result, outcome)?;
        model.complete_response(&request_id)?;
        Ok(request_id)
    }

    pub async fn notify_user_action(
        &self,
        session_id: &str,
        request_id: &str,
        action: UserAction,
    ) -> Result<()> {
        if let UserAction::Vote { vote } = &action {
            let session = self
                .get_session(session_id)
                .await
                .ok_or_else(|| ParleyError::unknown_session(session_id))?;
            session.write().await.set_vote(request_id, Some(*vote))?;
        }

        tracing::debug!(
            "[ChatService] User action on {}/{}: {:?}",
            session_id,
            request_id,
            action
        );
        self.emit(ChatServiceEvent::UserAction {
            session_id: session_id.to_string(),
            request_id: request_id.to_string(),
            action,
        });
        Ok(())
    }

    // ============================================================================
    // History & persistence
    // ============================================================================

    /// Persisted sessions that are not live, most recently used first.
    pub async fn history(&self) -> Result<Vec<HistoryItem>> {
        let live: HashSet<String> = self.state.sessions.read().await.keys().cloned().collect();
        let mut items: Vec<HistoryItem> = self
            .state
            .persisted
            .load()
            .await?
            .into_iter()
            .filter(|s| !live.contains(&s.session_id))
            .map(|s| HistoryItem {
                title: s.title(),
                last_message_date: s.last_message_date(),
                session_id: s.session_id,
            })
            .collect();
        items.sort_by(|a, b| b.last_message_date.cmp(&a.last_message_date));
        Ok(items)
    }

    pub async fn remove_history_entry(&self, session_id: &str) -> Result<bool> {
        self.state.persisted.remove(session_id).await
    }

    pub async fn clear_all_history(&self) -> Result<()> {
        self.state.persisted.clear().await?;
        tracing::info!("[ChatService] Cleared session history");
        Ok(())
    }

    /// Writes every live session with at least one request into the persisted
    /// table. Called before shutdown. Returns how many sessions were written.
    pub async fn persist(&self) -> Result<usize> {
        let sessions: Vec<SharedSession> =
            self.state.sessions.read().await.values().cloned().collect();

        let mut snapshots = Vec::with_capacity(sessions.len());
        for session in sessions {
            let snapshot = session.read().await.to_snapshot();
            if !snapshot.requests.is_empty() {
                snapshots.push(snapshot);
            }
        }

        let count = snapshots.len();
        self.state.persisted.save_merged(snapshots).await?;
        tracing::info!("[ChatService] Persisted {} live sessions", count);
        Ok(count)
    }

    // ============================================================================
    // Transfer
    // ============================================================================

    /// Parks a copy of the session for `destination_workspace` to claim.
    pub async fn transfer_session(
        &self,
        session_id: &str,
        destination_workspace: &str,
        pending_input: Option<String>,
    ) -> Result<()> {
        let session = self
            .get_session(session_id)
            .await
            .ok_or_else(|| ParleyError::unknown_session(session_id))?;

        let mut snapshot = session.read().await.to_snapshot();
        snapshot.transferred_from = Some(self.state.config.workspace_id.clone());

        self.state
            .transfers
            .add(TransferEntry {
                session: snapshot,
                destination_workspace: destination_workspace.to_string(),
                timestamp_ms: Utc::now().timestamp_millis(),
                pending_input,
            })
            .await
    }

    /// The session transferred to this workspace, if one was claimed and has
    /// not been restored yet.
    pub fn transferred_session_data(&self) -> Option<TransferredSessionData> {
        let transferred = self.state.transferred.lock().unwrap_or_else(|e| e.into_inner());
        transferred.as_ref().map(|entry| TransferredSessionData {
            session_id: entry.session.session_id.clone(),
            source_workspace: entry.session.transferred_from.clone(),
            pending_input: entry.pending_input.clone(),
        })
    }

    fn take_transferred(&self, session_id: &str) -> Option<SerializableSession> {
        let mut transferred = self.state.transferred.lock().unwrap_or_else(|e| e.into_inner());
        if transferred
            .as_ref()
            .is_some_and(|entry| entry.session.session_id == session_id)
        {
            return transferred.take().map(|entry| entry.session);
        }
        None
    }
}

#[cfg(test)]
#[path = "service_test.rs"]
mod tests;
