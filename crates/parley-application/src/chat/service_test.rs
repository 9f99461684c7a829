use super::*;
use crate::chat::{SendRequestOptions, UserAction};
use async_trait::async_trait;
use parley_core::agent::{
    AgentRequest, ChatAgent, HistoryEntry, ProgressSender, SlashCommand, VariableResolver,
};
use parley_core::session::{Followup, VariableValue, Vote};
use parley_infrastructure::MemoryBlobStore;
use std::sync::Mutex as StdMutex;
use tokio::sync::Semaphore;

// ============================================================================
// Mock collaborators
// ============================================================================

struct ScriptedAgent {
    metadata: AgentMetadata,
    fragments: Vec<String>,
    gate: Option<Arc<Semaphore>>,
    failure: Option<String>,
    followups: Vec<Followup>,
    seen: StdMutex<Vec<(AgentRequest, usize)>>,
}

impl ScriptedAgent {
    fn new(id: &str, is_default: bool) -> Self {
        Self {
            metadata: AgentMetadata {
                id: id.to_string(),
                name: id.to_string(),
                description: String::new(),
                is_default,
                commands: vec![SlashCommand {
                    name: "explain".to_string(),
                    description: String::new(),
                }],
            },
            fragments: vec!["Hello".to_string(), ", ".to_string(), "world".to_string()],
            gate: None,
            failure: None,
            followups: Vec::new(),
            seen: StdMutex::new(Vec::new()),
        }
    }

    fn with_fragments(mut self, fragments: &[&str]) -> Self {
        self.fragments = fragments.iter().map(|f| f.to_string()).collect();
        self
    }

    fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    fn with_followups(mut self, followups: Vec<Followup>) -> Self {
        self.followups = followups;
        self
    }

    fn seen(&self) -> Vec<(AgentRequest, usize)> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatAgent for ScriptedAgent {
    fn metadata(&self) -> &AgentMetadata {
        &self.metadata
    }

    async fn invoke(
        &self,
        request: AgentRequest,
        progress: ProgressSender,
        history: Vec<HistoryEntry>,
        _token: CancellationToken,
    ) -> anyhow::Result<AgentResult> {
        self.seen.lock().unwrap().push((request, history.len()));
        for fragment in &self.fragments {
            progress.send(ProgressFragment::markdown(fragment.clone()))?;
        }
        if let Some(gate) = &self.gate {
            gate.acquire().await?.forget();
        }
        if let Some(message) = &self.failure {
            anyhow::bail!("{}", message);
        }
        Ok(AgentResult::default())
    }

    async fn provide_followups(
        &self,
        _request: AgentRequest,
        _result: AgentResult,
        _token: CancellationToken,
    ) -> anyhow::Result<Vec<Followup>> {
        Ok(self.followups.clone())
    }
}

struct FixedResolver(&'static str);

#[async_trait]
impl VariableResolver for FixedResolver {
    async fn resolve(
        &self,
        _name: &str,
        arg: Option<&str>,
        _raw_text: &str,
        _session_id: &str,
        _token: CancellationToken,
    ) -> anyhow::Result<Option<Vec<VariableValue>>> {
        Ok(Some(vec![VariableValue::text(format!(
            "{}:{}",
            self.0,
            arg.unwrap_or_default()
        ))]))
    }
}

struct BrokenResolver;

#[async_trait]
impl VariableResolver for BrokenResolver {
    async fn resolve(
        &self,
        _name: &str,
        _arg: Option<&str>,
        _raw_text: &str,
        _session_id: &str,
        _token: CancellationToken,
    ) -> anyhow::Result<Option<Vec<VariableValue>>> {
        anyhow::bail!("resolver exploded")
    }
}

// ============================================================================
// Helpers
// ============================================================================

async fn service_with(agents: Vec<Arc<ScriptedAgent>>) -> ChatService {
    service_with_variables(agents, VariableRegistry::new()).await
}

async fn service_with_variables(
    agents: Vec<Arc<ScriptedAgent>>,
    variables: VariableRegistry,
) -> ChatService {
    let mut registry = AgentRegistry::new();
    for agent in agents {
        registry.register(agent);
    }
    ChatService::new(
        EngineConfig::default(),
        registry,
        variables,
        Arc::new(MemoryBlobStore::new()),
        Arc::new(MemoryBlobStore::new()),
    )
    .await
}

async fn send(service: &ChatService, session_id: &str, text: &str) -> String {
    let handle = service
        .send_request(session_id, text, SendRequestOptions::default())
        .await
        .unwrap()
        .expect("send accepted");
    let request_id = handle.request_created.await.unwrap();
    handle.response_complete.await.unwrap();
    request_id
}

async fn fetch_request(service: &ChatService, session_id: &str, request_id: &str) -> ChatRequest {
    let session = service.get_session(session_id).await.unwrap();
    let model = session.read().await;
    model.request(request_id).cloned().unwrap()
}

// ============================================================================
// Sending
// ============================================================================

#[tokio::test]
async fn test_send_creates_one_request_and_completes_with_success() {
    let gate = Arc::new(Semaphore::new(0));
    let agent = Arc::new(ScriptedAgent::new("chat", true).gated(gate.clone()));
    let service = service_with(vec![agent.clone()]).await;
    let session_id = service.start_session().await;

    let handle = service
        .send_request(&session_id, "hello", SendRequestOptions::default())
        .await
        .unwrap()
        .unwrap();
    let request_id = handle.request_created.await.unwrap();

    assert!(service.has_pending_request(&session_id));
    assert_eq!(service.state.pending.len(), 1);
    {
        let session = service.get_session(&session_id).await.unwrap();
        assert_eq!(session.read().await.requests().len(), 1);
    }

    gate.add_permits(1);
    handle.response_complete.await.unwrap();

    let request = fetch_request(&service, &session_id, &request_id).await;
    assert!(request.response.is_complete);
    assert_eq!(request.response.outcome, Some(ResponseOutcome::Success));
    assert_eq!(request.response.to_markdown(), "Hello, world");
    assert!(request.response.result.unwrap().timings.is_some());
    assert!(!service.has_pending_request(&session_id));
}

#[tokio::test]
async fn test_blank_message_creates_nothing() {
    let service = service_with(vec![Arc::new(ScriptedAgent::new("chat", true))]).await;
    let session_id = service.start_session().await;

    let handle = service
        .send_request(&session_id, "   \n\t", SendRequestOptions::default())
        .await
        .unwrap();
    assert!(handle.is_none());
    assert!(!service.has_pending_request(&session_id));

    let session = service.get_session(&session_id).await.unwrap();
    assert!(session.read().await.requests().is_empty());
}

#[tokio::test]
async fn test_unknown_session_is_an_error() {
    let service = service_with(vec![Arc::new(ScriptedAgent::new("chat", true))]).await;
    let err = service
        .send_request("nope", "hello", SendRequestOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_unknown_session());
}

#[tokio::test]
async fn test_second_send_while_in_flight_is_rejected() {
    let gate = Arc::new(Semaphore::new(0));
    let agent = Arc::new(ScriptedAgent::new("chat", true).gated(gate.clone()));
    let service = service_with(vec![agent]).await;
    let session_id = service.start_session().await;

    let first = service
        .send_request(&session_id, "first", SendRequestOptions::default())
        .await
        .unwrap()
        .unwrap();
    let second = service
        .send_request(&session_id, "second", SendRequestOptions::default())
        .await
        .unwrap();
    assert!(second.is_none());

    gate.add_permits(1);
    first.response_complete.await.unwrap();

    let session = service.get_session(&session_id).await.unwrap();
    assert_eq!(session.read().await.requests().len(), 1);

    // Free again once the first one settled.
    gate.add_permits(1);
    send(&service, &session_id, "third").await;
}

#[tokio::test]
async fn test_sessions_do_not_block_each_other() {
    let gate = Arc::new(Semaphore::new(0));
    let agent = Arc::new(ScriptedAgent::new("chat", true).gated(gate.clone()));
    let service = service_with(vec![agent]).await;
    let a = service.start_session().await;
    let b = service.start_session().await;

    let in_a = service
        .send_request(&a, "one", SendRequestOptions::default())
        .await
        .unwrap()
        .unwrap();
    let in_b = service
        .send_request(&b, "two", SendRequestOptions::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(service.state.pending.len(), 2);

    gate.add_permits(1);
    gate.add_permits(1);
    in_a.response_complete.await.unwrap();
    in_b.response_complete.await.unwrap();
    assert!(service.state.pending.is_empty());
}

#[tokio::test]
async fn test_cancel_marks_response_and_releases_session() {
    let gate = Arc::new(Semaphore::new(0));
    let agent = Arc::new(ScriptedAgent::new("chat", true).gated(gate));
    let service = service_with(vec![agent]).await;
    let session_id = service.start_session().await;

    let handle = service
        .send_request(&session_id, "long task", SendRequestOptions::default())
        .await
        .unwrap()
        .unwrap();
    let request_id = handle.request_created.await.unwrap();

    assert!(service.cancel_current_request_for_session(&session_id).await);
    handle.response_complete.await.unwrap();

    let request = fetch_request(&service, &session_id, &request_id).await;
    assert!(request.response.is_canceled);
    assert!(request.response.is_complete);
    assert_eq!(request.response.outcome, Some(ResponseOutcome::Cancelled));
    assert!(!service.has_pending_request(&session_id));
    assert!(!service.cancel_current_request_for_session(&session_id).await);
}

#[tokio::test]
async fn test_cancel_then_agent_failure_releases_session_once() {
    let gate = Arc::new(Semaphore::new(0));
    let agent = Arc::new(
        ScriptedAgent::new("chat", true)
            .gated(gate.clone())
            .failing("rejected after cancel"),
    );
    let service = service_with(vec![agent]).await;
    let session_id = service.start_session().await;

    let handle = service
        .send_request(&session_id, "doomed", SendRequestOptions::default())
        .await
        .unwrap()
        .unwrap();
    let request_id = handle.request_created.await.unwrap();

    assert!(service.cancel_current_request_for_session(&session_id).await);
    gate.add_permits(1);
    handle.response_complete.await.unwrap();
    // Whether or not the failing invocation got to run, leave the gate shut.
    while let Ok(permit) = gate.try_acquire() {
        permit.forget();
    }

    let request = fetch_request(&service, &session_id, &request_id).await;
    assert_eq!(request.response.outcome, Some(ResponseOutcome::Cancelled));
    assert!(request.response.error_details().is_none());
    assert!(service.state.pending.is_empty());

    // The next send owns the session until it settles.
    let next = service
        .send_request(&session_id, "again", SendRequestOptions::default())
        .await
        .unwrap()
        .expect("session released");
    next.request_created.await.unwrap();
    assert!(service.has_pending_request(&session_id));
    assert_eq!(service.state.pending.len(), 1);

    gate.add_permits(1);
    next.response_complete.await.unwrap();
    assert!(service.state.pending.is_empty());
}

#[tokio::test]
async fn test_agent_failure_becomes_error_response() {
    let agent = Arc::new(ScriptedAgent::new("chat", true).failing("backend down"));
    let service = service_with(vec![agent]).await;
    let session_id = service.start_session().await;

    let request_id = send(&service, &session_id, "hello").await;
    let request = fetch_request(&service, &session_id, &request_id).await;
    assert!(request.response.is_complete);
    assert_eq!(
        request.response.outcome,
        Some(ResponseOutcome::ErrorWithPartialOutput)
    );
    assert!(
        request
            .response
            .error_details()
            .unwrap()
            .message
            .contains("backend down")
    );
    assert!(!service.has_pending_request(&session_id));

    let silent = Arc::new(
        ScriptedAgent::new("chat", true)
            .with_fragments(&[])
            .failing("nothing"),
    );
    let service = service_with(vec![silent]).await;
    let session_id = service.start_session().await;
    let request_id = send(&service, &session_id, "hello").await;
    let request = fetch_request(&service, &session_id, &request_id).await;
    assert_eq!(request.response.outcome, Some(ResponseOutcome::Error));
}

#[tokio::test]
async fn test_variable_failures_are_isolated() {
    let agent = Arc::new(ScriptedAgent::new("chat", true));
    let mut variables = VariableRegistry::new();
    variables.register("file", Arc::new(FixedResolver("file")));
    variables.register("broken", Arc::new(BrokenResolver));
    let service = service_with_variables(vec![agent.clone()], variables).await;
    let session_id = service.start_session().await;

    let request_id = send(&service, &session_id, "look at #file:main.rs and #broken").await;

    let request = fetch_request(&service, &session_id, &request_id).await;
    assert_eq!(request.variables.len(), 1);
    assert_eq!(request.variables[0].name, "file");
    assert_eq!(
        request.variables[0].values[0].value,
        serde_json::json!("file:main.rs")
    );
    assert_eq!(request.response.outcome, Some(ResponseOutcome::Success));

    let seen = agent.seen();
    assert_eq!(seen[0].0.variables.len(), 1);
}

#[tokio::test]
async fn test_mentioned_agent_and_history_scope() {
    let chat = Arc::new(ScriptedAgent::new("chat", true));
    let coder = Arc::new(ScriptedAgent::new("coder", false));
    let service = service_with(vec![chat.clone(), coder.clone()]).await;
    let session_id = service.start_session().await;

    send(&service, &session_id, "first").await;
    send(&service, &session_id, "@coder fix it").await;
    send(&service, &session_id, "/explain again").await;

    let chat_calls = chat.seen();
    assert_eq!(chat_calls.len(), 2);
    assert_eq!(chat_calls[0].1, 0);
    // Only the earlier turn with the same agent.
    assert_eq!(chat_calls[1].1, 1);
    assert_eq!(chat_calls[1].0.command.as_deref(), Some("explain"));

    let coder_calls = coder.seen();
    assert_eq!(coder_calls.len(), 1);
    assert_eq!(coder_calls[0].0.message, "fix it");
    assert_eq!(coder_calls[0].1, 0);
}

#[tokio::test]
async fn test_followups_arrive_after_completion() {
    let agent = Arc::new(ScriptedAgent::new("chat", true).with_followups(vec![Followup {
        message: "Tell me more".to_string(),
        title: None,
        agent_id: None,
        command: None,
    }]));
    let service = service_with(vec![agent]).await;
    let session_id = service.start_session().await;
    let mut changes = service.subscribe_session(&session_id).await.unwrap();

    let request_id = send(&service, &session_id, "hello").await;

    loop {
        match changes.recv().await.unwrap() {
            SessionChange::FollowupsChanged { request_id: id } if id == request_id => break,
            _ => continue,
        }
    }
    let request = fetch_request(&service, &session_id, &request_id).await;
    assert_eq!(request.response.followups.len(), 1);
}

#[tokio::test]
async fn test_resend_replaces_request_with_next_attempt() {
    let service = service_with(vec![Arc::new(ScriptedAgent::new("chat", true))]).await;
    let session_id = service.start_session().await;
    let first = send(&service, &session_id, "hello").await;

    let handle = service
        .resend_request(&session_id, &first)
        .await
        .unwrap()
        .unwrap();
    let second = handle.request_created.await.unwrap();
    handle.response_complete.await.unwrap();

    let session = service.get_session(&session_id).await.unwrap();
    let model = session.read().await;
    assert_eq!(model.requests().len(), 1);
    assert!(model.request(&first).is_none());
    assert_eq!(model.request(&second).unwrap().attempt, 1);
}

#[tokio::test]
async fn test_resend_racing_a_new_send_never_loses_the_original() {
    let service = service_with(vec![Arc::new(ScriptedAgent::new("chat", true))]).await;
    let session_id = service.start_session().await;
    let first = send(&service, &session_id, "original").await;

    let session = service.get_session(&session_id).await.unwrap();
    let held = session.write().await;

    let resend = tokio::spawn({
        let service = service.clone();
        let session_id = session_id.clone();
        let first = first.clone();
        async move { service.resend_request(&session_id, &first).await }
    });
    let fresh = tokio::spawn({
        let service = service.clone();
        let session_id = session_id.clone();
        async move {
            service
                .send_request(&session_id, "new message", SendRequestOptions::default())
                .await
        }
    });
    tokio::task::yield_now().await;
    drop(held);

    let resend = resend.await.unwrap().unwrap();
    let fresh = fresh.await.unwrap().unwrap();
    assert!(resend.is_some() != fresh.is_some(), "exactly one send wins");
    let resent = resend.is_some();
    for handle in resend.into_iter().chain(fresh) {
        handle.response_complete.await.unwrap();
    }

    let model = session.read().await;
    let texts: Vec<&str> = model
        .requests()
        .iter()
        .map(|r| r.message.text.as_str())
        .collect();
    if resent {
        assert!(model.request(&first).is_none());
        assert_eq!(texts, vec!["original"]);
        assert_eq!(model.requests()[0].attempt, 1);
    } else {
        assert!(model.request(&first).is_some());
        assert_eq!(texts, vec!["original", "new message"]);
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_initialization_without_default_agent_disposes_session() {
    let service = service_with(vec![Arc::new(ScriptedAgent::new("helper", false))]).await;
    let mut events = service.subscribe();
    let session_id = service.start_session().await;

    match events.recv().await.unwrap() {
        ChatServiceEvent::SessionDisposed { session_id: id, reason } => {
            assert_eq!(id, session_id);
            assert_eq!(reason, DisposeReason::InitializationFailed);
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(service.get_session(&session_id).await.is_none());
    let err = service
        .send_request(&session_id, "hello", SendRequestOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_unknown_session());
}

#[tokio::test]
async fn test_remove_and_move_requests() {
    let service = service_with(vec![Arc::new(ScriptedAgent::new("chat", true))]).await;
    let a = service.start_session().await;
    let b = service.start_session().await;
    let keep = send(&service, &a, "keep me").await;
    let drop_me = send(&service, &a, "drop me").await;

    service.remove_request(&a, &drop_me).await.unwrap();
    service.move_request(&a, &b, &keep).await.unwrap();

    let a_model = service.get_session(&a).await.unwrap();
    assert!(a_model.read().await.requests().is_empty());
    let moved = fetch_request(&service, &b, &keep).await;
    assert_eq!(moved.session_id, b);

    let err = service.remove_request(&a, &keep).await.unwrap_err();
    assert!(matches!(err, ParleyError::UnknownRequest { .. }));
}

#[tokio::test]
async fn test_add_complete_request_and_vote() {
    let service = service_with(vec![Arc::new(ScriptedAgent::new("chat", true))]).await;
    let mut events = service.subscribe();
    let session_id = service.start_session().await;

    let request_id = service
        .add_complete_request(
            &session_id,
            "imported question",
            vec![ProgressFragment::markdown("imported answer")],
            None,
        )
        .await
        .unwrap();

    service
        .notify_user_action(&session_id, &request_id, UserAction::Vote { vote: Vote::Up })
        .await
        .unwrap();

    let request = fetch_request(&service, &session_id, &request_id).await;
    assert_eq!(request.response.outcome, Some(ResponseOutcome::Success));
    assert_eq!(request.response.vote, Some(Vote::Up));
    match events.recv().await.unwrap() {
        ChatServiceEvent::UserAction { action, .. } => {
            assert_eq!(action, UserAction::Vote { vote: Vote::Up })
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

// ============================================================================
// Persistence & transfer
// ============================================================================

#[tokio::test]
async fn test_persist_history_and_restore() {
    let workspace = Arc::new(MemoryBlobStore::new());
    let mut agents = AgentRegistry::new();
    agents.register(Arc::new(ScriptedAgent::new("chat", true)));

    let service = ChatService::new(
        EngineConfig::default(),
        agents.clone(),
        VariableRegistry::new(),
        workspace.clone(),
        Arc::new(MemoryBlobStore::new()),
    )
    .await;
    let used = service.start_session().await;
    let _empty = service.start_session().await;
    send(&service, &used, "remember this").await;
    assert_eq!(service.persist().await.unwrap(), 1);

    // A fresh service over the same workspace storage.
    let restarted = ChatService::new(
        EngineConfig::default(),
        agents,
        VariableRegistry::new(),
        workspace,
        Arc::new(MemoryBlobStore::new()),
    )
    .await;
    let history = restarted.history().await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].session_id, used);
    assert_eq!(history[0].title, "remember this");

    let session = restarted
        .get_or_restore_session(&used)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.read().await.requests().len(), 1);
    // Restored sessions accept new requests once initialized.
    send(&restarted, &used, "and this").await;
    assert!(restarted.history().await.unwrap().is_empty());

    assert!(restarted.remove_history_entry(&used).await.unwrap());
    assert!(
        restarted
            .get_or_restore_session("missing")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_clear_session_keeps_history() {
    let service = service_with(vec![Arc::new(ScriptedAgent::new("chat", true))]).await;
    let mut events = service.subscribe();
    let session_id = service.start_session().await;
    send(&service, &session_id, "hello").await;

    service.clear_session(&session_id).await.unwrap();
    assert!(service.get_session(&session_id).await.is_none());
    match events.recv().await.unwrap() {
        ChatServiceEvent::SessionDisposed { reason, .. } => {
            assert_eq!(reason, DisposeReason::Cleared)
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(service.history().await.unwrap().len(), 1);

    service.clear_all_history().await.unwrap();
    assert!(service.history().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_transfer_to_another_workspace() {
    let global = Arc::new(MemoryBlobStore::new());
    let mut agents = AgentRegistry::new();
    agents.register(Arc::new(ScriptedAgent::new("chat", true)));

    let source = ChatService::new(
        EngineConfig {
            workspace_id: "ws-a".to_string(),
            ..EngineConfig::default()
        },
        agents.clone(),
        VariableRegistry::new(),
        Arc::new(MemoryBlobStore::new()),
        global.clone(),
    )
    .await;
    let session_id = source.start_session().await;
    send(&source, &session_id, "carry me over").await;
    source
        .transfer_session(&session_id, "ws-b", Some("half typed".to_string()))
        .await
        .unwrap();

    let destination = ChatService::new(
        EngineConfig {
            workspace_id: "ws-b".to_string(),
            ..EngineConfig::default()
        },
        agents,
        VariableRegistry::new(),
        Arc::new(MemoryBlobStore::new()),
        global,
    )
    .await;

    let data = destination.transferred_session_data().unwrap();
    assert_eq!(data.session_id, session_id);
    assert_eq!(data.source_workspace.as_deref(), Some("ws-a"));
    assert_eq!(data.pending_input.as_deref(), Some("half typed"));

    let session = destination
        .get_or_restore_session(&session_id)
        .await
        .unwrap()
        .unwrap();
    {
        let model = session.read().await;
        assert_eq!(model.requests().len(), 1);
        assert_eq!(model.transferred_from(), Some("ws-a"));
    }
    assert!(destination.transferred_session_data().is_none());
}
