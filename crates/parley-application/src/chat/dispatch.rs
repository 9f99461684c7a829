//! Sending a message: parse, resolve variables, run the agent, stream its
//! progress into the session.

use super::service::{ChatService, SharedSession};
use crate::pending::PendingGuard;
use crate::registry::VariableRegistry;
use futures::future::join_all;
use parley_core::agent::{AgentRequest, ChatAgent, HistoryEntry};
use parley_core::error::{ParleyError, Result};
use parley_core::parser::parse_request;
use parley_core::session::{
    AgentResult, ParsedRequest, RemovalReason, ResolvedVariable, ResponseOutcome, ResponseTimings,
    SessionModel,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct SendRequestOptions {
    /// Agent to use when the message mentions none. Falls back to the
    /// default agent.
    pub agent_id: Option<String>,
    pub attempt: u32,
}

/// Two completion points of an accepted send.
#[derive(Debug)]
pub struct SendRequestHandle {
    /// Resolves with the request id as soon as the request exists in the
    /// session. Closed without a value when the send was cancelled before
    /// that point.
    pub request_created: oneshot::Receiver<String>,
    /// Finishes once the response is complete.
    pub response_complete: JoinHandle<()>,
}

impl ChatService {
    /// Sends `text` to the session.
    ///
    /// - blank text: `Ok(None)`, nothing created
    /// - unknown session: `Err(UnknownSession)`
    /// - session failed to initialize: `Err(InitializationError)`
    /// - a request already in flight for the session: `Ok(None)`
    ///
    /// Agent failures never surface here; they end up as an error result on
    /// the response.
    pub async fn send_request(
        &self,
        session_id: &str,
        text: &str,
        options: SendRequestOptions,
    ) -> Result<Option<SendRequestHandle>> {
        if text.trim().is_empty() {
            tracing::debug!("[ChatService] Ignoring blank message for session {}", session_id);
            return Ok(None);
        }

        let session = self.ready_session(session_id).await?;

        let Some(guard) = self.state.pending.try_begin(session_id) else {
            tracing::warn!(
                "[ChatService] Session {} already has a request in flight; rejecting",
                session_id
            );
            return Ok(None);
        };

        let (job, created) = self.prepare(session, guard, text, options)?;
        Ok(Some(job.spawn(created)))
    }

    /// Sends an earlier request again as a new attempt, replacing it.
    ///
    /// The session is claimed and the job prepared before the original
    /// request is removed, so a rejected resend leaves the session as it was.
    pub async fn resend_request(
        &self,
        session_id: &str,
        request_id: &str,
    ) -> Result<Option<SendRequestHandle>> {
        let session = self.ready_session(session_id).await?;

        let Some(guard) = self.state.pending.try_begin(session_id) else {
            tracing::warn!(
                "[ChatService] Cannot resend in session {} while a request is in flight",
                session_id
            );
            return Ok(None);
        };

        let (job, created) = {
            let mut model = session.write().await;
            let request = model
                .request(request_id)
                .ok_or_else(|| ParleyError::unknown_request(session_id, request_id))?;
            let options = SendRequestOptions {
                agent_id: request.agent_id.clone(),
                attempt: request.attempt + 1,
            };
            let text = request.message.text.clone();
            let prepared = self.prepare(session.clone(), guard, &text, options)?;
            model.remove_request(request_id, RemovalReason::Resend)?;
            prepared
        };

        Ok(Some(job.spawn(created)))
    }

    /// Builds the job for a send that already holds the session.
    fn prepare(
        &self,
        session: SharedSession,
        guard: PendingGuard,
        text: &str,
        options: SendRequestOptions,
    ) -> Result<(RequestJob, oneshot::Receiver<String>)> {
        let parsed = parse_request(text, &self.parse_scope());
        let agent = self
            .select_agent(&parsed, options.agent_id.as_deref())
            .ok_or_else(|| ParleyError::internal("no agent available for request"))?;

        tracing::debug!(
            "[ChatService] Sending to '{}' in session {} (attempt {})",
            agent.metadata().id,
            guard.key(),
            options.attempt
        );

        let (created_tx, created_rx) = oneshot::channel();
        let job = RequestJob {
            service: self.clone(),
            session,
            guard,
            parsed,
            agent,
            attempt: options.attempt,
            created: created_tx,
        };
        Ok((job, created_rx))
    }

    fn select_agent(
        &self,
        parsed: &ParsedRequest,
        requested: Option<&str>,
    ) -> Option<Arc<dyn ChatAgent>> {
        if let Some(id) = parsed.agent() {
            return self.state.agents.get(id);
        }
        if let Some(id) = requested {
            match self.state.agents.get(id) {
                Some(agent) => return Some(agent),
                None => tracing::warn!("[ChatService] Unknown agent '{}', using default", id),
            }
        }
        self.state.agents.default_agent()
    }
}

/// One accepted send, run on its own task.
struct RequestJob {
    service: ChatService,
    session: SharedSession,
    /// Held for the whole job; dropping it releases the session.
    guard: PendingGuard,
    parsed: ParsedRequest,
    agent: Arc<dyn ChatAgent>,
    attempt: u32,
    created: oneshot::Sender<String>,
}

impl RequestJob {
    fn spawn(self, created: oneshot::Receiver<String>) -> SendRequestHandle {
        SendRequestHandle {
            request_created: created,
            response_complete: tokio::spawn(self.run()),
        }
    }

    async fn run(self) {
        let RequestJob {
            service,
            session,
            guard,
            parsed,
            agent,
            attempt,
            created,
        } = self;
        let token = guard.token().clone();
        let session_id = guard.key().to_string();

        let variables =
            resolve_variables(&service.state.variables, &parsed, &session_id, &token).await;
        if token.is_cancelled() {
            tracing::info!(
                "[ChatService] Send in session {} cancelled before the request was created",
                session_id
            );
            return;
        }

        let agent_id = agent.metadata().id.clone();
        let command = parsed.command().map(str::to_string);
        let added = session.write().await.add_request(
            parsed.clone(),
            variables.clone(),
            attempt,
            Some(agent_id.clone()),
            command.clone(),
        );
        let request_id = match added {
            Ok(request_id) => request_id,
            Err(e) => {
                tracing::warn!("[ChatService] Could not add request to {}: {}", session_id, e);
                return;
            }
        };
        // The receiver may have been dropped; the send still proceeds.
        let _ = created.send(request_id.clone());

        let history = history_for(&*session.read().await, &agent_id, &request_id);
        let agent_request = AgentRequest {
            session_id: session_id.clone(),
            request_id: request_id.clone(),
            agent_id,
            message: parsed.prompt_text(),
            command,
            variables,
            attempt,
        };

        let started = Instant::now();
        let mut first_progress: Option<Duration> = None;
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        // On cancel the invocation is dropped with this block.
        let settled = {
            let invocation =
                agent.invoke(agent_request.clone(), progress_tx, history, token.clone());
            tokio::pin!(invocation);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break None,
                    Some(fragment) = progress_rx.recv() => {
                        first_progress.get_or_insert_with(|| started.elapsed());
                        session.write().await.accept_response_progress(&request_id, fragment);
                    }
                    result = &mut invocation => break Some(result),
                }
            }
        };

        // Fragments sent just before the agent returned.
        if !token.is_cancelled() {
            while let Ok(fragment) = progress_rx.try_recv() {
                first_progress.get_or_insert_with(|| started.elapsed());
                session
                    .write()
                    .await
                    .accept_response_progress(&request_id, fragment);
            }
        }

        let mut result = match settled {
            Some(Ok(result)) => result,
            Some(Err(e)) => {
                let error = ParleyError::AgentInvocation(format!("{:#}", e));
                tracing::warn!("[ChatService] Request {} failed: {}", request_id, error);
                AgentResult::error(e.to_string())
            }
            None => AgentResult::default(),
        };
        if result.timings.is_none() {
            result.timings = Some(ResponseTimings {
                first_progress_ms: first_progress.map(|d| d.as_millis() as u64),
                total_elapsed_ms: started.elapsed().as_millis() as u64,
            });
        }

        let outcome = {
            let mut model = session.write().await;
            // Read under the lock: a concurrent cancel flips the token before
            // it marks the response.
            let cancelled = token.is_cancelled();
            let had_progress = model
                .request(&request_id)
                .is_some_and(|r| !r.response.fragments.is_empty());
            let outcome =
                ResponseOutcome::classify(result.error_details.as_ref(), had_progress, cancelled);

            if let Err(e) = model.set_response(&request_id, result.clone(), outcome) {
                tracing::debug!("[ChatService] Request {} vanished: {}", request_id, e);
                return;
            }
            let completion = if cancelled {
                model.cancel_request(&request_id)
            } else {
                model.complete_response(&request_id)
            };
            if let Err(e) = completion {
                tracing::debug!("[ChatService] Completing {}: {}", request_id, e);
            }
            outcome
        };

        tracing::info!(
            "[ChatService] Request {} in session {} finished: {:?}",
            request_id,
            session_id,
            outcome
        );

        if outcome == ResponseOutcome::Success {
            spawn_followups(session, agent, agent_request, result, request_id);
        }
    }
}

/// Resolves every registered variable mention concurrently.
///
/// A failing resolver only loses its own value.
async fn resolve_variables(
    registry: &VariableRegistry,
    parsed: &ParsedRequest,
    session_id: &str,
    token: &CancellationToken,
) -> Vec<ResolvedVariable> {
    let lookups: Vec<_> = parsed
        .variables()
        .filter_map(|(name, arg)| {
            registry
                .get(name)
                .map(|resolver| (resolver, name.to_string(), arg.map(str::to_string)))
        })
        .collect();

    let resolutions = lookups.into_iter().map(|(resolver, name, arg)| {
        let token = token.clone();
        let raw_text = parsed.text.as_str();
        async move {
            match resolver
                .resolve(&name, arg.as_deref(), raw_text, session_id, token)
                .await
            {
                Ok(Some(values)) => Some(ResolvedVariable { name, arg, values }),
                Ok(None) => None,
                Err(e) => {
                    let error = ParleyError::VariableResolution {
                        name,
                        message: format!("{:#}", e),
                    };
                    tracing::warn!("[ChatService] {}", error);
                    None
                }
            }
        }
    });

    join_all(resolutions).await.into_iter().flatten().collect()
}

/// Earlier completed turns with the same agent.
fn history_for(model: &SessionModel, agent_id: &str, current_request: &str) -> Vec<HistoryEntry> {
    model
        .requests()
        .iter()
        .filter(|r| {
            r.request_id != current_request
                && r.response.is_complete
                && !r.response.is_canceled
                && r.agent_id.as_deref() == Some(agent_id)
        })
        .map(|r| HistoryEntry {
            request: r.message.clone(),
            command: r.command.clone(),
            response: r.response.fragments.clone(),
            result: r.response.result.clone(),
        })
        .collect()
}

fn spawn_followups(
    session: SharedSession,
    agent: Arc<dyn ChatAgent>,
    request: AgentRequest,
    result: AgentResult,
    request_id: String,
) {
    tokio::spawn(async move {
        match agent
            .provide_followups(request, result, CancellationToken::new())
            .await
        {
            Ok(followups) if followups.is_empty() => {}
            Ok(followups) => {
                if let Err(e) = session.write().await.set_followups(&request_id, followups) {
                    tracing::debug!("[ChatService] Follow-ups for {}: {}", request_id, e);
                }
            }
            Err(e) => {
                tracing::debug!("[ChatService] Follow-up provider failed: {:#}", e);
            }
        }
    });
}
