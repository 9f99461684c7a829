//! One edit session: streams an agent's edits into live documents and lets
//! the user keep or discard them.

use super::pace::{PaceFactory, TypingPace};
use super::strategy::{DecorationDelta, EditStrategy};
use crate::pending::{PendingGuard, PendingOperations};
use parley_core::agent::{EditProgress, EditProvider, EditRequest, ResponseRef};
use parley_core::config::TypingConfig;
use parley_core::document::{DocumentHandle, DocumentProvider, DocumentSnapshot, TextEdit};
use parley_core::error::{ParleyError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditSessionStatus {
    Idle,
    /// Edits are streaming in.
    Editing {
        request_id: String,
        codeblock_index: usize,
    },
    /// Streaming finished; the edits wait for confirm or cancel.
    AwaitingReview {
        request_id: String,
        codeblock_index: usize,
    },
}

/// Decoration change for one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecorationChange {
    pub uri: String,
    pub delta: DecorationDelta,
}

/// The pair of models kept for each touched document.
pub struct EditCodeblockTextModels {
    /// Text before the session first touched the document.
    pub original: DocumentSnapshot,
    pub live: Arc<dyn DocumentHandle>,
    pub live_version_at_checkpoint: u64,
}

struct DocumentEditSession {
    models: EditCodeblockTextModels,
    strategy: Mutex<EditStrategy>,
}

impl DocumentEditSession {
    fn new(live: Arc<dyn DocumentHandle>) -> Self {
        let original = live.create_snapshot();
        let checkpoint = original.alternative_version_id;
        let strategy = EditStrategy::new(live.uri(), checkpoint);
        Self {
            models: EditCodeblockTextModels {
                original,
                live,
                live_version_at_checkpoint: checkpoint,
            },
            strategy: Mutex::new(strategy),
        }
    }
}

struct Batch {
    edits: Vec<TextEdit>,
    reveal: Option<Duration>,
}

struct CoordinatorState {
    provider: Arc<dyn EditProvider>,
    documents: Arc<dyn DocumentProvider>,
    typing: TypingConfig,
    pace: PaceFactory,
    entries: Mutex<HashMap<String, Arc<DocumentEditSession>>>,
    /// Keyed by chat session id.
    pending: PendingOperations,
    status: watch::Sender<EditSessionStatus>,
    decorations: broadcast::Sender<DecorationChange>,
}

/// Coordinates the edits of one edit session across documents.
///
/// Batches for a document are applied strictly in arrival order; different
/// documents proceed independently.
#[derive(Clone)]
pub struct EditSessionCoordinator {
    state: Arc<CoordinatorState>,
}

impl EditSessionCoordinator {
    pub fn new(
        provider: Arc<dyn EditProvider>,
        documents: Arc<dyn DocumentProvider>,
        typing: TypingConfig,
        pace: PaceFactory,
    ) -> Self {
        let (status, _) = watch::channel(EditSessionStatus::Idle);
        let (decorations, _) = broadcast::channel(64);
        Self {
            state: Arc::new(CoordinatorState {
                provider,
                documents,
                typing,
                pace,
                entries: Mutex::new(HashMap::new()),
                pending: PendingOperations::new(),
                status,
                decorations,
            }),
        }
    }

    // ============================================================================
    // Requests
    // ============================================================================

    /// Starts streaming edits for `response`.
    ///
    /// Returns `Ok(None)` when the chat session already has an edit request
    /// in flight. The handle finishes once every received edit has landed.
    pub fn send_edit_request(
        &self,
        response: ResponseRef,
        request: EditRequest,
    ) -> Result<Option<JoinHandle<()>>> {
        if request.context.len() != 1 {
            return Err(ParleyError::EditTargetAmbiguous(request.context.len()));
        }

        let Some(guard) = self.state.pending.try_begin(&response.session_id) else {
            tracing::warn!(
                "[EditSession] Session {} already has an edit request in flight",
                response.session_id
            );
            return Ok(None);
        };

        self.state.status.send_replace(EditSessionStatus::Editing {
            request_id: response.request_id.clone(),
            codeblock_index: response.codeblock_index,
        });
        tracing::info!(
            "[EditSession] Editing {} for request {}",
            request.context[0],
            response.request_id
        );

        let job = EditJob {
            state: self.state.clone(),
            guard,
            response,
            request,
        };
        Ok(Some(tokio::spawn(job.run())))
    }

    pub fn has_pending_edit_request(&self, session_id: &str) -> bool {
        self.state.pending.contains(session_id)
    }

    /// Stops streaming for a chat session. Edits already applied stay.
    pub fn cancel_edit_request(&self, session_id: &str) -> bool {
        self.state.pending.cancel(session_id)
    }

    // ============================================================================
    // Review
    // ============================================================================

    /// Keeps the edits on `uri` and ends the session.
    pub async fn confirm_edits(&self, uri: &str) -> Result<()> {
        let entry = self.entry(uri).await?;
        let delta = entry
            .strategy
            .lock()
            .await
            .apply(entry.models.live.as_ref())?;
        self.publish(uri, delta);
        tracing::info!("[EditSession] Confirmed edits on {}", uri);

        self.dispose().await;
        Ok(())
    }

    /// Stops streaming and reverts every touched document to its checkpoint.
    pub async fn cancel_edits(&self) {
        self.state.pending.cancel_all();

        let entries: Vec<(String, Arc<DocumentEditSession>)> = self
            .state
            .entries
            .lock()
            .await
            .iter()
            .map(|(uri, entry)| (uri.clone(), entry.clone()))
            .collect();

        for (uri, entry) in entries {
            let mut strategy = entry.strategy.lock().await;
            match strategy.cancel(entry.models.live.as_ref()) {
                Ok(delta) => self.publish(&uri, delta),
                Err(e) => tracing::debug!("[EditSession] Not reverting {}: {}", uri, e),
            }
        }

        self.dispose().await;
    }

    /// Drops all session state. Documents keep whatever they contain.
    pub async fn dispose(&self) {
        self.state.pending.cancel_all();

        let entries: Vec<(String, Arc<DocumentEditSession>)> =
            self.state.entries.lock().await.drain().collect();
        for (uri, entry) in entries {
            let delta = entry.strategy.lock().await.clear_decorations();
            self.publish(&uri, delta);
        }

        self.state.status.send_replace(EditSessionStatus::Idle);
    }

    /// Undoes `uri` back to `target`. Returns the number of undo steps.
    pub async fn undo_changes(&self, uri: &str, target: u64) -> Result<usize> {
        let entry = self.entry(uri).await?;
        let _strategy = entry.strategy.lock().await;
        Ok(super::strategy::undo_changes(
            entry.models.live.as_ref(),
            target,
        ))
    }

    pub async fn toggle_diff(&self, uri: &str) -> Result<bool> {
        let entry = self.entry(uri).await?;
        let showing = entry.strategy.lock().await.toggle_diff();
        Ok(showing)
    }

    // ============================================================================
    // Queries
    // ============================================================================

    pub fn status(&self) -> EditSessionStatus {
        self.state.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<EditSessionStatus> {
        self.state.status.subscribe()
    }

    pub fn subscribe_decorations(&self) -> broadcast::Receiver<DecorationChange> {
        self.state.decorations.subscribe()
    }

    pub async fn touched_documents(&self) -> Vec<String> {
        let mut uris: Vec<String> = self.state.entries.lock().await.keys().cloned().collect();
        uris.sort();
        uris
    }

    /// Decorated lines of `uri`, ascending.
    pub async fn decorations(&self, uri: &str) -> Option<Vec<u32>> {
        let entry = self.state.entries.lock().await.get(uri).cloned()?;
        let strategy = entry.strategy.lock().await;
        Some(strategy.decorations().iter().copied().collect())
    }

    /// Text of `uri` before this session touched it.
    pub async fn original_text(&self, uri: &str) -> Option<String> {
        let entries = self.state.entries.lock().await;
        entries.get(uri).map(|e| e.models.original.text.clone())
    }

    pub async fn checkpoint(&self, uri: &str) -> Option<u64> {
        let entries = self.state.entries.lock().await;
        entries.get(uri).map(|e| e.models.live_version_at_checkpoint)
    }

    async fn entry(&self, uri: &str) -> Result<Arc<DocumentEditSession>> {
        self.state
            .entries
            .lock()
            .await
            .get(uri)
            .cloned()
            .ok_or_else(|| ParleyError::invalid_state(format!("no edits for '{}'", uri)))
    }

    fn publish(&self, uri: &str, delta: DecorationDelta) {
        if delta.is_empty() {
            return;
        }
        // No subscribers is fine.
        let _ = self.state.decorations.send(DecorationChange {
            uri: uri.to_string(),
            delta,
        });
    }
}

/// One accepted edit request, run on its own task.
struct EditJob {
    state: Arc<CoordinatorState>,
    guard: PendingGuard,
    response: ResponseRef,
    request: EditRequest,
}

impl EditJob {
    async fn run(self) {
        let EditJob {
            state,
            guard,
            response,
            request,
        } = self;
        let token = guard.token().clone();
        let mut pace = (state.pace)();
        let mut workers: HashMap<String, DocumentWorker> = HashMap::new();

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let mut last_chunk = Instant::now();

        let provided = {
            let provision = state.provider.provide_edits(
                response.clone(),
                request,
                progress_tx,
                token.clone(),
            );
            tokio::pin!(provision);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break None,
                    Some(progress) = progress_rx.recv() => {
                        let latency = last_chunk.elapsed();
                        last_chunk = Instant::now();
                        route(&state, &mut workers, pace.as_mut(), latency, progress, &token);
                    }
                    result = &mut provision => break Some(result),
                }
            }
        };

        if !token.is_cancelled() {
            while let Ok(progress) = progress_rx.try_recv() {
                let latency = last_chunk.elapsed();
                last_chunk = Instant::now();
                route(&state, &mut workers, pace.as_mut(), latency, progress, &token);
            }
        }

        if let Some(Err(e)) = provided {
            let error = ParleyError::AgentInvocation(format!("{:#}", e));
            tracing::warn!(
                "[EditSession] Edit provider failed for request {}: {}",
                response.request_id,
                error
            );
        }

        for (uri, worker) in workers {
            drop(worker.batches);
            if let Err(e) = worker.handle.await {
                tracing::warn!("[EditSession] Worker for {} panicked: {}", uri, e);
            }
        }

        if token.is_cancelled() {
            tracing::info!(
                "[EditSession] Edit request {} cancelled",
                response.request_id
            );
            return;
        }

        let touched = !state.entries.lock().await.is_empty();
        let status = if touched {
            EditSessionStatus::AwaitingReview {
                request_id: response.request_id.clone(),
                codeblock_index: response.codeblock_index,
            }
        } else {
            EditSessionStatus::Idle
        };
        tracing::info!(
            "[EditSession] Edit request {} finished: {:?}",
            response.request_id,
            status
        );
        state.status.send_replace(status);
        drop(guard);
    }
}

struct DocumentWorker {
    batches: mpsc::UnboundedSender<Batch>,
    handle: JoinHandle<()>,
}

/// Queues each document's part of a chunk on that document's worker.
fn route(
    state: &Arc<CoordinatorState>,
    workers: &mut HashMap<String, DocumentWorker>,
    pace: &mut dyn TypingPace,
    latency: Duration,
    progress: EditProgress,
    token: &CancellationToken,
) {
    pace.observe(latency);
    let reveal = if progress.progressive {
        pace.reveal_duration()
    } else {
        None
    };

    for document in progress.edit.documents {
        if document.edits.is_empty() {
            continue;
        }
        let worker = workers.entry(document.uri.clone()).or_insert_with(|| {
            let (batches, rx) = mpsc::unbounded_channel();
            let handle = tokio::spawn(run_worker(
                state.clone(),
                document.uri.clone(),
                rx,
                token.clone(),
            ));
            DocumentWorker { batches, handle }
        });
        if worker
            .batches
            .send(Batch {
                edits: document.edits,
                reveal,
            })
            .is_err()
        {
            tracing::debug!("[EditSession] Worker for {} has stopped", document.uri);
        }
    }
}

async fn run_worker(
    state: Arc<CoordinatorState>,
    uri: String,
    mut batches: mpsc::UnboundedReceiver<Batch>,
    token: CancellationToken,
) {
    let entry = match open_entry(&state, &uri, &token).await {
        Ok(Some(entry)) => entry,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!("[EditSession] Could not open {}: {}", uri, e);
            return;
        }
    };

    while let Some(batch) = batches.recv().await {
        if token.is_cancelled() {
            break;
        }
        let mut strategy = entry.strategy.lock().await;
        let applied = strategy
            .apply_batch(
                entry.models.live.as_ref(),
                &batch.edits,
                batch.reveal,
                &state.typing,
                &token,
            )
            .await;
        drop(strategy);

        match applied {
            Ok(outcome) => {
                if !outcome.decorations.is_empty() {
                    let _ = state.decorations.send(DecorationChange {
                        uri: uri.clone(),
                        delta: outcome.decorations,
                    });
                }
                if outcome.interrupted {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!("[EditSession] Dropping edits for {}: {}", uri, e);
                break;
            }
        }
    }
}

/// The session entry for `uri`, created on first touch. `None` once the
/// request was cancelled.
async fn open_entry(
    state: &CoordinatorState,
    uri: &str,
    token: &CancellationToken,
) -> Result<Option<Arc<DocumentEditSession>>> {
    if let Some(entry) = state.entries.lock().await.get(uri) {
        return Ok(Some(entry.clone()));
    }

    let live = state.documents.open(uri).await?;

    let mut entries = state.entries.lock().await;
    // Checked under the lock so a concurrent dispose never sees a late entry.
    if token.is_cancelled() {
        return Ok(None);
    }
    let entry = entries
        .entry(uri.to_string())
        .or_insert_with(|| Arc::new(DocumentEditSession::new(live)))
        .clone();
    Ok(Some(entry))
}

#[cfg(test)]
#[path = "coordinator_test.rs"]
mod tests;
