use super::*;
use crate::edit_session::{InstantPace, MovingAveragePace};
use async_trait::async_trait;
use parley_core::agent::EditProgressSender;
use parley_core::document::{DocumentEdit, Position, Range, WorkspaceEdit};
use parley_infrastructure::MemoryDocumentProvider;
use tokio::sync::Semaphore;

const MAIN: &str = "alpha\nbeta\ngamma\n";

/// Sends its chunks in order. With a gate, each chunk waits for a permit.
struct ScriptedEditProvider {
    chunks: Vec<EditProgress>,
    gate: Option<Arc<Semaphore>>,
    fail: bool,
}

impl ScriptedEditProvider {
    fn new(chunks: Vec<EditProgress>) -> Self {
        Self {
            chunks,
            gate: None,
            fail: false,
        }
    }

    fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

#[async_trait]
impl EditProvider for ScriptedEditProvider {
    async fn provide_edits(
        &self,
        _response: ResponseRef,
        _request: EditRequest,
        progress: EditProgressSender,
        token: CancellationToken,
    ) -> anyhow::Result<()> {
        for chunk in &self.chunks {
            if let Some(gate) = &self.gate {
                tokio::select! {
                    _ = token.cancelled() => return Ok(()),
                    permit = gate.acquire() => permit?.forget(),
                }
            }
            progress.send(chunk.clone())?;
        }
        if self.fail {
            anyhow::bail!("model overloaded");
        }
        Ok(())
    }
}

fn chunk(uri: &str, edits: Vec<TextEdit>) -> EditProgress {
    EditProgress {
        edit: WorkspaceEdit::single(uri, edits),
        progressive: false,
    }
}

fn response(session_id: &str) -> ResponseRef {
    ResponseRef {
        session_id: session_id.to_string(),
        request_id: format!("{}-req", session_id),
        codeblock_index: 0,
    }
}

fn edit_request(uri: &str) -> EditRequest {
    EditRequest {
        message: "shout".to_string(),
        context: vec![uri.to_string()],
    }
}

fn fast_typing() -> TypingConfig {
    TypingConfig {
        min_words_per_second: 5_000.0,
        max_words_per_second: 10_000.0,
    }
}

fn coordinator_with(
    provider: ScriptedEditProvider,
    documents: Arc<MemoryDocumentProvider>,
) -> EditSessionCoordinator {
    EditSessionCoordinator::new(
        Arc::new(provider),
        documents,
        fast_typing(),
        Box::new(|| -> Box<dyn TypingPace> { Box::new(InstantPace) }),
    )
}

fn shout_chunks() -> Vec<EditProgress> {
    vec![
        chunk("main.txt", vec![TextEdit::replace(Range::new(0, 0, 0, 5), "ALPHA")]),
        chunk("main.txt", vec![TextEdit::replace(Range::new(2, 0, 2, 5), "GAMMA")]),
    ]
}

#[tokio::test]
async fn test_edit_request_needs_exactly_one_target() {
    let documents = Arc::new(MemoryDocumentProvider::new());
    let coordinator = coordinator_with(ScriptedEditProvider::new(vec![]), documents);

    for context in [vec![], vec!["a.txt".to_string(), "b.txt".to_string()]] {
        let err = coordinator
            .send_edit_request(
                response("chat-1"),
                EditRequest {
                    message: "x".to_string(),
                    context,
                },
            )
            .unwrap_err();
        assert!(err.is_edit_target_ambiguous());
    }

    assert_eq!(coordinator.status(), EditSessionStatus::Idle);
    assert!(!coordinator.has_pending_edit_request("chat-1"));
}

#[tokio::test]
async fn test_edits_land_then_confirm_keeps_them() {
    let documents = Arc::new(MemoryDocumentProvider::new());
    let document = documents.insert("main.txt", MAIN).await;
    let coordinator =
        coordinator_with(ScriptedEditProvider::new(shout_chunks()), documents.clone());

    let handle = coordinator
        .send_edit_request(response("chat-1"), edit_request("main.txt"))
        .unwrap()
        .expect("request accepted");
    handle.await.unwrap();

    assert_eq!(document.get_value(), "ALPHA\nbeta\nGAMMA\n");
    assert_eq!(
        coordinator.status(),
        EditSessionStatus::AwaitingReview {
            request_id: "chat-1-req".to_string(),
            codeblock_index: 0,
        }
    );
    assert_eq!(coordinator.original_text("main.txt").await.as_deref(), Some(MAIN));
    assert_eq!(coordinator.decorations("main.txt").await, Some(vec![0, 2]));
    assert!(!coordinator.has_pending_edit_request("chat-1"));

    coordinator.confirm_edits("main.txt").await.unwrap();

    assert_eq!(document.get_value(), "ALPHA\nbeta\nGAMMA\n");
    assert_eq!(coordinator.status(), EditSessionStatus::Idle);
    assert!(coordinator.touched_documents().await.is_empty());
    assert_eq!(coordinator.original_text("main.txt").await, None);
}

#[tokio::test]
async fn test_one_edit_request_per_chat_session() {
    let documents = Arc::new(MemoryDocumentProvider::new());
    documents.insert("main.txt", MAIN).await;
    let gate = Arc::new(Semaphore::new(0));
    let coordinator = coordinator_with(
        ScriptedEditProvider::new(shout_chunks()).gated(gate.clone()),
        documents,
    );
    let mut status = coordinator.watch_status();

    let first = coordinator
        .send_edit_request(response("chat-1"), edit_request("main.txt"))
        .unwrap()
        .expect("first request accepted");

    // Published before any edit arrives.
    assert!(status.has_changed().unwrap());
    assert_eq!(
        *status.borrow_and_update(),
        EditSessionStatus::Editing {
            request_id: "chat-1-req".to_string(),
            codeblock_index: 0,
        }
    );
    assert!(coordinator.has_pending_edit_request("chat-1"));

    let rejected = coordinator
        .send_edit_request(response("chat-1"), edit_request("main.txt"))
        .unwrap();
    assert!(rejected.is_none());

    let other = coordinator
        .send_edit_request(response("chat-2"), edit_request("other.txt"))
        .unwrap()
        .expect("other chat session accepted");

    coordinator.cancel_edits().await;
    first.await.unwrap();
    other.await.unwrap();

    assert!(!coordinator.has_pending_edit_request("chat-1"));
    assert!(!coordinator.has_pending_edit_request("chat-2"));
    assert_eq!(coordinator.status(), EditSessionStatus::Idle);
}

#[tokio::test]
async fn test_cancel_mid_stream_restores_document() {
    let documents = Arc::new(MemoryDocumentProvider::new());
    let document = documents.insert("main.txt", MAIN).await;
    let gate = Arc::new(Semaphore::new(1));
    let coordinator = coordinator_with(
        ScriptedEditProvider::new(shout_chunks()).gated(gate),
        documents,
    );
    let mut decorations = coordinator.subscribe_decorations();

    let handle = coordinator
        .send_edit_request(response("chat-1"), edit_request("main.txt"))
        .unwrap()
        .expect("request accepted");

    let change = decorations.recv().await.unwrap();
    assert_eq!(change.uri, "main.txt");
    assert_eq!(change.delta.added, vec![0]);
    assert_eq!(document.get_value(), "ALPHA\nbeta\ngamma\n");

    coordinator.cancel_edits().await;
    handle.await.unwrap();

    assert_eq!(document.get_value(), MAIN);
    assert_eq!(coordinator.status(), EditSessionStatus::Idle);
    assert!(coordinator.touched_documents().await.is_empty());
    assert!(!coordinator.has_pending_edit_request("chat-1"));

    let cleared = decorations.recv().await.unwrap();
    assert_eq!(cleared.delta.removed, vec![0]);
}

#[tokio::test]
async fn test_documents_are_edited_independently() {
    let documents = Arc::new(MemoryDocumentProvider::new());
    let a = documents.insert("a.txt", "one\n").await;
    let b = documents.insert("b.txt", "two\n").await;
    let provider = ScriptedEditProvider::new(vec![EditProgress {
        edit: WorkspaceEdit {
            documents: vec![
                DocumentEdit {
                    uri: "a.txt".to_string(),
                    edits: vec![TextEdit::replace(Range::new(0, 0, 0, 3), "ONE")],
                },
                DocumentEdit {
                    uri: "b.txt".to_string(),
                    edits: vec![TextEdit::replace(Range::new(0, 0, 0, 3), "TWO")],
                },
            ],
        },
        progressive: false,
    }]);
    let coordinator = coordinator_with(provider, documents);

    coordinator
        .send_edit_request(response("chat-1"), edit_request("a.txt"))
        .unwrap()
        .expect("request accepted")
        .await
        .unwrap();

    assert_eq!(a.get_value(), "ONE\n");
    assert_eq!(b.get_value(), "TWO\n");
    assert_eq!(coordinator.touched_documents().await, vec!["a.txt", "b.txt"]);

    coordinator.cancel_edits().await;
    assert_eq!(a.get_value(), "one\n");
    assert_eq!(b.get_value(), "two\n");
}

#[tokio::test]
async fn test_provider_failure_keeps_landed_edits() {
    let documents = Arc::new(MemoryDocumentProvider::new());
    let document = documents.insert("main.txt", MAIN).await;
    let provider = ScriptedEditProvider::new(shout_chunks()[..1].to_vec()).failing();
    let coordinator = coordinator_with(provider, documents);

    coordinator
        .send_edit_request(response("chat-1"), edit_request("main.txt"))
        .unwrap()
        .expect("request accepted")
        .await
        .unwrap();

    assert_eq!(document.get_value(), "ALPHA\nbeta\ngamma\n");
    assert!(matches!(
        coordinator.status(),
        EditSessionStatus::AwaitingReview { .. }
    ));
}

#[tokio::test]
async fn test_no_edits_returns_to_idle() {
    let documents = Arc::new(MemoryDocumentProvider::new());
    let coordinator = coordinator_with(ScriptedEditProvider::new(vec![]), documents);

    coordinator
        .send_edit_request(response("chat-1"), edit_request("main.txt"))
        .unwrap()
        .expect("request accepted")
        .await
        .unwrap();

    assert_eq!(coordinator.status(), EditSessionStatus::Idle);
    assert!(coordinator.touched_documents().await.is_empty());
}

#[tokio::test]
async fn test_progressive_chunks_type_out_in_order() {
    let documents = Arc::new(MemoryDocumentProvider::new());
    let document = documents.insert("story.txt", "").await;
    let chunks = vec![
        EditProgress {
            edit: WorkspaceEdit::single(
                "story.txt",
                vec![TextEdit::insert(Position::new(0, 0), "once upon a time\n")],
            ),
            progressive: true,
        },
        EditProgress {
            edit: WorkspaceEdit::single(
                "story.txt",
                vec![TextEdit::insert(Position::new(1, 0), "the end\n")],
            ),
            progressive: true,
        },
    ];
    let coordinator = EditSessionCoordinator::new(
        Arc::new(ScriptedEditProvider::new(chunks)),
        documents,
        fast_typing(),
        Box::new(|| -> Box<dyn TypingPace> { Box::new(MovingAveragePace::new()) }),
    );

    coordinator
        .send_edit_request(response("chat-1"), edit_request("story.txt"))
        .unwrap()
        .expect("request accepted")
        .await
        .unwrap();

    assert_eq!(document.get_value(), "once upon a time\nthe end\n");
    assert_eq!(coordinator.decorations("story.txt").await, Some(vec![0, 1, 2]));
}

#[tokio::test]
async fn test_undo_changes_to_checkpoint() {
    let documents = Arc::new(MemoryDocumentProvider::new());
    let document = documents.insert("main.txt", MAIN).await;
    let coordinator =
        coordinator_with(ScriptedEditProvider::new(shout_chunks()), documents);

    coordinator
        .send_edit_request(response("chat-1"), edit_request("main.txt"))
        .unwrap()
        .expect("request accepted")
        .await
        .unwrap();

    let checkpoint = coordinator.checkpoint("main.txt").await.unwrap();
    let steps = coordinator.undo_changes("main.txt", checkpoint).await.unwrap();
    assert_eq!(steps, 1);
    assert_eq!(document.get_value(), MAIN);
    assert!(document.alternative_version_id() <= checkpoint);
}

#[tokio::test]
async fn test_review_actions_need_a_touched_document() {
    let documents = Arc::new(MemoryDocumentProvider::new());
    let coordinator = coordinator_with(ScriptedEditProvider::new(vec![]), documents);

    assert!(
        coordinator
            .confirm_edits("missing.txt")
            .await
            .unwrap_err()
            .is_invalid_state()
    );
    assert!(
        coordinator
            .toggle_diff("missing.txt")
            .await
            .unwrap_err()
            .is_invalid_state()
    );
}
