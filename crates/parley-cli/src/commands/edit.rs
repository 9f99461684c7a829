use crate::demo::FindReplaceProvider;
use anyhow::{Context, Result};
use parley_application::edit_session::{
    EditSessionCoordinator, EditSessionStatus, InstantPace, MovingAveragePace, PaceFactory,
    TypingPace,
};
use parley_core::agent::{EditRequest, ResponseRef};
use parley_core::config::EngineConfig;
use parley_core::document::{DocumentHandle, DocumentProvider};
use parley_infrastructure::FileDocumentProvider;
use std::path::PathBuf;
use std::sync::Arc;

pub struct EditOptions {
    pub workspace: PathBuf,
    pub file: String,
    pub find: String,
    pub replace: String,
    pub keep: bool,
    pub instant: bool,
}

pub async fn run(config: &EngineConfig, options: EditOptions) -> Result<()> {
    let documents = Arc::new(FileDocumentProvider::new(&options.workspace));
    let provider = Arc::new(FindReplaceProvider::new(
        documents.clone(),
        &options.find,
        &options.replace,
    ));
    let pace: PaceFactory = if options.instant {
        Box::new(|| -> Box<dyn TypingPace> { Box::new(InstantPace) })
    } else {
        Box::new(|| -> Box<dyn TypingPace> { Box::new(MovingAveragePace::new()) })
    };
    let coordinator =
        EditSessionCoordinator::new(provider, documents.clone(), config.typing.clone(), pace);

    let mut decorations = coordinator.subscribe_decorations();
    let watcher = tokio::spawn(async move {
        while let Ok(change) = decorations.recv().await {
            for line in change.delta.added {
                println!("✏️  {}:{}", change.uri, line + 1);
            }
        }
    });

    println!(
        "🔎 Replacing '{}' with '{}' in {}",
        options.find, options.replace, options.file
    );
    let response = ResponseRef {
        session_id: "cli".to_string(),
        request_id: "cli-edit".to_string(),
        codeblock_index: 0,
    };
    let request = EditRequest {
        message: format!("replace '{}' with '{}'", options.find, options.replace),
        context: vec![options.file.clone()],
    };
    let handle = coordinator
        .send_edit_request(response, request)?
        .context("An edit is already running")?;

    tokio::select! {
        finished = handle => finished.context("Edit task panicked")?,
        _ = tokio::signal::ctrl_c() => {
            coordinator.cancel_edits().await;
            watcher.abort();
            println!("🛑 Cancelled, {} left as it was", options.file);
            return Ok(());
        }
    }

    match coordinator.status() {
        EditSessionStatus::AwaitingReview { .. } if options.keep => {
            coordinator.confirm_edits(&options.file).await?;
            documents.save(&options.file).await?;
            println!("✅ Saved {}", options.file);
        }
        EditSessionStatus::AwaitingReview { .. } => {
            let edited = documents.open(&options.file).await?.get_value();
            coordinator.cancel_edits().await;
            println!("{}", edited);
            println!("👀 Preview only, {} is unchanged. Re-run with --keep to save.", options.file);
        }
        _ => println!("No occurrences of '{}' in {}", options.find, options.file),
    }

    watcher.abort();
    Ok(())
}
