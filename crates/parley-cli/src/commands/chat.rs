use anyhow::{Context, Result};
use parley_application::{ChatService, SendRequestOptions};
use parley_core::session::{ProgressFragment, SessionChange};
use std::io::Write;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

const FOLLOWUP_WAIT: Duration = Duration::from_millis(250);

pub async fn run(service: &ChatService, message: &str, session: Option<String>) -> Result<()> {
    let session_id = match session {
        Some(session_id) => {
            service
                .get_or_restore_session(&session_id)
                .await?
                .with_context(|| format!("No session '{}'", session_id))?;
            session_id
        }
        None => service.start_session().await,
    };
    println!("💬 Session {}", session_id);

    let mut changes = service
        .subscribe_session(&session_id)
        .await
        .context("Session disappeared before sending")?;

    let Some(handle) = service
        .send_request(&session_id, message, SendRequestOptions::default())
        .await?
    else {
        println!("Nothing to send.");
        return Ok(());
    };
    let request_id = handle
        .request_created
        .await
        .context("Request was cancelled before it started")?;

    let stream = async {
        loop {
            match changes.recv().await {
                Ok(SessionChange::ProgressAppended {
                    request_id: id,
                    fragment: ProgressFragment::Markdown { content },
                }) if id == request_id => {
                    print!("{}", content);
                    let _ = std::io::stdout().flush();
                }
                Ok(SessionChange::ResponseCompleted { request_id: id }) if id == request_id => {
                    break;
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    };

    tokio::select! {
        _ = stream => {}
        _ = tokio::signal::ctrl_c() => {
            service.cancel_current_request_for_session(&session_id).await;
            println!("\n🛑 Cancelled");
        }
    }
    handle
        .response_complete
        .await
        .context("Request task panicked")?;
    println!();

    // Follow-ups are computed after completion.
    let _ = tokio::time::timeout(FOLLOWUP_WAIT, async {
        loop {
            match changes.recv().await {
                Ok(SessionChange::FollowupsChanged { request_id: id }) if id == request_id => break,
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    })
    .await;

    let session = service
        .get_session(&session_id)
        .await
        .context("Session disappeared")?;
    if let Some(request) = session.read().await.request(&request_id) {
        if let Some(error) = request.response.error_details() {
            println!("⚠️  {}", error.message);
        }
        for followup in &request.response.followups {
            println!(
                "💡 {}",
                followup.title.as_deref().unwrap_or(&followup.message)
            );
        }
    }

    let written = service.persist().await?;
    tracing::debug!("[CLI] Persisted {} session(s)", written);
    Ok(())
}
