use anyhow::Result;
use chrono::{TimeZone, Utc};
use parley_application::ChatService;

pub async fn list(service: &ChatService, json: bool) -> Result<()> {
    let items = service.history().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }
    if items.is_empty() {
        println!("No saved sessions.");
        return Ok(());
    }
    for item in items {
        let when = Utc
            .timestamp_millis_opt(item.last_message_date)
            .single()
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!("{}  {}  {}", when, item.session_id, item.title);
    }
    Ok(())
}

pub async fn remove(service: &ChatService, session_id: &str) -> Result<()> {
    if service.remove_history_entry(session_id).await? {
        println!("🗑️  Removed {}", session_id);
    } else {
        println!("No saved session '{}'", session_id);
    }
    Ok(())
}

pub async fn clear(service: &ChatService) -> Result<()> {
    service.clear_all_history().await?;
    println!("🗑️  Cleared all saved sessions");
    Ok(())
}
