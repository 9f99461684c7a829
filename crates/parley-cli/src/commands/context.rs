use crate::demo::EchoAgent;
use anyhow::{Context, Result};
use parley_application::{AgentRegistry, ChatService, VariableRegistry};
use parley_core::config::EngineConfig;
use parley_infrastructure::{JsonFileBlobStore, ParleyPaths};
use std::sync::Arc;

/// Builds a chat service whose storage lives under the Parley data directory.
pub async fn chat_service(config: &EngineConfig, paths: &ParleyPaths) -> Result<ChatService> {
    let workspace_dir = paths
        .workspace_storage_dir(&config.workspace_id)
        .context("Failed to resolve workspace storage")?;
    let global_dir = paths
        .global_storage_dir()
        .context("Failed to resolve global storage")?;

    let mut agents = AgentRegistry::new();
    agents.register(Arc::new(EchoAgent::new()));

    Ok(ChatService::new(
        config.clone(),
        agents,
        VariableRegistry::new(),
        Arc::new(JsonFileBlobStore::new(workspace_dir)),
        Arc::new(JsonFileBlobStore::new(global_dir)),
    )
    .await)
}
