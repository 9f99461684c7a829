//! Cross-workspace session hand-off.
//!
//! A session moved to another workspace is parked in an application-scoped
//! list until that workspace's engine starts and claims it. Entries expire
//! after the configured TTL and are purged on every read.

use chrono::Utc;
use parley_core::config::TRANSFERRED_SESSIONS_KEY;
use parley_core::error::Result;
use parley_core::session::SerializableSession;
use parley_core::storage::BlobStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferEntry {
    pub session: SerializableSession,
    pub destination_workspace: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// Unsent input carried along with the session.
    #[serde(default)]
    pub pending_input: Option<String>,
}

pub struct TransferStore {
    store: Arc<dyn BlobStore>,
    ttl: Duration,
}

impl TransferStore {
    pub fn new(store: Arc<dyn BlobStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub async fn entries(&self) -> Result<Vec<TransferEntry>> {
        self.entries_at(Utc::now().timestamp_millis()).await
    }

    /// Live entries as of `now_ms`; expired ones are dropped from storage.
    pub async fn entries_at(&self, now_ms: i64) -> Result<Vec<TransferEntry>> {
        let all = self.read_all().await?;
        let total = all.len();
        let live: Vec<TransferEntry> = all
            .into_iter()
            .filter(|entry| !self.is_expired(entry, now_ms))
            .collect();

        if live.len() != total {
            tracing::debug!(
                "[Transfer] Purged {} expired transfer(s)",
                total - live.len()
            );
            self.write_all(&live).await?;
        }
        Ok(live)
    }

    /// Parks `entry`, replacing any earlier entry for the same destination.
    pub async fn add(&self, entry: TransferEntry) -> Result<()> {
        self.add_at(entry, Utc::now().timestamp_millis()).await
    }

    pub async fn add_at(&self, entry: TransferEntry, now_ms: i64) -> Result<()> {
        let mut entries = self.entries_at(now_ms).await?;
        entries.retain(|e| e.destination_workspace != entry.destination_workspace);
        tracing::info!(
            "[Transfer] Session {} parked for workspace {}",
            entry.session.session_id,
            entry.destination_workspace
        );
        entries.push(entry);
        self.write_all(&entries).await
    }

    /// Removes and returns the live entry addressed to `workspace_id`.
    pub async fn take_for(&self, workspace_id: &str) -> Result<Option<TransferEntry>> {
        self.take_for_at(workspace_id, Utc::now().timestamp_millis())
            .await
    }

    pub async fn take_for_at(
        &self,
        workspace_id: &str,
        now_ms: i64,
    ) -> Result<Option<TransferEntry>> {
        let mut entries = self.entries_at(now_ms).await?;
        let Some(index) = entries
            .iter()
            .position(|e| e.destination_workspace == workspace_id)
        else {
            return Ok(None);
        };
        let entry = entries.remove(index);
        self.write_all(&entries).await?;
        Ok(Some(entry))
    }

    fn is_expired(&self, entry: &TransferEntry, now_ms: i64) -> bool {
        let ttl_ms = i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX);
        now_ms.saturating_sub(entry.timestamp_ms) > ttl_ms
    }

    async fn read_all(&self) -> Result<Vec<TransferEntry>> {
        let Some(raw) = self.store.get(TRANSFERRED_SESSIONS_KEY).await? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&raw) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                tracing::warn!("[Transfer] Ignoring unreadable transfer list: {}", e);
                Ok(Vec::new())
            }
        }
    }

    async fn write_all(&self, entries: &[TransferEntry]) -> Result<()> {
        if entries.is_empty() {
            self.store.remove(TRANSFERRED_SESSIONS_KEY).await?;
        } else {
            let json = serde_json::to_string(entries)?;
            self.store.store(TRANSFERRED_SESSIONS_KEY, &json).await?;
        }
        Ok(())
    }
}
