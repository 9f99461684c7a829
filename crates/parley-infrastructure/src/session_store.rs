//! The persisted session table.
//!
//! One JSON array of [`SerializableSession`] under a workspace-scoped key.
//! Each entry is decoded on its own, so one malformed entry never costs the
//! rest of the table.

use parley_core::config::PERSISTED_SESSIONS_KEY;
use parley_core::error::{ParleyError, Result};
use parley_core::session::SerializableSession;
use parley_core::storage::BlobStore;
use std::sync::Arc;

pub struct PersistedSessionStore {
    store: Arc<dyn BlobStore>,
    max_sessions: usize,
}

impl PersistedSessionStore {
    pub fn new(store: Arc<dyn BlobStore>, max_sessions: usize) -> Self {
        Self {
            store,
            max_sessions,
        }
    }

    /// Reads the table.
    ///
    /// A missing key is an empty table. A blob that is not a JSON array is
    /// logged and treated as empty; malformed entries are logged and dropped.
    pub async fn load(&self) -> Result<Vec<SerializableSession>> {
        let Some(raw) = self.store.get(PERSISTED_SESSIONS_KEY).await? else {
            return Ok(Vec::new());
        };

        let entries: Vec<serde_json::Value> = match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(
                    "[SessionStore] Ignoring unreadable session table: {}",
                    ParleyError::malformed(PERSISTED_SESSIONS_KEY, e.to_string())
                );
                return Ok(Vec::new());
            }
        };

        let total = entries.len();
        let sessions: Vec<SerializableSession> = entries
            .into_iter()
            .enumerate()
            .filter_map(|(index, entry)| {
                match serde_json::from_value::<SerializableSession>(entry) {
                    Ok(session) => Some(session),
                    Err(e) => {
                        tracing::warn!(
                            "[SessionStore] Dropping malformed session entry {}: {}",
                            index,
                            e
                        );
                        None
                    }
                }
            })
            .collect();

        tracing::debug!(
            "[SessionStore] Loaded {}/{} persisted sessions",
            sessions.len(),
            total
        );
        Ok(sessions)
    }

    /// Replaces the table with `sessions`.
    ///
    /// Empty sessions are skipped, the rest are ordered newest first and cut
    /// to the configured cap.
    pub async fn save(&self, sessions: Vec<SerializableSession>) -> Result<()> {
        let mut sessions: Vec<SerializableSession> = sessions
            .into_iter()
            .filter(|s| !s.requests.is_empty())
            .collect();
        sessions.sort_by(|a, b| b.creation_date.cmp(&a.creation_date));
        sessions.truncate(self.max_sessions);

        let json = serde_json::to_string(&sessions)?;
        self.store.store(PERSISTED_SESSIONS_KEY, &json).await?;
        tracing::debug!("[SessionStore] Saved {} sessions", sessions.len());
        Ok(())
    }

    /// Writes `live` over the stored table, keeping stored sessions that are
    /// not live.
    pub async fn save_merged(&self, live: Vec<SerializableSession>) -> Result<()> {
        let mut merged: Vec<SerializableSession> = self
            .load()
            .await?
            .into_iter()
            .filter(|stored| !live.iter().any(|l| l.session_id == stored.session_id))
            .collect();
        merged.extend(live);
        self.save(merged).await
    }

    /// Deletes one session from the table. Returns whether it was present.
    pub async fn remove(&self, session_id: &str) -> Result<bool> {
        let mut sessions = self.load().await?;
        let before = sessions.len();
        sessions.retain(|s| s.session_id != session_id);
        if sessions.len() == before {
            return Ok(false);
        }
        self.save(sessions).await?;
        Ok(true)
    }

    pub async fn clear(&self) -> Result<()> {
        self.store.remove(PERSISTED_SESSIONS_KEY).await?;
        Ok(())
    }
}
