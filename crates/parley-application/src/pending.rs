//! In-flight operation tracking.
//!
//! At most one operation per key (a chat session id). The entry is owned by
//! the [`PendingGuard`] returned when the operation starts and is released
//! when that guard drops, whatever path the operation took to finish.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct PendingOperation {
    id: u64,
    token: CancellationToken,
}

#[derive(Debug, Default)]
struct PendingTable {
    next_id: u64,
    operations: HashMap<String, PendingOperation>,
}

/// Table of in-flight operations, cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct PendingOperations {
    table: Arc<Mutex<PendingTable>>,
}

impl PendingOperations {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PendingTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a new operation for `key`, or returns `None` when one is
    /// already running.
    pub fn try_begin(&self, key: &str) -> Option<PendingGuard> {
        let mut table = self.lock();
        if table.operations.contains_key(key) {
            return None;
        }
        table.next_id += 1;
        let id = table.next_id;
        let token = CancellationToken::new();
        table.operations.insert(
            key.to_string(),
            PendingOperation {
                id,
                token: token.clone(),
            },
        );
        Some(PendingGuard {
            operations: self.clone(),
            key: key.to_string(),
            id,
            token,
        })
    }

    /// Signals the operation for `key`. The entry stays until its guard
    /// drops. Returns whether there was an operation to cancel.
    pub fn cancel(&self, key: &str) -> bool {
        match self.lock().operations.get(key) {
            Some(operation) => {
                operation.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for operation in self.lock().operations.values() {
            operation.token.cancel();
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().operations.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Releases its operation's entry on drop.
#[derive(Debug)]
pub struct PendingGuard {
    operations: PendingOperations,
    key: String,
    id: u64,
    token: CancellationToken,
}

impl PendingGuard {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let mut table = self.operations.lock();
        // Only our own entry; a newer operation may hold the key by now.
        if table
            .operations
            .get(&self.key)
            .is_some_and(|operation| operation.id == self.id)
        {
            table.operations.remove(&self.key);
            tracing::trace!("[Pending] Released operation {} for {}", self.id, self.key);
        }
    }
}
