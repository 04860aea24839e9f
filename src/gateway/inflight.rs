//! Index of running executions, so deleting a server can cancel them.
//!
//! Uses DashMap for lock-free concurrent access, with a secondary index from
//! server id to execution ids for O(1) lookup on delete.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

struct Entry {
    server_id: String,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Tables {
    executions: DashMap<String, Entry>,
    /// Secondary index: server_id -> set of execution ids.
    by_server: DashMap<String, HashSet<String>>,
}

#[derive(Clone, Default)]
pub(crate) struct InflightIndex {
    tables: Arc<Tables>,
}

/// Keeps an execution registered until dropped.
pub(crate) struct InflightGuard {
    id: String,
    cancel: CancellationToken,
    tables: Arc<Tables>,
}

impl InflightIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new execution against `server_id`.
    pub fn register(&self, server_id: &str) -> InflightGuard {
        let id = uuid::Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();

        self.tables.executions.insert(
            id.clone(),
            Entry {
                server_id: server_id.to_string(),
                cancel: cancel.clone(),
            },
        );
        self.tables
            .by_server
            .entry(server_id.to_string())
            .or_default()
            .insert(id.clone());

        InflightGuard {
            id,
            cancel,
            tables: Arc::clone(&self.tables),
        }
    }

    /// Cancel every execution running against `server_id`. Returns how many.
    pub fn cancel_server(&self, server_id: &str) -> usize {
        let ids: Vec<String> = self
            .tables
            .by_server
            .get(server_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();

        let mut cancelled = 0;
        for id in ids {
            if let Some(entry) = self.tables.executions.get(&id) {
                entry.cancel.cancel();
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Number of executions running against `server_id`.
    pub fn count_for_server(&self, server_id: &str) -> usize {
        self.tables
            .by_server
            .get(server_id)
            .map(|set| set.len())
            .unwrap_or(0)
    }
}

impl InflightGuard {
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        let removed = self.tables.executions.remove(&self.id).map(|(_, e)| e);

        if let Some(ref entry) = removed
            && let Some(mut set) = self.tables.by_server.get_mut(&entry.server_id)
        {
            set.remove(&self.id);
            // Clean up empty sets
            if set.is_empty() {
                drop(set);
                self.tables
                    .by_server
                    .remove_if(&entry.server_id, |_, set| set.is_empty());
            }
        }
    }
}
