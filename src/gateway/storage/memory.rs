//! DashMap-based in-memory storage.
//!
//! Used by tests and by embedders that bring their own persistence. Includes
//! a secondary owner index for O(1) owner-to-records lookups.

use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::gateway::storage::{ExecutionLog, RecordStore, StoreError, check_record_id};
use crate::gateway::types::ExecutionLogEntry;

/// Entries kept per owner before the oldest are dropped.
const MAX_ENTRIES_PER_OWNER: usize = 10_000;

struct StoredRecord {
    owner_id: String,
    body: Vec<u8>,
}

/// DashMap-based implementation of `RecordStore`.
///
/// Uses two `DashMap` instances:
/// - Primary storage: record_id -> owner and body
/// - Secondary index: owner_id -> HashSet<record_id>
pub struct MemoryRecordStore {
    records: DashMap<String, StoredRecord>,
    records_by_owner: DashMap<String, HashSet<String>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            records_by_owner: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn unindex(&self, owner_id: &str, id: &str) {
        if let Some(mut set) = self.records_by_owner.get_mut(owner_id) {
            set.remove(id);
            if set.is_empty() {
                drop(set);
                self.records_by_owner.remove(owner_id);
            }
        }
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get_record(&self, id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.records.get(id).map(|entry| entry.body.clone()))
    }

    async fn put_record(&self, id: &str, owner_id: &str, body: Vec<u8>) -> Result<(), StoreError> {
        check_record_id(id)?;

        let previous = self.records.insert(
            id.to_string(),
            StoredRecord {
                owner_id: owner_id.to_string(),
                body,
            },
        );
        if let Some(previous) = previous
            && previous.owner_id != owner_id
        {
            self.unindex(&previous.owner_id, id);
        }

        self.records_by_owner
            .entry(owner_id.to_string())
            .or_default()
            .insert(id.to_string());
        Ok(())
    }

    async fn delete_record(&self, id: &str) -> Result<bool, StoreError> {
        match self.records.remove(id) {
            Some((_, record)) => {
                self.unindex(&record.owner_id, id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_records_by_owner(&self, owner_id: &str) -> Result<Vec<Vec<u8>>, StoreError> {
        let ids: Vec<String> = self
            .records_by_owner
            .get(owner_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();

        Ok(ids
            .iter()
            .filter_map(|id| self.records.get(id).map(|entry| entry.body.clone()))
            .collect())
    }
}

/// In-memory audit log, bounded per owner.
#[derive(Default)]
pub struct MemoryExecutionLog {
    entries: DashMap<String, VecDeque<ExecutionLogEntry>>,
}

impl MemoryExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionLog for MemoryExecutionLog {
    async fn append(&self, entry: &ExecutionLogEntry) -> Result<(), StoreError> {
        let mut owner_entries = self.entries.entry(entry.owner_id.clone()).or_default();
        owner_entries.push_back(entry.clone());
        while owner_entries.len() > MAX_ENTRIES_PER_OWNER {
            owner_entries.pop_front();
        }
        Ok(())
    }

    async fn recent(
        &self,
        owner_id: &str,
        limit: usize,
    ) -> Result<Vec<ExecutionLogEntry>, StoreError> {
        Ok(self
            .entries
            .get(owner_id)
            .map(|entries| entries.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}
