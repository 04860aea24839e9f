//! Storage trait definitions for server records and the execution audit log.
//!
//! These traits define the interface for storage implementations, enabling
//! dependency injection and testability. Record bodies are opaque bytes: the
//! registry serializes, the store only persists.

use async_trait::async_trait;

use crate::gateway::storage::StoreError;
use crate::gateway::types::ExecutionLogEntry;

/// Persistence for serialized server records.
///
/// Implementations must be thread-safe (`Send + Sync`) for use across
/// async tasks. `put_record` must be atomic: a concurrent `get_record`
/// observes either the previous body or the new one, never a partial write.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_record(&self, id: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Insert or replace the record `id` owned by `owner_id`.
    async fn put_record(&self, id: &str, owner_id: &str, body: Vec<u8>) -> Result<(), StoreError>;

    /// Remove a record. Returns whether it existed.
    async fn delete_record(&self, id: &str) -> Result<bool, StoreError>;

    /// All record bodies owned by `owner_id`, in no particular order.
    async fn list_records_by_owner(&self, owner_id: &str) -> Result<Vec<Vec<u8>>, StoreError>;
}

/// Append-only audit trail of execution attempts.
#[async_trait]
pub trait ExecutionLog: Send + Sync {
    async fn append(&self, entry: &ExecutionLogEntry) -> Result<(), StoreError>;

    /// Up to `limit` entries for `owner_id`, newest first.
    async fn recent(&self, owner_id: &str, limit: usize)
    -> Result<Vec<ExecutionLogEntry>, StoreError>;
}
