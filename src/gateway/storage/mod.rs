//! Storage abstractions for server records and execution history.
//!
//! This module provides trait-based storage abstractions that enable:
//! - Dependency injection for testability
//! - Lock-free concurrent access via DashMap implementations
//! - Crash-safe file persistence with atomic replace

mod file;
mod memory;
mod traits;

use thiserror::Error;

pub use file::{FileExecutionLog, FileRecordStore};
pub(crate) use file::write_atomic;
pub use memory::{MemoryExecutionLog, MemoryRecordStore};
pub use traits::{ExecutionLog, RecordStore};

/// Default number of audit entries returned when no limit is given.
pub const DEFAULT_LOG_LIMIT: usize = 50;

/// Upper bound on audit entries returned by one query.
pub const MAX_LOG_LIMIT: usize = 1000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Record id unusable as a storage key.
    #[error("invalid record id '{0}'")]
    InvalidKey(String),
}

/// Record ids become file names; restrict them to a safe alphabet.
pub(crate) fn check_record_id(id: &str) -> Result<(), StoreError> {
    let valid = !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(id.to_string()))
    }
}
