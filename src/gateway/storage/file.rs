//! File-backed storage.
//!
//! Records live at `<root>/<owner>/<id>.json`, where `<owner>` is the
//! URL-safe base64 of the owner id. Every write goes to a temporary file in
//! the same directory, is synced, and is then renamed over the target, so a
//! reader or a crash never observes a half-written record.
//!
//! The audit log is a JSON Lines file appended under a mutex. Queries read
//! it backwards in fixed-size chunks and stop once they have enough entries,
//! so their cost follows the entries returned rather than the file size.

use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use dashmap::DashMap;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::gateway::storage::{ExecutionLog, RecordStore, StoreError, check_record_id};
use crate::gateway::types::ExecutionLogEntry;

const RECORD_EXTENSION: &str = "json";

/// Bytes read per step when scanning the audit log from the end.
const LOG_READ_CHUNK: u64 = 64 * 1024;

/// Write `body` to `path` atomically via a synced temporary file and rename.
pub(crate) async fn write_atomic(path: &Path, body: &[u8]) -> Result<(), StoreError> {
    let dir = path
        .parent()
        .ok_or_else(|| StoreError::InvalidKey(path.display().to_string()))?;
    fs::create_dir_all(dir).await?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    let mut file = fs::File::create(&tmp).await?;
    let written = async {
        file.write_all(body).await?;
        file.sync_all().await
    }
    .await;
    drop(file);

    if let Err(e) = written {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    sync_dir(dir).await
}

/// Persist directory entries so a completed rename survives a crash.
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> Result<(), StoreError> {
    fs::File::open(dir).await?.sync_all().await?;
    Ok(())
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> Result<(), StoreError> {
    Ok(())
}

fn owner_dir_name(owner_id: &str) -> String {
    URL_SAFE_NO_PAD.encode(owner_id.as_bytes())
}

/// Record store over a directory tree.
///
/// An id-to-owner index is rebuilt from the directory tree at open, so
/// lookups by id do not scan the disk.
pub struct FileRecordStore {
    root: PathBuf,
    owners: DashMap<String, String>,
}

impl FileRecordStore {
    /// Open (creating if needed) the store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;

        let owners = DashMap::new();
        let mut owner_dirs = fs::read_dir(&root).await?;
        while let Some(owner_entry) = owner_dirs.next_entry().await? {
            if !owner_entry.file_type().await?.is_dir() {
                continue;
            }
            let dir_name = owner_entry.file_name().to_string_lossy().into_owned();
            let owner_id = match URL_SAFE_NO_PAD
                .decode(dir_name.as_bytes())
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
            {
                Some(owner_id) => owner_id,
                None => {
                    warn!(dir = %dir_name, "Skipping unrecognized directory in record store");
                    continue;
                }
            };

            let mut records = fs::read_dir(owner_entry.path()).await?;
            while let Some(record_entry) = records.next_entry().await? {
                let path = record_entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                    continue;
                }
                if let Some(id) = path.file_stem().and_then(|s| s.to_str())
                    && check_record_id(id).is_ok()
                {
                    owners.insert(id.to_string(), owner_id.clone());
                }
            }
        }

        debug!(root = %root.display(), records = owners.len(), "Opened file record store");
        Ok(Self { root, owners })
    }

    fn record_path(&self, owner_id: &str, id: &str) -> PathBuf {
        self.root
            .join(owner_dir_name(owner_id))
            .join(format!("{}.{}", id, RECORD_EXTENSION))
    }
}

#[async_trait]
impl RecordStore for FileRecordStore {
    async fn get_record(&self, id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let Some(owner_id) = self.owners.get(id).map(|o| o.value().clone()) else {
            return Ok(None);
        };
        match fs::read(self.record_path(&owner_id, id)).await {
            Ok(body) => Ok(Some(body)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put_record(&self, id: &str, owner_id: &str, body: Vec<u8>) -> Result<(), StoreError> {
        check_record_id(id)?;
        write_atomic(&self.record_path(owner_id, id), &body).await?;

        let previous = self.owners.insert(id.to_string(), owner_id.to_string());
        if let Some(previous) = previous
            && previous != owner_id
        {
            let _ = fs::remove_file(self.record_path(&previous, id)).await;
        }
        Ok(())
    }

    async fn delete_record(&self, id: &str) -> Result<bool, StoreError> {
        let Some((_, owner_id)) = self.owners.remove(id) else {
            return Ok(false);
        };
        match fs::remove_file(self.record_path(&owner_id, id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_records_by_owner(&self, owner_id: &str) -> Result<Vec<Vec<u8>>, StoreError> {
        let ids: Vec<String> = self
            .owners
            .iter()
            .filter(|entry| entry.value() == owner_id)
            .map(|entry| entry.key().clone())
            .collect();

        let mut bodies = Vec::with_capacity(ids.len());
        for id in ids {
            match fs::read(self.record_path(owner_id, &id)).await {
                Ok(body) => bodies.push(body),
                // Deleted between the index scan and the read
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(bodies)
    }
}

/// Audit log stored as JSON Lines.
pub struct FileExecutionLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileExecutionLog {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }
}

#[async_trait]
impl ExecutionLog for FileExecutionLog {
    async fn append(&self, entry: &ExecutionLogEntry) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    async fn recent(
        &self,
        owner_id: &str,
        limit: usize,
    ) -> Result<Vec<ExecutionLogEntry>, StoreError> {
        self.scan_backwards(owner_id, limit, LOG_READ_CHUNK).await
    }
}

impl FileExecutionLog {
    /// Newest-first scan that reads `chunk` bytes at a time from the end.
    ///
    /// Only bytes present when the scan starts are read; appends that land
    /// during the scan are not seen.
    async fn scan_backwards(
        &self,
        owner_id: &str,
        limit: usize,
        chunk: u64,
    ) -> Result<Vec<ExecutionLogEntry>, StoreError> {
        let mut file = match fs::File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let len = {
            let _guard = self.lock.lock().await;
            file.metadata().await?.len()
        };

        let mut entries = Vec::new();
        let mut pos = len;
        // Start of a line whose beginning lies in an earlier chunk
        let mut partial: Vec<u8> = Vec::new();

        while pos > 0 && entries.len() < limit {
            let start = pos.saturating_sub(chunk);
            let mut buf = vec![0u8; (pos - start) as usize];
            file.seek(SeekFrom::Start(start)).await?;
            file.read_exact(&mut buf).await?;
            buf.extend_from_slice(&partial);
            pos = start;

            let complete_from = if pos == 0 {
                0
            } else {
                match buf.iter().position(|b| *b == b'\n') {
                    Some(idx) => idx + 1,
                    None => {
                        partial = buf;
                        continue;
                    }
                }
            };

            for line in buf[complete_from..].split(|b| *b == b'\n').rev() {
                if entries.len() >= limit {
                    break;
                }
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                match serde_json::from_slice::<ExecutionLogEntry>(line) {
                    Ok(entry) if entry.owner_id == owner_id => entries.push(entry),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Skipping malformed audit log line"),
                }
            }
            buf.truncate(complete_from);
            partial = buf;
        }
        Ok(entries)
    }
}
