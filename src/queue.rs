//! Durable queue of pending rename batches.
//!
//! The queue is one JSON document rewritten atomically under an exclusive
//! advisory lock, so any number of producer processes can enqueue while the
//! worker drains. Each batch is keyed by its directory plus the set of base
//! names it touches; enqueueing a batch with a key that is already pending
//! replaces the pending record (last write wins).
//!
//! Record ids come from a persisted counter and are never reused, so removing
//! a processed batch by id can never delete a newer batch that superseded it
//! while it was being processed.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::lock::{self, FileLock, DEFAULT_LOCK_TIMEOUT_MS};

/// One requested rename: the canonical (unmarked) name and the desired name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameEntry {
    pub base: String,
    pub target: String,
}

impl RenameEntry {
    pub fn new(base: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            target: target.into(),
        }
    }
}

/// A decoded queue record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenameBatch {
    pub id: u64,
    pub directory: PathBuf,
    pub entries: Vec<RenameEntry>,
    pub commit_message: String,
    pub dedup_key: String,
    pub enqueued_at: DateTime<Utc>,
}

/// On-disk form of a batch. `entries` is kept as JSON text so one bad
/// record cannot make the whole document unreadable.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct QueueRecord {
    id: u64,
    directory: PathBuf,
    entries: String,
    commit_message: String,
    dedup_key: String,
    #[serde(default = "Utc::now")]
    enqueued_at: DateTime<Utc>,
}

impl QueueRecord {
    fn decode(&self) -> std::result::Result<RenameBatch, serde_json::Error> {
        let entries: Vec<RenameEntry> = serde_json::from_str(&self.entries)?;
        Ok(RenameBatch {
            id: self.id,
            directory: self.directory.clone(),
            entries,
            commit_message: self.commit_message.clone(),
            dedup_key: self.dedup_key.clone(),
            enqueued_at: self.enqueued_at,
        })
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueDocument {
    #[serde(default)]
    next_id: u64,
    #[serde(default)]
    batches: Vec<QueueRecord>,
}

impl QueueDocument {
    fn allocate_id(&mut self) -> u64 {
        let floor = self.batches.iter().map(|b| b.id).max().unwrap_or(0) + 1;
        let id = self.next_id.max(floor).max(1);
        self.next_id = id + 1;
        id
    }
}

/// Derive the supersession key for a batch: the normalized directory plus
/// the sorted, de-duplicated base names.
pub fn dedup_key(directory: &Path, entries: &[RenameEntry]) -> String {
    let directory: PathBuf = directory.components().collect();
    let bases: BTreeSet<&str> = entries.iter().map(|e| e.base.as_str()).collect();

    let mut key = directory.to_string_lossy().into_owned();
    for base in bases {
        key.push('\u{1f}');
        key.push_str(base);
    }
    key
}

/// File-backed task queue.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    path: PathBuf,
    lock_timeout_ms: u64,
}

impl TaskQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert a batch, replacing any pending batch with the same key.
    ///
    /// Returns once the new document has been written and synced.
    pub fn enqueue(
        &self,
        directory: &Path,
        entries: Vec<RenameEntry>,
        commit_message: &str,
    ) -> Result<RenameBatch> {
        validate_batch(directory, &entries)?;

        let dedup_key = dedup_key(directory, &entries);
        let encoded = serde_json::to_string(&entries)?;
        let enqueued_at = Utc::now();

        let id = self.transact(|doc| {
            let before = doc.batches.len();
            doc.batches.retain(|record| {
                if record.dedup_key == dedup_key {
                    debug!(superseded = record.id, "replacing pending batch");
                    false
                } else {
                    true
                }
            });
            let replaced = before != doc.batches.len();

            let id = doc.allocate_id();
            doc.batches.push(QueueRecord {
                id,
                directory: directory.to_path_buf(),
                entries: encoded,
                commit_message: commit_message.to_string(),
                dedup_key: dedup_key.clone(),
                enqueued_at,
            });

            info!(batch_id = id, replaced, directory = %directory.display(), "batch enqueued");
            Ok((id, true))
        })?;

        Ok(RenameBatch {
            id,
            directory: directory.to_path_buf(),
            entries,
            commit_message: commit_message.to_string(),
            dedup_key,
            enqueued_at,
        })
    }

    /// All pending batches in insertion order.
    ///
    /// Records whose entry list cannot be decoded are deleted here and never
    /// returned.
    pub fn list_pending(&self) -> Result<Vec<RenameBatch>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        self.transact(|doc| {
            let mut batches = Vec::with_capacity(doc.batches.len());
            let mut corrupt = Vec::new();
            for record in &doc.batches {
                match record.decode() {
                    Ok(batch) => batches.push(batch),
                    Err(err) => {
                        warn!(batch_id = record.id, error = %err, "dropping corrupt queue record");
                        corrupt.push(record.id);
                    }
                }
            }

            let changed = !corrupt.is_empty();
            if changed {
                doc.batches.retain(|record| !corrupt.contains(&record.id));
            }
            Ok((batches, changed))
        })
    }

    /// Delete a batch by id. Returns false if it was already gone.
    pub fn remove(&self, id: u64) -> Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }

        self.transact(|doc| {
            let before = doc.batches.len();
            doc.batches.retain(|record| record.id != id);
            let removed = before != doc.batches.len();
            Ok((removed, removed))
        })
    }

    /// Number of pending records (including undecodable ones).
    pub fn len(&self) -> Result<usize> {
        if !self.path.exists() {
            return Ok(0);
        }
        self.transact(|doc| Ok((doc.batches.len(), false)))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Locked read-modify-write. The closure returns its value and whether
    /// the document changed and must be written back.
    fn transact<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut QueueDocument) -> Result<(T, bool)>,
    {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let lock_path = queue_lock_path(&self.path);
        let _lock = FileLock::acquire(&lock_path, self.lock_timeout_ms)?;

        let mut doc = self.read_document()?;
        let (result, changed) = f(&mut doc)?;

        if changed {
            let json = serde_json::to_string_pretty(&doc)?;
            lock::write_atomic(&self.path, json.as_bytes())?;
        }

        Ok(result)
    }

    /// Read the document. An unparseable file is moved aside and treated as
    /// empty rather than wedging every producer and the worker.
    fn read_document(&self) -> Result<QueueDocument> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(QueueDocument::default())
            }
            Err(err) => return Err(Error::Io(err)),
        };

        if content.trim().is_empty() {
            return Ok(QueueDocument::default());
        }

        match serde_json::from_str(&content) {
            Ok(doc) => Ok(doc),
            Err(err) => {
                let backup = PathBuf::from(format!("{}.corrupt", self.path.display()));
                warn!(
                    path = %self.path.display(),
                    backup = %backup.display(),
                    error = %err,
                    "queue file unreadable, starting empty"
                );
                fs::rename(&self.path, &backup)?;
                Ok(QueueDocument::default())
            }
        }
    }
}

fn queue_lock_path(path: &Path) -> PathBuf {
    PathBuf::from(format!("{}.lock", path.display()))
}

fn validate_batch(directory: &Path, entries: &[RenameEntry]) -> Result<()> {
    if !directory.is_absolute() {
        return Err(Error::InvalidArgument(format!(
            "batch directory must be absolute: {}",
            directory.display()
        )));
    }
    if entries.is_empty() {
        return Err(Error::InvalidArgument(
            "batch must contain at least one entry".to_string(),
        ));
    }
    let mut bases = BTreeSet::new();
    let mut targets = BTreeSet::new();
    for entry in entries {
        validate_file_name("base", &entry.base)?;
        validate_file_name("target", &entry.target)?;
        // Two entries for one file resolve to the same source and can never both apply.
        if !bases.insert(entry.base.as_str()) {
            return Err(Error::InvalidArgument(format!(
                "base name appears more than once: {:?}",
                entry.base
            )));
        }
        if !targets.insert(entry.target.as_str()) {
            return Err(Error::InvalidArgument(format!(
                "target name appears more than once: {:?}",
                entry.target
            )));
        }
    }
    Ok(())
}

fn validate_file_name(kind: &str, name: &str) -> Result<()> {
    let mut components = Path::new(name).components();
    let plain = matches!(components.next(), Some(Component::Normal(_)))
        && components.next().is_none()
        && !name.contains('/')
        && !name.contains('\\');
    if !plain {
        return Err(Error::InvalidArgument(format!(
            "{kind} name must be a plain file name: {name:?}"
        )));
    }
    Ok(())
}
