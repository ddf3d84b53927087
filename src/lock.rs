//! File locking and atomic writes
//!
//! This module provides the concurrency primitives the queue relies on:
//! - Advisory exclusive locks (fs2/flock, LockFileEx on Windows)
//! - The singleton worker lock (non-blocking, held for the worker's lifetime)
//! - Atomic write pattern (write temp + fsync + rename)
//!
//! Locks are released when the guard is dropped, or by the OS when the
//! holding process dies.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use tracing::debug;

use crate::error::{Error, Result};

/// Default lock timeout in milliseconds
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5000;

/// Default retry interval when waiting for a lock
const LOCK_RETRY_INTERVAL_MS: u64 = 50;

fn is_lock_contended(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::WouldBlock {
        return true;
    }

    // On Windows, fs2 can surface lock/sharing violations as "Other".
    #[cfg(windows)]
    {
        matches!(err.raw_os_error(), Some(32) | Some(33))
    }
    #[cfg(not(windows))]
    {
        false
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    Ok(OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?)
}

/// A file lock guard that releases the lock when dropped
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Acquire an exclusive lock on a file, waiting up to `timeout_ms`
    ///
    /// The lock file is created if missing. Returns `Error::LockFailed`
    /// when the lock is still held by someone else after the timeout.
    pub fn acquire(path: impl AsRef<Path>, timeout_ms: u64) -> Result<Self> {
        let path = path.as_ref();
        let file = open_lock_file(path)?;

        let start = Instant::now();
        let timeout = Duration::from_millis(timeout_ms);
        let retry_interval = Duration::from_millis(LOCK_RETRY_INTERVAL_MS);

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    return Ok(FileLock {
                        file,
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if is_lock_contended(&e) => {
                    if start.elapsed() >= timeout {
                        return Err(Error::LockFailed(path.to_path_buf()));
                    }
                    std::thread::sleep(retry_interval);
                }
                Err(e) => {
                    return Err(Error::Io(e));
                }
            }
        }
    }

    /// Try to acquire a lock without waiting
    ///
    /// Returns `Ok(Some(lock))` if acquired, `Ok(None)` if it is held
    /// elsewhere, or `Err` for other errors.
    pub fn try_acquire(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();
        let file = open_lock_file(path)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(FileLock {
                file,
                path: path.to_path_buf(),
            })),
            Err(e) if is_lock_contended(&e) => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Get the path to the locked file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Singleton lock held by the one worker allowed to drain the queue.
///
/// The lock file holds the owner's pid for diagnostics; only the OS-level
/// lock carries meaning.
#[derive(Debug)]
pub struct WorkerLock {
    lock: FileLock,
}

impl WorkerLock {
    /// Non-blocking acquisition. `Ok(None)` means another worker is running.
    pub fn try_acquire(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let Some(mut lock) = FileLock::try_acquire(path)? else {
            return Ok(None);
        };

        // The pid is informational; failing to record it must not cost us the lock.
        if let Err(err) = record_pid(&mut lock.file) {
            debug!(path = %lock.path.display(), error = %err, "could not record worker pid");
        }

        Ok(Some(WorkerLock { lock }))
    }

    /// Report whether some process currently holds the worker lock.
    pub fn is_held(path: impl AsRef<Path>) -> Result<bool> {
        Ok(FileLock::try_acquire(path)?.is_none())
    }

    /// Read the pid last recorded in the lock file, if any.
    ///
    /// The value may be stale when no worker is running.
    pub fn recorded_pid(path: impl AsRef<Path>) -> Option<u32> {
        let mut content = String::new();
        File::open(path).ok()?.read_to_string(&mut content).ok()?;
        content.trim().parse().ok()
    }

    pub fn path(&self) -> &Path {
        self.lock.path()
    }
}

fn record_pid(file: &mut File) -> io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    write!(file, "{}", std::process::id())?;
    file.sync_all()
}

/// Atomically write data to a file
///
/// Writes a temporary file in the same directory, fsyncs it, then renames
/// it over the target, so readers see either the old or the new content.
///
/// This does NOT acquire a lock; callers coordinating with other processes
/// hold a `FileLock` around the read-modify-write.
pub fn write_atomic(path: impl AsRef<Path>, data: &[u8]) -> Result<()> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    // Temp file in the same directory keeps the rename on one filesystem
    let temp_path = path.with_extension(format!(
        "{}.tmp.{}",
        path.extension().and_then(|e| e.to_str()).unwrap_or(""),
        std::process::id()
    ));

    let mut temp_file = File::create(&temp_path)?;
    temp_file.write_all(data)?;
    temp_file.sync_all()?;
    drop(temp_file);

    fs::rename(&temp_path, path)?;

    Ok(())
}
