//! Launching the background worker
//!
//! The worker is this same binary run as `taskmark --repo <root> worker`,
//! detached from the caller: null stdio and its own process group, so it
//! outlives the producer that started it.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::lock::WorkerLock;

/// Something that can start a worker for a repository.
pub trait WorkerSpawner {
    /// Start a worker and return its pid.
    fn spawn(&self, repo_root: &Path) -> Result<u32>;
}

/// Spawns the current executable as a detached worker process.
#[derive(Debug, Clone, Default)]
pub struct ProcessSpawner {
    program: Option<PathBuf>,
}

impl ProcessSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific binary instead of the current executable.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: Some(program.into()),
        }
    }

    fn program(&self) -> Result<PathBuf> {
        match &self.program {
            Some(program) => Ok(program.clone()),
            None => std::env::current_exe()
                .map_err(|e| Error::SpawnFailed(format!("failed to get executable path: {e}"))),
        }
    }
}

impl WorkerSpawner for ProcessSpawner {
    fn spawn(&self, repo_root: &Path) -> Result<u32> {
        let program = self.program()?;

        let mut command = Command::new(&program);
        command
            .arg("--repo")
            .arg(repo_root)
            .arg("worker")
            .current_dir(repo_root)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        detach(&mut command);

        let mut child = command
            .spawn()
            .map_err(|e| Error::SpawnFailed(format!("{}: {e}", program.display())))?;
        let pid = child.id();

        // Reaped on exit. A CLI producer usually exits first and the worker is reparented.
        let reaper = thread::Builder::new()
            .name(format!("taskmark-reap-{pid}"))
            .spawn(move || child.wait());
        if let Err(err) = reaper {
            debug!(pid, error = %err, "could not start reaper thread");
        }

        Ok(pid)
    }
}

#[cfg(unix)]
fn detach(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(windows)]
fn detach(command: &mut Command) {
    use std::os::windows::process::CommandExt;
    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP | CREATE_NO_WINDOW);
}

#[cfg(not(any(unix, windows)))]
fn detach(_command: &mut Command) {}

/// What `ensure_worker_running` did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EnsureOutcome {
    Spawned { pid: u32 },
    AlreadyRunning { pid: Option<u32> },
}

/// Spawn a worker unless one already holds the worker lock.
///
/// Two callers racing past the check both spawn; the loser's worker finds
/// the lock taken and exits at once.
pub fn ensure_worker_running(
    repo_root: &Path,
    lock_path: &Path,
    spawner: &dyn WorkerSpawner,
) -> Result<EnsureOutcome> {
    if WorkerLock::is_held(lock_path)? {
        let pid = WorkerLock::recorded_pid(lock_path);
        debug!(?pid, "worker already running, not spawning");
        return Ok(EnsureOutcome::AlreadyRunning { pid });
    }

    let pid = spawner.spawn(repo_root)?;
    info!(pid, repo = %repo_root.display(), "spawned worker");
    Ok(EnsureOutcome::Spawned { pid })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingSpawner {
        calls: RefCell<Vec<PathBuf>>,
    }

    impl WorkerSpawner for RecordingSpawner {
        fn spawn(&self, repo_root: &Path) -> Result<u32> {
            self.calls.borrow_mut().push(repo_root.to_path_buf());
            Ok(4242)
        }
    }

    #[test]
    fn spawns_when_lock_free() {
        let temp = TempDir::new().unwrap();
        let lock_path = temp.path().join("worker.lock");
        let spawner = RecordingSpawner::default();

        let outcome = ensure_worker_running(temp.path(), &lock_path, &spawner).unwrap();

        assert_eq!(outcome, EnsureOutcome::Spawned { pid: 4242 });
        assert_eq!(*spawner.calls.borrow(), vec![temp.path().to_path_buf()]);
        // Checking must not leave the lock held
        assert!(!WorkerLock::is_held(&lock_path).unwrap());
    }

    #[test]
    fn skips_when_worker_holds_lock() {
        let temp = TempDir::new().unwrap();
        let lock_path = temp.path().join("worker.lock");
        let _worker = WorkerLock::try_acquire(&lock_path).unwrap().unwrap();
        let spawner = RecordingSpawner::default();

        let outcome = ensure_worker_running(temp.path(), &lock_path, &spawner).unwrap();

        assert_eq!(
            outcome,
            EnsureOutcome::AlreadyRunning {
                pid: Some(std::process::id())
            }
        );
        assert!(spawner.calls.borrow().is_empty());
    }

    #[test]
    fn missing_program_is_spawn_failure() {
        let temp = TempDir::new().unwrap();
        let spawner = ProcessSpawner::with_program(temp.path().join("no-such-binary"));

        let err = spawner.spawn(temp.path()).unwrap_err();
        assert!(matches!(err, Error::SpawnFailed(_)));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn exited_worker_is_reaped() {
        let temp = TempDir::new().unwrap();
        let spawner = ProcessSpawner::with_program("true");

        let pid = spawner.spawn(temp.path()).unwrap();

        // An unreaped child lingers in /proc as a zombie
        let proc_entry = PathBuf::from(format!("/proc/{pid}"));
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while proc_entry.exists() && std::time::Instant::now() < deadline {
            thread::sleep(std::time::Duration::from_millis(20));
        }
        assert!(!proc_entry.exists(), "worker {pid} was not reaped");
    }
}
