//! Background worker
//!
//! One worker per repository drains the queue: each cycle takes a snapshot of
//! the pending batches, processes them in order and removes the ones that
//! completed or were dropped. Batches that hit a busy file stay queued for
//! the next cycle. The worker exits after a run of idle cycles, releasing its
//! singleton lock so the next producer can spawn a fresh one.

use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{Config, WorkerConfig};
use crate::error::Result;
use crate::git::GitAdapter;
use crate::lock::WorkerLock;
use crate::processor::{FileOps, ProcessOutcome, Processor};
use crate::queue::TaskQueue;
use crate::storage::Storage;

/// Pacing of the worker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulePolicy {
    /// Pause after a cycle that found work
    pub active_pause: Duration,
    /// Pause after an idle cycle
    pub idle_pause: Duration,
    /// Exit once this many consecutive idle cycles are exceeded
    pub idle_cycles: u32,
}

impl From<&WorkerConfig> for SchedulePolicy {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            active_pause: config.active_pause(),
            idle_pause: config.idle_pause(),
            idle_cycles: config.idle_cycles,
        }
    }
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self::from(&WorkerConfig::default())
    }
}

/// What the worker is doing after a cycle. Leaving the loop is termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Draining,
    Idle,
}

/// Result of one pass over the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub completed: usize,
    pub dropped: usize,
    pub retried: usize,
}

impl CycleReport {
    /// Whether the snapshot had anything in it.
    pub fn had_work(&self) -> bool {
        self.completed + self.dropped + self.retried > 0
    }

    fn absorb(&mut self, other: &CycleReport) {
        self.completed += other.completed;
        self.dropped += other.dropped;
        self.retried += other.retried;
    }
}

/// Totals for a worker run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerSummary {
    pub cycles: u64,
    #[serde(flatten)]
    pub totals: CycleReport,
}

/// How `run_worker` ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkerRun {
    /// Another worker holds the lock; nothing was done.
    AlreadyRunning { pid: Option<u32> },
    Finished(WorkerSummary),
}

/// Process the current snapshot once.
///
/// A batch is removed only after it completed or was dropped; a removal
/// failure is logged and the record is left for the next cycle.
pub fn drain_once<F: FileOps>(
    queue: &TaskQueue,
    processor: &Processor<'_, F>,
) -> Result<CycleReport> {
    let snapshot = queue.list_pending()?;
    let mut report = CycleReport::default();

    for batch in &snapshot {
        let outcome = processor.process(batch);
        debug!(batch_id = batch.id, %outcome, "batch processed");

        match outcome {
            ProcessOutcome::Completed { .. } => report.completed += 1,
            ProcessOutcome::Dropped => report.dropped += 1,
            ProcessOutcome::Retry { .. } => {
                report.retried += 1;
                continue;
            }
        }

        if let Err(err) = queue.remove(batch.id) {
            warn!(batch_id = batch.id, error = %err, "failed to remove finished batch");
        }
    }

    Ok(report)
}

/// Drain until the idle threshold is exceeded.
///
/// A cycle that cannot read the queue counts as idle.
pub fn run_loop<F: FileOps>(
    queue: &TaskQueue,
    processor: &Processor<'_, F>,
    policy: &SchedulePolicy,
) -> WorkerSummary {
    let mut summary = WorkerSummary::default();
    let mut idle_count: u32 = 0;

    loop {
        summary.cycles += 1;
        let state = match drain_once(queue, processor) {
            Ok(report) if report.had_work() => {
                summary.totals.absorb(&report);
                WorkerState::Draining
            }
            Ok(_) => WorkerState::Idle,
            Err(err) => {
                warn!(error = %err, "queue unavailable, treating cycle as idle");
                WorkerState::Idle
            }
        };

        let pause = match state {
            WorkerState::Draining => {
                idle_count = 0;
                policy.active_pause
            }
            WorkerState::Idle => {
                idle_count += 1;
                if idle_count > policy.idle_cycles {
                    break;
                }
                policy.idle_pause
            }
        };

        if !pause.is_zero() {
            thread::sleep(pause);
        }
    }

    info!(
        cycles = summary.cycles,
        completed = summary.totals.completed,
        dropped = summary.totals.dropped,
        retried = summary.totals.retried,
        "worker idle, exiting"
    );
    summary
}

/// Run the worker for one repository, or return at once if another holds the lock.
///
/// With `once`, a single cycle runs instead of the idle loop.
pub fn run_worker(storage: &Storage, config: &Config, once: bool) -> Result<WorkerRun> {
    storage.init()?;

    let lock_path = storage.worker_lock_file();
    let Some(lock) = WorkerLock::try_acquire(&lock_path)? else {
        let pid = WorkerLock::recorded_pid(&lock_path);
        debug!(?pid, "worker already running");
        return Ok(WorkerRun::AlreadyRunning { pid });
    };
    info!(path = %lock.path().display(), pid = std::process::id(), "worker started");

    let queue = TaskQueue::new(storage.queue_file());
    let git = GitAdapter::new(storage.repo_root(), &config.git)
        .with_process_lock(storage.git_lock_file());
    let processor = Processor::new(&git);

    let summary = if once {
        let totals = drain_once(&queue, &processor)?;
        WorkerSummary { cycles: 1, totals }
    } else {
        run_loop(&queue, &processor, &SchedulePolicy::from(&config.worker))
    };

    drop(lock);
    Ok(WorkerRun::Finished(summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GitConfig;
    use crate::queue::RenameEntry;
    use std::fs;
    use std::io;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn fast_policy(idle_cycles: u32) -> SchedulePolicy {
        SchedulePolicy {
            active_pause: Duration::ZERO,
            idle_pause: Duration::ZERO,
            idle_cycles,
        }
    }

    fn adapter(root: &Path) -> GitAdapter {
        GitAdapter::new(
            root,
            &GitConfig {
                retry_attempts: 1,
                retry_delay_ms: 0,
                lock_timeout_ms: 1000,
            },
        )
    }

    /// Reports a file as busy for the first `busy_for` rename attempts.
    struct FlakyFileOps {
        busy_for: usize,
        attempts: AtomicUsize,
    }

    impl FileOps for FlakyFileOps {
        fn exists(&self, path: &Path) -> bool {
            path.exists()
        }

        fn remove_file(&self, path: &Path) -> io::Result<()> {
            fs::remove_file(path)
        }

        fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) < self.busy_for {
                return Err(io::Error::new(io::ErrorKind::ResourceBusy, "busy"));
            }
            fs::rename(from, to)
        }
    }

    #[test]
    fn drain_removes_completed_and_dropped() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("work");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("a.md"), "a").unwrap();

        let queue = TaskQueue::new(temp.path().join("queue.json"));
        queue
            .enqueue(&dir, vec![RenameEntry::new("a.md", "+a.md")], "M1")
            .unwrap();
        queue
            .enqueue(&dir, vec![RenameEntry::new("gone.md", "+gone.md")], "M2")
            .unwrap();

        let git = adapter(&dir);
        let report = drain_once(&queue, &Processor::new(&git)).unwrap();

        assert_eq!(
            report,
            CycleReport {
                completed: 1,
                dropped: 1,
                retried: 0
            }
        );
        assert!(queue.is_empty().unwrap());
        assert!(dir.join("+a.md").exists());
    }

    #[test]
    fn busy_batch_stays_queued_until_released() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("work");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("a.md"), "a").unwrap();

        let queue = TaskQueue::new(temp.path().join("queue.json"));
        queue
            .enqueue(&dir, vec![RenameEntry::new("a.md", "-a.md")], "M")
            .unwrap();

        let git = adapter(&dir);
        let fs_ops = FlakyFileOps {
            busy_for: 2,
            attempts: AtomicUsize::new(0),
        };
        let processor = Processor::with_file_ops(&git, fs_ops);

        for _ in 0..2 {
            let report = drain_once(&queue, &processor).unwrap();
            assert_eq!(report.retried, 1);
            assert_eq!(queue.len().unwrap(), 1);
            assert!(dir.join("a.md").exists());
        }

        let report = drain_once(&queue, &processor).unwrap();
        assert_eq!(report.completed, 1);
        assert!(queue.is_empty().unwrap());
        assert!(dir.join("-a.md").exists());
    }

    #[test]
    fn loop_exits_after_idle_threshold() {
        let temp = TempDir::new().unwrap();
        let queue = TaskQueue::new(temp.path().join("queue.json"));
        let git = adapter(temp.path());

        let summary = run_loop(&queue, &Processor::new(&git), &fast_policy(3));

        // Exit happens when the idle count exceeds the threshold
        assert_eq!(summary.cycles, 4);
        assert_eq!(summary.totals, CycleReport::default());
    }

    #[test]
    fn work_resets_idle_count() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("work");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("a.md"), "a").unwrap();

        let queue = TaskQueue::new(temp.path().join("queue.json"));
        queue
            .enqueue(&dir, vec![RenameEntry::new("a.md", "+a.md")], "M")
            .unwrap();

        let git = adapter(&dir);
        let summary = run_loop(&queue, &Processor::new(&git), &fast_policy(2));

        assert_eq!(summary.cycles, 4);
        assert_eq!(summary.totals.completed, 1);
    }

    #[test]
    fn unreadable_queue_counts_as_idle() {
        let temp = TempDir::new().unwrap();
        // A directory where the queue file should be makes every read fail
        let queue_path = temp.path().join("queue.json");
        fs::create_dir_all(&queue_path).unwrap();

        let queue = TaskQueue::new(&queue_path);
        let git = adapter(temp.path());
        let summary = run_loop(&queue, &Processor::new(&git), &fast_policy(1));

        assert_eq!(summary.cycles, 2);
    }

    #[test]
    fn second_worker_reports_already_running() {
        let temp = TempDir::new().unwrap();
        let storage = Storage::new(temp.path().to_path_buf(), &Config::default());
        storage.init().unwrap();

        let _held = WorkerLock::try_acquire(storage.worker_lock_file())
            .unwrap()
            .unwrap();
        let run = run_worker(&storage, &Config::default(), true).unwrap();

        assert_eq!(
            run,
            WorkerRun::AlreadyRunning {
                pid: Some(std::process::id())
            }
        );
    }

    #[test]
    fn worker_once_releases_lock() {
        let temp = TempDir::new().unwrap();
        let storage = Storage::new(temp.path().to_path_buf(), &Config::default());

        let run = run_worker(&storage, &Config::default(), true).unwrap();
        assert!(matches!(run, WorkerRun::Finished(WorkerSummary { cycles: 1, .. })));
        assert!(!WorkerLock::is_held(storage.worker_lock_file()).unwrap());
    }
}
