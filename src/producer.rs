//! Producer-side entry points
//!
//! A `Producer` is bound to one repository. It enqueues rename batches,
//! makes sure a worker is running to drain them, and offers the immediate
//! stage+commit path that shares the worker's critical section.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::Result;
use crate::git::{discover_repo, workdir, CommitReport, GitAdapter};
use crate::marking::{self, Verdict};
use crate::queue::{RenameBatch, RenameEntry, TaskQueue};
use crate::spawn::{self, EnsureOutcome, ProcessSpawner, WorkerSpawner};
use crate::storage::Storage;

/// Result of `Producer::mark_exercise`.
#[derive(Debug, Clone, Serialize)]
pub struct MarkReport {
    pub topic: String,
    pub number: String,
    pub verdict: Verdict,
    pub batch: RenameBatch,
    pub worker: Option<EnsureOutcome>,
}

pub struct Producer {
    config: Config,
    storage: Storage,
    queue: TaskQueue,
    git: GitAdapter,
    spawner: Box<dyn WorkerSpawner>,
}

impl Producer {
    /// Open the repository containing `start` (or the current directory).
    pub fn open(start: Option<&Path>) -> Result<Self> {
        let repo = discover_repo(start)?;
        let root = workdir(&repo)?;
        let config = Config::load_from_repo(&root)?;
        Ok(Self::new(root, config))
    }

    pub fn new(repo_root: PathBuf, config: Config) -> Self {
        let storage = Storage::new(repo_root, &config);
        let queue = TaskQueue::new(storage.queue_file());
        let git = GitAdapter::new(storage.repo_root(), &config.git)
            .with_process_lock(storage.git_lock_file());
        Self {
            config,
            storage,
            queue,
            git,
            spawner: Box::new(ProcessSpawner::new()),
        }
    }

    pub fn with_spawner(mut self, spawner: impl WorkerSpawner + 'static) -> Self {
        self.spawner = Box::new(spawner);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// Queue a rename batch. Durable once this returns.
    ///
    /// A relative `directory` is taken relative to the repository root.
    pub fn enqueue_rename(
        &self,
        directory: &Path,
        entries: Vec<RenameEntry>,
        commit_message: &str,
    ) -> Result<RenameBatch> {
        self.storage.init()?;
        let directory = if directory.is_absolute() {
            directory.to_path_buf()
        } else {
            self.storage.repo_root().join(directory)
        };
        self.queue.enqueue(&directory, entries, commit_message)
    }

    /// Spawn a detached worker unless one is already running.
    pub fn ensure_worker_running(&self) -> Result<EnsureOutcome> {
        self.storage.init()?;
        spawn::ensure_worker_running(
            self.storage.repo_root(),
            &self.storage.worker_lock_file(),
            self.spawner.as_ref(),
        )
    }

    /// Queue the status rename for one exercise and, when `spawn_worker`
    /// is set, make sure a worker picks it up.
    pub fn mark_exercise(
        &self,
        topic: &str,
        number: &str,
        verdict: Verdict,
        spawn_worker: bool,
    ) -> Result<MarkReport> {
        let marks = &self.config.marks;
        let directory = marking::locate_exercise_dir(self.storage.repo_root(), marks, topic)?;
        let entries = marking::exercise_entries(marks, number, verdict);
        let message = marking::commit_message(marks, topic, number, verdict);

        let batch = self.enqueue_rename(&directory, entries, &message)?;
        info!(topic, number, %verdict, batch_id = batch.id, "exercise mark queued");

        let worker = if spawn_worker {
            Some(self.ensure_worker_running()?)
        } else {
            debug!("worker spawn skipped");
            None
        };

        Ok(MarkReport {
            topic: topic.to_string(),
            number: number.to_string(),
            verdict,
            batch,
            worker,
        })
    }

    /// Stage and commit `paths` right away, serialized with the worker.
    pub fn commit_paths(&self, paths: &[PathBuf], message: &str) -> Result<CommitReport> {
        self.storage.init()?;
        Ok(self.git.stage_and_commit(paths, message))
    }
}
