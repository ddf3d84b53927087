//! Git repository discovery and the stage/commit adapter.
//!
//! The adapter wraps the only two history operations taskmark needs:
//! staging a path and committing the index. Neither ever raises: callers get
//! an outcome enum and decide what to log. Every call runs inside one
//! critical section owned by the adapter (an in-process mutex plus an
//! optional cross-process file lock), so a producer committing directly and
//! the background worker cannot interleave their stage and commit steps.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use git2::{ErrorCode, Oid, Repository, Signature};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::GitConfig;
use crate::error::{Error, Result};
use crate::lock::FileLock;

/// Identity used when the repository has no `user.name`/`user.email`.
const FALLBACK_NAME: &str = "taskmark";
const FALLBACK_EMAIL: &str = "taskmark@localhost";

/// Discover a git repository from a starting path.
pub fn discover_repo(start: Option<&Path>) -> Result<Repository> {
    let start_path = match start {
        Some(path) => path.to_path_buf(),
        None => std::env::current_dir()?,
    };

    Repository::discover(&start_path).map_err(|err| {
        if err.code() == ErrorCode::NotFound {
            Error::RepoNotFound(start_path)
        } else {
            Error::Git(err)
        }
    })
}

/// Return the repository workdir (root of the working tree).
pub fn workdir(repo: &Repository) -> Result<PathBuf> {
    repo.workdir()
        .map(|path| path.to_path_buf())
        .ok_or_else(|| Error::NotARepo(repo.path().to_path_buf()))
}

/// Result of staging one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum StageOutcome {
    /// The file's current content is in the index.
    Staged,
    /// The file is gone from disk; its removal is in the index.
    Removed,
    /// Neither on disk nor tracked.
    NotFound,
    NotARepo,
    Failed(String),
}

impl StageOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, StageOutcome::Staged | StageOutcome::Removed)
    }
}

/// Result of committing the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "commit", rename_all = "snake_case")]
pub enum CommitOutcome {
    Committed(String),
    /// The index matches HEAD; treated as success.
    NothingToCommit,
    Failed(String),
}

impl CommitOutcome {
    pub fn is_ok(&self) -> bool {
        !matches!(self, CommitOutcome::Failed(_))
    }
}

/// Everything one stage+commit critical section did.
#[derive(Debug, Clone, Serialize)]
pub struct CommitReport {
    pub staged: Vec<(PathBuf, StageOutcome)>,
    pub commit: CommitOutcome,
}

/// Stage/commit adapter for one repository.
#[derive(Debug)]
pub struct GitAdapter {
    root: PathBuf,
    process_lock: Option<PathBuf>,
    lock_timeout_ms: u64,
    attempts: u32,
    retry_delay: Duration,
    guard: Mutex<()>,
}

impl GitAdapter {
    pub fn new(root: impl Into<PathBuf>, settings: &GitConfig) -> Self {
        Self {
            root: root.into(),
            process_lock: None,
            lock_timeout_ms: settings.lock_timeout_ms,
            attempts: settings.retry_attempts.max(1),
            retry_delay: settings.retry_delay(),
            guard: Mutex::new(()),
        }
    }

    /// Also serialize against other processes through an advisory lock file.
    pub fn with_process_lock(mut self, path: impl Into<PathBuf>) -> Self {
        self.process_lock = Some(path.into());
        self
    }

    /// Run `f` inside the critical section with a freshly opened repository.
    ///
    /// Fails only when the cross-process lock cannot be taken in time.
    pub fn with_session<T>(&self, f: impl FnOnce(&mut GitSession<'_>) -> T) -> Result<T> {
        let _local = self
            .guard
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let _shared = match &self.process_lock {
            Some(path) => Some(FileLock::acquire(path, self.lock_timeout_ms)?),
            None => None,
        };

        let repo = match Repository::open(&self.root) {
            Ok(repo) if repo.workdir().is_some() => Ok(repo),
            Ok(_) => Err(RepoUnavailable::NotARepo),
            Err(err) if err.code() == ErrorCode::NotFound => Err(RepoUnavailable::NotARepo),
            Err(err) => Err(RepoUnavailable::Failed(err.message().to_string())),
        };

        let mut session = GitSession {
            adapter: self,
            repo,
        };
        Ok(f(&mut session))
    }

    /// Stage one path in its own critical section.
    pub fn stage(&self, path: &Path) -> StageOutcome {
        self.with_session(|session| session.stage(path))
            .unwrap_or_else(|err| StageOutcome::Failed(err.to_string()))
    }

    /// Commit the index in its own critical section.
    pub fn commit(&self, message: &str) -> CommitOutcome {
        self.with_session(|session| session.commit(message))
            .unwrap_or_else(|err| CommitOutcome::Failed(err.to_string()))
    }

    /// Stage every path, then commit once, all in one critical section.
    ///
    /// Stage failures are recorded and do not prevent the commit of whatever
    /// did get staged.
    pub fn stage_and_commit(&self, paths: &[PathBuf], message: &str) -> CommitReport {
        let result = self.with_session(|session| {
            let staged: Vec<(PathBuf, StageOutcome)> = paths
                .iter()
                .map(|path| (path.clone(), session.stage(path)))
                .collect();
            let commit = session.commit(message);
            CommitReport { staged, commit }
        });

        result.unwrap_or_else(|err| CommitReport {
            staged: Vec::new(),
            commit: CommitOutcome::Failed(err.to_string()),
        })
    }

    fn with_retry<T>(
        &self,
        op: &str,
        mut attempt_fn: impl FnMut() -> std::result::Result<T, git2::Error>,
    ) -> std::result::Result<T, git2::Error> {
        let mut attempt = 1;
        loop {
            match attempt_fn() {
                Ok(value) => return Ok(value),
                Err(err) if err.code() == ErrorCode::Locked && attempt < self.attempts => {
                    debug!(op, attempt, error = %err.message(), "git index locked, retrying");
                    if !self.retry_delay.is_zero() {
                        std::thread::sleep(self.retry_delay);
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[derive(Debug)]
enum RepoUnavailable {
    NotARepo,
    Failed(String),
}

/// Handle passed to `GitAdapter::with_session`; only exists inside the critical section.
pub struct GitSession<'a> {
    adapter: &'a GitAdapter,
    repo: std::result::Result<Repository, RepoUnavailable>,
}

impl GitSession<'_> {
    /// Stage `path` (absolute, or relative to the repository root).
    ///
    /// A tracked path that no longer exists has its removal staged, the way
    /// `git add` treats a deleted file.
    pub fn stage(&mut self, path: &Path) -> StageOutcome {
        let repo = match &self.repo {
            Ok(repo) => repo,
            Err(RepoUnavailable::NotARepo) => return StageOutcome::NotARepo,
            Err(RepoUnavailable::Failed(reason)) => return StageOutcome::Failed(reason.clone()),
        };

        let Some(workdir) = repo.workdir() else {
            return StageOutcome::NotARepo;
        };
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.adapter.root.join(path)
        };
        let Some(relative) = relative_to_workdir(workdir, &absolute) else {
            return StageOutcome::Failed(format!(
                "{} is outside the repository",
                absolute.display()
            ));
        };
        let exists = absolute.symlink_metadata().is_ok();

        let result = self.adapter.with_retry("stage", || {
            let mut index = repo.index()?;
            index.read(false)?;
            let outcome = if exists {
                index.add_path(&relative)?;
                StageOutcome::Staged
            } else if index.get_path(&relative, 0).is_some() {
                index.remove_path(&relative)?;
                StageOutcome::Removed
            } else {
                return Ok(StageOutcome::NotFound);
            };
            index.write()?;
            Ok(outcome)
        });

        match result {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(path = %absolute.display(), error = %err.message(), "git stage failed");
                StageOutcome::Failed(err.message().to_string())
            }
        }
    }

    /// Commit the current index with `message`.
    pub fn commit(&mut self, message: &str) -> CommitOutcome {
        let repo = match &self.repo {
            Ok(repo) => repo,
            Err(RepoUnavailable::NotARepo) => {
                return CommitOutcome::Failed(format!(
                    "not a git repository: {}",
                    self.adapter.root.display()
                ))
            }
            Err(RepoUnavailable::Failed(reason)) => return CommitOutcome::Failed(reason.clone()),
        };

        match self.adapter.with_retry("commit", || commit_index(repo, message)) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %err.message(), "git commit failed");
                CommitOutcome::Failed(err.message().to_string())
            }
        }
    }
}

fn commit_index(
    repo: &Repository,
    message: &str,
) -> std::result::Result<CommitOutcome, git2::Error> {
    let mut index = repo.index()?;
    index.read(false)?;

    let tree_oid = index.write_tree()?;
    let tree = repo.find_tree(tree_oid)?;

    let parent = match repo.head() {
        Ok(head) => Some(head.peel_to_commit()?),
        Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => None,
        Err(e) => return Err(e),
    };

    let unchanged = match &parent {
        Some(parent) => parent.tree_id() == tree_oid,
        None => index.is_empty(),
    };
    if unchanged {
        return Ok(CommitOutcome::NothingToCommit);
    }

    let signature = match repo.signature() {
        Ok(signature) => signature,
        Err(_) => Signature::now(FALLBACK_NAME, FALLBACK_EMAIL)?,
    };
    let parents: Vec<&git2::Commit> = parent.iter().collect();
    let oid: Oid = repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?;

    Ok(CommitOutcome::Committed(oid.to_string()))
}

/// Express `path` relative to the working tree, resolving symlinked prefixes
/// (e.g. `/var` vs `/private/var`) on both sides.
fn relative_to_workdir(workdir: &Path, path: &Path) -> Option<PathBuf> {
    let workdir = workdir.canonicalize().ok()?;
    let resolved = match path.canonicalize() {
        Ok(resolved) => resolved,
        Err(_) => {
            let parent = path.parent()?.canonicalize().ok()?;
            parent.join(path.file_name()?)
        }
    };
    resolved.strip_prefix(&workdir).ok().map(Path::to_path_buf)
}
