//! Storage layout for taskmark state
//!
//! All mutable state lives in one directory under the repository root
//! (`.taskmark/` by default, ignored by git):
//!
//! ```text
//! .taskmark/
//!   queue.json        # pending rename batches
//!   queue.json.lock   # advisory lock serializing queue writes
//!   worker.lock       # singleton worker lock (holds the worker pid)
//!   git.lock          # cross-process stage+commit critical section
//!   worker.log        # output of detached workers
//! ```

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::Result;

/// Storage manager for taskmark state
#[derive(Debug, Clone)]
pub struct Storage {
    /// Path to the repository root (working tree)
    repo_root: PathBuf,
    /// Path to the state directory
    state_dir: PathBuf,
    /// Worker log file name inside the state directory
    log_file: String,
}

impl Storage {
    pub fn new(repo_root: PathBuf, config: &Config) -> Self {
        let state_dir = config.state_dir(&repo_root);
        Self {
            repo_root,
            state_dir,
            log_file: config.worker.log_file.clone(),
        }
    }

    // =========================================================================
    // Path accessors
    // =========================================================================

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Path to the queue document
    pub fn queue_file(&self) -> PathBuf {
        self.state_dir.join("queue.json")
    }

    /// Path to the singleton worker lock
    pub fn worker_lock_file(&self) -> PathBuf {
        self.state_dir.join("worker.lock")
    }

    /// Path to the cross-process git lock
    pub fn git_lock_file(&self) -> PathBuf {
        self.state_dir.join("git.lock")
    }

    /// Path to the worker log
    pub fn log_file(&self) -> PathBuf {
        self.state_dir.join(&self.log_file)
    }

    // =========================================================================
    // Directory initialization
    // =========================================================================

    /// Create the state directory. Returns true if it was created.
    pub fn init(&self) -> Result<bool> {
        if self.state_dir.is_dir() {
            return Ok(false);
        }
        fs::create_dir_all(&self.state_dir)?;
        Ok(true)
    }

    /// Check if storage has been initialized
    pub fn is_initialized(&self) -> bool {
        self.state_dir.is_dir()
    }

    /// The state directory as a `.gitignore` pattern, when it lives inside the repo
    fn ignore_pattern(&self) -> Option<String> {
        let relative = self.state_dir.strip_prefix(&self.repo_root).ok()?;
        let relative = relative.to_string_lossy().replace('\\', "/");
        let relative = relative.trim_matches('/');
        if relative.is_empty() {
            return None;
        }
        Some(format!("/{relative}/"))
    }
}

/// Ensure the state directory is in `.gitignore`. Returns true if the file changed.
pub fn ensure_gitignore(storage: &Storage) -> io::Result<bool> {
    let Some(pattern) = storage.ignore_pattern() else {
        return Ok(false);
    };
    let gitignore_path = storage.repo_root.join(".gitignore");

    let existing = if gitignore_path.exists() {
        fs::read_to_string(&gitignore_path)?
    } else {
        String::new()
    };

    let bare = pattern.trim_matches('/');
    let already_ignored = existing.lines().any(|line| {
        let trimmed = line.trim();
        !trimmed.starts_with('#') && trimmed.trim_matches('/') == bare
    });
    if already_ignored {
        return Ok(false);
    }

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&gitignore_path)?;

    // Add newline if file doesn't end with one
    if !existing.is_empty() && !existing.ends_with('\n') {
        writeln!(file)?;
    }

    writeln!(file, "# taskmark queue state")?;
    writeln!(file, "{}", pattern)?;

    Ok(true)
}
