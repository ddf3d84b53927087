//! Rename batch processing.
//!
//! A batch is applied all-or-nothing: every entry is resolved to the file
//! currently on disk, the renames run in entry order, and the first failure
//! rolls back the renames already done (in reverse) so the directory is left
//! exactly as it was found. Only a fully applied batch reaches git.

use std::collections::HashSet;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::git::{CommitOutcome, CommitReport, GitAdapter, StageOutcome};
use crate::queue::{RenameBatch, RenameEntry};

/// Prefix marking an exercise as solved.
pub const MARK_CORRECT: &str = "+";
/// Prefix marking an exercise as failed.
pub const MARK_INCORRECT: &str = "-";

/// Prefixes probed after the target itself: canonical, correct, incorrect.
const CANDIDATE_PREFIXES: [&str; 3] = ["", MARK_CORRECT, MARK_INCORRECT];

/// File system operations the processor needs. The OS implementation is
/// `OsFileOps`; tests substitute one that fails on demand.
pub trait FileOps {
    fn exists(&self, path: &Path) -> bool;
    fn remove_file(&self, path: &Path) -> io::Result<()>;
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OsFileOps;

impl FileOps for OsFileOps {
    fn exists(&self, path: &Path) -> bool {
        path.symlink_metadata().is_ok()
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        std::fs::rename(from, to)
    }
}

/// Whether an I/O error means "someone else has this file open or locked".
pub fn is_contention(err: &io::Error) -> bool {
    if matches!(
        err.kind(),
        io::ErrorKind::WouldBlock
            | io::ErrorKind::ResourceBusy
            | io::ErrorKind::ExecutableFileBusy
    ) {
        return true;
    }

    // ERROR_SHARING_VIOLATION / ERROR_LOCK_VIOLATION
    #[cfg(windows)]
    {
        matches!(err.raw_os_error(), Some(32) | Some(33))
    }
    #[cfg(not(windows))]
    {
        false
    }
}

/// Where one entry's file is now and where it should end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMove {
    pub current: PathBuf,
    pub target: PathBuf,
}

impl ResolvedMove {
    pub fn is_identity(&self) -> bool {
        self.current == self.target
    }
}

/// How processing a batch ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessOutcome {
    /// All renames applied; the record should be removed.
    Completed { renamed: usize, commit: CommitOutcome },
    /// A rename failed and the batch was rolled back; keep the record.
    Retry { reason: String },
    /// No entry matched a file on disk; remove the record.
    Dropped,
}

impl fmt::Display for ProcessOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessOutcome::Completed { renamed, .. } => {
                write!(f, "completed ({renamed} renamed)")
            }
            ProcessOutcome::Retry { reason } => write!(f, "retry ({reason})"),
            ProcessOutcome::Dropped => write!(f, "dropped"),
        }
    }
}

/// Resolve one entry to its current location, or `None` when no candidate exists.
pub fn resolve_entry<F: FileOps + ?Sized>(
    fs: &F,
    directory: &Path,
    entry: &RenameEntry,
) -> Option<ResolvedMove> {
    let target = directory.join(&entry.target);
    if fs.exists(&target) {
        return Some(ResolvedMove {
            current: target.clone(),
            target,
        });
    }

    CANDIDATE_PREFIXES
        .iter()
        .map(|prefix| directory.join(format!("{prefix}{}", entry.base)))
        .find(|candidate| fs.exists(candidate))
        .map(|current| ResolvedMove { current, target })
}

/// Applies rename batches and commits the result.
pub struct Processor<'a, F: FileOps = OsFileOps> {
    fs: F,
    git: &'a GitAdapter,
}

impl<'a> Processor<'a, OsFileOps> {
    pub fn new(git: &'a GitAdapter) -> Self {
        Self { fs: OsFileOps, git }
    }
}

impl<'a, F: FileOps> Processor<'a, F> {
    pub fn with_file_ops(git: &'a GitAdapter, fs: F) -> Self {
        Self { fs, git }
    }

    /// Process one batch snapshot. Never touches the queue.
    pub fn process(&self, batch: &RenameBatch) -> ProcessOutcome {
        let moves: Vec<ResolvedMove> = batch
            .entries
            .iter()
            .filter_map(|entry| {
                let resolved = resolve_entry(&self.fs, &batch.directory, entry);
                if resolved.is_none() {
                    debug!(batch_id = batch.id, base = %entry.base, "no file for entry, skipping");
                }
                resolved
            })
            .collect();

        if moves.is_empty() {
            info!(batch_id = batch.id, "no files found for batch, dropping");
            return ProcessOutcome::Dropped;
        }

        let completed = match self.apply(batch.id, &moves) {
            Ok(completed) => completed,
            Err(reason) => return ProcessOutcome::Retry { reason },
        };

        let paths = paths_to_stage(&moves, &completed);
        let report = self.git.stage_and_commit(&paths, &batch.commit_message);
        log_commit_report(batch.id, &report);

        info!(batch_id = batch.id, renamed = completed.len(), "batch completed");
        ProcessOutcome::Completed {
            renamed: completed.len(),
            commit: report.commit,
        }
    }

    /// Run the renames in order. On failure, undo what was done and return
    /// the reason.
    fn apply<'m>(
        &self,
        batch_id: u64,
        moves: &'m [ResolvedMove],
    ) -> std::result::Result<Vec<&'m ResolvedMove>, String> {
        let mut completed: Vec<&ResolvedMove> = Vec::new();

        for mv in moves.iter().filter(|mv| !mv.is_identity()) {
            if self.fs.exists(&mv.target) {
                // Leftover at the target; if it can't go, the rename reports it.
                if let Err(err) = self.fs.remove_file(&mv.target) {
                    debug!(
                        path = %mv.target.display(),
                        error = %err,
                        "could not clear rename target"
                    );
                }
            }

            if let Err(err) = self.fs.rename(&mv.current, &mv.target) {
                if is_contention(&err) {
                    info!(
                        batch_id,
                        path = %mv.current.display(),
                        error = %err,
                        "file busy, rolling back batch"
                    );
                } else {
                    warn!(
                        batch_id,
                        path = %mv.current.display(),
                        error = %err,
                        "rename failed, rolling back batch"
                    );
                }
                self.rollback(&completed);
                return Err(format!("{}: {}", mv.current.display(), err));
            }
            completed.push(mv);
        }

        Ok(completed)
    }

    fn rollback(&self, completed: &[&ResolvedMove]) {
        for mv in completed.iter().rev() {
            if !self.fs.exists(&mv.target) {
                continue;
            }
            if let Err(err) = self.fs.rename(&mv.target, &mv.current) {
                // The record stays queued; the next attempt resolves from whatever is on disk.
                warn!(
                    from = %mv.target.display(),
                    to = %mv.current.display(),
                    error = %err,
                    "rollback rename failed"
                );
            }
        }
    }
}

/// Every target (including identity entries), then the sources vacated by
/// completed renames so git records the removal. Order kept, duplicates dropped.
fn paths_to_stage(moves: &[ResolvedMove], completed: &[&ResolvedMove]) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    moves
        .iter()
        .map(|mv| &mv.target)
        .chain(completed.iter().map(|mv| &mv.current))
        .filter(|path| seen.insert((*path).clone()))
        .cloned()
        .collect()
}

/// Stage results worth a warning. `NotFound` is what a vacated source that
/// git never tracked reports on every ordinary rename.
fn needs_attention(outcome: &StageOutcome) -> bool {
    !outcome.is_ok() && *outcome != StageOutcome::NotFound
}

fn log_commit_report(batch_id: u64, report: &CommitReport) {
    for (path, outcome) in &report.staged {
        if needs_attention(outcome) {
            warn!(batch_id, path = %path.display(), ?outcome, "path not staged");
        } else if !outcome.is_ok() {
            debug!(batch_id, path = %path.display(), ?outcome, "nothing to stage");
        }
    }
    match &report.commit {
        CommitOutcome::Committed(oid) => info!(batch_id, commit = %oid, "committed"),
        CommitOutcome::NothingToCommit => debug!(batch_id, "nothing to commit"),
        CommitOutcome::Failed(reason) => warn!(batch_id, %reason, "commit failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GitConfig;
    use chrono::Utc;
    use std::cell::RefCell;
    use std::fs;
    use tempfile::TempDir;

    /// Fails renames whose source matches `busy`, like a file held open on Windows.
    struct BusyFileOps {
        busy: PathBuf,
        renames: RefCell<Vec<(PathBuf, PathBuf)>>,
    }

    impl BusyFileOps {
        fn new(busy: PathBuf) -> Self {
            Self {
                busy,
                renames: RefCell::new(Vec::new()),
            }
        }
    }

    impl FileOps for BusyFileOps {
        fn exists(&self, path: &Path) -> bool {
            OsFileOps.exists(path)
        }

        fn remove_file(&self, path: &Path) -> io::Result<()> {
            OsFileOps.remove_file(path)
        }

        fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
            if from == self.busy {
                return Err(io::Error::new(io::ErrorKind::ResourceBusy, "file is open"));
            }
            self.renames
                .borrow_mut()
                .push((from.to_path_buf(), to.to_path_buf()));
            OsFileOps.rename(from, to)
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

    fn batch(dir: &Path, entries: &[(&str, &str)]) -> RenameBatch {
        let entries: Vec<RenameEntry> = entries
            .iter()
            .map(|(base, target)| RenameEntry::new(*base, *target))
            .collect();
        RenameBatch {
            id: 1,
            directory: dir.to_path_buf(),
            dedup_key: crate::queue::dedup_key(dir, &entries),
            entries,
            commit_message: "M".to_string(),
            enqueued_at: Utc::now(),
        }
    }

    fn listing(dir: &Path) -> Vec<(String, Vec<u8>)> {
        let mut files: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|e| {
                let e = e.unwrap();
                (
                    e.file_name().to_string_lossy().into_owned(),
                    fs::read(e.path()).unwrap(),
                )
            })
            .collect();
        files.sort();
        files
    }

    #[test]
    fn resolve_prefers_target_then_candidates_in_order() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        let entry = RenameEntry::new("Задание 1.md", "+Задание 1.md");

        assert_eq!(resolve_entry(&OsFileOps, dir, &entry), None);

        fs::write(dir.join("-Задание 1.md"), "x").unwrap();
        assert_eq!(
            resolve_entry(&OsFileOps, dir, &entry).unwrap().current,
            dir.join("-Задание 1.md")
        );

        fs::write(dir.join("Задание 1.md"), "x").unwrap();
        assert_eq!(
            resolve_entry(&OsFileOps, dir, &entry).unwrap().current,
            dir.join("Задание 1.md")
        );

        fs::write(dir.join("+Задание 1.md"), "x").unwrap();
        let resolved = resolve_entry(&OsFileOps, dir, &entry).unwrap();
        assert!(resolved.is_identity());
    }

    #[test]
    fn completed_batch_leaves_only_targets() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        fs::write(dir.join("Задание 1.md"), "md").unwrap();
        fs::write(dir.join("-Задание 1.py"), "py").unwrap();
        fs::write(dir.join("+Задание 1.png"), "png").unwrap();

        let git = adapter(dir);
        let processor = Processor::new(&git);
        let outcome = processor.process(&batch(
            dir,
            &[
                ("Задание 1.md", "+Задание 1.md"),
                ("Задание 1.py", "+Задание 1.py"),
                ("Задание 1.png", "+Задание 1.png"),
            ],
        ));

        // Not a repository: the commit fails but the batch still completes
        assert!(matches!(
            outcome,
            ProcessOutcome::Completed { renamed: 2, commit: CommitOutcome::Failed(_) }
        ));
        assert_eq!(
            listing(dir),
            vec![
                ("+Задание 1.md".to_string(), b"md".to_vec()),
                ("+Задание 1.png".to_string(), b"png".to_vec()),
                ("+Задание 1.py".to_string(), b"py".to_vec()),
            ]
        );
    }

    #[test]
    fn contention_mid_batch_restores_directory() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        fs::write(dir.join("a.md"), "a").unwrap();
        fs::write(dir.join("+b.md"), "b").unwrap();
        fs::write(dir.join("c.md"), "c").unwrap();
        let before = listing(dir);

        let git = adapter(dir);
        let fs_ops = BusyFileOps::new(dir.join("c.md"));
        let processor = Processor::with_file_ops(&git, fs_ops);
        let outcome = processor.process(&batch(
            dir,
            &[("a.md", "-a.md"), ("b.md", "-b.md"), ("c.md", "-c.md")],
        ));

        assert!(matches!(outcome, ProcessOutcome::Retry { .. }));
        assert_eq!(listing(dir), before);

        // Rollback ran in reverse order of the applied renames
        let renames = processor.fs.renames.borrow();
        assert_eq!(
            *renames,
            vec![
                (dir.join("a.md"), dir.join("-a.md")),
                (dir.join("+b.md"), dir.join("-b.md")),
                (dir.join("-b.md"), dir.join("+b.md")),
                (dir.join("-a.md"), dir.join("a.md")),
            ]
        );
    }

    #[test]
    fn untracked_vacated_source_is_not_a_warning() {
        assert!(!needs_attention(&StageOutcome::Staged));
        assert!(!needs_attention(&StageOutcome::Removed));
        assert!(!needs_attention(&StageOutcome::NotFound));
        assert!(needs_attention(&StageOutcome::NotARepo));
        assert!(needs_attention(&StageOutcome::Failed("index".to_string())));
    }

    #[test]
    fn all_orphans_drop_without_mutation() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        fs::write(dir.join("unrelated.txt"), "u").unwrap();
        let before = listing(dir);

        let git = adapter(dir);
        let fs_ops = BusyFileOps::new(PathBuf::new());
        let processor = Processor::with_file_ops(&git, fs_ops);
        let outcome = processor.process(&batch(dir, &[("Задание 9.md", "+Задание 9.md")]));

        assert_eq!(outcome, ProcessOutcome::Dropped);
        assert!(processor.fs.renames.borrow().is_empty());
        assert_eq!(listing(dir), before);
    }

    #[test]
    fn orphan_entries_do_not_block_others() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        fs::write(dir.join("a.md"), "a").unwrap();

        let git = adapter(dir);
        let outcome = Processor::new(&git).process(&batch(
            dir,
            &[("missing.md", "+missing.md"), ("a.md", "+a.md")],
        ));

        assert!(matches!(outcome, ProcessOutcome::Completed { renamed: 1, .. }));
        assert!(dir.join("+a.md").exists());
        assert!(!dir.join("+missing.md").exists());
    }

    #[test]
    fn identity_entries_need_no_rename() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        fs::write(dir.join("+a.md"), "a").unwrap();

        let git = adapter(dir);
        let fs_ops = BusyFileOps::new(dir.join("+a.md"));
        let processor = Processor::with_file_ops(&git, fs_ops);
        let outcome = processor.process(&batch(dir, &[("a.md", "+a.md")]));

        assert!(matches!(outcome, ProcessOutcome::Completed { renamed: 0, .. }));
        assert!(processor.fs.renames.borrow().is_empty());
    }

    #[test]
    fn stage_set_covers_targets_and_vacated_sources() {
        let moves = vec![
            ResolvedMove {
                current: PathBuf::from("/d/+a.md"),
                target: PathBuf::from("/d/+a.md"),
            },
            ResolvedMove {
                current: PathBuf::from("/d/b.md"),
                target: PathBuf::from("/d/+b.md"),
            },
        ];
        let completed = vec![&moves[1]];
        assert_eq!(
            paths_to_stage(&moves, &completed),
            vec![
                PathBuf::from("/d/+a.md"),
                PathBuf::from("/d/+b.md"),
                PathBuf::from("/d/b.md"),
            ]
        );
    }

    #[test]
    fn contention_classification() {
        assert!(is_contention(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(is_contention(&io::Error::from(io::ErrorKind::ResourceBusy)));
        assert!(!is_contention(&io::Error::from(io::ErrorKind::NotFound)));
        assert!(!is_contention(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }
}
