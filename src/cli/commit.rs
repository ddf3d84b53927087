//! taskmark commit command implementation
//!
//! Stages and commits paths immediately, inside the same critical section
//! the worker uses.

use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::git::CommitOutcome;
use crate::output::{OutputOptions, Report};
use crate::producer::Producer;

/// Options for the commit command
pub struct CommitOptions {
    pub repo: Option<PathBuf>,
    pub paths: Vec<PathBuf>,
    pub message: String,
    pub output: OutputOptions,
}

pub fn run(options: CommitOptions) -> Result<()> {
    if options.message.trim().is_empty() {
        return Err(Error::InvalidArgument("commit message cannot be empty".to_string()));
    }

    let producer = Producer::open(options.repo.as_deref())?;
    let cwd = std::env::current_dir()?;
    let paths: Vec<PathBuf> = options
        .paths
        .into_iter()
        .map(|path| if path.is_absolute() { path } else { cwd.join(path) })
        .collect();

    let report = producer.commit_paths(&paths, &options.message)?;

    if let CommitOutcome::Failed(reason) = &report.commit {
        return Err(Error::OperationFailed(format!("commit failed: {reason}")));
    }

    options
        .output
        .emit("commit", &report, &Report::from(&report))
}
