//! taskmark enqueue / mark command implementations
//!
//! Both commands queue a rename batch and, unless told otherwise, make sure a
//! worker is running to apply it.

use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::marking::Verdict;
use crate::output::{OutputOptions, Report};
use crate::producer::Producer;
use crate::queue::{RenameBatch, RenameEntry};
use crate::spawn::EnsureOutcome;

/// Options for the enqueue command
pub struct EnqueueOptions {
    pub repo: Option<PathBuf>,
    pub dir: PathBuf,
    /// Flat `[base, target, base, target, ...]` list as clap collects it
    pub renames: Vec<String>,
    pub message: String,
    pub no_spawn: bool,
    pub output: OutputOptions,
}

/// Options for the mark command
pub struct MarkOptions {
    pub repo: Option<PathBuf>,
    pub topic: String,
    pub number: String,
    pub correct: bool,
    pub no_spawn: bool,
    pub output: OutputOptions,
}

#[derive(serde::Serialize)]
struct EnqueueReport<'a> {
    batch: &'a RenameBatch,
    #[serde(skip_serializing_if = "Option::is_none")]
    worker: Option<&'a EnsureOutcome>,
}

pub fn run_enqueue(options: EnqueueOptions) -> Result<()> {
    let entries = pair_renames(&options.renames)?;
    let producer = Producer::open(options.repo.as_deref())?;

    // Directories on the command line are relative to where the user stands
    let dir = if options.dir.is_absolute() {
        options.dir
    } else {
        std::env::current_dir()?.join(options.dir)
    };

    let batch = producer.enqueue_rename(&dir, entries, &options.message)?;
    let worker = if options.no_spawn {
        None
    } else {
        Some(producer.ensure_worker_running()?)
    };

    let mut human = Report::new(format!("taskmark enqueue: batch {} queued", batch.id));
    human.batch(&batch).worker(worker.as_ref());

    let report = EnqueueReport {
        batch: &batch,
        worker: worker.as_ref(),
    };
    options.output.emit("enqueue", &report, &human)
}

pub fn run_mark(options: MarkOptions) -> Result<()> {
    let producer = Producer::open(options.repo.as_deref())?;
    let verdict = Verdict::from_correct(options.correct);

    let report =
        producer.mark_exercise(&options.topic, &options.number, verdict, !options.no_spawn)?;

    let mut human = Report::new(format!(
        "taskmark mark: exercise {} of topic {} marked {}",
        report.number, report.topic, report.verdict
    ));
    human.batch(&report.batch).worker(report.worker.as_ref());

    options.output.emit("mark", &report, &human)
}

fn pair_renames(values: &[String]) -> Result<Vec<RenameEntry>> {
    if values.is_empty() || values.len() % 2 != 0 {
        return Err(Error::InvalidArgument(
            "--rename takes a BASE and a TARGET".to_string(),
        ));
    }
    Ok(values
        .chunks(2)
        .map(|pair| RenameEntry::new(pair[0].as_str(), pair[1].as_str()))
        .collect())
}
