//! Command output for taskmark.
//!
//! Every command ends by handing `OutputOptions::emit` two views of its
//! result: the serializable data, which goes out inside the `taskmark.v1`
//! JSON envelope under `--json`, and a `Report` printed for a terminal.

use std::fmt;

use serde::Serialize;

use crate::config::CONFIG_FILE;
use crate::error::{exit_codes, Error, Result};
use crate::git::{CommitOutcome, CommitReport, StageOutcome};
use crate::queue::RenameBatch;
use crate::spawn::EnsureOutcome;
use crate::worker::WorkerRun;

pub const SCHEMA_VERSION: &str = "taskmark.v1";

#[derive(Debug, Clone, Copy)]
pub struct OutputOptions {
    pub json: bool,
    pub quiet: bool,
}

impl OutputOptions {
    /// Print a successful result. Quiet silences the report, never the JSON.
    pub fn emit<T: Serialize>(&self, command: &str, data: &T, report: &Report) -> Result<()> {
        if self.json {
            println!("{}", success_json(command, data, report)?);
        } else if !self.quiet {
            println!("{report}");
        }
        Ok(())
    }
}

/// Side remark attached to a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum Note {
    Warning(String),
    /// A command worth running next
    Hint(String),
}

/// Terminal view of a command result: a title line, aligned key/value facts,
/// one line per item, then notes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    title: String,
    facts: Vec<(&'static str, String)>,
    items: Vec<String>,
    notes: Vec<Note>,
}

impl Report {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn fact(&mut self, key: &'static str, value: impl fmt::Display) -> &mut Self {
        self.facts.push((key, value.to_string()));
        self
    }

    pub fn item(&mut self, line: impl Into<String>) -> &mut Self {
        self.items.push(line.into());
        self
    }

    pub fn warn(&mut self, text: impl Into<String>) -> &mut Self {
        self.notes.push(Note::Warning(text.into()));
        self
    }

    pub fn hint(&mut self, command: impl Into<String>) -> &mut Self {
        self.notes.push(Note::Hint(command.into()));
        self
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    /// Directory, id, message and one item per rename of a queued batch.
    pub fn batch(&mut self, batch: &RenameBatch) -> &mut Self {
        self.fact("batch", batch.id)
            .fact("directory", batch.directory.display())
            .fact("message", &batch.commit_message);
        for entry in &batch.entries {
            self.item(format!("{} -> {}", entry.base, entry.target));
        }
        self
    }

    /// Worker state after a producer command; `None` means spawning was skipped.
    pub fn worker(&mut self, worker: Option<&EnsureOutcome>) -> &mut Self {
        match worker {
            Some(EnsureOutcome::Spawned { pid }) => {
                self.fact("worker", format!("spawned (pid {pid})"))
            }
            Some(EnsureOutcome::AlreadyRunning { pid: Some(pid) }) => {
                self.fact("worker", format!("running (pid {pid})"))
            }
            Some(EnsureOutcome::AlreadyRunning { pid: None }) => self.fact("worker", "running"),
            None => self.fact("worker", "not started").hint("taskmark ensure-worker"),
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.title)?;

        let width = self.facts.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
        for (key, value) in &self.facts {
            if value.is_empty() {
                write!(f, "\n  {key}")?;
            } else {
                write!(f, "\n  {key:<width$}  {value}")?;
            }
        }
        for item in &self.items {
            write!(f, "\n    {item}")?;
        }
        for note in &self.notes {
            match note {
                Note::Warning(text) => write!(f, "\nwarning: {text}")?,
                Note::Hint(text) => write!(f, "\nhint: {text}")?,
            }
        }
        Ok(())
    }
}

impl From<&WorkerRun> for Report {
    fn from(run: &WorkerRun) -> Self {
        match run {
            WorkerRun::AlreadyRunning { pid } => {
                let mut report = Report::new("taskmark worker: another worker is running");
                if let Some(pid) = pid {
                    report.fact("pid", pid);
                }
                report
            }
            WorkerRun::Finished(summary) => {
                let totals = &summary.totals;
                let mut report = Report::new("taskmark worker: queue drained");
                report
                    .fact("cycles", summary.cycles)
                    .fact("completed", totals.completed)
                    .fact("dropped", totals.dropped)
                    .fact("retried", totals.retried);
                if totals.retried > 0 {
                    report.warn("some batches hit busy files and are still queued");
                    report.hint("taskmark queue");
                }
                report
            }
        }
    }
}

impl From<&EnsureOutcome> for Report {
    fn from(outcome: &EnsureOutcome) -> Self {
        match outcome {
            EnsureOutcome::Spawned { pid } => {
                Report::new(format!("taskmark ensure-worker: spawned worker (pid {pid})"))
            }
            EnsureOutcome::AlreadyRunning { pid: Some(pid) } => Report::new(format!(
                "taskmark ensure-worker: worker already running (pid {pid})"
            )),
            EnsureOutcome::AlreadyRunning { pid: None } => {
                Report::new("taskmark ensure-worker: worker already running")
            }
        }
    }
}

impl From<&CommitReport> for Report {
    fn from(commit: &CommitReport) -> Self {
        let mut report = Report::new(match &commit.commit {
            CommitOutcome::Committed(oid) => {
                format!("taskmark commit: {}", oid.get(..7).unwrap_or(oid))
            }
            CommitOutcome::NothingToCommit => "taskmark commit: nothing to commit".to_string(),
            CommitOutcome::Failed(reason) => format!("taskmark commit: failed ({reason})"),
        });
        for (path, outcome) in &commit.staged {
            match outcome {
                StageOutcome::Staged => report.item(format!("staged {}", path.display())),
                StageOutcome::Removed => report.item(format!("removed {}", path.display())),
                StageOutcome::NotFound => report.warn(format!("not found: {}", path.display())),
                StageOutcome::NotARepo => report.warn("not a git repository"),
                StageOutcome::Failed(reason) => {
                    report.warn(format!("{}: {reason}", path.display()))
                }
            };
        }
        report
    }
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum Status {
    Success,
    Error,
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
    code: i32,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl From<&Error> for ErrorBody {
    fn from(err: &Error) -> Self {
        let code = err.exit_code();
        Self {
            message: err.to_string(),
            code,
            kind: if code == exit_codes::USER_ERROR {
                "user_error"
            } else {
                "operation_failed"
            },
            details: err.details(),
        }
    }
}

#[derive(Serialize)]
struct Envelope<'a, T> {
    schema_version: &'static str,
    command: &'a str,
    status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody>,
    #[serde(skip_serializing_if = "<[Note]>::is_empty")]
    notes: &'a [Note],
}

fn success_json<T: Serialize>(command: &str, data: &T, report: &Report) -> Result<String> {
    let envelope = Envelope {
        schema_version: SCHEMA_VERSION,
        command,
        status: Status::Success,
        data: Some(data),
        error: None,
        notes: report.notes(),
    };
    Ok(serde_json::to_string_pretty(&envelope)?)
}

fn error_json(command: &str, err: &Error) -> Result<String> {
    let notes: Vec<Note> = error_hint(err).into_iter().map(Note::Hint).collect();
    let envelope: Envelope<'_, ()> = Envelope {
        schema_version: SCHEMA_VERSION,
        command,
        status: Status::Error,
        data: None,
        error: Some(ErrorBody::from(err)),
        notes: &notes,
    };
    Ok(serde_json::to_string_pretty(&envelope)?)
}

/// Report a failed command on stdout (JSON) or stderr.
pub fn emit_error(command: &str, err: &Error, json: bool) -> Result<()> {
    if json {
        println!("{}", error_json(command, err)?);
        return Ok(());
    }

    eprintln!("error: {err}");
    if let Some(hint) = error_hint(err) {
        eprintln!("hint: {hint}");
    }
    Ok(())
}

/// Subcommand name for error envelopes, read from argv before clap parses.
pub fn infer_command_name_from_args() -> String {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--repo" {
            args.next();
            continue;
        }
        if arg.starts_with('-') {
            continue;
        }
        return arg;
    }
    "taskmark".to_string()
}

fn error_hint(err: &Error) -> Option<String> {
    match err {
        Error::RepoNotFound(_) | Error::NotARepo(_) => {
            Some("run inside a git repository or pass --repo <PATH>".to_string())
        }
        Error::InvalidConfig(_) => Some(format!("fix {CONFIG_FILE} then retry")),
        Error::ExerciseDirNotFound(topic) => Some(format!(
            "check marks.exercise_dirs in {CONFIG_FILE} for topic {topic}"
        )),
        Error::LockFailed(_) => Some("taskmark queue".to_string()),
        Error::SpawnFailed(_) => Some("taskmark worker".to_string()),
        _ => None,
    }
}
