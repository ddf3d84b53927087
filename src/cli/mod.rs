//! Command-line interface for taskmark
//!
//! This module defines the CLI structure using clap derive macros.
//! Each subcommand is implemented in its own submodule.

use std::path::PathBuf;

use clap::{ArgGroup, Parser, Subcommand};

use crate::error::Result;
use crate::output::OutputOptions;

mod commit;
mod enqueue;
mod init;
mod queue;
mod worker;

/// taskmark - queued status renames for exercise files
///
/// Renames exercise files to record a verdict (`+` correct, `-` incorrect),
/// retries while files are held open, and commits each change to git.
#[derive(Parser, Debug)]
#[command(name = "taskmark")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the repository (defaults to current directory)
    #[arg(long, global = true, env = "TASKMARK_REPO")]
    pub repo: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize taskmark in the current repository
    Init,

    /// Queue a rename batch for one directory
    Enqueue {
        /// Directory containing the files
        #[arg(long)]
        dir: PathBuf,

        /// Rename BASE to TARGET (repeatable, applied in order)
        #[arg(
            long = "rename",
            value_names = ["BASE", "TARGET"],
            num_args = 2,
            required = true,
            allow_hyphen_values = true,
            action = clap::ArgAction::Append
        )]
        renames: Vec<String>,

        /// Commit message for the batch
        #[arg(short, long)]
        message: String,

        /// Do not start a worker
        #[arg(long)]
        no_spawn: bool,
    },

    /// Mark an exercise correct or incorrect
    #[command(group(ArgGroup::new("verdict").required(true).args(["correct", "incorrect"])))]
    Mark {
        /// Topic number
        #[arg(long)]
        topic: String,

        /// Exercise number
        #[arg(long)]
        number: String,

        /// Mark as solved
        #[arg(long)]
        correct: bool,

        /// Mark as failed
        #[arg(long)]
        incorrect: bool,

        /// Do not start a worker
        #[arg(long)]
        no_spawn: bool,
    },

    /// Show pending batches and worker status
    Queue,

    /// Run the worker in the foreground
    Worker {
        /// Process the queue once and exit
        #[arg(long)]
        once: bool,
    },

    /// Start a background worker unless one is running
    EnsureWorker,

    /// Stage and commit paths immediately
    Commit {
        /// Paths to stage
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Commit message
        #[arg(short, long)]
        message: String,
    },
}

impl Cli {
    /// Whether this invocation runs the worker loop
    pub fn is_worker(&self) -> bool {
        matches!(self.command, Commands::Worker { .. })
    }

    fn output(&self) -> OutputOptions {
        OutputOptions {
            json: self.json,
            quiet: self.quiet,
        }
    }

    /// Execute the CLI command
    pub fn run(self) -> Result<()> {
        let output = self.output();
        match self.command {
            Commands::Init => init::run(self.repo, output),
            Commands::Enqueue {
                dir,
                renames,
                message,
                no_spawn,
            } => enqueue::run_enqueue(enqueue::EnqueueOptions {
                repo: self.repo,
                dir,
                renames,
                message,
                no_spawn,
                output,
            }),
            Commands::Mark {
                topic,
                number,
                correct,
                incorrect: _,
                no_spawn,
            } => enqueue::run_mark(enqueue::MarkOptions {
                repo: self.repo,
                topic,
                number,
                correct,
                no_spawn,
                output,
            }),
            Commands::Queue => queue::run(self.repo, output),
            Commands::Worker { once } => worker::run(self.repo, once, output),
            Commands::EnsureWorker => worker::run_ensure(self.repo, output),
            Commands::Commit { paths, message } => commit::run(commit::CommitOptions {
                repo: self.repo,
                paths,
                message,
                output,
            }),
        }
    }
}
