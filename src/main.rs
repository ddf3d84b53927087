//! taskmark CLI
//!
//! Queues exercise status renames and runs the background worker that
//! applies and commits them.

use std::fs::OpenOptions;
use std::sync::Mutex;

use clap::Parser;
use taskmark::cli::Cli;
use taskmark::config::Config;
use taskmark::git::{discover_repo, workdir};
use taskmark::output::{emit_error, infer_command_name_from_args};
use taskmark::storage::Storage;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() {
    let command = infer_command_name_from_args();
    let cli = Cli::parse();

    if cli.is_worker() {
        init_worker_tracing(&cli);
    } else {
        init_tracing();
    }

    let json = cli.json;
    if let Err(err) = cli.run() {
        let _ = emit_error(&command, &err, json);
        std::process::exit(err.exit_code());
    }
}

/// `RUST_LOG`, ignoring empty, invalid or oversized filters.
fn env_filter() -> Option<EnvFilter> {
    std::env::var("RUST_LOG").ok().and_then(|raw| {
        let raw = raw.trim();
        if raw.is_empty() || raw.len() > 4096 {
            return None;
        }
        EnvFilter::try_new(raw).ok()
    })
}

// Tracing is opt-in via RUST_LOG for interactive commands.
fn init_tracing() {
    let filter = env_filter().unwrap_or_else(|| EnvFilter::new("off"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

// A detached worker has no stdio, so it logs to the state directory.
// Falls back to stderr when the log file can't be opened.
fn init_worker_tracing(cli: &Cli) {
    let filter = env_filter().unwrap_or_else(|| EnvFilter::new("info"));

    let log_file = discover_repo(cli.repo.as_deref())
        .and_then(|repo| workdir(&repo))
        .and_then(|root| {
            let config = Config::load_from_repo(&root)?;
            let storage = Storage::new(root, &config);
            storage.init()?;
            Ok(OpenOptions::new()
                .create(true)
                .append(true)
                .open(storage.log_file())?)
        });

    match log_file {
        Ok(file) => tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(filter)
            .init(),
        Err(_) => tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init(),
    }
}
