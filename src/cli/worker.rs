//! taskmark worker / ensure-worker command implementations

use std::path::PathBuf;

use crate::error::Result;
use crate::output::{OutputOptions, Report};
use crate::producer::Producer;
use crate::worker::run_worker;

/// Run the worker in the foreground until it goes idle (or for one cycle).
pub fn run(repo: Option<PathBuf>, once: bool, options: OutputOptions) -> Result<()> {
    let producer = Producer::open(repo.as_deref())?;
    let outcome = run_worker(producer.storage(), producer.config(), once)?;
    options.emit("worker", &outcome, &Report::from(&outcome))
}

pub fn run_ensure(repo: Option<PathBuf>, options: OutputOptions) -> Result<()> {
    let producer = Producer::open(repo.as_deref())?;
    let outcome = producer.ensure_worker_running()?;
    options.emit("ensure-worker", &outcome, &Report::from(&outcome))
}
