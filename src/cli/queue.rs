//! taskmark queue command implementation
//!
//! Shows pending batches and whether a worker currently holds the lock.

use std::path::PathBuf;

use crate::error::Result;
use crate::lock::WorkerLock;
use crate::output::{OutputOptions, Report};
use crate::producer::Producer;
use crate::queue::RenameBatch;

#[derive(serde::Serialize)]
struct QueueReport {
    worker: WorkerStatus,
    pending: Vec<RenameBatch>,
}

#[derive(serde::Serialize)]
struct WorkerStatus {
    running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pid: Option<u32>,
}

pub fn run(repo: Option<PathBuf>, options: OutputOptions) -> Result<()> {
    let producer = Producer::open(repo.as_deref())?;
    let storage = producer.storage();

    let pending = producer.queue().list_pending()?;
    let lock_path = storage.worker_lock_file();
    let running = storage.is_initialized() && WorkerLock::is_held(&lock_path)?;
    let pid = running.then(|| WorkerLock::recorded_pid(&lock_path)).flatten();

    let mut human = Report::new(format!("taskmark queue: {} pending", pending.len()));
    human.fact(
        "worker",
        match (running, pid) {
            (true, Some(pid)) => format!("running (pid {pid})"),
            (true, None) => "running".to_string(),
            (false, _) => "not running".to_string(),
        },
    );
    for batch in &pending {
        human.item(format!(
            "#{} {} ({} entries) \"{}\"",
            batch.id,
            batch.directory.display(),
            batch.entries.len(),
            batch.commit_message
        ));
    }
    if !pending.is_empty() && !running {
        human.hint("taskmark ensure-worker");
    }

    let report = QueueReport {
        worker: WorkerStatus { running, pid },
        pending,
    };
    options.emit("queue", &report, &human)
}
