//! taskmark - queued status renames for exercise files
//!
//! Grading marks an exercise by renaming its files with a `+` or `-`
//! prefix and committing the change. Files may be held open by an editor at
//! that moment, so renames are queued and applied by a background worker
//! that retries until every file in a batch can be moved at once.
//!
//! # Core Concepts
//!
//! - **Batch**: an ordered list of renames in one directory, applied
//!   all-or-nothing and committed with one message
//! - **Queue**: a durable store of pending batches; a newer batch for the
//!   same files replaces an older one
//! - **Worker**: the single background process that drains the queue
//!
//! # Module Organization
//!
//! - `cli`: Command-line interface using clap
//! - `config`: Configuration loading from `.taskmark.toml`
//! - `error`: Error types and result aliases
//! - `git`: Stage/commit adapter using libgit2
//! - `lock`: File locking and atomic writes
//! - `marking`: Exercise verdicts to rename batches
//! - `output`: Human and JSON output
//! - `processor`: Applying one batch with rollback
//! - `producer`: Enqueue, spawn and commit entry points
//! - `queue`: The task queue store
//! - `spawn`: Detached worker launch
//! - `storage`: State directory layout
//! - `worker`: The worker loop

pub mod cli;
pub mod config;
pub mod error;
pub mod git;
pub mod lock;
pub mod marking;
pub mod output;
pub mod processor;
pub mod producer;
pub mod queue;
pub mod spawn;
pub mod storage;
pub mod worker;

pub use error::{Error, Result};
