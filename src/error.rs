//! Error types for taskmark
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (bad args, missing repo, invalid config)
//! - 4: Operation failed (git, io, queue file)
//!
//! Rename contention and version-control failures inside the worker are not
//! errors; they are reported as outcomes (see `processor` and `git`).

use std::path::PathBuf;
use thiserror::Error;

/// Exit codes for the taskmark CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const OPERATION_FAILED: i32 = 4;
}

/// Main error type for taskmark operations
#[derive(Error, Debug)]
pub enum Error {
    // User errors (exit code 2)
    #[error("Not a git repository: {0}")]
    NotARepo(PathBuf),

    #[error("Repository not found from {0}")]
    RepoNotFound(PathBuf),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Exercise directory not found for topic {0}")]
    ExerciseDirNotFound(String),

    // Operation failures (exit code 4)
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Lock acquisition failed: {0}")]
    LockFailed(PathBuf),

    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl Error {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::NotARepo(_)
            | Error::RepoNotFound(_)
            | Error::InvalidConfig(_)
            | Error::InvalidArgument(_)
            | Error::ExerciseDirNotFound(_) => exit_codes::USER_ERROR,

            Error::Git(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_)
            | Error::LockFailed(_)
            | Error::SpawnFailed(_)
            | Error::OperationFailed(_) => exit_codes::OPERATION_FAILED,
        }
    }

    /// Structured details for JSON error output, when there is something useful to add
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::NotARepo(path) | Error::RepoNotFound(path) | Error::LockFailed(path) => {
                Some(serde_json::json!({ "path": path }))
            }
            Error::ExerciseDirNotFound(topic) => Some(serde_json::json!({ "topic": topic })),
            _ => None,
        }
    }
}

/// Result type alias for taskmark operations
pub type Result<T> = std::result::Result<T, Error>;
