//! Configuration loading and management
//!
//! Handles parsing of `.taskmark.toml` configuration files. Every field has a
//! default, so a missing file or a partial file both work.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Name of the configuration file at the repository root
pub const CONFIG_FILE: &str = ".taskmark.toml";

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Directory (relative to the repo root) holding the queue, locks and logs
    #[serde(default = "default_state_dir")]
    pub state_dir: String,

    /// Worker loop cadence
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Version-control adapter settings
    #[serde(default)]
    pub git: GitConfig,

    /// How exercise files are located and marked
    #[serde(default)]
    pub marks: MarksConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            worker: WorkerConfig::default(),
            git: GitConfig::default(),
            marks: MarksConfig::default(),
        }
    }
}

fn default_state_dir() -> String {
    ".taskmark".to_string()
}

/// Worker loop configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Pause after a cycle that found work
    #[serde(default = "default_active_pause_ms")]
    pub active_pause_ms: u64,

    /// Pause after a cycle that found the queue empty
    #[serde(default = "default_idle_pause_ms")]
    pub idle_pause_ms: u64,

    /// The worker exits after more than this many consecutive idle cycles
    #[serde(default = "default_idle_cycles")]
    pub idle_cycles: u32,

    /// Log file for the worker, relative to the state directory
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

fn default_active_pause_ms() -> u64 {
    1000
}

fn default_idle_pause_ms() -> u64 {
    2000
}

fn default_idle_cycles() -> u32 {
    30
}

fn default_log_file() -> String {
    "worker.log".to_string()
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            active_pause_ms: default_active_pause_ms(),
            idle_pause_ms: default_idle_pause_ms(),
            idle_cycles: default_idle_cycles(),
            log_file: default_log_file(),
        }
    }
}

/// Version-control adapter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitConfig {
    /// Attempts per stage/commit while the index is locked
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Pause between attempts
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// How long to wait for the cross-process git critical section
    #[serde(default = "default_git_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

fn default_retry_attempts() -> u32 {
    5
}

fn default_retry_delay_ms() -> u64 {
    200
}

fn default_git_lock_timeout_ms() -> u64 {
    30_000
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            lock_timeout_ms: default_git_lock_timeout_ms(),
        }
    }
}

/// Exercise marking configuration.
///
/// Templates use `{topic}`, `{number}` and `{verdict}` placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarksConfig {
    /// Candidate exercise directories, relative to the repo root, tried in order
    #[serde(default = "default_exercise_dirs")]
    pub exercise_dirs: Vec<String>,

    /// File stem of an exercise, without extension
    #[serde(default = "default_file_stem")]
    pub file_stem: String,

    /// Extensions that belong to one exercise
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Commit message for a status change
    #[serde(default = "default_commit_message")]
    pub commit_message: String,

    #[serde(default = "default_correct_label")]
    pub correct_label: String,

    #[serde(default = "default_incorrect_label")]
    pub incorrect_label: String,
}

fn default_exercise_dirs() -> Vec<String> {
    vec![
        "Тема {topic}/Задания".to_string(),
        "ЕГЭ/Тема {topic}/Задания".to_string(),
    ]
}

fn default_file_stem() -> String {
    "Задание {number}".to_string()
}

fn default_extensions() -> Vec<String> {
    [
        ".md", ".png", ".py", ".jpg", ".ods", ".xlsx", ".odt", ".docx", ".doc", ".xls", ".csv",
        ".txt",
    ]
    .iter()
    .map(|ext| ext.to_string())
    .collect()
}

fn default_commit_message() -> String {
    "Обновлен статус задания № {number} Тема: {topic} > {verdict}".to_string()
}

fn default_correct_label() -> String {
    "Верно".to_string()
}

fn default_incorrect_label() -> String {
    "Неверно".to_string()
}

impl Default for MarksConfig {
    fn default() -> Self {
        Self {
            exercise_dirs: default_exercise_dirs(),
            file_stem: default_file_stem(),
            extensions: default_extensions(),
            commit_message: default_commit_message(),
            correct_label: default_correct_label(),
            incorrect_label: default_incorrect_label(),
        }
    }
}

impl Config {
    /// Load configuration from a `.taskmark.toml` file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the repo root, or return defaults when absent.
    ///
    /// A file that exists but fails to parse or validate is an error.
    pub fn load_from_repo(repo_root: &Path) -> Result<Self> {
        let config_path = repo_root.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Absolute state directory for a repository root
    pub fn state_dir(&self, repo_root: &Path) -> PathBuf {
        repo_root.join(&self.state_dir)
    }

    fn validate(&self) -> Result<()> {
        let state_dir = self.state_dir.trim();
        if state_dir.is_empty() {
            return Err(Error::InvalidConfig("state_dir cannot be empty".to_string()));
        }
        if Path::new(state_dir).is_absolute() {
            return Err(Error::InvalidConfig(
                "state_dir must be relative to the repository root".to_string(),
            ));
        }
        self.worker.validate()?;
        self.git.validate()?;
        self.marks.validate()?;
        Ok(())
    }
}

impl WorkerConfig {
    fn validate(&self) -> Result<()> {
        if self.idle_cycles == 0 {
            return Err(Error::InvalidConfig(
                "worker.idle_cycles must be > 0".to_string(),
            ));
        }
        if self.log_file.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "worker.log_file cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn active_pause(&self) -> Duration {
        Duration::from_millis(self.active_pause_ms)
    }

    pub fn idle_pause(&self) -> Duration {
        Duration::from_millis(self.idle_pause_ms)
    }
}

impl GitConfig {
    fn validate(&self) -> Result<()> {
        if self.retry_attempts == 0 {
            return Err(Error::InvalidConfig(
                "git.retry_attempts must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl MarksConfig {
    fn validate(&self) -> Result<()> {
        if self.exercise_dirs.is_empty() {
            return Err(Error::InvalidConfig(
                "marks.exercise_dirs cannot be empty".to_string(),
            ));
        }
        for dir in &self.exercise_dirs {
            if !dir.contains("{topic}") {
                return Err(Error::InvalidConfig(format!(
                    "marks.exercise_dirs: '{dir}' must contain {{topic}}"
                )));
            }
        }
        if !self.file_stem.contains("{number}") {
            return Err(Error::InvalidConfig(
                "marks.file_stem must contain {number}".to_string(),
            ));
        }
        if self.file_stem.contains('/') || self.file_stem.contains('\\') {
            return Err(Error::InvalidConfig(
                "marks.file_stem must be a plain file name".to_string(),
            ));
        }
        if self.extensions.is_empty() {
            return Err(Error::InvalidConfig(
                "marks.extensions cannot be empty".to_string(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for ext in &self.extensions {
            if !ext.starts_with('.') || ext.len() < 2 {
                return Err(Error::InvalidConfig(format!(
                    "marks.extensions: '{ext}' must start with '.'"
                )));
            }
            if !seen.insert(ext.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "marks.extensions has duplicate entry '{ext}'"
                )));
            }
        }
        if self.commit_message.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "marks.commit_message cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}
