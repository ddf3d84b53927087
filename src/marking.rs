//! Exercise status marks
//!
//! After grading, every file of an exercise is renamed with a `+` (correct)
//! or `-` (incorrect) prefix and the change is committed. This module turns
//! a (topic, number, verdict) triple into the rename batch that does that.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::MarksConfig;
use crate::error::{Error, Result};
use crate::processor::{MARK_CORRECT, MARK_INCORRECT};
use crate::queue::RenameEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Correct,
    Incorrect,
}

impl Verdict {
    pub fn from_correct(correct: bool) -> Self {
        if correct {
            Verdict::Correct
        } else {
            Verdict::Incorrect
        }
    }

    /// File name prefix for this verdict
    pub fn sign(self) -> &'static str {
        match self {
            Verdict::Correct => MARK_CORRECT,
            Verdict::Incorrect => MARK_INCORRECT,
        }
    }

    pub fn label(self, marks: &MarksConfig) -> &str {
        match self {
            Verdict::Correct => &marks.correct_label,
            Verdict::Incorrect => &marks.incorrect_label,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Correct => write!(f, "correct"),
            Verdict::Incorrect => write!(f, "incorrect"),
        }
    }
}

fn fill(template: &str, topic: &str, number: &str) -> String {
    template.replace("{topic}", topic).replace("{number}", number)
}

/// First configured exercise directory that exists for `topic`.
pub fn locate_exercise_dir(
    repo_root: &Path,
    marks: &MarksConfig,
    topic: &str,
) -> Result<PathBuf> {
    marks
        .exercise_dirs
        .iter()
        .map(|template| repo_root.join(fill(template, topic, "")))
        .find(|dir| dir.is_dir())
        .ok_or_else(|| Error::ExerciseDirNotFound(topic.to_string()))
}

/// One entry per configured extension, so the batch key does not depend on
/// which files happen to exist.
pub fn exercise_entries(
    marks: &MarksConfig,
    number: &str,
    verdict: Verdict,
) -> Vec<RenameEntry> {
    let stem = fill(&marks.file_stem, "", number);
    marks
        .extensions
        .iter()
        .map(|ext| {
            let base = format!("{stem}{ext}");
            let target = format!("{}{base}", verdict.sign());
            RenameEntry::new(base, target)
        })
        .collect()
}

pub fn commit_message(
    marks: &MarksConfig,
    topic: &str,
    number: &str,
    verdict: Verdict,
) -> String {
    fill(&marks.commit_message, topic, number).replace("{verdict}", verdict.label(marks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn entries_cover_every_extension() {
        let marks = MarksConfig::default();
        let entries = exercise_entries(&marks, "7", Verdict::Incorrect);

        assert_eq!(entries.len(), marks.extensions.len());
        assert_eq!(entries[0], RenameEntry::new("Задание 7.md", "-Задание 7.md"));
        assert!(entries.iter().all(|e| e.target == format!("-{}", e.base)));
    }

    #[test]
    fn commit_message_uses_labels() {
        let marks = MarksConfig::default();
        assert_eq!(
            commit_message(&marks, "3", "12", Verdict::Correct),
            "Обновлен статус задания № 12 Тема: 3 > Верно"
        );
        assert_eq!(
            commit_message(&marks, "3", "12", Verdict::Incorrect),
            "Обновлен статус задания № 12 Тема: 3 > Неверно"
        );
    }

    #[test]
    fn exercise_dir_falls_back_in_order() {
        let temp = TempDir::new().unwrap();
        let marks = MarksConfig::default();

        assert!(matches!(
            locate_exercise_dir(temp.path(), &marks, "5"),
            Err(Error::ExerciseDirNotFound(_))
        ));

        let nested = temp.path().join("ЕГЭ/Тема 5/Задания");
        fs::create_dir_all(&nested).unwrap();
        assert_eq!(locate_exercise_dir(temp.path(), &marks, "5").unwrap(), nested);

        let top = temp.path().join("Тема 5/Задания");
        fs::create_dir_all(&top).unwrap();
        assert_eq!(locate_exercise_dir(temp.path(), &marks, "5").unwrap(), top);
    }
}
