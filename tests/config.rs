use std::fs;

use taskmark::config::{Config, CONFIG_FILE};
use taskmark::error::Error;

#[test]
fn load_from_repo_defaults_when_missing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = Config::load_from_repo(dir.path()).expect("defaults");

    assert_eq!(cfg, Config::default());
    assert_eq!(cfg.state_dir, ".taskmark");
    assert_eq!(cfg.worker.idle_cycles, 30);
    assert_eq!(cfg.marks.extensions.len(), 12);
}

#[test]
fn load_from_repo_rejects_wrong_types() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join(CONFIG_FILE), "state_dir = 123").expect("write invalid config");

    let err = Config::load_from_repo(dir.path()).expect_err("type error");
    assert!(matches!(err, Error::TomlParse(_)));
    assert_eq!(err.exit_code(), 4);
}

#[test]
fn partial_sections_keep_other_defaults() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let content = r#"
[worker]
idle_cycles = 5

[marks]
exercise_dirs = ["Topics/{topic}"]
"#;
    fs::write(dir.path().join(CONFIG_FILE), content.trim())?;

    let cfg = Config::load_from_repo(dir.path())?;
    assert_eq!(cfg.worker.idle_cycles, 5);
    assert_eq!(cfg.worker.idle_pause_ms, 2000);
    assert_eq!(cfg.marks.exercise_dirs, vec!["Topics/{topic}"]);
    assert_eq!(cfg.marks.file_stem, "Задание {number}");
    assert_eq!(cfg.git.retry_attempts, 5);
    Ok(())
}

#[test]
fn template_without_placeholder_is_invalid() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(
        dir.path().join(CONFIG_FILE),
        "[marks]\nexercise_dirs = [\"Tasks\"]\n",
    )
    .expect("write config");

    let err = Config::load_from_repo(dir.path()).expect_err("invalid");
    assert!(matches!(err, Error::InvalidConfig(_)));
    assert_eq!(err.exit_code(), 2);
}
