//! taskmark init command implementation
//!
//! Creates the state directory and a default `.taskmark.toml`, and keeps the
//! state directory out of version control.

use std::path::{Path, PathBuf};

use crate::config::{Config, CONFIG_FILE};
use crate::error::{Error, Result};
use crate::git::{discover_repo, workdir};
use crate::output::{OutputOptions, Report};
use crate::storage::{ensure_gitignore, Storage};

#[derive(serde::Serialize)]
struct InitReport {
    repo: PathBuf,
    state_dir: PathBuf,
    created: InitCreated,
    updated: InitUpdated,
}

#[derive(serde::Serialize)]
struct InitCreated {
    config: bool,
    state_dir: bool,
}

#[derive(serde::Serialize)]
struct InitUpdated {
    gitignore: bool,
}

pub fn run(repo: Option<PathBuf>, options: OutputOptions) -> Result<()> {
    let repository = discover_repo(repo.as_deref())?;
    let root = workdir(&repository)?;

    let created_config = ensure_config(&root)?;
    let config = Config::load_from_repo(&root)?;
    let storage = Storage::new(root.clone(), &config);
    let created_state_dir = storage.init()?;
    let updated_gitignore = ensure_gitignore(&storage)?;

    let report = InitReport {
        repo: root.clone(),
        state_dir: storage.state_dir().to_path_buf(),
        created: InitCreated {
            config: created_config,
            state_dir: created_state_dir,
        },
        updated: InitUpdated {
            gitignore: updated_gitignore,
        },
    };

    let mut created_items = Vec::new();
    if created_config {
        created_items.push(CONFIG_FILE.to_string());
    }
    if created_state_dir {
        created_items.push(format!("{}/", config.state_dir));
    }

    let header = if created_items.is_empty() && !updated_gitignore {
        "taskmark init: nothing to do"
    } else {
        "taskmark init: initialized repo"
    };

    let mut human = Report::new(header);
    human
        .fact("repo", root.display())
        .fact(
            "created",
            if created_items.is_empty() {
                "none".to_string()
            } else {
                created_items.join(", ")
            },
        )
        .fact("updated", if updated_gitignore { ".gitignore" } else { "none" })
        .hint("taskmark mark --topic <N> --number <N> --correct");

    options.emit("init", &report, &human)
}

fn ensure_config(repo_root: &Path) -> Result<bool> {
    let config_path = repo_root.join(CONFIG_FILE);
    if config_path.exists() {
        if !config_path.is_file() {
            return Err(Error::OperationFailed(format!(
                "{CONFIG_FILE} exists but is not a file: {}",
                config_path.display()
            )));
        }
        return Ok(false);
    }

    Config::default().save(&config_path)?;
    Ok(true)
}
