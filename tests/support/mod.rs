#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use git2::{IndexAddOption, Oid, Repository, Signature};
use tempfile::TempDir;

pub struct TestRepo {
    dir: TempDir,
    repo: Repository,
}

impl TestRepo {
    pub fn init() -> Result<Self, git2::Error> {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let repo = Repository::init(dir.path())?;
        set_identity(&repo)?;
        Ok(Self { dir, repo })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write_file(&self, rel_path: &str, contents: &str) -> std::io::Result<PathBuf> {
        let path = self.dir.path().join(rel_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents)?;
        Ok(path)
    }

    pub fn write_config(&self, contents: &str) -> std::io::Result<PathBuf> {
        self.write_file(".taskmark.toml", contents)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.dir.path().join(".taskmark")
    }

    /// Sorted file names in a directory of the working tree
    pub fn list_dir(&self, rel_path: &str) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.dir.path().join(rel_path))
            .expect("read_dir")
            .map(|entry| entry.expect("dir entry").file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    pub fn commit_all(&self, message: &str) -> Result<Oid, git2::Error> {
        let mut index = self.repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.write()?;

        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;
        let sig = Signature::now("taskmark-test", "taskmark-test@example.com")?;

        let parent = self
            .repo
            .head()
            .ok()
            .and_then(|head| head.target())
            .and_then(|oid| self.repo.find_commit(oid).ok());

        let oid = match parent {
            Some(parent) => self
                .repo
                .commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])?,
            None => self
                .repo
                .commit(Some("HEAD"), &sig, &sig, message, &tree, &[])?,
        };

        Ok(oid)
    }

    pub fn head_message(&self) -> Option<String> {
        let commit = self.repo.head().ok()?.peel_to_commit().ok()?;
        commit.message().map(str::to_string)
    }

    pub fn commit_count(&self) -> usize {
        let mut walk = match self.repo.revwalk() {
            Ok(walk) => walk,
            Err(_) => return 0,
        };
        if walk.push_head().is_err() {
            return 0;
        }
        walk.count()
    }

    /// Paths recorded in HEAD's tree, recursively, with `/` separators
    pub fn head_files(&self) -> Vec<String> {
        let mut files = Vec::new();
        let Ok(tree) = self.repo.head().and_then(|head| head.peel_to_tree()) else {
            return files;
        };
        tree.walk(git2::TreeWalkMode::PreOrder, |root, entry| {
            if entry.kind() == Some(git2::ObjectType::Blob) {
                if let Some(name) = entry.name() {
                    files.push(format!("{root}{name}"));
                }
            }
            git2::TreeWalkResult::Ok
        })
        .expect("tree walk");
        files.sort();
        files
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }
}

fn set_identity(repo: &Repository) -> Result<(), git2::Error> {
    let mut cfg = repo.config()?;
    cfg.set_str("user.name", "taskmark-test")?;
    cfg.set_str("user.email", "taskmark-test@example.com")?;
    Ok(())
}
