use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde::Serialize;

use crate::error::UpgradeError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitInfo {
    pub id: String,
    pub message: String,
}

pub trait VcsClient: Send + Sync {
    /// Stages every change under `root` (deletions included) and commits it.
    fn commit(&self, root: &Path, message: &str) -> Result<CommitInfo, UpgradeError>;
}

#[derive(Debug, Clone)]
pub struct GitCli {
    git: Option<PathBuf>,
}

impl GitCli {
    pub fn new() -> Self {
        Self {
            git: find_in_path("git"),
        }
    }

    pub fn is_available(&self) -> bool {
        self.git.is_some()
    }

    fn require_git(&self) -> Result<&PathBuf, UpgradeError> {
        self.git
            .as_ref()
            .ok_or_else(|| UpgradeError::MissingTool("git".to_string()))
    }

    fn run(&self, root: &Path, args: &[&str]) -> Result<Output, UpgradeError> {
        let git = self.require_git()?;
        Command::new(git)
            .args(args)
            .current_dir(root)
            .output()
            .map_err(|err| UpgradeError::Commit(err.to_string()))
    }

    fn run_checked(&self, root: &Path, args: &[&str]) -> Result<Output, UpgradeError> {
        let output = self.run(root, args)?;
        if output.status.success() {
            return Ok(output);
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("git {} failed", args.join(" "))
        } else {
            stderr
        };
        Err(UpgradeError::Commit(message))
    }

    fn ensure_repository_root(&self, root: &Path) -> Result<(), UpgradeError> {
        let not_a_repo = || UpgradeError::NotARepository(root.to_path_buf());
        let canonical_root = fs::canonicalize(root).map_err(|_| not_a_repo())?;
        let output = self.run(root, &["rev-parse", "--show-toplevel"])?;
        if !output.status.success() {
            return Err(not_a_repo());
        }
        let toplevel = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let toplevel = fs::canonicalize(&toplevel).map_err(|_| not_a_repo())?;
        if toplevel != canonical_root {
            return Err(not_a_repo());
        }
        Ok(())
    }

    fn has_staged_changes(&self, root: &Path) -> Result<bool, UpgradeError> {
        let output = self.run(root, &["diff", "--cached", "--quiet"])?;
        match output.status.code() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(UpgradeError::Commit(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            )),
        }
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

impl VcsClient for GitCli {
    fn commit(&self, root: &Path, message: &str) -> Result<CommitInfo, UpgradeError> {
        self.require_git()?;
        self.ensure_repository_root(root)?;
        self.run_checked(root, &["add", "--all", "."])?;
        if !self.has_staged_changes(root)? {
            return Err(UpgradeError::NothingToCommit);
        }
        self.run_checked(root, &["commit", "--quiet", "--message", message])?;
        let head = self.run_checked(root, &["rev-parse", "HEAD"])?;
        Ok(CommitInfo {
            id: String::from_utf8_lossy(&head.stdout).trim().to_string(),
            message: message.to_string(),
        })
    }
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.is_file() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.is_file() {
            return Some(plain);
        }
    }
    None
}
