use std::fs;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::UpgradeError;
use crate::version::VersionTag;

/// File shipped inside template archives that must never reach the project.
pub const VERSION_MARKER: &str = "version.txt";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MergeMode {
    #[default]
    Copy,
    Move,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub pruned: Vec<PathBuf>,
    pub files: usize,
}

pub trait Merger: Send + Sync {
    /// Prunes stale artifacts from `source`, then lays its tree over
    /// `target`, replacing files with the same relative path.
    fn merge(
        &self,
        source: &Path,
        target: &Path,
        version: &VersionTag,
    ) -> Result<MergeSummary, UpgradeError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TreeMerger {
    mode: MergeMode,
}

impl TreeMerger {
    pub fn new(mode: MergeMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> MergeMode {
        self.mode
    }
}

impl Merger for TreeMerger {
    fn merge(
        &self,
        source: &Path,
        target: &Path,
        version: &VersionTag,
    ) -> Result<MergeSummary, UpgradeError> {
        if !source.is_dir() {
            return Err(UpgradeError::Merge(format!(
                "extracted tree not found: {}",
                source.display()
            )));
        }
        let pruned = prune_stale(source, version)?;
        let files = match self.mode {
            MergeMode::Copy => copy_tree(source, target)?,
            MergeMode::Move => move_tree(source, target)?,
        };
        Ok(MergeSummary { pruned, files })
    }
}

/// Removes direct children of `source` named after the version tag or the
/// version marker.
pub fn prune_stale(source: &Path, version: &VersionTag) -> Result<Vec<PathBuf>, UpgradeError> {
    let mut removed = Vec::new();
    for name in [version.as_str(), VERSION_MARKER] {
        let path = source.join(name);
        if path.is_dir() {
            fs::remove_dir_all(&path).map_err(|err| UpgradeError::Merge(err.to_string()))?;
        } else if path.exists() {
            fs::remove_file(&path).map_err(|err| UpgradeError::Merge(err.to_string()))?;
        } else {
            continue;
        }
        removed.push(path);
    }
    Ok(removed)
}

fn copy_tree(source: &Path, target: &Path) -> Result<usize, UpgradeError> {
    fs::create_dir_all(target).map_err(|err| UpgradeError::Merge(err.to_string()))?;
    let mut files = 0;
    for entry in walk_dir(source)? {
        let destination = target.join(relative_to(&entry, source)?);
        if entry.is_dir() {
            fs::create_dir_all(&destination).map_err(|err| UpgradeError::Merge(err.to_string()))?;
            continue;
        }
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|err| UpgradeError::Merge(err.to_string()))?;
        }
        fs::copy(&entry, &destination).map_err(|err| {
            UpgradeError::Merge(format!("copy {}: {err}", entry.display()))
        })?;
        files += 1;
    }
    Ok(files)
}

fn move_tree(source: &Path, target: &Path) -> Result<usize, UpgradeError> {
    fs::create_dir_all(target).map_err(|err| UpgradeError::Merge(err.to_string()))?;
    let mut files = 0;
    for entry in walk_dir(source)? {
        if entry.is_dir() {
            continue;
        }
        let destination = target.join(relative_to(&entry, source)?);
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|err| UpgradeError::Merge(err.to_string()))?;
        }
        if destination.is_file() {
            fs::remove_file(&destination).map_err(|err| UpgradeError::Merge(err.to_string()))?;
        }
        // rename fails across filesystems
        if fs::rename(&entry, &destination).is_err() {
            fs::copy(&entry, &destination).map_err(|err| {
                UpgradeError::Merge(format!("move {}: {err}", entry.display()))
            })?;
            fs::remove_file(&entry).map_err(|err| UpgradeError::Merge(err.to_string()))?;
        }
        files += 1;
    }
    fs::remove_dir_all(source).map_err(|err| UpgradeError::Merge(err.to_string()))?;
    Ok(files)
}

fn relative_to<'a>(entry: &'a Path, root: &Path) -> Result<&'a Path, UpgradeError> {
    entry
        .strip_prefix(root)
        .map_err(|err| UpgradeError::Merge(err.to_string()))
}

fn walk_dir(root: &Path) -> Result<Vec<PathBuf>, UpgradeError> {
    let mut items = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries = fs::read_dir(&path).map_err(|err| UpgradeError::Merge(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| UpgradeError::Merge(err.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path.clone());
            }
            items.push(path);
        }
    }
    Ok(items)
}
