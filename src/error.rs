use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum UpgradeError {
    #[error("invalid download url: {0}")]
    InvalidUrl(String),

    #[error("missing input: {0}")]
    MissingInput(String),

    #[error("download request failed: {0}")]
    Network(String),

    #[error("download returned status {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("{0}")]
    Download(String),

    #[error("failed to extract archive: {0}")]
    Extraction(String),

    #[error("failed to merge template: {0}")]
    Merge(String),

    #[error("not a git working tree: {0}")]
    NotARepository(PathBuf),

    #[error("nothing to commit")]
    NothingToCommit,

    #[error("commit failed: {0}")]
    Commit(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("failed to read settings file at {0}")]
    SettingsRead(PathBuf),

    #[error("failed to parse settings: {0}")]
    SettingsParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("upgrade run aborted unexpectedly")]
    RunAborted,
}
