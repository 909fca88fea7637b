use camino::Utf8PathBuf;
use serde::Serialize;

use crate::settings::PipelineConfig;
use crate::version::VersionTag;

pub const ARCHIVE_FILE: &str = "index.zip";
pub const EXTRACT_DIR: &str = "index";
pub const COMMIT_MESSAGE_PREFIX: &str = "Upgrade article hybrid template ";

/// Files and directories touched by one upgrade run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunLayout {
    pub version_dir: Utf8PathBuf,
    pub archive: Utf8PathBuf,
    pub extract_dir: Utf8PathBuf,
    pub merge_target: Utf8PathBuf,
    pub repository: Utf8PathBuf,
}

impl RunLayout {
    pub fn new(config: &PipelineConfig, version: &VersionTag) -> Self {
        let version_dir = config.cache_path.join(version.as_str());
        let subpath = config.asset_subpath.trim_start_matches(['/', '\\']);
        Self {
            archive: version_dir.join(ARCHIVE_FILE),
            extract_dir: version_dir.join(EXTRACT_DIR),
            version_dir,
            merge_target: config.root_path.join(subpath),
            repository: config.root_path.clone(),
        }
    }
}

pub fn commit_message(version: &VersionTag) -> String {
    format!("{COMMIT_MESSAGE_PREFIX}{version}")
}
