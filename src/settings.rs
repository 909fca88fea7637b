use std::collections::BTreeMap;
use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::UpgradeError;

/// Key the pipeline record is stored under in the settings document.
pub const SETTINGS_KEY: &str = "hybrid";
pub const DEFAULT_ASSET_SUBPATH: &str = "SinaNews/src/main/assets/article_v2";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    #[serde(default)]
    pub root_path: Utf8PathBuf,
    #[serde(default)]
    pub cache_path: Utf8PathBuf,
    #[serde(default = "enabled")]
    pub auto_unzip: bool,
    #[serde(default = "enabled")]
    pub auto_replace: bool,
    #[serde(default = "enabled")]
    pub auto_commit: bool,
    #[serde(default = "default_asset_subpath")]
    pub asset_subpath: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            root_path: Utf8PathBuf::new(),
            cache_path: Utf8PathBuf::new(),
            auto_unzip: true,
            auto_replace: true,
            auto_commit: true,
            asset_subpath: default_asset_subpath(),
        }
    }
}

impl PipelineConfig {
    /// Applies the toggle rules top-down: replace needs unzip, commit
    /// needs both.
    pub fn normalized(mut self) -> Self {
        if !self.auto_unzip {
            self.auto_replace = false;
        }
        if !self.auto_replace {
            self.auto_commit = false;
        }
        self
    }

    pub fn satisfies_toggle_rules(&self) -> bool {
        (!self.auto_replace || self.auto_unzip)
            && (!self.auto_commit || (self.auto_unzip && self.auto_replace))
    }
}

fn enabled() -> bool {
    true
}

fn default_asset_subpath() -> String {
    DEFAULT_ASSET_SUBPATH.to_string()
}

pub trait SettingsStore: Send + Sync {
    fn load(&self) -> Result<Option<PipelineConfig>, UpgradeError>;
    fn save(&self, config: &PipelineConfig) -> Result<(), UpgradeError>;
}

/// Settings kept as a JSON document of named records.
#[derive(Debug, Clone)]
pub struct JsonSettingsStore {
    path: Utf8PathBuf,
}

impl JsonSettingsStore {
    pub fn new() -> Result<Self, UpgradeError> {
        let path = BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(
                    dirs.config_dir()
                        .join("hybrid-upgrader")
                        .join("settings.json"),
                )
                .ok()
            })
            .ok_or_else(|| {
                UpgradeError::Filesystem("unable to resolve config directory".to_string())
            })?;
        Ok(Self { path })
    }

    pub fn new_with_path(path: Utf8PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn read_document(&self) -> Result<Option<BTreeMap<String, Value>>, UpgradeError> {
        if !self.path.as_std_path().exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(self.path.as_std_path())
            .map_err(|_| UpgradeError::SettingsRead(self.path.clone().into_std_path_buf()))?;
        let document = serde_json::from_str(&content)
            .map_err(|err| UpgradeError::SettingsParse(err.to_string()))?;
        Ok(Some(document))
    }
}

impl SettingsStore for JsonSettingsStore {
    fn load(&self) -> Result<Option<PipelineConfig>, UpgradeError> {
        let Some(mut document) = self.read_document()? else {
            return Ok(None);
        };
        let Some(record) = document.remove(SETTINGS_KEY) else {
            return Ok(None);
        };
        let config: PipelineConfig = serde_json::from_value(record)
            .map_err(|err| UpgradeError::SettingsParse(err.to_string()))?;
        Ok(Some(config.normalized()))
    }

    fn save(&self, config: &PipelineConfig) -> Result<(), UpgradeError> {
        // Unreadable documents are replaced rather than blocking the save.
        let mut document = self.read_document().ok().flatten().unwrap_or_default();
        let record = serde_json::to_value(config)
            .map_err(|err| UpgradeError::SettingsParse(err.to_string()))?;
        document.insert(SETTINGS_KEY.to_string(), record);
        let content = serde_json::to_vec_pretty(&document)
            .map_err(|err| UpgradeError::SettingsParse(err.to_string()))?;
        write_atomic(&self.path, &content)
    }
}

fn write_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), UpgradeError> {
    let parent = path
        .parent()
        .ok_or_else(|| UpgradeError::Filesystem("invalid settings path".to_string()))?;
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| UpgradeError::Filesystem(err.to_string()))?;
    let mut temp = tempfile::Builder::new()
        .prefix("hybrid-settings")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| UpgradeError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| UpgradeError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| UpgradeError::Filesystem(err.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_enforces_toggle_rules() {
        let config = PipelineConfig {
            auto_unzip: false,
            ..PipelineConfig::default()
        }
        .normalized();
        assert!(!config.auto_replace);
        assert!(!config.auto_commit);
        assert!(config.satisfies_toggle_rules());
    }

    #[test]
    fn record_uses_camel_case_keys() {
        let value = serde_json::to_value(PipelineConfig::default()).unwrap();
        assert!(value.get("rootPath").is_some());
        assert!(value.get("autoUnzip").is_some());
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"rootPath": "/work/app"}"#).unwrap();
        assert_eq!(config.root_path, Utf8PathBuf::from("/work/app"));
        assert!(config.auto_unzip && config.auto_replace && config.auto_commit);
        assert_eq!(config.asset_subpath, DEFAULT_ASSET_SUBPATH);
    }
}
