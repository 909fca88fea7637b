use std::any::Any;
use std::fs;
use std::io::ErrorKind;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::download::{ArchiveClient, DownloadOutcome};
use crate::error::UpgradeError;
use crate::extract::Extractor;
use crate::layout::{RunLayout, commit_message};
use crate::merge::Merger;
use crate::settings::{PipelineConfig, SettingsStore};
use crate::state::Observable;
use crate::vcs::{CommitInfo, VcsClient};
use crate::version::{VersionTag, validate_url};

pub const COMPLETION_MARKER: &str = "operation finished";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Downloading,
    Extracting,
    Replacing,
    Committing,
    Completed,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }

    pub fn label(self) -> &'static str {
        match self {
            RunState::Idle => "Idle",
            RunState::Downloading => "Downloading",
            RunState::Extracting => "Extracting",
            RunState::Replacing => "Replacing",
            RunState::Committing => "Committing",
            RunState::Completed => "Completed",
            RunState::Failed => "Failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Download,
    Extract,
    Replace,
    Commit,
}

impl Stage {
    pub const ORDER: [Stage; 4] = [Stage::Download, Stage::Extract, Stage::Replace, Stage::Commit];

    /// Whether the toggles let this stage run once its predecessor succeeded.
    pub fn enabled(self, config: &PipelineConfig) -> bool {
        match self {
            Stage::Download => true,
            Stage::Extract => config.auto_unzip,
            Stage::Replace => config.auto_replace,
            Stage::Commit => config.auto_commit,
        }
    }

    fn run_state(self) -> RunState {
        match self {
            Stage::Download => RunState::Downloading,
            Stage::Extract => RunState::Extracting,
            Stage::Replace => RunState::Replacing,
            Stage::Commit => RunState::Committing,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Stage::Download => "download",
            Stage::Extract => "extract",
            Stage::Replace => "replace",
            Stage::Commit => "commit",
        }
    }
}

/// Everything the presentation layer observes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineState {
    pub config: PipelineConfig,
    pub download_url: String,
    pub run_state: RunState,
    pub is_downloading: bool,
    pub is_clickable: bool,
    pub progress: f32,
    pub log: Vec<String>,
    pub is_error: bool,
}

impl PipelineState {
    fn new(config: PipelineConfig, download_url: String) -> Self {
        let mut state = Self {
            config: config.normalized(),
            download_url,
            run_state: RunState::Idle,
            is_downloading: false,
            is_clickable: false,
            progress: 0.0,
            log: Vec::new(),
            is_error: false,
        };
        state.refresh_clickable();
        state
    }

    pub fn log_text(&self) -> String {
        self.log.join("\n")
    }

    fn refresh_clickable(&mut self) {
        self.is_clickable = !self.is_downloading && self.rejection().is_none();
    }

    fn rejection(&self) -> Option<UpgradeError> {
        self.readiness().err()
    }

    /// Resolves the version tag if the current inputs can start a run.
    pub fn readiness(&self) -> Result<VersionTag, UpgradeError> {
        if self.config.root_path.as_str().trim().is_empty() {
            return Err(UpgradeError::MissingInput("project root path".to_string()));
        }
        if self.config.cache_path.as_str().is_empty() {
            return Err(UpgradeError::MissingInput("cache path".to_string()));
        }
        validate_url(&self.download_url)
            .ok_or_else(|| UpgradeError::InvalidUrl(self.download_url.clone()))
    }
}

/// Inputs of one run, frozen when the run is triggered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    pub source_url: String,
    pub version: VersionTag,
    pub config: PipelineConfig,
}

impl UpgradeRequest {
    pub fn new(source_url: &str, config: PipelineConfig) -> Result<Self, UpgradeError> {
        let version = source_url.parse::<VersionTag>()?;
        Ok(Self {
            source_url: source_url.trim().to_string(),
            version,
            config,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub version: String,
    pub state: RunState,
    pub is_error: bool,
    pub progress: f32,
    pub layout: RunLayout,
    pub commit: Option<CommitInfo>,
    pub settings_saved: bool,
    pub log: Vec<String>,
}

pub struct RunHandle {
    handle: JoinHandle<RunReport>,
}

impl RunHandle {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn join(self) -> Result<RunReport, UpgradeError> {
        self.handle.join().map_err(|_| UpgradeError::RunAborted)
    }
}

struct Shared<A, X, M, V, S> {
    state: Observable<PipelineState>,
    archive: A,
    extractor: X,
    merger: M,
    vcs: V,
    settings: S,
}

/// Drives download, extraction, merge and commit as one gated run.
///
/// Overlapping runs are prevented by `is_clickable`, which is cleared
/// when a run starts and recomputed once it reaches a terminal state.
pub struct PipelineController<A, X, M, V, S> {
    shared: Arc<Shared<A, X, M, V, S>>,
}

impl<A, X, M, V, S> Clone for PipelineController<A, X, M, V, S> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<A, X, M, V, S> PipelineController<A, X, M, V, S>
where
    A: ArchiveClient + 'static,
    X: Extractor + 'static,
    M: Merger + 'static,
    V: VcsClient + 'static,
    S: SettingsStore + 'static,
{
    pub fn new(
        config: PipelineConfig,
        download_url: impl Into<String>,
        archive: A,
        extractor: X,
        merger: M,
        vcs: V,
        settings: S,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Observable::new(PipelineState::new(config, download_url.into())),
                archive,
                extractor,
                merger,
                vcs,
                settings,
            }),
        }
    }

    pub fn state(&self) -> Observable<PipelineState> {
        self.shared.state.clone()
    }

    pub fn snapshot(&self) -> PipelineState {
        self.shared.state.get()
    }

    pub fn config(&self) -> PipelineConfig {
        self.shared.state.with(|state| state.config.clone())
    }

    /// Loads the persisted record, if any, into the current configuration.
    pub fn restore_settings(&self) -> Result<bool, UpgradeError> {
        let Some(config) = self.shared.settings.load()? else {
            return Ok(false);
        };
        self.apply_config(config);
        Ok(true)
    }

    pub fn save_settings(&self) -> Result<(), UpgradeError> {
        self.shared.settings.save(&self.config())
    }

    pub fn apply_config(&self, config: PipelineConfig) {
        self.shared.state.update(|state| {
            state.config = config.normalized();
            state.refresh_clickable();
        });
    }

    pub fn set_root_path(&self, path: &str) {
        self.shared.state.update(|state| {
            state.config.root_path = path.into();
            state.refresh_clickable();
        });
    }

    pub fn set_cache_path(&self, path: &str) {
        self.shared.state.update(|state| {
            state.config.cache_path = path.into();
            state.refresh_clickable();
        });
    }

    pub fn set_download_url(&self, url: &str) {
        self.shared.state.update(|state| {
            state.download_url = url.to_string();
            state.refresh_clickable();
        });
    }

    pub fn set_asset_subpath(&self, subpath: &str) {
        self.shared.state.update(|state| {
            state.config.asset_subpath = subpath.to_string();
        });
    }

    pub fn set_auto_unzip(&self, enabled: bool) {
        self.shared.state.update(|state| {
            state.config.auto_unzip = enabled;
            if !enabled {
                state.config.auto_replace = false;
                state.config.auto_commit = false;
            }
            state.log.push(toggle_line("auto unzip", enabled));
        });
        debug!(enabled, "auto unzip toggled");
    }

    pub fn set_auto_replace(&self, enabled: bool) {
        self.shared.state.update(|state| {
            state.config.auto_replace = enabled;
            if enabled {
                state.config.auto_unzip = true;
            } else {
                state.config.auto_commit = false;
            }
            state.log.push(toggle_line("auto replace", enabled));
        });
        debug!(enabled, "auto replace toggled");
    }

    pub fn set_auto_commit(&self, enabled: bool) {
        self.shared.state.update(|state| {
            state.config.auto_commit = enabled;
            if enabled {
                state.config.auto_unzip = true;
                state.config.auto_replace = true;
            }
            state.log.push(toggle_line("auto commit", enabled));
        });
        debug!(enabled, "auto commit toggled");
    }

    pub fn validate_url(&self, url: &str) -> Option<VersionTag> {
        validate_url(url)
    }

    pub fn readiness(&self) -> Result<VersionTag, UpgradeError> {
        self.shared.state.with(PipelineState::readiness)
    }

    /// Starts a run on a background thread. Returns `None` when the gate
    /// is closed: a run is active or the inputs are invalid.
    pub fn trigger(&self) -> Option<RunHandle> {
        let admitted = self.shared.state.update(|state| {
            if state.is_downloading {
                return Err(None);
            }
            if let Some(err) = state.rejection() {
                let reason = err.to_string();
                state.log.push(format!("cannot start upgrade: {reason}"));
                state.is_error = true;
                return Err(Some(reason));
            }
            let request = UpgradeRequest::new(&state.download_url, state.config.clone())
                .map_err(|err| Some(err.to_string()))?;
            state.log.clear();
            state.is_error = false;
            state.progress = 0.0;
            state.run_state = RunState::Idle;
            state.is_downloading = true;
            state.is_clickable = false;
            Ok(request)
        });

        let request = match admitted {
            Ok(request) => request,
            Err(None) => {
                warn!("upgrade already running; trigger ignored");
                return None;
            }
            Err(Some(reason)) => {
                warn!(%reason, "upgrade not started");
                return None;
            }
        };

        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name("hybrid-upgrade".to_string())
            .spawn(move || shared.execute_guarded(request));
        match spawned {
            Ok(handle) => Some(RunHandle { handle }),
            Err(err) => {
                self.shared.log_error(format!("failed to start upgrade: {err}"));
                self.shared.finish(RunState::Failed);
                None
            }
        }
    }

    /// Triggers a run and waits for it on the calling thread.
    pub fn run_to_completion(&self) -> Option<Result<RunReport, UpgradeError>> {
        self.trigger().map(RunHandle::join)
    }
}

impl<A, X, M, V, S> Shared<A, X, M, V, S>
where
    A: ArchiveClient,
    X: Extractor,
    M: Merger,
    V: VcsClient,
    S: SettingsStore,
{
    /// Runs the stages, turning a panicking stage into a failed run so the
    /// gate reopens.
    fn execute_guarded(&self, request: UpgradeRequest) -> RunReport {
        let version = request.version.to_string();
        let layout = RunLayout::new(&request.config, &request.version);
        match panic::catch_unwind(AssertUnwindSafe(|| self.execute(request))) {
            Ok(report) => report,
            Err(payload) => {
                self.log_error(format!("upgrade aborted: {}", panic_message(payload.as_ref())));
                self.log(COMPLETION_MARKER.to_string());
                self.finish(RunState::Failed);
                let state = self.state.get();
                RunReport {
                    version,
                    state: RunState::Failed,
                    is_error: true,
                    progress: state.progress,
                    layout,
                    commit: None,
                    settings_saved: false,
                    log: state.log,
                }
            }
        }
    }

    fn execute(&self, request: UpgradeRequest) -> RunReport {
        let layout = RunLayout::new(&request.config, &request.version);
        info!(version = %request.version, url = %request.source_url, "upgrade started");
        self.log(format!("version {}", request.version));

        let mut commit = None;
        let mut failed = false;
        for stage in Stage::ORDER {
            if !stage.enabled(&request.config) {
                debug!(stage = stage.label(), "stage disabled; finishing early");
                break;
            }
            self.set_run_state(stage.run_state());
            self.log(format!("{} started", stage.label()));
            let result = match stage {
                Stage::Download => self.download(&request, &layout),
                Stage::Extract => self.extract(&layout),
                Stage::Replace => self.replace(&request, &layout),
                Stage::Commit => self.commit(&request, &layout).map(|info| {
                    commit = Some(info);
                }),
            };
            if let Err(err) = result {
                self.log_error(format!("{} failed: {err}", stage.label()));
                failed = true;
                break;
            }
        }

        let mut settings_saved = false;
        if !failed {
            let config = self.state.with(|state| state.config.clone());
            match self.settings.save(&config) {
                Ok(()) => settings_saved = true,
                Err(err) => self.log_error(format!("failed to save settings: {err}")),
            }
        }

        let terminal = if failed {
            RunState::Failed
        } else {
            RunState::Completed
        };
        self.log(COMPLETION_MARKER.to_string());
        self.finish(terminal);
        info!(state = terminal.label(), "upgrade finished");

        let state = self.state.get();
        RunReport {
            version: request.version.to_string(),
            state: terminal,
            is_error: state.is_error,
            progress: state.progress,
            layout,
            commit,
            settings_saved,
            log: state.log,
        }
    }

    fn download(&self, request: &UpgradeRequest, layout: &RunLayout) -> Result<(), UpgradeError> {
        fs::create_dir_all(layout.version_dir.as_std_path())
            .map_err(|err| UpgradeError::Filesystem(err.to_string()))?;
        let events = self.archive.download(&request.source_url, layout.archive.as_std_path());
        for event in events {
            match event {
                DownloadOutcome::Progress(progress) => {
                    self.state.update(|state| state.progress = progress);
                }
                DownloadOutcome::Success => {
                    self.log(format!("downloaded {}", layout.archive));
                    return Ok(());
                }
                DownloadOutcome::Error(message) => return Err(UpgradeError::Download(message)),
            }
        }
        Err(UpgradeError::Download(
            "download ended without a result".to_string(),
        ))
    }

    fn extract(&self, layout: &RunLayout) -> Result<(), UpgradeError> {
        // leftovers of an earlier extraction of the same tag must not be merged
        match fs::remove_dir_all(layout.extract_dir.as_std_path()) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(UpgradeError::Extraction(err.to_string())),
        }
        self.extractor.extract(
            layout.archive.as_std_path(),
            layout.extract_dir.as_std_path(),
        )?;
        self.log(format!("extracted into {}", layout.extract_dir));
        Ok(())
    }

    fn replace(&self, request: &UpgradeRequest, layout: &RunLayout) -> Result<(), UpgradeError> {
        let summary = self.merger.merge(
            layout.extract_dir.as_std_path(),
            layout.merge_target.as_std_path(),
            &request.version,
        )?;
        for path in &summary.pruned {
            self.log(format!("pruned {}", path.display()));
        }
        self.log(format!("merged {} files into {}", summary.files, layout.merge_target));
        Ok(())
    }

    fn commit(
        &self,
        request: &UpgradeRequest,
        layout: &RunLayout,
    ) -> Result<CommitInfo, UpgradeError> {
        let message = commit_message(&request.version);
        let info = self.vcs.commit(layout.repository.as_std_path(), &message)?;
        self.log(format!("committed {} \"{}\"", info.id, info.message));
        Ok(info)
    }

    fn set_run_state(&self, run_state: RunState) {
        self.state.update(|state| state.run_state = run_state);
    }

    fn log(&self, line: String) {
        info!("{line}");
        self.state.update(|state| state.log.push(line));
    }

    fn log_error(&self, line: String) {
        warn!("{line}");
        self.state.update(|state| {
            state.log.push(line);
            state.is_error = true;
        });
    }

    fn finish(&self, terminal: RunState) {
        self.state.update(|state| {
            state.run_state = terminal;
            state.is_downloading = false;
            state.refresh_clickable();
        });
    }
}

fn toggle_line(name: &str, enabled: bool) -> String {
    format!("{name} {}", if enabled { "on" } else { "off" })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "stage panicked".to_string()
}
