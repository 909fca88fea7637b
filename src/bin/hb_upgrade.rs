use std::process::ExitCode;
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hybrid_upgrader::download::HttpArchiveClient;
use hybrid_upgrader::error::UpgradeError;
use hybrid_upgrader::extract::ZipExtractor;
use hybrid_upgrader::merge::{MergeMode, TreeMerger};
use hybrid_upgrader::output::{JsonOutput, LogEcho, OutputMode};
use hybrid_upgrader::pipeline::{PipelineController, RunReport, RunState};
use hybrid_upgrader::settings::{JsonSettingsStore, PipelineConfig};
use hybrid_upgrader::tui::Tui;
use hybrid_upgrader::vcs::GitCli;

type Controller =
    PipelineController<HttpArchiveClient, ZipExtractor, TreeMerger, GitCli, JsonSettingsStore>;

#[derive(Parser)]
#[command(name = "hb-upgrade")]
#[command(about = "Download, unpack and merge a versioned hybrid template into a project")]
#[command(version, author)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[arg(long, global = true, help = "Settings file (defaults to the user config dir)")]
    settings: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Inspect or edit the persisted settings")]
    Config(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommand,
}

#[derive(Subcommand)]
enum ConfigCommand {
    #[command(about = "Print the persisted settings")]
    Show,
    #[command(about = "Update and save settings")]
    Set(ConfigOverrides),
}

#[derive(Args, Clone, Default)]
struct ConfigOverrides {
    #[arg(long, help = "Project root (the git working tree)")]
    root: Option<Utf8PathBuf>,

    #[arg(long, help = "Directory that receives downloaded archives")]
    cache: Option<Utf8PathBuf>,

    #[arg(long, help = "Merge target relative to the project root")]
    asset_subpath: Option<String>,

    #[arg(long, value_name = "BOOL")]
    unzip: Option<bool>,

    #[arg(long, value_name = "BOOL")]
    replace: Option<bool>,

    #[arg(long, value_name = "BOOL")]
    commit: Option<bool>,
}

#[derive(Args, Clone)]
struct RunArgs {
    #[arg(help = "Archive url, e.g. http://host/snal_v2/7.3.63/index/index.php")]
    url: Option<String>,

    #[command(flatten)]
    overrides: ConfigOverrides,

    #[arg(long, value_enum, default_value_t = MergeMode::Copy)]
    merge_mode: MergeMode,

    #[arg(long, default_value_t = 300)]
    timeout_secs: u64,

    #[arg(long, help = "Start the upgrade as soon as the interface opens")]
    start: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<UpgradeError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &UpgradeError) -> u8 {
    match error {
        UpgradeError::InvalidUrl(_) | UpgradeError::MissingInput(_) => 2,
        UpgradeError::SettingsParse(_) => 2,
        UpgradeError::Network(_)
        | UpgradeError::HttpStatus { .. }
        | UpgradeError::Download(_)
        | UpgradeError::MissingTool(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let store = match cli.settings {
        Some(path) => JsonSettingsStore::new_with_path(path),
        None => JsonSettingsStore::new()?,
    };
    info!(settings = %store.path(), "settings store resolved");

    match cli.command {
        Some(Commands::Config(args)) => run_config(args.command, store, output_mode),
        None => run_upgrade(cli.run, store, output_mode),
    }
}

fn build_controller(
    store: JsonSettingsStore,
    url: &str,
    merge_mode: MergeMode,
    timeout: Duration,
) -> miette::Result<Controller> {
    let archive = HttpArchiveClient::new(timeout)?;
    let controller = PipelineController::new(
        PipelineConfig::default(),
        url,
        archive,
        ZipExtractor,
        TreeMerger::new(merge_mode),
        GitCli::new(),
        store,
    );
    if controller.restore_settings()? {
        info!("persisted settings restored");
    }
    Ok(controller)
}

fn apply_overrides(controller: &Controller, overrides: &ConfigOverrides) {
    if let Some(root) = &overrides.root {
        controller.set_root_path(root.as_str());
    }
    if let Some(cache) = &overrides.cache {
        controller.set_cache_path(cache.as_str());
    }
    if let Some(subpath) = &overrides.asset_subpath {
        controller.set_asset_subpath(subpath);
    }
    if let Some(enabled) = overrides.unzip {
        controller.set_auto_unzip(enabled);
    }
    if let Some(enabled) = overrides.replace {
        controller.set_auto_replace(enabled);
    }
    if let Some(enabled) = overrides.commit {
        controller.set_auto_commit(enabled);
    }
}

fn run_config(
    command: ConfigCommand,
    store: JsonSettingsStore,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let controller = build_controller(store, "", MergeMode::Copy, Duration::from_secs(300))?;
    match command {
        ConfigCommand::Show => {}
        ConfigCommand::Set(overrides) => {
            apply_overrides(&controller, &overrides);
            controller.save_settings()?;
        }
    }
    let config = controller.config();
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_config(&config).into_diagnostic(),
        OutputMode::Interactive => {
            print_config(&config);
            Ok(())
        }
    }
}

fn run_upgrade(
    args: RunArgs,
    store: JsonSettingsStore,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let url = args.url.clone().unwrap_or_default();
    let controller = build_controller(
        store,
        &url,
        args.merge_mode,
        Duration::from_secs(args.timeout_secs),
    )?;
    apply_overrides(&controller, &args.overrides);

    match output_mode {
        OutputMode::Interactive => {
            let mut tui = Tui::new(&controller);
            let report = tui.run(&controller, args.start)?;
            if let Some(report) = report {
                print_summary(&report);
                return fail_on_error(&report);
            }
            Ok(())
        }
        OutputMode::NonInteractive => {
            controller.readiness()?;
            let report = run_headless(&controller)?;
            JsonOutput::print_report(&report).into_diagnostic()?;
            fail_on_error(&report)
        }
    }
}

fn run_headless(controller: &Controller) -> miette::Result<RunReport> {
    let updates = controller.state().subscribe();
    let Some(handle) = controller.trigger() else {
        return Err(miette::Report::msg(controller.snapshot().log_text()));
    };

    let mut echo = LogEcho::new();
    while !handle.is_finished() {
        match updates.recv_timeout(Duration::from_millis(100)) {
            Ok(state) => echo.echo(&state.log).into_diagnostic()?,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    let report = handle.join()?;
    echo.echo(&report.log).into_diagnostic()?;
    Ok(report)
}

fn fail_on_error(report: &RunReport) -> miette::Result<()> {
    if report.state == RunState::Failed {
        return Err(miette::Report::msg(format!(
            "upgrade to {} failed",
            report.version
        )));
    }
    Ok(())
}

fn print_config(config: &PipelineConfig) {
    let flag = |enabled: bool| if enabled { "on" } else { "off" };
    println!("root path:     {}", config.root_path);
    println!("cache path:    {}", config.cache_path);
    println!("asset subpath: {}", config.asset_subpath);
    println!("auto unzip:    {}", flag(config.auto_unzip));
    println!("auto replace:  {}", flag(config.auto_replace));
    println!("auto commit:   {}", flag(config.auto_commit));
}

fn print_summary(report: &RunReport) {
    let green = "\x1b[32m";
    let red = "\x1b[31m";
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";

    let color = if report.is_error { red } else { green };
    println!("{cyan}hb-upgrade {}{reset}", report.version);
    println!("{color}{} ({:.0}%){reset}", report.state.label(), report.progress * 100.0);
    if let Some(commit) = &report.commit {
        println!("{green}commit {} {}{reset}", commit.id, commit.message);
    }
    for line in &report.log {
        println!("  {line}");
    }
}
