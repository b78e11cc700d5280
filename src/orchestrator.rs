//! Top-level request handling.
//!
//! [`Provisioner::run_request`] turns one [`InstallationRequest`] into one
//! [`ProgressReport`]. Nothing is kept between calls: every report starts
//! from a fresh probe of the machine.

use crate::config::{ProvisionConfig, PINNED_RUNTIME_VERSION};
use crate::detect::{EnvironmentProbe, EnvironmentState};
use crate::detection::{matches_major_minor, parse_version};
use crate::fetch::{Fetcher, HttpFetcher};
use crate::install::{
    DependencyRefresh, MessageLog, Phase, ProvisionProgress, StepExecutor, StepKind,
};
use crate::runner::{CommandRunner, ProcessRunner};
use crate::{DependencyKind, ProbeStatus};
use serde::{Deserialize, Serialize, Serializer};
use std::borrow::Cow;
use std::fmt;
use std::path::PathBuf;
use strum::IntoEnumIterator;

const ALL_INSTALLED: &str = "Everything is installed! Ready to use.";

/// What a request asks the orchestrator to do.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::EnumIter,
)]
pub enum RequestMode {
    /// Probe and summarize only.
    CheckStatus,
    /// Run install-tool.
    InstallTool,
    /// Run install-runtime.
    InstallRuntime,
    /// Run clone-repository.
    CloneRepository,
    /// Run build-environment.
    BuildEnvironment,
    /// Run fetch-artifact.
    FetchArtifact,
    /// Run every step in dependency order.
    FullAuto,
}

impl RequestMode {
    /// All modes in menu order.
    pub fn all() -> impl Iterator<Item = Self> {
        <Self as IntoEnumIterator>::iter()
    }

    /// The single step this mode runs, if it runs exactly one.
    pub fn step(&self) -> Option<StepKind> {
        match self {
            Self::InstallTool => Some(StepKind::InstallTool),
            Self::InstallRuntime => Some(StepKind::InstallRuntime),
            Self::CloneRepository => Some(StepKind::CloneRepository),
            Self::BuildEnvironment => Some(StepKind::BuildEnvironment),
            Self::FetchArtifact => Some(StepKind::FetchArtifact),
            Self::CheckStatus | Self::FullAuto => None,
        }
    }

    /// Subcommand name on the command line.
    pub fn command_name(&self) -> &'static str {
        match self {
            Self::CheckStatus => "status",
            Self::InstallTool => "install-tool",
            Self::InstallRuntime => "install-runtime",
            Self::CloneRepository => "clone",
            Self::BuildEnvironment => "build-env",
            Self::FetchArtifact => "fetch-artifact",
            Self::FullAuto => "auto",
        }
    }

    /// One-line description for the menu.
    pub fn description(&self) -> &'static str {
        match self {
            Self::CheckStatus => "Check what is installed",
            Self::InstallTool => "Install Git",
            Self::InstallRuntime => "Install Python 3.9",
            Self::CloneRepository => "Clone the repository",
            Self::BuildEnvironment => "Create the virtual environment and install dependencies",
            Self::FetchArtifact => "Download the AI model",
            Self::FullAuto => "Install everything in order",
        }
    }
}

/// One invocation: at most one mode plus an optional install root.
///
/// ```rust
/// use env_provisioner::{InstallationRequest, RequestMode};
///
/// let request = InstallationRequest::new(RequestMode::CheckStatus).with_install_root("/tmp/aed");
/// assert!(request.install_root.is_some());
/// assert!(InstallationRequest::idle().mode.is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationRequest {
    /// The active mode; `None` produces the idle menu.
    pub mode: Option<RequestMode>,
    /// Overrides the configured install root.
    pub install_root: Option<PathBuf>,
}

impl InstallationRequest {
    /// Request for `mode` against the configured root.
    pub fn new(mode: RequestMode) -> Self {
        Self {
            mode: Some(mode),
            install_root: None,
        }
    }

    /// Request with no mode selected.
    pub fn idle() -> Self {
        Self::default()
    }

    /// Redirect the request to another install root.
    pub fn with_install_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.install_root = Some(root.into());
        self
    }
}

/// Coarse status label of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportStatus {
    /// No mode selected.
    Ready,
    /// CheckStatus finished.
    Checking,
    /// The single requested step succeeded.
    StepSucceeded(StepKind),
    /// The single requested step failed.
    StepFailed(StepKind),
    /// FullAuto finished with every step successful.
    Complete,
    /// FullAuto finished with at least one failed step.
    Partial,
}

impl ReportStatus {
    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ready => "Ready",
            Self::Checking => "Status Checked",
            Self::StepSucceeded(step) => step.success_label(),
            Self::StepFailed(step) => step.failure_label(),
            Self::Complete => "Installation Complete",
            Self::Partial => "Partial Installation",
        }
    }

    /// Whether the report describes a failure or a partial result.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::StepFailed(_) | Self::Partial)
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for ReportStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

/// The sole output of the orchestrator, rebuilt on every call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressReport {
    /// Coarse status.
    pub status: ReportStatus,
    /// 0.0 to 1.0; only FullAuto advances it.
    pub progress: f64,
    /// Ordered log of everything that happened.
    pub messages: MessageLog,
    /// Ordered suggestions for the user.
    pub next_steps: Vec<String>,
}

impl ProgressReport {
    /// Plain-text rendering for a terminal.
    pub fn render(&self) -> String {
        let mut out = Vec::new();
        out.push(format!("Status: {}", self.status));
        if self.progress > 0.0 {
            out.push(format!("Progress: {:.0}%", self.progress * 100.0));
        }
        out.push(String::new());
        out.extend(self.messages.lines());
        if !self.next_steps.is_empty() {
            out.push(String::new());
            out.push("Next steps:".to_string());
            out.extend(self.next_steps.iter().map(|s| format!("  {s}")));
        }
        out.join("\n")
    }
}

impl fmt::Display for ProgressReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Drives probes and steps for incoming requests.
///
/// # Example
///
/// ```rust,no_run
/// use env_provisioner::{InstallationRequest, Provisioner, ProvisionConfig, RequestMode};
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() {
///     let provisioner = Provisioner::new(ProvisionConfig::default());
///     let report = provisioner
///         .run_request(&InstallationRequest::new(RequestMode::CheckStatus))
///         .await;
///     println!("{report}");
/// }
/// ```
pub struct Provisioner<R = ProcessRunner, F = HttpFetcher> {
    config: ProvisionConfig,
    runner: R,
    fetcher: F,
}

impl Provisioner<ProcessRunner, HttpFetcher> {
    /// Provisioner backed by real processes and HTTP.
    pub fn new(config: ProvisionConfig) -> Self {
        let fetcher = HttpFetcher::with_stall_timeout(config.timeouts.download_stall);
        Self::with_components(config, ProcessRunner::new(), fetcher)
    }
}

impl<R: CommandRunner, F: Fetcher> Provisioner<R, F> {
    /// Provisioner with a custom runner and fetcher.
    pub fn with_components(config: ProvisionConfig, runner: R, fetcher: F) -> Self {
        Self {
            config,
            runner,
            fetcher,
        }
    }

    /// The configuration used when a request does not override the root.
    pub fn config(&self) -> &ProvisionConfig {
        &self.config
    }

    /// The command runner.
    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// The fetcher.
    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Handle one request.
    pub async fn run_request(&self, request: &InstallationRequest) -> ProgressReport {
        self.run_request_with_progress(request, |_| {}).await
    }

    /// Handle one request, reporting each FullAuto checkpoint to
    /// `on_progress`.
    ///
    /// Checkpoints are non-decreasing and the last one is always 1.0,
    /// whatever the individual steps return.
    pub async fn run_request_with_progress<P>(
        &self,
        request: &InstallationRequest,
        on_progress: P,
    ) -> ProgressReport
    where
        P: Fn(ProvisionProgress) + Send + Sync,
    {
        let config: Cow<'_, ProvisionConfig> = match &request.install_root {
            Some(root) => Cow::Owned(self.config.clone().with_install_root(root)),
            None => Cow::Borrowed(&self.config),
        };

        let Some(mode) = request.mode else {
            return idle_report(&config);
        };
        tracing::info!(?mode, root = %config.install_root.display(), "handling request");

        let mut log = MessageLog::new();
        banner(&config, &mut log);

        let probe = EnvironmentProbe::new(&config, &self.runner);
        compatibility_warning(&config, &probe, &mut log).await;

        let executor = StepExecutor::new(&config, &self.runner, &self.fetcher);
        match mode {
            RequestMode::CheckStatus => check_status(&probe, log).await,
            RequestMode::FullAuto => full_auto(&config, &probe, &executor, log, on_progress).await,
            _ => match mode.step() {
                Some(step) => single_step(step, &probe, &executor, log).await,
                None => idle_report(&config),
            },
        }
    }
}

fn banner(config: &ProvisionConfig, log: &mut MessageLog) {
    let rule = "=".repeat(60);
    let pinned = config
        .runtime
        .expected_version
        .as_deref()
        .unwrap_or(PINNED_RUNTIME_VERSION);
    log.heading(rule.clone());
    log.heading("🏗️ ARCHITECTURAL ELEMENTS DETECTION - INSTALLER");
    log.heading(rule);
    log.plain(format!("IMPORTANT: This installer will install Python {pinned}"));
    log.plain("(Required for modern PyTorch and Detectron2 compatibility)");
    log.plain(format!(
        "Installation Directory: {}",
        config.install_root.display()
    ));
    log.blank();
}

/// Warn when the generic runtime alias reports a different major.minor.
async fn compatibility_warning<R: CommandRunner + ?Sized>(
    config: &ProvisionConfig,
    probe: &EnvironmentProbe<'_, R>,
    log: &mut MessageLog,
) {
    let Some(expected) = config.runtime.expected_major_minor() else {
        return;
    };
    let Some(raw) = probe.system_runtime_version().await else {
        return;
    };
    let Ok(version) = parse_version(&raw) else {
        return;
    };
    if matches_major_minor(&version, &expected) {
        return;
    }

    log.warning(format!("System Python version detected: {raw}"));
    log.plain(format!(
        "   Python {expected} will be installed separately and used for the virtual environment"
    ));
    log.blank();
}

fn idle_report(config: &ProvisionConfig) -> ProgressReport {
    let mut log = MessageLog::new();
    banner(config, &mut log);
    log.heading("Available modes:");
    for mode in RequestMode::all() {
        log.plain(format!("  {:<16} {}", mode.command_name(), mode.description()));
    }
    ProgressReport {
        status: ReportStatus::Ready,
        progress: 0.0,
        messages: log,
        next_steps: vec!["Choose a mode to begin; `auto` installs everything".to_string()],
    }
}

async fn check_status<R: CommandRunner + ?Sized>(
    probe: &EnvironmentProbe<'_, R>,
    mut log: MessageLog,
) -> ProgressReport {
    log.heading("📋 Checking installation status...");
    let state = probe.snapshot().await;
    for kind in DependencyKind::all() {
        status_line(kind, &state, &mut log);
    }

    ProgressReport {
        status: ReportStatus::Checking,
        progress: 0.0,
        messages: log,
        next_steps: vec![next_suggestion(&state)],
    }
}

fn status_line(kind: DependencyKind, state: &EnvironmentState, log: &mut MessageLog) {
    let name = kind.display_name();
    let binary = match kind {
        DependencyKind::Tool => Some(&state.tool),
        DependencyKind::Runtime => Some(&state.runtime),
        _ => None,
    };

    match binary {
        Some(ProbeStatus::Installed(meta)) => {
            log.success(format!("{name}: {}", kind.present_label()));
            log.plain(format!("   {}", meta.raw_version));
        }
        Some(ProbeStatus::VersionMismatch { found, .. }) => {
            log.warning(format!("{name}: wrong version (found {found})"));
        }
        Some(ProbeStatus::Unknown { message, .. }) => {
            log.warning(format!("{name}: could not be checked ({message})"));
        }
        Some(_) => log.failure(format!("{name}: {}", kind.absent_label())),
        None if state.is_satisfied(kind) => {
            log.success(format!("{name}: {}", kind.present_label()))
        }
        None => log.failure(format!("{name}: {}", kind.absent_label())),
    }
}

fn next_suggestion(state: &EnvironmentState) -> String {
    state
        .most_urgent_missing()
        .map(|kind| kind.next_step_suggestion())
        .unwrap_or(ALL_INSTALLED)
        .to_string()
}

async fn single_step<R, F>(
    step: StepKind,
    probe: &EnvironmentProbe<'_, R>,
    executor: &StepExecutor<'_, R, F>,
    mut log: MessageLog,
) -> ProgressReport
where
    R: CommandRunner + ?Sized,
    F: Fetcher + ?Sized,
{
    log.heading(step.banner());
    let result = executor.run(step).await;
    let success = result.success;
    log.append(result.messages);

    let next_steps = if success {
        vec![next_suggestion(&probe.snapshot().await)]
    } else {
        result.next_step_hint.into_iter().collect()
    };

    ProgressReport {
        status: if success {
            ReportStatus::StepSucceeded(step)
        } else {
            ReportStatus::StepFailed(step)
        },
        progress: 0.0,
        messages: log,
        next_steps,
    }
}

async fn full_auto<R, F, P>(
    config: &ProvisionConfig,
    probe: &EnvironmentProbe<'_, R>,
    executor: &StepExecutor<'_, R, F>,
    mut log: MessageLog,
    on_progress: P,
) -> ProgressReport
where
    R: CommandRunner + ?Sized,
    F: Fetcher + ?Sized,
    P: Fn(ProvisionProgress),
{
    on_progress(ProvisionProgress::at(Phase::CheckingStatus));
    log.heading("🚀 Starting full automatic installation...");
    let missing = probe.snapshot().await.missing();
    if missing.is_empty() {
        log.success("All components already present");
    } else {
        let names: Vec<_> = missing.iter().map(DependencyKind::display_name).collect();
        log.plain(format!("Missing components: {}", names.join(", ")));
    }

    let phases = [
        (Phase::InstallingTool, StepKind::InstallTool),
        (Phase::InstallingRuntime, StepKind::InstallRuntime),
        (Phase::CloningRepository, StepKind::CloneRepository),
        (Phase::BuildingEnvironment, StepKind::BuildEnvironment),
        (Phase::FetchingArtifact, StepKind::FetchArtifact),
    ];

    let mut success = true;
    let mut skipped = 0usize;
    let mut hints = Vec::new();
    for (phase, step) in phases {
        on_progress(ProvisionProgress::at(phase));
        log.blank();
        log.heading(step.banner());

        let result = executor
            .run_with(step, DependencyRefresh::IfIncomplete)
            .await;
        success &= result.success;
        if result.was_skipped() {
            skipped += 1;
        }
        if !result.success {
            hints.extend(result.next_step_hint);
        }
        log.append(result.messages);
    }

    on_progress(ProvisionProgress::at(Phase::Finished));
    log.blank();

    if success {
        log.heading("🎉 INSTALLATION COMPLETE!");
        for capability in [
            "Git installed",
            "Python 3.9 installed",
            "Repository cloned",
            "Virtual environment configured",
            "PyTorch and Detectron2 dependencies installed",
            "AI model downloaded",
            "Run scripts generated",
        ] {
            log.success(capability);
        }
        tracing::info!(skipped, "full installation complete");
        ProgressReport {
            status: ReportStatus::Complete,
            progress: Phase::Finished.fraction(),
            messages: log,
            next_steps: vec![
                "All components installed successfully!".to_string(),
                format!("Run {} to start detection", config.launcher_script_path().display()),
            ],
        }
    } else {
        log.warning("Installation completed with some issues.");
        log.plain("Some components may need manual installation.");
        tracing::warn!(failed = hints.len(), skipped, "full installation partial");
        let mut next_steps =
            vec!["Some components may need manual installation. Review the messages above.".to_string()];
        next_steps.extend(hints);
        ProgressReport {
            status: ReportStatus::Partial,
            progress: Phase::Finished.fraction(),
            messages: log,
            next_steps,
        }
    }
}
