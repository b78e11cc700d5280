//! The idempotent provisioning steps.
//!
//! Every step follows the same shape: probe, skip if satisfied, act, then
//! re-probe to verify. Steps never return an error to the caller; a
//! [`StepError`] is folded into the step's log and next-step hint.

use super::errors::format_duration;
use super::{MessageLog, StepError, StepKind, StepOutcome, StepResult, StepState};
use crate::config::{BinarySpec, ProvisionConfig, StructuredCommand};
use crate::detect::EnvironmentProbe;
use crate::fetch::Fetcher;
use crate::runner::CommandRunner;
use crate::scripts;
use crate::ProbeStatus;
use std::path::{Path, PathBuf};

/// Whether build-environment re-runs the dependency script when the
/// environment and scripts already exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyRefresh {
    /// Always re-materialize scripts and re-run the dependency install.
    Always,
    /// Skip the step when the environment and all scripts are present.
    IfIncomplete,
}

/// Runs provisioning steps against one install root.
pub struct StepExecutor<'a, R: ?Sized, F: ?Sized> {
    config: &'a ProvisionConfig,
    runner: &'a R,
    fetcher: &'a F,
}

impl<'a, R, F> StepExecutor<'a, R, F>
where
    R: CommandRunner + ?Sized,
    F: Fetcher + ?Sized,
{
    /// Create an executor.
    pub fn new(config: &'a ProvisionConfig, runner: &'a R, fetcher: &'a F) -> Self {
        Self {
            config,
            runner,
            fetcher,
        }
    }

    /// Run one step as an explicit request.
    pub async fn run(&self, step: StepKind) -> StepResult {
        self.run_with(step, DependencyRefresh::Always).await
    }

    /// Run one step, choosing how build-environment treats existing state.
    pub async fn run_with(&self, step: StepKind, refresh: DependencyRefresh) -> StepResult {
        match step {
            StepKind::InstallTool => self.install_tool().await,
            StepKind::InstallRuntime => self.install_runtime().await,
            StepKind::CloneRepository => self.clone_repository().await,
            StepKind::BuildEnvironment => self.build_environment(refresh).await,
            StepKind::FetchArtifact => self.fetch_artifact().await,
        }
    }

    /// Install the version-control client.
    pub async fn install_tool(&self) -> StepResult {
        let mut log = MessageLog::new();
        let result = self.install_tool_inner(&mut log).await;
        finish(StepKind::InstallTool, result, log)
    }

    /// Install the pinned runtime, with lenient verification.
    pub async fn install_runtime(&self) -> StepResult {
        let mut log = MessageLog::new();
        let result = self.install_runtime_inner(&mut log).await;
        finish(StepKind::InstallRuntime, result, log)
    }

    /// Clone the repository into the install root.
    pub async fn clone_repository(&self) -> StepResult {
        let mut log = MessageLog::new();
        let result = self.clone_repository_inner(&mut log).await;
        finish(StepKind::CloneRepository, result, log)
    }

    /// Create the isolated environment, write the scripts and install
    /// dependencies.
    pub async fn build_environment(&self, refresh: DependencyRefresh) -> StepResult {
        let mut log = MessageLog::new();
        let result = self.build_environment_inner(refresh, &mut log).await;
        finish(StepKind::BuildEnvironment, result, log)
    }

    /// Download the artifact unless it already exists.
    pub async fn fetch_artifact(&self) -> StepResult {
        let mut log = MessageLog::new();
        let result = self.fetch_artifact_inner(&mut log).await;
        finish(StepKind::FetchArtifact, result, log)
    }

    fn probe(&self) -> EnvironmentProbe<'a, R> {
        EnvironmentProbe::new(self.config, self.runner)
    }

    async fn install_tool_inner(&self, log: &mut MessageLog) -> Result<StepOutcome, StepError> {
        let step = StepKind::InstallTool;
        let probe = self.probe();

        transition(step, StepState::Unknown);
        transition(step, StepState::Probing);
        let status = probe.tool().await;
        if status.is_satisfied() {
            transition(step, StepState::Satisfied);
            log.success(format!(
                "Git is already installed: {}",
                status.version().unwrap_or_default()
            ));
            return Ok(StepOutcome::AlreadySatisfied);
        }

        transition(step, StepState::NeedsAction);
        transition(step, StepState::Acting);
        let installer = self.run_installer("Git", &self.config.tool, log).await?;

        transition(step, StepState::Verifying);
        tokio::time::sleep(self.config.timeouts.settle_delay).await;
        let status = probe.tool().await;
        if !status.is_satisfied() {
            if let Some(path) = &installer {
                log.plain(format!("Installer kept at {} for diagnosis", path.display()));
            }
            return Err(StepError::Verification {
                what: "Git".to_string(),
                expected: "git --version to succeed after installation".to_string(),
                detail: None,
                fix: "Restart your terminal so PATH changes apply, then run install-tool again"
                    .to_string(),
            });
        }

        remove_installer(installer.as_deref());
        log.success("Git installed successfully!");
        if let Some(version) = status.version() {
            log.plain(format!("   {version}"));
        }
        Ok(StepOutcome::Completed)
    }

    async fn install_runtime_inner(&self, log: &mut MessageLog) -> Result<StepOutcome, StepError> {
        let step = StepKind::InstallRuntime;
        let probe = self.probe();

        transition(step, StepState::Unknown);
        transition(step, StepState::Probing);
        match probe.runtime().await {
            ProbeStatus::Installed(meta) => {
                transition(step, StepState::Satisfied);
                log.success(format!("Python is already installed: {}", meta.raw_version));
                return Ok(StepOutcome::AlreadySatisfied);
            }
            ProbeStatus::VersionMismatch {
                found, expected, ..
            } => {
                log.warning(format!(
                    "Found Python {found}, but Python {expected} is required"
                ));
            }
            _ => {}
        }

        transition(step, StepState::NeedsAction);
        transition(step, StepState::Acting);
        let installer = self.run_installer("Python", &self.config.runtime, log).await?;

        transition(step, StepState::Verifying);
        tokio::time::sleep(self.config.timeouts.settle_delay).await;

        // The installer's exit code is not trusted: exact location, then any
        // alias with the right major.minor, then continue with a warning.
        if probe.runtime_exact().await.is_satisfied() {
            remove_installer(installer.as_deref());
            log.success("Python installed successfully!");
            return Ok(StepOutcome::Completed);
        }
        if let ProbeStatus::Installed(meta) = probe.runtime_any_alias().await {
            remove_installer(installer.as_deref());
            log.success(format!(
                "Python available via {}: {}",
                meta.path.display(),
                meta.raw_version
            ));
            return Ok(StepOutcome::Completed);
        }

        tracing::warn!("runtime verification unclear, continuing");
        log.warning("Python installation may have completed but verification unclear");
        if let Some(path) = &installer {
            log.plain(format!("Installer kept at {} for diagnosis", path.display()));
        }
        log.plain("Continuing with installation...");
        Ok(StepOutcome::CompletedWithWarning)
    }

    async fn clone_repository_inner(&self, log: &mut MessageLog) -> Result<StepOutcome, StepError> {
        let step = StepKind::CloneRepository;
        let marker = self.config.checkout_marker_path();
        let root = &self.config.install_root;

        transition(step, StepState::Unknown);
        transition(step, StepState::Probing);
        if marker.is_dir() {
            transition(step, StepState::Satisfied);
            log.success("Repository already exists");
            return Ok(StepOutcome::AlreadySatisfied);
        }

        transition(step, StepState::NeedsAction);
        let tool = self.probe().tool().await;
        let Some(git) = tool.path().filter(|_| tool.is_satisfied()) else {
            return Err(StepError::Verification {
                what: "Git".to_string(),
                expected: "Git to be installed before cloning".to_string(),
                detail: None,
                fix: "Install Git first".to_string(),
            });
        };

        let parent = root.parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(parent) = parent {
            std::fs::create_dir_all(parent).map_err(|e| StepError::io(parent, e))?;
        }

        transition(step, StepState::Acting);
        log.plain(format!("Cloning from {}", self.config.repository_url));
        let args = vec![
            "clone".to_string(),
            self.config.repository_url.clone(),
            root.to_string_lossy().into_owned(),
        ];
        let output = self
            .runner
            .run(
                &git.to_string_lossy(),
                &args,
                None,
                self.config.timeouts.installer,
            )
            .await?;
        if output.timed_out {
            return Err(StepError::Timeout {
                what: "Repository clone".to_string(),
                duration: self.config.timeouts.installer,
            });
        }

        transition(step, StepState::Verifying);
        // A clone that prints warnings may exit non-zero but still succeed.
        if output.success() || marker.is_dir() {
            if !output.success() {
                log.warning(format!(
                    "git exited with {} but the checkout is present",
                    exit_label(output.exit_code)
                ));
            }
            log.success("Repository cloned successfully!");
            return Ok(StepOutcome::Completed);
        }

        Err(StepError::Verification {
            what: "Clone".to_string(),
            expected: format!("{} to exist", marker.display()),
            detail: tail(&output.stderr),
            fix: "Check your internet connection and that the install directory is empty, then retry"
                .to_string(),
        })
    }

    async fn build_environment_inner(
        &self,
        refresh: DependencyRefresh,
        log: &mut MessageLog,
    ) -> Result<StepOutcome, StepError> {
        let step = StepKind::BuildEnvironment;
        let probe = self.probe();
        let root = &self.config.install_root;

        transition(step, StepState::Unknown);
        transition(step, StepState::Probing);
        let environment_present = probe.environment_present();
        if refresh == DependencyRefresh::IfIncomplete
            && environment_present
            && probe.scripts_present()
        {
            transition(step, StepState::Satisfied);
            log.success("Environment already configured");
            return Ok(StepOutcome::AlreadySatisfied);
        }

        transition(step, StepState::NeedsAction);
        std::fs::create_dir_all(root).map_err(|e| StepError::io(root, e))?;

        transition(step, StepState::Acting);
        if environment_present {
            log.success("Virtual environment already exists");
        } else {
            log.plain("Creating Python 3.9 virtual environment...");
            self.create_environment(log).await?;
        }

        scripts::materialize(self.config)?;
        log.success("Setup scripts created");

        log.plain("Installing dependencies (this may take 10-15 minutes)...");
        let script = self.config.setup_script_path();
        let script_arg = script.to_string_lossy().into_owned();
        let interpreter = self.config.scripts.interpreter();
        let limit = self.config.timeouts.dependencies;
        let output = self
            .runner
            .run(
                &interpreter.program,
                &interpreter.args_with(&[script_arg.as_str()]),
                Some(root),
                limit,
            )
            .await?;

        transition(step, StepState::Verifying);
        if output.timed_out {
            log.warning(format!(
                "Setup process timed out after {}.",
                format_duration(&limit)
            ));
            log.warning("Environment may be partially configured.");
            log.plain(format!("You can re-run the setup manually: {}", script.display()));
            return Ok(StepOutcome::CompletedWithWarning);
        }

        if output.success() {
            log.success("Environment setup completed successfully!");
            return Ok(StepOutcome::Completed);
        }

        log.warning(format!(
            "Setup script finished with {}; some packages may not have installed",
            exit_label(output.exit_code)
        ));
        if let Some(detail) = tail(&output.stderr) {
            log.plain(detail);
        }
        log.plain(format!("Re-run {} to retry", script.display()));
        Ok(StepOutcome::CompletedWithWarning)
    }

    /// Try each way of invoking the runtime until one produces the
    /// environment directory.
    async fn create_environment(&self, log: &mut MessageLog) -> Result<(), StepError> {
        let env = self.config.environment_path();
        let env_arg = env.to_string_lossy().into_owned();
        let venv_args = ["-m", "venv", env_arg.as_str()];

        let mut candidates = Vec::new();
        if let Some(location) = self.config.runtime.location.as_deref() {
            if location.exists() {
                candidates.push(StructuredCommand::new(&location.to_string_lossy(), &[]));
            }
        }
        candidates.extend(self.config.runtime.aliases.iter().cloned());

        for candidate in &candidates {
            let args = candidate.args_with(&venv_args);
            match self
                .runner
                .run(
                    &candidate.program,
                    &args,
                    Some(&self.config.install_root),
                    self.config.timeouts.installer,
                )
                .await
            {
                Ok(_) if env.is_dir() => {
                    log.success(format!(
                        "Virtual environment created with {}",
                        candidate.display()
                    ));
                    return Ok(());
                }
                Ok(output) => {
                    tracing::debug!(candidate = %candidate.display(), exit = ?output.exit_code, "venv not created");
                }
                Err(e) => {
                    tracing::debug!(candidate = %candidate.display(), error = %e, "venv candidate unavailable");
                }
            }
        }

        Err(StepError::Verification {
            what: "Virtual environment".to_string(),
            expected: format!("{} to be created", env.display()),
            detail: None,
            fix: "Please ensure Python 3.9 is properly installed".to_string(),
        })
    }

    async fn fetch_artifact_inner(&self, log: &mut MessageLog) -> Result<StepOutcome, StepError> {
        let step = StepKind::FetchArtifact;
        let path = self.config.artifact_path();
        let root = &self.config.install_root;

        transition(step, StepState::Unknown);
        transition(step, StepState::Probing);
        if path.is_file() {
            transition(step, StepState::Satisfied);
            log.success("Model already exists. Skipping download.");
            return Ok(StepOutcome::AlreadySatisfied);
        }

        transition(step, StepState::NeedsAction);
        std::fs::create_dir_all(root).map_err(|e| StepError::io(root, e))?;

        transition(step, StepState::Acting);
        log.plain(format!("Downloading from {}", self.config.artifact.url));
        log.plain("This may take several minutes...");
        let written = self.fetcher.fetch(&self.config.artifact.url, &path).await?;

        transition(step, StepState::Verifying);
        if !path.is_file() {
            return Err(StepError::Verification {
                what: "Model download".to_string(),
                expected: format!("{} to exist", path.display()),
                detail: None,
                fix: "Retry the download; check free disk space".to_string(),
            });
        }

        let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(written);
        log.success("Model downloaded successfully!");
        log.plain(format!("   Size: {:.1} MB", size as f64 / (1024.0 * 1024.0)));
        Ok(StepOutcome::Completed)
    }

    /// Download the installer if it has a URL, then run it unattended.
    ///
    /// Returns the downloaded installer path so the caller can remove it
    /// once verification passes.
    async fn run_installer(
        &self,
        what: &str,
        spec: &BinarySpec,
        log: &mut MessageLog,
    ) -> Result<Option<PathBuf>, StepError> {
        let installer = match &spec.installer.url {
            Some(url) => {
                let temp = &self.config.temp_dir;
                std::fs::create_dir_all(temp).map_err(|e| StepError::io(temp, e))?;
                let dest = temp.join(&spec.installer.file_name);
                log.plain(format!("Downloading {what} installer..."));
                self.fetcher.fetch(url, &dest).await?;
                Some(dest)
            }
            None => None,
        };

        let command = installer_command(spec, &self.config.elevation, installer.as_deref());
        log.plain(format!("Running {what} installer (this may take a few minutes)..."));
        let limit = self.config.timeouts.installer;
        let output = self
            .runner
            .run(&command.program, &command.args, None, limit)
            .await?;

        if output.timed_out {
            return Err(StepError::Timeout {
                what: format!("{what} installer"),
                duration: limit,
            });
        }
        if !output.success() {
            tracing::warn!(what, exit = ?output.exit_code, "installer exited non-zero");
            log.warning(format!(
                "{what} installer finished with {}",
                exit_label(output.exit_code)
            ));
        }
        Ok(installer)
    }
}

/// Substitute `{installer}` and `{install_dir}` and apply the elevation
/// prefix.
fn installer_command(
    spec: &BinarySpec,
    elevation: &[String],
    installer: Option<&Path>,
) -> StructuredCommand {
    let installer = installer
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    let install_dir = spec
        .install_dir()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    let substitute = |value: &str| {
        value
            .replace("{installer}", &installer)
            .replace("{install_dir}", &install_dir)
    };

    let program = substitute(&spec.installer.program);
    let args: Vec<String> = spec.installer.args.iter().map(|a| substitute(a.as_str())).collect();

    match elevation.split_first() {
        Some((prefix, rest)) if spec.installer.elevated => StructuredCommand {
            program: prefix.clone(),
            args: rest
                .iter()
                .cloned()
                .chain(std::iter::once(program))
                .chain(args)
                .collect(),
        },
        _ => StructuredCommand { program, args },
    }
}

fn finish(step: StepKind, result: Result<StepOutcome, StepError>, mut log: MessageLog) -> StepResult {
    match result {
        Ok(outcome) => {
            if outcome != StepOutcome::AlreadySatisfied {
                transition(step, StepState::Satisfied);
            }
            tracing::info!(?step, ?outcome, "step finished");
            StepResult::new(step, outcome, log, None)
        }
        Err(error) => {
            transition(step, StepState::Failed);
            tracing::warn!(?step, %error, "step failed");
            log.failure(format!("{}: {}", step.failure_label(), error));
            if let StepError::Verification {
                detail: Some(detail),
                ..
            } = &error
            {
                log.plain(format!("   {detail}"));
            }
            StepResult::new(step, StepOutcome::Failed, log, Some(error.fix_suggestion()))
        }
    }
}

fn transition(step: StepKind, state: StepState) {
    tracing::debug!(?step, ?state, terminal = state.is_terminal(), "step state");
}

fn remove_installer(path: Option<&Path>) {
    if let Some(path) = path {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::debug!(path = %path.display(), error = %e, "installer cleanup failed");
        }
    }
}

fn exit_label(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code".to_string(),
    }
}

/// Last few non-empty lines of process output.
fn tail(output: &str) -> Option<String> {
    let lines: Vec<&str> = output.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.is_empty() {
        return None;
    }
    let start = lines.len().saturating_sub(3);
    Some(lines[start..].join("\n"))
}
