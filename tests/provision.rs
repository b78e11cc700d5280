//! End-to-end tests for the orchestrator against scripted fakes and a
//! temporary install root.

mod common;

use common::{populate_except_artifact, test_config, FakeFetcher, FakeRunner, Reply, Rule};
use env_provisioner::{
    InstallationRequest, LogLevel, ProvisionConfig, Provisioner, ReportStatus, RequestMode,
    StepKind,
};
use std::sync::Mutex;

fn provisioner(
    config: ProvisionConfig,
    runner: FakeRunner,
    fetcher: FakeFetcher,
) -> Provisioner<FakeRunner, FakeFetcher> {
    Provisioner::with_components(config, runner, fetcher)
}

fn request(mode: RequestMode) -> InstallationRequest {
    InstallationRequest::new(mode)
}

#[tokio::test]
async fn test_idle_request_shows_menu_without_probing() {
    let dir = tempfile::tempdir().unwrap();
    let p = provisioner(test_config(dir.path()), FakeRunner::new(), FakeFetcher::new());

    let report = p.run_request(&InstallationRequest::idle()).await;

    assert_eq!(report.status, ReportStatus::Ready);
    assert!(report.messages.contains_text("auto"));
    assert!(report.messages.contains_text("fetch-artifact"));
    assert!(p.runner().calls().is_empty());
}

#[tokio::test]
async fn test_check_status_on_empty_root_suggests_tool_first() {
    let dir = tempfile::tempdir().unwrap();
    let p = provisioner(test_config(dir.path()), FakeRunner::new(), FakeFetcher::new());

    let report = p.run_request(&request(RequestMode::CheckStatus)).await;

    assert_eq!(report.status, ReportStatus::Checking);
    for line in [
        "Git: Not installed",
        "Python: Not installed",
        "Repository: Not cloned",
        "Virtual Environment: Not created",
        "AI Model: Not downloaded",
    ] {
        assert!(report.messages.contains_text(line), "missing {line:?}");
    }
    assert_eq!(report.next_steps, vec!["1. Install Git first"]);
    assert_eq!(report.progress, 0.0);
}

#[tokio::test]
async fn test_check_status_suggests_clone_when_toolchain_present() {
    let dir = tempfile::tempdir().unwrap();
    let p = provisioner(
        test_config(dir.path()),
        FakeRunner::new().with_toolchain(),
        FakeFetcher::new(),
    );

    let report = p.run_request(&request(RequestMode::CheckStatus)).await;

    assert!(report.messages.contains_text("Git: Installed"));
    assert!(report.messages.contains_text("Python 3.9.13"));
    assert_eq!(report.next_steps, vec!["3. Clone the repository"]);
}

#[tokio::test]
async fn test_check_status_reports_wrong_runtime_version_distinctly() {
    let dir = tempfile::tempdir().unwrap();
    let runner = FakeRunner::new()
        .with(Rule::version("git", "git version 2.43.0"))
        .with(Rule::version("python3.9", "Python 3.11.4"))
        .with(Rule::version("python3", "Python 3.11.4"));
    let p = provisioner(test_config(dir.path()), runner, FakeFetcher::new());

    let report = p.run_request(&request(RequestMode::CheckStatus)).await;

    assert!(report
        .messages
        .contains_text("Python: wrong version (found 3.11.4)"));
    assert!(!report.messages.contains_text("Python: Not installed"));
    assert!(report.messages.contains_text("System Python version detected"));
    assert_eq!(report.next_steps, vec!["2. Install Python next"]);
}

#[tokio::test]
async fn test_check_status_when_everything_is_present() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    populate_except_artifact(&config);
    std::fs::write(config.artifact_path(), b"weights").unwrap();
    let p = provisioner(config, FakeRunner::new().with_toolchain(), FakeFetcher::new());

    let report = p.run_request(&request(RequestMode::CheckStatus)).await;

    assert_eq!(report.next_steps, vec!["Everything is installed! Ready to use."]);
    assert!(!report.messages.contains_level(LogLevel::Failure));
}

#[tokio::test]
async fn test_fetch_artifact_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let artifact = config.artifact_path();
    let p = provisioner(config, FakeRunner::new(), FakeFetcher::new());

    let first = p.run_request(&request(RequestMode::FetchArtifact)).await;
    assert_eq!(first.status, ReportStatus::StepSucceeded(StepKind::FetchArtifact));
    assert!(first.messages.contains_text("Size: 2.0 MB"));
    assert!(artifact.is_file());
    assert_eq!(p.fetcher().count(), 1);

    let second = p.run_request(&request(RequestMode::FetchArtifact)).await;
    assert_eq!(second.status, ReportStatus::StepSucceeded(StepKind::FetchArtifact));
    assert!(second
        .messages
        .contains_text("Model already exists. Skipping download."));
    assert_eq!(p.fetcher().count(), 1);
}

#[tokio::test]
async fn test_fetch_artifact_failure_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let p = provisioner(test_config(dir.path()), FakeRunner::new(), FakeFetcher::failing());

    let report = p.run_request(&request(RequestMode::FetchArtifact)).await;

    assert_eq!(report.status, ReportStatus::StepFailed(StepKind::FetchArtifact));
    assert!(report.status.is_failure());
    assert!(report.messages.contains_level(LogLevel::Failure));
    assert_eq!(report.next_steps.len(), 1);
}

#[tokio::test]
async fn test_install_root_override() {
    let dir = tempfile::tempdir().unwrap();
    let other = dir.path().join("elsewhere");
    let p = provisioner(test_config(dir.path()), FakeRunner::new(), FakeFetcher::new());

    let report = p
        .run_request(&request(RequestMode::FetchArtifact).with_install_root(&other))
        .await;

    assert!(report.status == ReportStatus::StepSucceeded(StepKind::FetchArtifact));
    assert!(other.join("mask_rcnn_food_0019.h5").is_file());
    assert!(!p.config().artifact_path().exists());
}

#[tokio::test]
async fn test_full_auto_with_only_artifact_missing_fetches_only() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    populate_except_artifact(&config);
    let p = provisioner(config, FakeRunner::new().with_toolchain(), FakeFetcher::new());

    let seen = Mutex::new(Vec::new());
    let report = p
        .run_request_with_progress(&request(RequestMode::FullAuto), |progress| {
            seen.lock().unwrap().push(progress.fraction);
        })
        .await;

    assert_eq!(report.status, ReportStatus::Complete);
    assert_eq!(report.progress, 1.0);
    assert_eq!(p.fetcher().count(), 1);
    assert!(p.runner().actions().is_empty(), "{:?}", p.runner().actions());
    assert_eq!(
        *seen.lock().unwrap(),
        vec![0.1, 0.2, 0.4, 0.6, 0.8, 0.9, 1.0]
    );
    assert!(report.messages.contains_text("Git is already installed"));
    assert!(report.messages.contains_text("Repository already exists"));
    assert!(report.messages.contains_text("Environment already configured"));
    assert!(report.messages.contains_text("Run scripts generated"));
    assert_eq!(report.next_steps[0], "All components installed successfully!");
    assert!(report.next_steps[1].contains("StartSetup.sh"));
}

#[tokio::test]
async fn test_full_auto_runs_every_step_despite_failures() {
    let dir = tempfile::tempdir().unwrap();
    let p = provisioner(test_config(dir.path()), FakeRunner::new(), FakeFetcher::new());

    let seen = Mutex::new(Vec::new());
    let report = p
        .run_request_with_progress(&request(RequestMode::FullAuto), |progress| {
            seen.lock().unwrap().push(progress.fraction);
        })
        .await;

    assert_eq!(report.status, ReportStatus::Partial);
    assert!(report.status.is_failure());
    let seen = seen.lock().unwrap();
    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(seen.last(), Some(&1.0));

    // The last step still ran after the earlier ones failed.
    assert_eq!(p.fetcher().count(), 1);
    for label in [
        "Git Installation Failed",
        "Clone Failed",
        "Environment Setup Failed",
    ] {
        assert!(report.messages.contains_text(label), "missing {label:?}");
    }
    assert!(report.messages.contains_text("Some components may need manual installation."));
    assert!(report.next_steps.len() > 1);
}

#[tokio::test]
async fn test_install_tool_verifies_and_removes_installer() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.tool.installer.url = Some("https://example.invalid/git-setup.exe".to_string());
    config.tool.installer.file_name = "git-setup.exe".to_string();
    config.tool.installer.program = "{installer}".to_string();
    let installer = config.temp_dir.join("git-setup.exe");

    let runner = FakeRunner::new().with(
        Rule::new(&installer.to_string_lossy(), None, Reply::ok(""))
            .then(Rule::version("git", "git version 2.39.0")),
    );
    let p = provisioner(config, runner, FakeFetcher::new());

    let report = p.run_request(&request(RequestMode::InstallTool)).await;

    assert_eq!(report.status, ReportStatus::StepSucceeded(StepKind::InstallTool));
    assert!(report.messages.contains_text("Git installed successfully!"));
    assert_eq!(p.fetcher().count(), 1);
    assert!(!installer.exists());
}

#[tokio::test]
async fn test_install_tool_keeps_installer_when_verification_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.tool.installer.url = Some("https://example.invalid/git-setup.exe".to_string());
    config.tool.installer.file_name = "git-setup.exe".to_string();
    config.tool.installer.program = "{installer}".to_string();
    let installer = config.temp_dir.join("git-setup.exe");

    let runner = FakeRunner::new().with(Rule::new(
        &installer.to_string_lossy(),
        None,
        Reply::fail(1, ""),
    ));
    let p = provisioner(config, runner, FakeFetcher::new());

    let report = p.run_request(&request(RequestMode::InstallTool)).await;

    assert_eq!(report.status, ReportStatus::StepFailed(StepKind::InstallTool));
    assert!(installer.exists());
    assert!(report.messages.contains_text("for diagnosis"));
}

#[tokio::test]
async fn test_install_tool_timeout_fails() {
    let dir = tempfile::tempdir().unwrap();
    let runner =
        FakeRunner::new().with(Rule::new("fake-git-installer", None, Reply::TimedOut));
    let p = provisioner(test_config(dir.path()), runner, FakeFetcher::new());

    let report = p.run_request(&request(RequestMode::InstallTool)).await;

    assert_eq!(report.status, ReportStatus::StepFailed(StepKind::InstallTool));
    assert!(report.messages.contains_text("timed out after 5 minutes"));
}

#[tokio::test]
async fn test_install_runtime_accepts_alias_when_exact_location_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    // Present on disk but never answers.
    let exact = dir.path().join("python.exe");
    std::fs::write(&exact, b"").unwrap();
    config.runtime.location = Some(exact);

    let runner = FakeRunner::new().with(
        Rule::new("fake-python-installer", None, Reply::fail(1603, ""))
            .then(Rule::version("python3.9", "Python 3.9.13")),
    );
    let p = provisioner(config, runner, FakeFetcher::new());

    let report = p.run_request(&request(RequestMode::InstallRuntime)).await;

    assert_eq!(report.status, ReportStatus::StepSucceeded(StepKind::InstallRuntime));
    assert!(report.messages.contains_text("Python available via python3.9"));
}

#[tokio::test]
async fn test_install_runtime_continues_when_verification_unclear() {
    let dir = tempfile::tempdir().unwrap();
    let runner =
        FakeRunner::new().with(Rule::new("fake-python-installer", None, Reply::ok("")));
    let p = provisioner(test_config(dir.path()), runner, FakeFetcher::new());

    let report = p.run_request(&request(RequestMode::InstallRuntime)).await;

    assert_eq!(report.status, ReportStatus::StepSucceeded(StepKind::InstallRuntime));
    assert!(report
        .messages
        .contains_text("may have completed but verification unclear"));
    assert!(report.messages.contains_level(LogLevel::Warning));
}

#[tokio::test]
async fn test_install_runtime_keeps_installer_when_verification_unclear() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.runtime.installer.url = Some("https://example.invalid/python-setup.exe".to_string());
    config.runtime.installer.file_name = "python-setup.exe".to_string();
    config.runtime.installer.program = "{installer}".to_string();
    let installer = config.temp_dir.join("python-setup.exe");

    let runner =
        FakeRunner::new().with(Rule::new(&installer.to_string_lossy(), None, Reply::ok("")));
    let p = provisioner(config, runner, FakeFetcher::new());

    let report = p.run_request(&request(RequestMode::InstallRuntime)).await;

    assert_eq!(report.status, ReportStatus::StepSucceeded(StepKind::InstallRuntime));
    assert!(installer.exists());
    assert!(report.messages.contains_text("for diagnosis"));
}

#[tokio::test]
async fn test_install_runtime_removes_installer_once_verified() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.runtime.installer.url = Some("https://example.invalid/python-setup.exe".to_string());
    config.runtime.installer.file_name = "python-setup.exe".to_string();
    config.runtime.installer.program = "{installer}".to_string();
    let installer = config.temp_dir.join("python-setup.exe");

    let runner = FakeRunner::new().with(
        Rule::new(&installer.to_string_lossy(), None, Reply::ok(""))
            .then(Rule::version("python3.9", "Python 3.9.13")),
    );
    let p = provisioner(config, runner, FakeFetcher::new());

    let report = p.run_request(&request(RequestMode::InstallRuntime)).await;

    assert_eq!(report.status, ReportStatus::StepSucceeded(StepKind::InstallRuntime));
    assert!(!installer.exists());
}

#[tokio::test]
async fn test_clone_accepts_marker_despite_non_zero_exit() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let marker = config.checkout_marker_path();
    let runner = FakeRunner::new()
        .with(Rule::version("git", "git version 2.39.0"))
        .with(Rule::new("git", Some("clone"), Reply::fail(1, "warning: redirecting")).creating(&marker));
    let p = provisioner(config, runner, FakeFetcher::new());

    let report = p.run_request(&request(RequestMode::CloneRepository)).await;

    assert_eq!(report.status, ReportStatus::StepSucceeded(StepKind::CloneRepository));
    assert!(report.messages.contains_level(LogLevel::Warning));

    // Second run observes the marker and does nothing.
    let before = p.runner().actions().len();
    let again = p.run_request(&request(RequestMode::CloneRepository)).await;
    assert!(again.messages.contains_text("Repository already exists"));
    assert_eq!(p.runner().actions().len(), before);
}

#[tokio::test]
async fn test_clone_failure_names_missing_marker() {
    let dir = tempfile::tempdir().unwrap();
    let runner = FakeRunner::new()
        .with(Rule::version("git", "git version 2.39.0"))
        .with(Rule::new(
            "git",
            Some("clone"),
            Reply::fail(128, "fatal: unable to access repository"),
        ));
    let p = provisioner(test_config(dir.path()), runner, FakeFetcher::new());

    let report = p.run_request(&request(RequestMode::CloneRepository)).await;

    assert_eq!(report.status, ReportStatus::StepFailed(StepKind::CloneRepository));
    assert!(report.messages.contains_text(".git to exist"));
    assert!(report.messages.contains_text("unable to access repository"));
    assert!(!report.next_steps.is_empty());
}

#[tokio::test]
async fn test_build_environment_timeout_is_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    std::fs::create_dir_all(config.environment_path()).unwrap();
    let runner = FakeRunner::new().with(Rule::new("sh", Some("setup_env"), Reply::TimedOut));
    let p = provisioner(config.clone(), runner, FakeFetcher::new());

    let report = p.run_request(&request(RequestMode::BuildEnvironment)).await;

    assert_eq!(report.status, ReportStatus::StepSucceeded(StepKind::BuildEnvironment));
    assert!(report
        .messages
        .contains_text("Setup process timed out after 15 minutes."));
    assert!(report.messages.contains_text("may be partially configured"));
    assert!(config.launcher_script_path().is_file());
    assert!(config.images_path().is_dir());
}

#[tokio::test]
async fn test_build_environment_non_zero_exit_is_soft() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let env = config.environment_path();
    let runner = FakeRunner::new()
        // First candidate is absent; the second creates the environment.
        .with(Rule::new("python3", Some("venv"), Reply::ok("")).creating(&env))
        .with(Rule::new(
            "sh",
            Some("setup_env"),
            Reply::fail(1, "ERROR: No matching distribution found for detectron2"),
        ));
    let p = provisioner(config, runner, FakeFetcher::new());

    let report = p.run_request(&request(RequestMode::BuildEnvironment)).await;

    assert_eq!(report.status, ReportStatus::StepSucceeded(StepKind::BuildEnvironment));
    assert!(report.messages.contains_text("Virtual environment created with python3"));
    assert!(report.messages.contains_text("No matching distribution"));
    assert!(report.messages.contains_level(LogLevel::Warning));
    assert!(!report.messages.contains_level(LogLevel::Failure));
    assert!(env.is_dir());
}

#[tokio::test]
async fn test_build_environment_fails_fast_without_runtime() {
    let dir = tempfile::tempdir().unwrap();
    let p = provisioner(test_config(dir.path()), FakeRunner::new(), FakeFetcher::new());

    let report = p.run_request(&request(RequestMode::BuildEnvironment)).await;

    assert_eq!(report.status, ReportStatus::StepFailed(StepKind::BuildEnvironment));
    assert_eq!(
        report.next_steps,
        vec!["Please ensure Python 3.9 is properly installed"]
    );
    assert!(p.runner().actions().iter().all(|c| c.program != "sh"));
}

#[tokio::test]
async fn test_explicit_build_environment_reruns_dependencies() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    populate_except_artifact(&config);
    let runner = FakeRunner::new().with(Rule::new("sh", Some("setup_env"), Reply::ok("done")));
    let p = provisioner(config, runner, FakeFetcher::new());

    let report = p.run_request(&request(RequestMode::BuildEnvironment)).await;

    assert_eq!(report.status, ReportStatus::StepSucceeded(StepKind::BuildEnvironment));
    assert!(report.messages.contains_text("Virtual environment already exists"));
    assert_eq!(p.runner().actions().len(), 1);
}

#[tokio::test]
async fn test_report_serializes_to_json() {
    let dir = tempfile::tempdir().unwrap();
    let p = provisioner(test_config(dir.path()), FakeRunner::new(), FakeFetcher::new());

    let report = p.run_request(&request(RequestMode::CheckStatus)).await;
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["status"], "Status Checked");
    assert_eq!(json["progress"], 0.0);
    assert_eq!(json["next_steps"][0], "1. Install Git first");
    let messages = json["messages"].as_array().unwrap();
    assert!(messages
        .iter()
        .any(|m| m["level"] == "failure" && m["text"] == "Git: Not installed"));
}
