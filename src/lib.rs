//! # env-provisioner
//!
//! Idempotent provisioning of a local machine for the architectural elements
//! detection toolchain: Git, a pinned Python, the source checkout, a virtual
//! environment with its dependencies, the model weights and the run scripts.
//!
//! This crate provides the probes that read the machine's state, the steps
//! that change it, and the orchestrator that turns a request into a report.
//!
//! ## Features
//!
//! - `EnvironmentProbe` for layered, version-gated detection of each dependency
//! - `StepExecutor` for the five idempotent provisioning steps
//! - `Provisioner` for status checks, single steps and full automatic runs
//! - `CommandRunner` and `Fetcher` seams for substituting process and
//!   download implementations
//!
//! ## Example
//!
//! ```rust,no_run
//! use env_provisioner::{InstallationRequest, Provisioner, ProvisionConfig, RequestMode};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let provisioner = Provisioner::new(ProvisionConfig::default());
//!
//!     // What is missing?
//!     let status = provisioner
//!         .run_request(&InstallationRequest::new(RequestMode::CheckStatus))
//!         .await;
//!     println!("{status}");
//!
//!     // Install everything, printing each checkpoint.
//!     let report = provisioner
//!         .run_request_with_progress(&InstallationRequest::new(RequestMode::FullAuto), |p| {
//!             println!("{:>3.0}% {}", p.fraction * 100.0, p.phase.description());
//!         })
//!         .await;
//!     println!("{}", report.status);
//! }
//! ```

mod config;
mod dependency_kind;
mod dependency_status;
mod detect;
mod detection;
mod fetch;
mod install;
mod orchestrator;
mod runner;
mod scripts;

pub use config::{
    ArtifactSpec, BinarySpec, ConfigError, InstallerSpec, Layout, ProvisionConfig, ScriptFlavor,
    StructuredCommand, Timeouts, PINNED_RUNTIME_VERSION,
};
pub use dependency_kind::DependencyKind;
pub use dependency_status::{InstalledMetadata, ProbeError, ProbeSource, ProbeStatus};
pub use detect::{EnvironmentProbe, EnvironmentState};
pub use fetch::{FetchError, Fetcher, HttpFetcher};
pub use install::{
    DependencyRefresh, LogEntry, LogLevel, MessageLog, Phase, ProvisionProgress, StepError,
    StepExecutor, StepKind, StepOutcome, StepResult, StepState,
};
pub use orchestrator::{
    InstallationRequest, ProgressReport, Provisioner, ReportStatus, RequestMode,
};
pub use runner::{CommandOutput, CommandRunner, ProcessRunner, RunError};
pub use scripts::{materialize as materialize_scripts, render as render_scripts, RenderedScripts};
