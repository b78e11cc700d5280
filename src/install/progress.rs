//! Step states and FullAuto progress checkpoints.

use serde::Serialize;

/// States every step moves through.
///
/// `Unknown -> Probing -> {Satisfied | NeedsAction} -> Acting -> Verifying -> {Satisfied | Failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StepState {
    /// Nothing checked yet.
    Unknown,
    /// Inspecting current state.
    Probing,
    /// Target in place.
    Satisfied,
    /// Target missing; work required.
    NeedsAction,
    /// Running the installer or command.
    Acting,
    /// Re-probing after acting.
    Verifying,
    /// Ended without reaching the target.
    Failed,
}

impl StepState {
    /// Whether the state machine stops here.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Satisfied | Self::Failed)
    }
}

/// Phases of a FullAuto run, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    /// Probing every dependency.
    CheckingStatus,
    /// install-tool.
    InstallingTool,
    /// install-runtime.
    InstallingRuntime,
    /// clone-repository.
    CloningRepository,
    /// build-environment.
    BuildingEnvironment,
    /// fetch-artifact.
    FetchingArtifact,
    /// All phases ran.
    Finished,
}

impl Phase {
    /// Fixed progress fraction reported when the phase begins.
    ///
    /// ```rust
    /// use env_provisioner::Phase;
    ///
    /// assert_eq!(Phase::CheckingStatus.fraction(), 0.1);
    /// assert_eq!(Phase::Finished.fraction(), 1.0);
    /// ```
    pub fn fraction(&self) -> f64 {
        match self {
            Self::CheckingStatus => 0.1,
            Self::InstallingTool => 0.2,
            Self::InstallingRuntime => 0.4,
            Self::CloningRepository => 0.6,
            Self::BuildingEnvironment => 0.8,
            Self::FetchingArtifact => 0.9,
            Self::Finished => 1.0,
        }
    }

    /// Human-readable description of the phase.
    pub fn description(&self) -> &'static str {
        match self {
            Self::CheckingStatus => "Checking installation status",
            Self::InstallingTool => "Installing Git",
            Self::InstallingRuntime => "Installing Python",
            Self::CloningRepository => "Cloning repository",
            Self::BuildingEnvironment => "Setting up environment",
            Self::FetchingArtifact => "Downloading AI model",
            Self::Finished => "Installation process completed",
        }
    }
}

/// A progress update delivered to the FullAuto callback.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProvisionProgress {
    /// The phase that is starting.
    pub phase: Phase,
    /// Its checkpoint fraction, 0.0 to 1.0.
    pub fraction: f64,
}

impl ProvisionProgress {
    /// Progress at the start of `phase`.
    pub fn at(phase: Phase) -> Self {
        Self {
            phase,
            fraction: phase.fraction(),
        }
    }

    /// Whether this update marks the end of the run.
    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Finished
    }
}
