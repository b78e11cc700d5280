//! Step identities, the message log, and step results.

use serde::{Deserialize, Serialize};
use std::fmt;
use strum::IntoEnumIterator;

/// One idempotent provisioning action.
///
/// Declared in dependency order; [`StepKind::all`] is the order FullAuto runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::EnumIter)]
pub enum StepKind {
    /// Install the version-control client.
    InstallTool,
    /// Install the pinned runtime.
    InstallRuntime,
    /// Clone the source tree.
    CloneRepository,
    /// Create the isolated environment and install dependencies.
    BuildEnvironment,
    /// Download the binary artifact.
    FetchArtifact,
}

impl StepKind {
    /// All steps in dependency order.
    pub fn all() -> impl Iterator<Item = Self> {
        <Self as IntoEnumIterator>::iter()
    }

    /// Line logged when the step starts.
    pub fn banner(&self) -> &'static str {
        match self {
            Self::InstallTool => "📦 Installing Git...",
            Self::InstallRuntime => "🐍 Installing Python...",
            Self::CloneRepository => "📥 Cloning repository...",
            Self::BuildEnvironment => "🔧 Setting up environment...",
            Self::FetchArtifact => "🤖 Downloading AI model...",
        }
    }

    /// Status label when the step succeeded.
    pub fn success_label(&self) -> &'static str {
        match self {
            Self::InstallTool => "Git Installed",
            Self::InstallRuntime => "Python Installed",
            Self::CloneRepository => "Repository Cloned",
            Self::BuildEnvironment => "Environment Setup",
            Self::FetchArtifact => "Model Downloaded",
        }
    }

    /// Status label when the step failed.
    pub fn failure_label(&self) -> &'static str {
        match self {
            Self::InstallTool => "Git Installation Failed",
            Self::InstallRuntime => "Python Installation Failed",
            Self::CloneRepository => "Clone Failed",
            Self::BuildEnvironment => "Environment Setup Failed",
            Self::FetchArtifact => "Model Download Failed",
        }
    }
}

/// Severity of a log line. Determines its marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Narrative text.
    Plain,
    /// Section title.
    Heading,
    /// Something finished or is present.
    Success,
    /// Soft failure or notable condition.
    Warning,
    /// Hard failure.
    Failure,
}

impl LogLevel {
    /// Marker prefixed when rendering.
    pub fn marker(&self) -> Option<&'static str> {
        match self {
            Self::Plain | Self::Heading => None,
            Self::Success => Some("✅"),
            Self::Warning => Some("⚠️"),
            Self::Failure => Some("❌"),
        }
    }
}

/// A single `{level, text}` log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Severity.
    pub level: LogLevel,
    /// Text without marker.
    pub text: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.level.marker() {
            Some(marker) => write!(f, "{} {}", marker, self.text),
            None => f.write_str(&self.text),
        }
    }
}

/// Append-only ordered log owned by the call that produced it.
///
/// # Example
///
/// ```rust
/// use env_provisioner::{LogLevel, MessageLog};
///
/// let mut log = MessageLog::new();
/// log.success("Git installed successfully!");
/// log.warning("Verification unclear");
/// assert_eq!(log.lines()[0], "✅ Git installed successfully!");
/// assert!(log.contains_level(LogLevel::Warning));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageLog {
    entries: Vec<LogEntry>,
}

impl MessageLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a line.
    pub fn push(&mut self, level: LogLevel, text: impl Into<String>) {
        self.entries.push(LogEntry {
            level,
            text: text.into(),
        });
    }

    /// Append a plain line.
    pub fn plain(&mut self, text: impl Into<String>) {
        self.push(LogLevel::Plain, text);
    }

    /// Append a heading.
    pub fn heading(&mut self, text: impl Into<String>) {
        self.push(LogLevel::Heading, text);
    }

    /// Append a success line.
    pub fn success(&mut self, text: impl Into<String>) {
        self.push(LogLevel::Success, text);
    }

    /// Append a warning line.
    pub fn warning(&mut self, text: impl Into<String>) {
        self.push(LogLevel::Warning, text);
    }

    /// Append a failure line.
    pub fn failure(&mut self, text: impl Into<String>) {
        self.push(LogLevel::Failure, text);
    }

    /// Append an empty line.
    pub fn blank(&mut self) {
        self.plain("");
    }

    /// Move every entry of `other` to the end of this log.
    pub fn append(&mut self, other: MessageLog) {
        self.entries.extend(other.entries);
    }

    /// Entries in order.
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Rendered lines in order.
    pub fn lines(&self) -> Vec<String> {
        self.entries.iter().map(ToString::to_string).collect()
    }

    /// Whether any entry has `level`.
    pub fn contains_level(&self, level: LogLevel) -> bool {
        self.entries.iter().any(|e| e.level == level)
    }

    /// Whether any entry's text contains `needle`.
    pub fn contains_text(&self, needle: &str) -> bool {
        self.entries.iter().any(|e| e.text.contains(needle))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing was logged.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// How a step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepOutcome {
    /// The target was already in place; nothing was done.
    AlreadySatisfied,
    /// Work was performed and verified.
    Completed,
    /// Work was performed; the result is accepted with a warning.
    CompletedWithWarning,
    /// The step failed.
    Failed,
}

/// Result of one step, or of an aggregate run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepResult {
    /// Which step produced it.
    pub step: StepKind,
    /// False only when `outcome` is `Failed`.
    pub success: bool,
    /// Finer-grained outcome.
    pub outcome: StepOutcome,
    /// Lines logged by the step.
    pub messages: MessageLog,
    /// What the user should do next, if anything.
    pub next_step_hint: Option<String>,
}

impl StepResult {
    /// Build a result; `success` follows from `outcome`.
    pub fn new(
        step: StepKind,
        outcome: StepOutcome,
        messages: MessageLog,
        next_step_hint: Option<String>,
    ) -> Self {
        Self {
            step,
            success: outcome != StepOutcome::Failed,
            outcome,
            messages,
            next_step_hint,
        }
    }

    /// True when the step did nothing because its target was in place.
    pub fn was_skipped(&self) -> bool {
        self.outcome == StepOutcome::AlreadySatisfied
    }
}
