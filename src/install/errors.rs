//! Error types for provisioning steps.
//!
//! Step errors never leave the orchestrator. Each one becomes a failure line
//! in the step's log, and its fix suggestion becomes the step's next-step hint.

use crate::fetch::FetchError;
use crate::runner::RunError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that end a step in the `Failed` state.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StepError {
    /// The command could not be located or started.
    #[error(transparent)]
    Spawn(#[from] RunError),

    /// An installer or artifact download failed.
    #[error("Download failed: {0}")]
    Fetch(#[from] FetchError),

    /// The process ran but the expected post-condition is absent.
    #[error("{what} verification failed: expected {expected}")]
    Verification {
        /// What was being verified.
        what: String,
        /// The missing post-condition.
        expected: String,
        /// Diagnostic output from the process, if any.
        detail: Option<String>,
        /// Actionable suggestion for resolving the issue.
        fix: String,
    },

    /// The process exceeded its bounded duration and was terminated.
    #[error("{what} timed out after {} and may be partially configured", format_duration(.duration))]
    Timeout {
        /// What was running.
        what: String,
        /// How long it was allowed to run.
        duration: Duration,
    },

    /// A file under the install root could not be written.
    #[error("Failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StepError {
    /// Get an actionable suggestion for fixing this error.
    ///
    /// # Example
    ///
    /// ```rust
    /// use env_provisioner::StepError;
    /// use std::time::Duration;
    ///
    /// let error = StepError::Timeout {
    ///     what: "Git installer".to_string(),
    ///     duration: Duration::from_secs(300),
    /// };
    /// assert!(error.fix_suggestion().contains("Re-run"));
    /// ```
    pub fn fix_suggestion(&self) -> String {
        match self {
            Self::Spawn(e) => e.fix_suggestion(),
            Self::Fetch(e) => e.fix_suggestion().to_string(),
            Self::Verification { fix, .. } => fix.clone(),
            Self::Timeout { .. } => {
                "Re-run this step; it picks up where the previous attempt left off".to_string()
            }
            Self::Io { .. } => "Check write permissions on the install directory".to_string(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// "15 minutes", "30 seconds", "1 minute".
pub(crate) fn format_duration(duration: &Duration) -> String {
    let secs = duration.as_secs();
    let (amount, unit) = if secs >= 60 && secs % 60 == 0 {
        (secs / 60, "minute")
    } else if secs > 0 {
        (secs, "second")
    } else {
        return format!("{} ms", duration.as_millis());
    };
    if amount == 1 {
        format!("1 {unit}")
    } else {
        format!("{amount} {unit}s")
    }
}
