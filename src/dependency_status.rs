//! Probe result types for binary dependencies.

use semver::Version;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Where a binary dependency was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProbeSource {
    /// The configured exact install location.
    ExactLocation,
    /// A generic command-line alias resolved through PATH.
    Alias,
}

/// Metadata for a binary dependency that satisfied its probe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstalledMetadata {
    /// The executable or alias program that answered the probe.
    pub path: PathBuf,

    /// Parsed version.
    pub version: Version,

    /// First line of the version output, as the tool printed it.
    pub raw_version: String,

    /// Which detection layer produced the result.
    pub source: ProbeSource,
}

/// Typed error variants for probe failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[non_exhaustive]
pub enum ProbeError {
    /// The version query did not finish in time.
    Timeout,

    /// Permission denied running the executable.
    PermissionDenied,

    /// The version output did not contain a version.
    VersionParseFailed,

    /// The version query could not be spawned or exited non-zero.
    IoError,
}

impl ProbeError {
    /// Human-readable description of the error.
    ///
    /// ```rust
    /// use env_provisioner::ProbeError;
    ///
    /// assert_eq!(ProbeError::Timeout.description(), "Version query timed out");
    /// ```
    pub fn description(&self) -> &'static str {
        match self {
            Self::Timeout => "Version query timed out",
            Self::PermissionDenied => "Permission denied",
            Self::VersionParseFailed => "Failed to parse version",
            Self::IoError => "Version query failed",
        }
    }
}

/// Result of probing a binary dependency (tool or runtime).
///
/// A present-but-wrong-version installation is `VersionMismatch`: it does not
/// satisfy gating, but is reported distinctly from `NotInstalled`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[non_exhaustive]
pub enum ProbeStatus {
    /// Present with an acceptable version.
    Installed(InstalledMetadata),

    /// Definitively not found by any detection layer.
    NotInstalled,

    /// Found, but the reported major.minor is not the expected one.
    VersionMismatch {
        /// The version that was found.
        found: Version,
        /// The expected major.minor, e.g. `3.9`.
        expected: String,
        /// Where it was found.
        path: PathBuf,
    },

    /// The probe ran into an error it could not classify.
    Unknown {
        /// Typed error variant.
        error: ProbeError,
        /// Message for display.
        message: String,
    },
}

impl ProbeStatus {
    /// True only for `Installed`; this is the gating predicate.
    ///
    /// ```rust
    /// use env_provisioner::ProbeStatus;
    ///
    /// assert!(!ProbeStatus::NotInstalled.is_satisfied());
    /// ```
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Self::Installed(_))
    }

    /// True when a binary exists, whatever its version.
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Installed(_) | Self::VersionMismatch { .. })
    }

    /// Path of the binary if one was found.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Installed(meta) => Some(&meta.path),
            Self::VersionMismatch { path, .. } => Some(path),
            _ => None,
        }
    }

    /// The version string to show in reports.
    pub fn version(&self) -> Option<String> {
        match self {
            Self::Installed(meta) => Some(meta.raw_version.clone()),
            Self::VersionMismatch { found, .. } => Some(found.to_string()),
            _ => None,
        }
    }
}
