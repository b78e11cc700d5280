//! Version output parsing with regex extraction.

use crate::ProbeError;
use regex::Regex;
use semver::Version;
use std::sync::OnceLock;

fn version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // major.minor with optional patch; a missing patch reads as 0
    RE.get_or_init(|| Regex::new(r"(\d+)\.(\d+)(?:\.(\d+))?").expect("Invalid regex pattern"))
}

/// Parse a version from CLI output.
///
/// Handles the formats the provisioned tools print:
///
/// - `git version 2.39.0.windows.1` -> 2.39.0
/// - `Python 3.9.13` -> 3.9.13
/// - `Python 3.10` -> 3.10.0
pub(crate) fn parse_version(output: &str) -> Result<Version, ProbeError> {
    let caps = version_regex()
        .captures(output)
        .ok_or(ProbeError::VersionParseFailed)?;

    let part = |index: usize| -> Result<u64, ProbeError> {
        caps.get(index)
            .map_or(Ok(0), |m| m.as_str().parse())
            .map_err(|_| ProbeError::VersionParseFailed)
    };

    Ok(Version::new(part(1)?, part(2)?, part(3)?))
}

/// Whether `version` has the expected `major.minor` (e.g. `"3.9"`).
///
/// `3.9.13` matches `3.9`; `3.90.1` and `3.10.0` do not.
pub(crate) fn matches_major_minor(version: &Version, expected: &str) -> bool {
    let mut parts = expected.split('.');
    let major = parts.next().and_then(|p| p.parse::<u64>().ok());
    let minor = parts.next().and_then(|p| p.parse::<u64>().ok());
    match (major, minor) {
        (Some(major), Some(minor)) => version.major == major && version.minor == minor,
        (Some(major), None) => version.major == major,
        _ => false,
    }
}
