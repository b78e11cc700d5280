//! Version query through the command runner.

use crate::runner::{CommandRunner, RunError};
use crate::ProbeError;
use std::time::Duration;

/// Run `program args... --version` and return its output.
///
/// Stdout is preferred, stderr is the fallback.
///
/// # Errors
///
/// - `Timeout` if the command outlives `limit`
/// - `PermissionDenied` if the program cannot be executed
/// - `IoError` if it cannot be found, spawned, or exits non-zero
pub(crate) async fn query_version<R: CommandRunner + ?Sized>(
    runner: &R,
    program: &str,
    args: &[String],
    limit: Duration,
) -> Result<String, ProbeError> {
    let mut full_args = args.to_vec();
    full_args.push("--version".to_string());

    let output = runner
        .run(program, &full_args, None, limit)
        .await
        .map_err(|e| match e {
            RunError::PermissionDenied { .. } => ProbeError::PermissionDenied,
            RunError::NotFound { .. } | RunError::Spawn { .. } => ProbeError::IoError,
        })?;

    if output.timed_out {
        return Err(ProbeError::Timeout);
    }
    if !output.success() {
        return Err(ProbeError::IoError);
    }

    Ok(output.text().trim().to_string())
}
