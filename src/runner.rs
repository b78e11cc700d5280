//! External command execution with timeout.
//!
//! [`CommandRunner`] is the seam every probe and step goes through.
//! [`ProcessRunner`] is the production implementation on top of
//! `tokio::process`.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::time::timeout;

/// Captured result of a finished (or killed) child process.
///
/// A non-zero exit is a normal result, not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when the process was killed or ended by a signal.
    pub exit_code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// True when the timeout elapsed and the child was terminated.
    pub timed_out: bool,
}

impl CommandOutput {
    /// Exited on its own with code 0.
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Stdout if it has content, else stderr; some tools print versions
    /// to stderr.
    pub fn text(&self) -> &str {
        if self.stdout.trim().is_empty() {
            &self.stderr
        } else {
            &self.stdout
        }
    }

    /// Result for a child that was terminated on timeout.
    pub fn timed_out() -> Self {
        Self {
            timed_out: true,
            ..Self::default()
        }
    }
}

/// The command could not be started at all.
#[derive(Debug, Error)]
pub enum RunError {
    /// No such program.
    #[error("Command not found: {program}")]
    NotFound { program: String },

    /// The OS refused to execute the program.
    #[error("Permission denied running {program}")]
    PermissionDenied { program: String },

    /// Any other spawn failure.
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl RunError {
    /// Get an actionable suggestion for fixing this error.
    pub fn fix_suggestion(&self) -> String {
        match self {
            Self::NotFound { program } => {
                format!("Make sure {program} is installed and on PATH")
            }
            Self::PermissionDenied { program } => {
                format!("Check that {program} is executable by the current user")
            }
            Self::Spawn { .. } => "Check the command and try again".to_string(),
        }
    }
}

/// Runs an external command, capturing its output, within a timeout.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` in `working_dir`.
    ///
    /// Returns `Err` only when the program cannot be located or spawned.
    /// On timeout the child is terminated and `timed_out` is set.
    async fn run(
        &self,
        program: &str,
        args: &[String],
        working_dir: Option<&Path>,
        limit: Duration,
    ) -> Result<CommandOutput, RunError>;
}

/// [`CommandRunner`] backed by real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    /// Create a process runner.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        working_dir: Option<&Path>,
        limit: Duration,
    ) -> Result<CommandOutput, RunError> {
        let resolved = resolve_program(program, working_dir)?;

        let mut command = Command::new(&resolved);
        command
            .args(args)
            .kill_on_drop(true)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = working_dir {
            command.current_dir(dir);
        }
        // Own process group, so a timeout can take down everything the
        // child started, not just the child.
        #[cfg(unix)]
        command.process_group(0);

        tracing::debug!(program, ?args, ?working_dir, ?limit, "spawning");

        let mut child = command
            .spawn()
            .map_err(|e| classify_spawn_error(program, e))?;
        // Taken now: the id is gone once the child has been waited on, but
        // its process group can outlive it.
        let pid = child.id();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let finished = timeout(
            limit,
            async { tokio::join!(child.wait(), read_pipe(stdout), read_pipe(stderr)) },
        )
        .await;

        match finished {
            Ok((Ok(status), stdout, stderr)) => Ok(CommandOutput {
                exit_code: status.code(),
                stdout,
                stderr,
                timed_out: false,
            }),
            Ok((Err(e), _, _)) => Err(RunError::Spawn {
                program: program.to_string(),
                source: e,
            }),
            Err(_) => {
                tracing::warn!(program, ?limit, "timed out, terminating process tree");
                terminate_tree(&mut child, pid).await;
                Ok(CommandOutput::timed_out())
            }
        }
    }
}

async fn read_pipe<P: AsyncRead + Unpin>(pipe: Option<P>) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            tracing::debug!(error = %e, "reading child output failed");
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Kill the child and every process it spawned, then reap the child.
async fn terminate_tree(child: &mut Child, pid: Option<u32>) {
    if let Some(pid) = pid {
        let mut kill = tree_kill_command(pid);
        kill.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        match kill.status().await {
            Ok(status) if status.success() => {}
            Ok(status) => tracing::debug!(pid, ?status, "tree kill reported failure"),
            Err(e) => tracing::debug!(pid, error = %e, "tree kill unavailable"),
        }
    }
    if let Err(e) = child.start_kill() {
        tracing::debug!(error = %e, "child already gone");
    }
    let _ = timeout(REAP_GRACE, child.wait()).await;
}

const REAP_GRACE: Duration = Duration::from_secs(5);

/// `kill` addressed at the child's process group.
#[cfg(unix)]
fn tree_kill_command(pid: u32) -> Command {
    let mut command = Command::new("kill");
    command.arg("-KILL").arg("--").arg(format!("-{pid}"));
    command
}

/// `taskkill` over the child's process tree.
#[cfg(windows)]
fn tree_kill_command(pid: u32) -> Command {
    let mut command = Command::new("taskkill");
    command.args(["/T", "/F", "/PID"]).arg(pid.to_string());
    command
}

/// Resolve a bare program name through PATH so a missing command is a
/// distinct error. Paths are used as given.
fn resolve_program(program: &str, working_dir: Option<&Path>) -> Result<PathBuf, RunError> {
    let as_path = Path::new(program);
    if as_path.components().count() > 1 || as_path.is_absolute() {
        let full = match working_dir {
            Some(dir) if as_path.is_relative() => dir.join(as_path),
            _ => as_path.to_path_buf(),
        };
        if !full.exists() {
            return Err(RunError::NotFound {
                program: program.to_string(),
            });
        }
        return Ok(full);
    }

    which::which(program).map_err(|_| RunError::NotFound {
        program: program.to_string(),
    })
}

fn classify_spawn_error(program: &str, e: std::io::Error) -> RunError {
    match e.kind() {
        std::io::ErrorKind::NotFound => RunError::NotFound {
            program: program.to_string(),
        },
        std::io::ErrorKind::PermissionDenied => RunError::PermissionDenied {
            program: program.to_string(),
        },
        _ => RunError::Spawn {
            program: program.to_string(),
            source: e,
        },
    }
}
