//! Environment probing.
//!
//! Every fact is derived by direct inspection on each call: filesystem
//! existence for markers under the install root, and a `--version` query for
//! binaries. Nothing is cached.

use crate::config::{BinarySpec, ProvisionConfig, StructuredCommand};
use crate::detection::{matches_major_minor, parse_version, query_version};
use crate::runner::CommandRunner;
use crate::{DependencyKind, InstalledMetadata, ProbeError, ProbeSource, ProbeStatus};
use serde::Serialize;
use std::path::Path;

/// Snapshot of what is provisioned, rebuilt on every call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvironmentState {
    /// The version-control client.
    pub tool: ProbeStatus,
    /// The pinned runtime.
    pub runtime: ProbeStatus,
    /// Checkout marker exists.
    pub checkout: bool,
    /// Isolated environment directory exists.
    pub environment: bool,
    /// Artifact file exists.
    pub artifact: bool,
    /// All generated scripts exist.
    pub scripts: bool,
}

impl EnvironmentState {
    /// Whether `kind` is satisfied for gating purposes.
    pub fn is_satisfied(&self, kind: DependencyKind) -> bool {
        match kind {
            DependencyKind::Tool => self.tool.is_satisfied(),
            DependencyKind::Runtime => self.runtime.is_satisfied(),
            DependencyKind::Checkout => self.checkout,
            DependencyKind::Environment => self.environment,
            DependencyKind::Artifact => self.artifact,
            DependencyKind::Scripts => self.scripts,
        }
    }

    /// Unsatisfied dependencies in priority order.
    pub fn missing(&self) -> Vec<DependencyKind> {
        DependencyKind::all()
            .filter(|kind| !self.is_satisfied(*kind))
            .collect()
    }

    /// The highest-priority unsatisfied dependency.
    ///
    /// Priority: tool > runtime > checkout > environment > artifact > scripts.
    pub fn most_urgent_missing(&self) -> Option<DependencyKind> {
        DependencyKind::all().find(|kind| !self.is_satisfied(*kind))
    }
}

/// Answers "is X installed, and at what version" for each dependency.
pub struct EnvironmentProbe<'a, R: ?Sized> {
    config: &'a ProvisionConfig,
    runner: &'a R,
}

impl<'a, R: CommandRunner + ?Sized> EnvironmentProbe<'a, R> {
    /// Create a probe over `config` using `runner` for version queries.
    pub fn new(config: &'a ProvisionConfig, runner: &'a R) -> Self {
        Self { config, runner }
    }

    /// Probe every dependency.
    pub async fn snapshot(&self) -> EnvironmentState {
        EnvironmentState {
            tool: self.tool().await,
            runtime: self.runtime().await,
            checkout: self.checkout_present(),
            environment: self.environment_present(),
            artifact: self.artifact_present(),
            scripts: self.scripts_present(),
        }
    }

    /// Layered probe of the version-control client.
    pub async fn tool(&self) -> ProbeStatus {
        self.probe_binary(&self.config.tool).await
    }

    /// Layered probe of the pinned runtime.
    pub async fn runtime(&self) -> ProbeStatus {
        self.probe_binary(&self.config.runtime).await
    }

    /// Exact-location probe of the runtime only.
    pub async fn runtime_exact(&self) -> ProbeStatus {
        self.probe_exact(&self.config.runtime).await
    }

    /// Alias-only probe of the runtime: "any acceptable version installed".
    pub async fn runtime_any_alias(&self) -> ProbeStatus {
        self.probe_aliases(&self.config.runtime).await
    }

    /// Version reported by the most generic runtime alias, whatever it is.
    pub async fn system_runtime_version(&self) -> Option<String> {
        let alias = self.config.runtime.aliases.last()?;
        query_version(self.runner, &alias.program, &alias.args, self.config.timeouts.probe)
            .await
            .ok()
            .and_then(|output| output.lines().next().map(str::to_string))
    }

    /// Checkout marker under the install root exists.
    pub fn checkout_present(&self) -> bool {
        self.config.checkout_marker_path().is_dir()
    }

    /// Isolated environment under the install root exists.
    pub fn environment_present(&self) -> bool {
        self.config.environment_path().is_dir()
    }

    /// Artifact file under the install root exists.
    pub fn artifact_present(&self) -> bool {
        self.config.artifact_path().is_file()
    }

    /// All generated scripts exist.
    pub fn scripts_present(&self) -> bool {
        [
            self.config.setup_script_path(),
            self.config.launcher_script_path(),
            self.config.entry_program_path(),
        ]
        .iter()
        .all(|path| path.is_file())
    }

    /// Exact location first, then each alias in order.
    ///
    /// A satisfying result from any layer wins. Otherwise a version mismatch
    /// is preferred over an unclassified error, which is preferred over
    /// `NotInstalled`.
    pub async fn probe_binary(&self, spec: &BinarySpec) -> ProbeStatus {
        let exact = self.probe_exact(spec).await;
        if exact.is_satisfied() {
            return exact;
        }
        let alias = self.probe_aliases(spec).await;
        if alias.is_satisfied() {
            return alias;
        }
        pick_most_informative(exact, alias)
    }

    async fn probe_exact(&self, spec: &BinarySpec) -> ProbeStatus {
        let Some(location) = spec.location.as_deref() else {
            return ProbeStatus::NotInstalled;
        };
        if !location.exists() {
            return ProbeStatus::NotInstalled;
        }
        let program = location.to_string_lossy();
        self.probe_command(spec, &program, &[], location, ProbeSource::ExactLocation)
            .await
    }

    async fn probe_aliases(&self, spec: &BinarySpec) -> ProbeStatus {
        let mut best = ProbeStatus::NotInstalled;
        for StructuredCommand { program, args } in &spec.aliases {
            let status = self
                .probe_command(spec, program, args, Path::new(program), ProbeSource::Alias)
                .await;
            if status.is_satisfied() {
                return status;
            }
            best = pick_most_informative(best, status);
        }
        best
    }

    async fn probe_command(
        &self,
        spec: &BinarySpec,
        program: &str,
        args: &[String],
        path: &Path,
        source: ProbeSource,
    ) -> ProbeStatus {
        let output =
            match query_version(self.runner, program, args, self.config.timeouts.probe).await {
                Ok(output) => output,
                // Missing or unresponsive binaries count as absent.
                Err(ProbeError::IoError) | Err(ProbeError::Timeout) => {
                    return ProbeStatus::NotInstalled
                }
                Err(e) => {
                    return ProbeStatus::Unknown {
                        message: format!("Failed to query {}: {}", program, e.description()),
                        error: e,
                    }
                }
            };

        let version = match parse_version(&output) {
            Ok(v) => v,
            Err(e) => {
                return ProbeStatus::Unknown {
                    error: e,
                    message: format!("Failed to parse version from: {}", output),
                }
            }
        };

        if let Some(expected) = spec.expected_major_minor() {
            if !matches_major_minor(&version, &expected) {
                tracing::debug!(program, %version, %expected, "version mismatch");
                return ProbeStatus::VersionMismatch {
                    found: version,
                    expected,
                    path: path.to_path_buf(),
                };
            }
        }

        tracing::debug!(program, %version, ?source, "probe satisfied");
        ProbeStatus::Installed(InstalledMetadata {
            path: path.to_path_buf(),
            version,
            raw_version: output.lines().next().unwrap_or_default().to_string(),
            source,
        })
    }
}

fn rank(status: &ProbeStatus) -> u8 {
    match status {
        ProbeStatus::Installed(_) => 3,
        ProbeStatus::VersionMismatch { .. } => 2,
        ProbeStatus::Unknown { .. } => 1,
        _ => 0,
    }
}

fn pick_most_informative(first: ProbeStatus, second: ProbeStatus) -> ProbeStatus {
    if rank(&second) > rank(&first) {
        second
    } else {
        first
    }
}
