//! Provisioning configuration.
//!
//! Every well-known path, URL and timeout lives in [`ProvisionConfig`] so that
//! callers (and tests) can redirect them. Defaults follow the platform the
//! binary was built for.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// The runtime version the environment is pinned to.
pub const PINNED_RUNTIME_VERSION: &str = "3.9.13";

#[cfg_attr(not(windows), allow(dead_code))]
const GIT_VERSION: &str = "2.39.0";
const REPOSITORY_URL: &str =
    "https://github.com/mimarenesyildiz/Architectural-Elements-Detection.git";
const ARTIFACT_URL: &str = "http://mimarenes.com/geovision/mask_rcnn_food_0019.h5";
const ARTIFACT_FILE: &str = "mask_rcnn_food_0019.h5";

/// A structured command for programmatic execution.
///
/// # Example
///
/// ```rust
/// use env_provisioner::StructuredCommand;
///
/// let cmd = StructuredCommand::new("py", &["-3.9"]);
/// assert_eq!(cmd.program, "py");
/// assert_eq!(cmd.display(), "py -3.9");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredCommand {
    /// The program to execute.
    pub program: String,

    /// Arguments placed before any call-specific arguments.
    #[serde(default)]
    pub args: Vec<String>,
}

impl StructuredCommand {
    /// Build a command from a program and leading arguments.
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// The leading arguments followed by `extra`.
    pub fn args_with(&self, extra: &[&str]) -> Vec<String> {
        self.args
            .iter()
            .cloned()
            .chain(extra.iter().map(|a| a.to_string()))
            .collect()
    }

    /// Command line for display in messages.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// How to obtain and run an unattended installer.
///
/// `program` and `args` may reference `{installer}` (the downloaded file) and
/// `{install_dir}` (the directory of the binary's exact location).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallerSpec {
    /// Download URL of the installer. `None` runs `program` without a download.
    pub url: Option<String>,

    /// File name of the downloaded installer inside the temp directory.
    pub file_name: String,

    /// Program to run.
    pub program: String,

    /// Unattended/silent flags.
    #[serde(default)]
    pub args: Vec<String>,

    /// Whether the elevation prefix is applied.
    #[serde(default)]
    pub elevated: bool,
}

/// A binary dependency located by exact path or by generic alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinarySpec {
    /// The preferred install location. Probed first.
    pub location: Option<PathBuf>,

    /// Generic command-line aliases probed in order when the exact location
    /// is absent or unsatisfied.
    #[serde(default)]
    pub aliases: Vec<StructuredCommand>,

    /// Expected version; only its major.minor is compared. `None` accepts any.
    pub expected_version: Option<String>,

    /// The unattended installer.
    pub installer: InstallerSpec,
}

impl BinarySpec {
    /// The expected `major.minor` prefix, e.g. `3.9` for `3.9.13`.
    pub fn expected_major_minor(&self) -> Option<String> {
        self.expected_version.as_deref().map(|version| {
            version
                .split('.')
                .take(2)
                .collect::<Vec<_>>()
                .join(".")
        })
    }

    /// Directory that holds the exact location, substituted as `{install_dir}`.
    pub fn install_dir(&self) -> Option<&Path> {
        self.location.as_deref().and_then(Path::parent)
    }
}

/// The downloaded binary artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSpec {
    /// Remote location.
    pub url: String,
    /// File name under the install root.
    pub file_name: String,
}

/// Names of the well-known entries under the install root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Layout {
    /// Directory whose presence proves the checkout exists.
    pub checkout_marker: String,
    /// The isolated environment directory.
    pub environment_dir: String,
    /// Input media directory read by the entry program.
    pub images_dir: String,
    /// Stem of the dependency-install script.
    pub setup_script: String,
    /// Stem of the launcher script.
    pub launcher_script: String,
    /// File name of the entry-point program.
    pub entry_program: String,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            checkout_marker: ".git".to_string(),
            environment_dir: "venv".to_string(),
            images_dir: "images".to_string(),
            setup_script: "setup_env".to_string(),
            launcher_script: "StartSetup".to_string(),
            entry_program: "StartMasksDetection.py".to_string(),
        }
    }
}

/// Shell dialect of the generated scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptFlavor {
    /// Windows batch files run through `cmd /C`.
    Batch,
    /// POSIX shell scripts run through `sh`.
    Posix,
}

impl ScriptFlavor {
    /// Flavor matching the build target.
    pub fn native() -> Self {
        if cfg!(windows) {
            Self::Batch
        } else {
            Self::Posix
        }
    }

    /// Script file extension.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Batch => "bat",
            Self::Posix => "sh",
        }
    }

    /// Interpreter used to execute a generated script.
    pub fn interpreter(&self) -> StructuredCommand {
        match self {
            Self::Batch => StructuredCommand::new("cmd", &["/C"]),
            Self::Posix => StructuredCommand::new("sh", &[]),
        }
    }
}

/// Bounded waits for child processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Probe and version queries.
    #[serde(with = "secs")]
    pub probe: Duration,

    /// Tool and runtime installers, and the clone.
    #[serde(with = "secs")]
    pub installer: Duration,

    /// The dependency-install script.
    #[serde(with = "secs")]
    pub dependencies: Duration,

    /// Longest silence tolerated from a download server.
    #[serde(with = "secs")]
    pub download_stall: Duration,

    /// Pause after an installer exits, before re-probing.
    #[serde(with = "millis")]
    pub settle_delay: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            probe: Duration::from_secs(30),
            installer: Duration::from_secs(300),     // 5 minutes
            dependencies: Duration::from_secs(900), // 15 minutes
            download_stall: crate::fetch::DEFAULT_STALL_TIMEOUT,
            settle_delay: Duration::from_millis(2000),
        }
    }
}

/// Complete provisioning configuration.
///
/// # Example
///
/// ```rust
/// use env_provisioner::ProvisionConfig;
///
/// let config = ProvisionConfig::default().with_install_root("/tmp/aed");
/// assert!(config.checkout_marker_path().ends_with(".git"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    /// Target directory for everything provisioned.
    pub install_root: PathBuf,
    /// The version-control client.
    pub tool: BinarySpec,
    /// The pinned language runtime.
    pub runtime: BinarySpec,
    /// Clone source.
    pub repository_url: String,
    /// The binary artifact.
    pub artifact: ArtifactSpec,
    /// Names under the install root.
    pub layout: Layout,
    /// Dialect of the generated scripts.
    pub scripts: ScriptFlavor,
    /// Command prefix applied to elevated installers.
    pub elevation: Vec<String>,
    /// Where installers are downloaded.
    pub temp_dir: PathBuf,
    /// Bounded waits.
    pub timeouts: Timeouts,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            install_root: default_install_root(),
            tool: default_tool(),
            runtime: default_runtime(),
            repository_url: REPOSITORY_URL.to_string(),
            artifact: ArtifactSpec {
                url: ARTIFACT_URL.to_string(),
                file_name: ARTIFACT_FILE.to_string(),
            },
            layout: Layout::default(),
            scripts: ScriptFlavor::native(),
            elevation: default_elevation(),
            temp_dir: std::env::temp_dir(),
            timeouts: Timeouts::default(),
        }
    }
}

impl ProvisionConfig {
    /// Load a TOML file; missing keys fall back to defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Replace the install root.
    pub fn with_install_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.install_root = root.into();
        self
    }

    /// `<root>/.git`
    pub fn checkout_marker_path(&self) -> PathBuf {
        self.install_root.join(&self.layout.checkout_marker)
    }

    /// `<root>/venv`
    pub fn environment_path(&self) -> PathBuf {
        self.install_root.join(&self.layout.environment_dir)
    }

    /// `<root>/<artifact>`
    pub fn artifact_path(&self) -> PathBuf {
        self.install_root.join(&self.artifact.file_name)
    }

    /// `<root>/images`
    pub fn images_path(&self) -> PathBuf {
        self.install_root.join(&self.layout.images_dir)
    }

    /// `<root>/setup_env.<ext>`
    pub fn setup_script_path(&self) -> PathBuf {
        self.install_root.join(format!(
            "{}.{}",
            self.layout.setup_script,
            self.scripts.extension()
        ))
    }

    /// `<root>/StartSetup.<ext>`
    pub fn launcher_script_path(&self) -> PathBuf {
        self.install_root.join(format!(
            "{}.{}",
            self.layout.launcher_script,
            self.scripts.extension()
        ))
    }

    /// `<root>/StartMasksDetection.py`
    pub fn entry_program_path(&self) -> PathBuf {
        self.install_root.join(&self.layout.entry_program)
    }
}

/// Errors loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for [`ProvisionConfig`].
    #[error("Invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[cfg(windows)]
fn default_install_root() -> PathBuf {
    PathBuf::from(r"C:\ArchitecturalElementsDetection")
}

#[cfg(not(windows))]
fn default_install_root() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ArchitecturalElementsDetection")
}

#[cfg(windows)]
fn default_tool() -> BinarySpec {
    BinarySpec {
        location: Some(PathBuf::from(r"C:\Program Files\Git\cmd\git.exe")),
        aliases: vec![StructuredCommand::new("git", &[])],
        expected_version: None,
        installer: InstallerSpec {
            url: Some(format!(
                "https://github.com/git-for-windows/git/releases/download/v{0}.windows.1/Git-{0}-64-bit.exe",
                GIT_VERSION
            )),
            file_name: "GitInstaller.exe".to_string(),
            program: "{installer}".to_string(),
            args: [
                "/VERYSILENT",
                "/NORESTART",
                "/NOCANCEL",
                "/SP-",
                "/CLOSEAPPLICATIONS",
                "/RESTARTAPPLICATIONS",
            ]
            .iter()
            .map(|a| a.to_string())
            .collect(),
            elevated: true,
        },
    }
}

#[cfg(not(windows))]
fn default_tool() -> BinarySpec {
    BinarySpec {
        location: Some(PathBuf::from("/usr/bin/git")),
        aliases: vec![StructuredCommand::new("git", &[])],
        expected_version: None,
        installer: InstallerSpec {
            url: None,
            file_name: String::new(),
            program: "apt-get".to_string(),
            args: vec!["install".to_string(), "-y".to_string(), "git".to_string()],
            elevated: true,
        },
    }
}

#[cfg(windows)]
fn default_runtime() -> BinarySpec {
    BinarySpec {
        location: Some(PathBuf::from(r"C:\Python39\python.exe")),
        aliases: vec![
            StructuredCommand::new("py", &["-3.9"]),
            StructuredCommand::new("python", &[]),
        ],
        expected_version: Some(PINNED_RUNTIME_VERSION.to_string()),
        installer: InstallerSpec {
            url: Some(format!(
                "https://www.python.org/ftp/python/{0}/python-{0}-amd64.exe",
                PINNED_RUNTIME_VERSION
            )),
            file_name: "python-installer.exe".to_string(),
            program: "{installer}".to_string(),
            args: [
                "/quiet",
                "InstallAllUsers=1",
                "PrependPath=1",
                "Include_test=0",
                "TargetDir={install_dir}",
            ]
            .iter()
            .map(|a| a.to_string())
            .collect(),
            elevated: true,
        },
    }
}

#[cfg(not(windows))]
fn default_runtime() -> BinarySpec {
    BinarySpec {
        location: Some(PathBuf::from("/usr/bin/python3.9")),
        aliases: vec![
            StructuredCommand::new("python3.9", &[]),
            StructuredCommand::new("python3", &[]),
        ],
        expected_version: Some(PINNED_RUNTIME_VERSION.to_string()),
        installer: InstallerSpec {
            url: None,
            file_name: String::new(),
            program: "apt-get".to_string(),
            args: ["install", "-y", "python3.9", "python3.9-venv"]
                .iter()
                .map(|a| a.to_string())
                .collect(),
            elevated: true,
        },
    }
}

#[cfg(windows)]
fn default_elevation() -> Vec<String> {
    // The installers raise their own UAC prompt.
    Vec::new()
}

#[cfg(not(windows))]
fn default_elevation() -> Vec<String> {
    vec!["sudo".to_string(), "-n".to_string()]
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeouts() {
        let timeouts = Timeouts::default();
        assert_eq!(timeouts.probe, Duration::from_secs(30));
        assert_eq!(timeouts.installer, Duration::from_secs(300));
        assert_eq!(timeouts.dependencies, Duration::from_secs(900));
        assert_eq!(timeouts.download_stall, Duration::from_secs(60));
    }

    #[test]
    fn test_expected_major_minor() {
        let config = ProvisionConfig::default();
        assert_eq!(config.runtime.expected_major_minor().as_deref(), Some("3.9"));
        assert_eq!(config.tool.expected_major_minor(), None);
    }

    #[test]
    fn test_layout_paths() {
        let config = ProvisionConfig::default().with_install_root("/srv/aed");
        let ext = config.scripts.extension();
        assert_eq!(config.checkout_marker_path(), PathBuf::from("/srv/aed/.git"));
        assert_eq!(config.environment_path(), PathBuf::from("/srv/aed/venv"));
        assert_eq!(
            config.artifact_path(),
            PathBuf::from("/srv/aed/mask_rcnn_food_0019.h5")
        );
        assert_eq!(
            config.setup_script_path(),
            PathBuf::from(format!("/srv/aed/setup_env.{ext}"))
        );
        assert_eq!(
            config.launcher_script_path(),
            PathBuf::from(format!("/srv/aed/StartSetup.{ext}"))
        );
    }

    #[test]
    fn test_structured_command_args_with() {
        let cmd = StructuredCommand::new("py", &["-3.9"]);
        assert_eq!(cmd.args_with(&["--version"]), vec!["-3.9", "--version"]);
        assert_eq!(cmd.display(), "py -3.9");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: ProvisionConfig = toml::from_str(
            r#"
            install_root = "/opt/aed"
            scripts = "posix"

            [timeouts]
            probe = 5
            settle_delay = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.install_root, PathBuf::from("/opt/aed"));
        assert_eq!(config.scripts, ScriptFlavor::Posix);
        assert_eq!(config.timeouts.probe, Duration::from_secs(5));
        assert_eq!(config.timeouts.settle_delay, Duration::ZERO);
        assert_eq!(config.timeouts.dependencies, Duration::from_secs(900));
        assert_eq!(config.repository_url, REPOSITORY_URL);
    }

    #[test]
    fn test_from_file_missing() {
        let result = ProvisionConfig::from_file(Path::new("/nonexistent/provision.toml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_from_file_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("provision.toml");
        std::fs::write(&path, "install_root = [").unwrap();
        let result = ProvisionConfig::from_file(&path);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }
}
