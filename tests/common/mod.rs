//! Scripted fakes for driving the orchestrator without touching the machine.

#![allow(dead_code)]

use async_trait::async_trait;
use env_provisioner::{
    BinarySpec, CommandOutput, CommandRunner, FetchError, Fetcher, InstallerSpec,
    ProvisionConfig, RunError, ScriptFlavor, StructuredCommand,
};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// What a matched rule answers with.
#[derive(Debug, Clone)]
pub enum Reply {
    Exit {
        code: i32,
        stdout: String,
        stderr: String,
    },
    TimedOut,
    NotFound,
}

impl Reply {
    pub fn ok(stdout: &str) -> Self {
        Self::Exit {
            code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub fn fail(code: i32, stderr: &str) -> Self {
        Self::Exit {
            code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }
}

/// Answers calls to `program` whose arguments contain `needle`.
#[derive(Debug, Clone)]
pub struct Rule {
    program: String,
    needle: Option<String>,
    reply: Reply,
    creates: Option<PathBuf>,
    then: Option<Box<Rule>>,
}

impl Rule {
    pub fn new(program: &str, needle: Option<&str>, reply: Reply) -> Self {
        Self {
            program: program.to_string(),
            needle: needle.map(str::to_string),
            reply,
            creates: None,
            then: None,
        }
    }

    /// `program --version` printing `output`.
    pub fn version(program: &str, output: &str) -> Self {
        Self::new(program, Some("--version"), Reply::ok(output))
    }

    /// Create `dir` when the rule fires.
    pub fn creating(mut self, dir: impl Into<PathBuf>) -> Self {
        self.creates = Some(dir.into());
        self
    }

    /// Install `rule` ahead of all others when this rule fires.
    pub fn then(mut self, rule: Rule) -> Self {
        self.then = Some(Box::new(rule));
        self
    }

    fn matches(&self, program: &str, args: &[String]) -> bool {
        self.program == program
            && self
                .needle
                .as_deref()
                .map_or(true, |needle| args.iter().any(|a| a.contains(needle)))
    }
}

#[derive(Debug, Clone)]
pub struct Call {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl Call {
    pub fn is_probe(&self) -> bool {
        self.args.iter().any(|a| a == "--version")
    }
}

/// [`CommandRunner`] that answers from a rule list and records every call.
/// Unmatched programs are not found.
#[derive(Default)]
pub struct FakeRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Call>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, rule: Rule) -> Self {
        self.rules.lock().unwrap().push(rule);
        self
    }

    /// Git and Python 3.9 both answer their version queries.
    pub fn with_toolchain(self) -> Self {
        self.with(Rule::version("git", "git version 2.39.0"))
            .with(Rule::version("python3.9", "Python 3.9.13"))
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls other than version probes.
    pub fn actions(&self) -> Vec<Call> {
        self.calls().into_iter().filter(|c| !c.is_probe()).collect()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        working_dir: Option<&Path>,
        _limit: Duration,
    ) -> Result<CommandOutput, RunError> {
        self.calls.lock().unwrap().push(Call {
            program: program.to_string(),
            args: args.to_vec(),
            working_dir: working_dir.map(Path::to_path_buf),
        });

        let mut rules = self.rules.lock().unwrap();
        let Some(rule) = rules.iter().find(|r| r.matches(program, args)).cloned() else {
            return Err(RunError::NotFound {
                program: program.to_string(),
            });
        };
        if let Some(dir) = &rule.creates {
            std::fs::create_dir_all(dir).unwrap();
        }
        if let Some(next) = rule.then {
            rules.insert(0, *next);
        }

        match rule.reply {
            Reply::Exit {
                code,
                stdout,
                stderr,
            } => Ok(CommandOutput {
                exit_code: Some(code),
                stdout,
                stderr,
                timed_out: false,
            }),
            Reply::TimedOut => Ok(CommandOutput::timed_out()),
            Reply::NotFound => Err(RunError::NotFound {
                program: program.to_string(),
            }),
        }
    }
}

/// [`Fetcher`] that writes fixed content and counts downloads.
#[derive(Default)]
pub struct FakeFetcher {
    fail: bool,
    fetched: Mutex<Vec<(String, PathBuf)>>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn count(&self) -> usize {
        self.fetched.lock().unwrap().len()
    }

    pub fn fetched(&self) -> Vec<(String, PathBuf)> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        self.fetched
            .lock()
            .unwrap()
            .push((url.to_string(), dest.to_path_buf()));
        if self.fail {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: 404,
            });
        }
        let content = vec![0u8; 2 * 1024 * 1024];
        std::fs::write(dest, &content).map_err(|source| FetchError::Io {
            path: dest.to_path_buf(),
            source,
        })?;
        Ok(content.len() as u64)
    }
}

fn installer(program: &str) -> InstallerSpec {
    InstallerSpec {
        url: None,
        file_name: String::new(),
        program: program.to_string(),
        args: vec!["--unattended".to_string()],
        elevated: false,
    }
}

/// Config rooted at `<base>/install` with aliases only, POSIX scripts and
/// no settle delay.
pub fn test_config(base: &Path) -> ProvisionConfig {
    let mut config = ProvisionConfig::default().with_install_root(base.join("install"));
    config.tool = BinarySpec {
        location: None,
        aliases: vec![StructuredCommand::new("git", &[])],
        expected_version: None,
        installer: installer("fake-git-installer"),
    };
    config.runtime = BinarySpec {
        location: None,
        aliases: vec![
            StructuredCommand::new("python3.9", &[]),
            StructuredCommand::new("python3", &[]),
        ],
        expected_version: Some("3.9.13".to_string()),
        installer: installer("fake-python-installer"),
    };
    config.scripts = ScriptFlavor::Posix;
    config.elevation = Vec::new();
    config.temp_dir = base.join("tmp");
    config.timeouts.settle_delay = Duration::ZERO;
    config
}

/// Lay out a root where everything but the artifact exists.
pub fn populate_except_artifact(config: &ProvisionConfig) {
    std::fs::create_dir_all(config.checkout_marker_path()).unwrap();
    std::fs::create_dir_all(config.environment_path()).unwrap();
    env_provisioner::materialize_scripts(config).unwrap();
}
