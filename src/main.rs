use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use env_provisioner::{InstallationRequest, ProvisionConfig, Provisioner, RequestMode};

#[derive(Debug, Parser)]
#[command(
    name = "provision",
    version,
    about = "Provision the architectural elements detection toolchain"
)]
struct Cli {
    /// Install root; overrides the configured one
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print the report as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Debug-level operator logging on stderr
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Command {
    /// Check what is installed
    Status,
    /// Install Git
    InstallTool,
    /// Install the pinned Python
    InstallRuntime,
    /// Clone the repository
    Clone,
    /// Create the virtual environment and install dependencies
    BuildEnv,
    /// Download the model weights
    FetchArtifact,
    /// Run every step in order
    Auto,
}

impl From<Command> for RequestMode {
    fn from(command: Command) -> Self {
        match command {
            Command::Status => Self::CheckStatus,
            Command::InstallTool => Self::InstallTool,
            Command::InstallRuntime => Self::InstallRuntime,
            Command::Clone => Self::CloneRepository,
            Command::BuildEnv => Self::BuildEnvironment,
            Command::FetchArtifact => Self::FetchArtifact,
            Command::Auto => Self::FullAuto,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => ProvisionConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ProvisionConfig::default(),
    };

    let request = InstallationRequest {
        mode: cli.command.map(RequestMode::from),
        install_root: cli.root.clone(),
    };

    let provisioner = Provisioner::new(config);
    let report = provisioner
        .run_request_with_progress(&request, |progress| {
            tracing::info!(
                phase = progress.phase.description(),
                fraction = progress.fraction,
                "progress"
            );
        })
        .await;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }

    Ok(if report.status.is_failure() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
