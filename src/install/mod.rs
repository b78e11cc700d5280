//! Provisioning steps.
//!
//! This module provides the [`StepExecutor`] that runs each idempotent step,
//! the [`StepResult`] and [`MessageLog`] it produces, and the step state
//! machine and FullAuto progress checkpoints.
//!
//! # Example
//!
//! ```rust,no_run
//! use env_provisioner::{HttpFetcher, ProcessRunner, ProvisionConfig, StepExecutor, StepKind};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let config = ProvisionConfig::default();
//!     let (runner, fetcher) = (ProcessRunner::new(), HttpFetcher::new());
//!     let executor = StepExecutor::new(&config, &runner, &fetcher);
//!
//!     let result = executor.run(StepKind::FetchArtifact).await;
//!     for line in result.messages.lines() {
//!         println!("{line}");
//!     }
//! }
//! ```

mod errors;
mod executor;
mod progress;
mod types;

pub use errors::StepError;
pub use executor::{DependencyRefresh, StepExecutor};
pub use progress::{Phase, ProvisionProgress, StepState};
pub use types::{LogEntry, LogLevel, MessageLog, StepKind, StepOutcome, StepResult};
