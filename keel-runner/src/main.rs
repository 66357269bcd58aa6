//! Keel Runner binary
//!
//! Runs one job description read from a JSON file and prints its trace.
//!
//! Usage: `keel-runner <job.json>`
//!
//! The process exits with status 0 when the build succeeds and 1 otherwise.

use anyhow::{Context, Result};
use keel_core::domain::job::Job;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keel_runner::{BuildOrchestrator, Config};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keel_runner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let job_path: PathBuf = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .context("Usage: keel-runner <job.json>")?;

    // Load configuration
    let config = load_config()?;
    info!(
        "Loaded configuration: builds_dir={}, runtime={}, timeout={:?}",
        config.builds_dir.display(),
        config.container_runtime,
        config.default_timeout
    );

    let job = load_job(&job_path)?;

    let orchestrator = BuildOrchestrator::new(config);
    let report = orchestrator.run(&job).await;

    print!("{}", report.trace);

    info!(
        "Job {} {} in {}s",
        report.job_id,
        report.state,
        (report.finished_at - report.started_at).num_seconds()
    );

    if report.success() {
        Ok(ExitCode::SUCCESS)
    } else {
        error!("Job {} failed", report.job_id);
        Ok(ExitCode::FAILURE)
    }
}

/// Loads configuration from environment variables with fallback to defaults
fn load_config() -> Result<Config> {
    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate()?;
    Ok(config)
}

/// Reads a job description from a JSON file
fn load_job(path: &Path) -> Result<Job> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read job file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse job file {}", path.display()))
}
