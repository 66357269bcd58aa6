//! Container engine access
//!
//! The engine is driven through its CLI (`docker` or `podman`), one
//! subprocess per operation. Everything the build needs goes through the
//! [`ContainerEngine`] trait so the chaining logic can run against a fake.

use async_trait::async_trait;
use std::path::Path;
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, RunnerError};
use crate::termination::StopSignal;

/// Kind of a filesystem change reported by `diff`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Modified,
    Added,
    Deleted,
}

/// One entry of a container's filesystem change set
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FsChange {
    pub kind: ChangeKind,
    pub path: String,
}

impl FsChange {
    pub fn new(kind: ChangeKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    /// Parses a `diff` line such as `A /dev/kmsg`
    pub fn parse(line: &str) -> Option<Self> {
        let (kind, path) = line.trim().split_once(' ')?;
        let kind = match kind {
            "C" => ChangeKind::Modified,
            "A" => ChangeKind::Added,
            "D" => ChangeKind::Deleted,
            _ => return None,
        };
        let path = path.trim();
        if path.is_empty() {
            return None;
        }
        Some(Self::new(kind, path))
    }
}

/// Changes every fresh container shows even when its command writes nothing
pub fn baseline_changes() -> [FsChange; 2] {
    [
        FsChange::new(ChangeKind::Modified, "/dev"),
        FsChange::new(ChangeKind::Added, "/dev/kmsg"),
    ]
}

/// Drops the baseline entries from a change set
pub fn significant_changes(changes: Vec<FsChange>) -> Vec<FsChange> {
    let baseline = baseline_changes();
    changes
        .into_iter()
        .filter(|change| !baseline.contains(change))
        .collect()
}

/// Buffered output of a finished container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerLogs {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Checks that the engine answers; returns its version
    async fn ping(&self) -> Result<String>;

    /// Builds an image from a directory holding a Dockerfile
    async fn build_image(&self, context_dir: &Path) -> Result<String>;

    async fn create_container(&self, image: &str, argv: &[String]) -> Result<String>;

    async fn start_container(&self, container: &str) -> Result<()>;

    /// Blocks until the container stops; returns its exit code
    async fn wait_container(&self, container: &str) -> Result<i64>;

    async fn kill_container(&self, container: &str, signal: StopSignal) -> Result<()>;

    async fn container_logs(&self, container: &str) -> Result<ContainerLogs>;

    async fn container_changes(&self, container: &str) -> Result<Vec<FsChange>>;

    /// Snapshots the container filesystem into a new image
    async fn commit_container(&self, container: &str) -> Result<String>;

    async fn remove_container(&self, container: &str) -> Result<()>;

    async fn remove_image(&self, image: &str) -> Result<()>;
}

/// Engine backed by the docker/podman command line
pub struct CliEngine {
    binary: String,
}

impl CliEngine {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Runs `<binary> <args>` and fails on a nonzero exit
    async fn run(&self, operation: &'static str, args: &[&str]) -> Result<Output> {
        debug!("{} {}", self.binary, args.join(" "));

        let output = Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                RunnerError::engine(
                    operation,
                    format!("failed to execute '{} {}': {}", self.binary, args[0], e),
                )
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            return Err(RunnerError::engine(
                operation,
                format!("exit_code={}, stderr='{}'", exit_code, stderr.trim()),
            ));
        }

        Ok(output)
    }

    /// Runs a command whose stdout is a single identifier
    async fn run_for_id(&self, operation: &'static str, args: &[&str]) -> Result<String> {
        let output = self.run(operation, args).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .map(str::to_string)
            .ok_or_else(|| RunnerError::engine(operation, "no identifier in output"))
    }
}

#[async_trait]
impl ContainerEngine for CliEngine {
    async fn ping(&self) -> Result<String> {
        let output = self
            .run("version", &["version"])
            .await
            .map_err(|e| RunnerError::EngineUnavailable(e.to_string()))?;

        let version = String::from_utf8_lossy(&output.stdout);
        let version = version.lines().next().unwrap_or_default().trim().to_string();
        info!("Container engine is available: {}", version);
        Ok(version)
    }

    async fn build_image(&self, context_dir: &Path) -> Result<String> {
        let dir = context_dir.to_string_lossy();
        let image = self.run_for_id("build", &["build", "-q", &dir]).await?;
        info!("Built image {} from {}", image, dir);
        Ok(image)
    }

    async fn create_container(&self, image: &str, argv: &[String]) -> Result<String> {
        let name = format!("keel-{}", Uuid::new_v4());
        let mut args = vec!["create", "--name", name.as_str(), image];
        args.extend(argv.iter().map(String::as_str));
        self.run_for_id("create", &args).await
    }

    async fn start_container(&self, container: &str) -> Result<()> {
        self.run("start", &["start", container]).await?;
        Ok(())
    }

    async fn wait_container(&self, container: &str) -> Result<i64> {
        let status = self.run_for_id("wait", &["wait", container]).await?;
        status
            .parse::<i64>()
            .map_err(|e| RunnerError::engine("wait", format!("bad exit code '{}': {}", status, e)))
    }

    async fn kill_container(&self, container: &str, signal: StopSignal) -> Result<()> {
        self.run("kill", &["kill", "--signal", signal.name(), container])
            .await?;
        Ok(())
    }

    async fn container_logs(&self, container: &str) -> Result<ContainerLogs> {
        let output = self.run("logs", &["logs", container]).await?;
        Ok(ContainerLogs {
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    async fn container_changes(&self, container: &str) -> Result<Vec<FsChange>> {
        let output = self.run("diff", &["diff", container]).await?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(FsChange::parse)
            .collect())
    }

    async fn commit_container(&self, container: &str) -> Result<String> {
        self.run_for_id("commit", &["commit", container]).await
    }

    async fn remove_container(&self, container: &str) -> Result<()> {
        self.run("rm", &["rm", "-f", container]).await?;
        Ok(())
    }

    async fn remove_image(&self, image: &str) -> Result<()> {
        self.run("rmi", &["rmi", image]).await?;
        Ok(())
    }
}
