//! Host process execution
//!
//! Runs one command through a login shell with:
//! - The CI environment injected (server identity and job variables)
//! - Combined stdout/stderr captured in a scoped temporary file
//! - A bounded wait, followed by signal escalation on timeout
//!
//! Whatever the outcome, the captured output is moved into the build trace
//! exactly once and the temporary file is released.

use async_trait::async_trait;
use keel_core::domain::job::Job;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::context::BuildContext;
use crate::termination::{StopSignal, Terminable, TerminationPolicy};

/// Marker appended to the trace when a command exceeds its timeout
pub const TIMEOUT_MARKER: &str = "TIMEOUT";

/// Prefix of variables owned by the runner; inherited ones are dropped
const CI_PREFIX: &str = "CI_";

/// Environment injected into every build command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CiEnvironment {
    vars: Vec<(String, String)>,
}

impl CiEnvironment {
    /// Server identity plus the job-identifying variables
    ///
    /// Variables without a value are left unset.
    pub fn for_job(job: &Job, config: &Config) -> Self {
        let mut env = Self::default();
        env.set("CI_SERVER", Some("yes"));
        env.set("CI_SERVER_NAME", Some(&config.server_name));
        env.set("CI_SERVER_VERSION", config.server_version.as_deref());
        env.set("CI_SERVER_REVISION", config.server_revision.as_deref());
        env.set("CI_BUILD_REF", Some(&job.git_ref));
        env.set("CI_BUILD_BEFORE_SHA", job.before_sha.as_deref());
        env.set("CI_BUILD_REF_NAME", job.ref_name.as_deref());
        env.set("CI_BUILD_ID", Some(&job.id.to_string()));
        env
    }

    fn set(&mut self, key: &str, value: Option<&str>) {
        if let Some(value) = value {
            self.vars.push((key.to_string(), value.to_string()));
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn vars(&self) -> &[(String, String)] {
        &self.vars
    }
}

/// How a single command ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Exit code, or None when killed by a signal
    Exited(Option<i32>),
    TimedOut,
    Error(String),
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        matches!(self, ProcessOutcome::Exited(Some(0)))
    }
}

/// Runs shell commands on the host
pub struct ProcessRunner {
    shell_program: String,
    shell_args: Vec<String>,
    termination: TerminationPolicy,
}

impl ProcessRunner {
    pub fn new(config: &Config) -> Self {
        Self {
            shell_program: config.shell_program.clone(),
            shell_args: config.shell_args.clone(),
            termination: config.termination.clone(),
        }
    }

    /// Executes one command, appending its output to the build trace
    ///
    /// Returns true iff the command exited with status 0 within `timeout`.
    pub async fn execute(
        &self,
        context: &BuildContext,
        command: &str,
        working_dir: &Path,
        env: &CiEnvironment,
        timeout: Duration,
    ) -> bool {
        let command = command.trim();
        context.append_str(&format!("\n{}\n", command));

        info!("Job {}: running '{}'", context.job_id(), command);

        let output_file = match tempfile::Builder::new().prefix("child-output").tempfile() {
            Ok(file) => file,
            Err(e) => {
                warn!("Failed to create output file: {}", e);
                context.append_str(&e.to_string());
                return false;
            }
        };
        context.set_output_file(output_file.path());

        let outcome = self
            .spawn_and_wait(command, working_dir, env, timeout, &output_file)
            .await;

        match &outcome {
            ProcessOutcome::TimedOut => context.append_str(TIMEOUT_MARKER),
            ProcessOutcome::Error(message) => context.append_str(message),
            ProcessOutcome::Exited(code) => {
                debug!("Job {}: '{}' exited with {:?}", context.job_id(), command, code);
            }
        }

        release_output(context, output_file);

        outcome.success()
    }

    async fn spawn_and_wait(
        &self,
        command: &str,
        working_dir: &Path,
        env: &CiEnvironment,
        timeout: Duration,
        output_file: &NamedTempFile,
    ) -> ProcessOutcome {
        let mut child = match self.spawn(command, working_dir, env, output_file) {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to spawn '{}': {}", command, e);
                return ProcessOutcome::Error(e.to_string());
            }
        };

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => ProcessOutcome::Exited(status.code()),
            Ok(Err(e)) => ProcessOutcome::Error(e.to_string()),
            Err(_) => {
                warn!("'{}' timed out after {:?}", command, timeout);
                let mut target = ChildProcess { child: &mut child };
                if !self.termination.terminate(&mut target).await {
                    warn!("'{}' survived termination", command);
                }
                ProcessOutcome::TimedOut
            }
        }
    }

    fn spawn(
        &self,
        command: &str,
        working_dir: &Path,
        env: &CiEnvironment,
        output_file: &NamedTempFile,
    ) -> std::io::Result<Child> {
        let stdout = output_file.as_file().try_clone()?;
        let stderr = output_file.as_file().try_clone()?;

        let mut cmd = Command::new(&self.shell_program);
        cmd.args(&self.shell_args)
            .arg(command)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true);

        for (key, _) in std::env::vars_os() {
            if key.to_string_lossy().starts_with(CI_PREFIX) {
                cmd.env_remove(&key);
            }
        }
        cmd.envs(env.vars().iter().map(|(k, v)| (k.as_str(), v.as_str())));

        // Own process group so escalation reaches everything the shell started
        #[cfg(unix)]
        cmd.process_group(0);

        cmd.spawn()
    }
}

/// Moves the captured output into the trace and deletes the file
fn release_output(context: &BuildContext, output_file: NamedTempFile) {
    let output = std::fs::read(output_file.path());
    if let Err(e) = output_file.close() {
        debug!("Failed to remove output file: {}", e);
    }
    match output {
        Ok(bytes) => context.append_bytes(&bytes),
        Err(e) => warn!("Failed to read command output: {}", e),
    }
}

struct ChildProcess<'a> {
    child: &'a mut Child,
}

#[async_trait]
impl Terminable for ChildProcess<'_> {
    async fn send_signal(&mut self, signal: StopSignal) -> std::io::Result<()> {
        let Some(pid) = self.child.id() else {
            return Ok(());
        };

        #[cfg(unix)]
        {
            use nix::sys::signal::killpg;
            use nix::unistd::Pid;

            killpg(Pid::from_raw(pid as i32), signal.as_nix())?;
            Ok(())
        }

        #[cfg(not(unix))]
        {
            let _ = (pid, signal);
            self.child.start_kill()
        }
    }

    async fn wait_exit(&mut self, grace: Duration) -> bool {
        tokio::time::timeout(grace, self.child.wait()).await.is_ok()
    }
}
