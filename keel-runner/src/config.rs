//! Runner configuration
//!
//! Defines all configurable parameters for a build: where checkouts live,
//! the default timeout, which container engine to drive and how timed-out
//! commands are stopped. A `Config` value is passed explicitly into the
//! orchestrator; nothing here is global.

use std::path::PathBuf;
use std::time::Duration;

use crate::termination::TerminationPolicy;

/// Default build timeout (2 hours)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(7200);

/// Runner configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding one `project-<id>` checkout per project
    pub builds_dir: PathBuf,

    /// Timeout applied when a job carries no override
    pub default_timeout: Duration,

    /// Container engine CLI binary (docker or podman)
    pub container_runtime: String,

    /// Signal escalation for timed-out processes and containers
    pub termination: TerminationPolicy,

    /// Upper bound on committed image layers per chain (None = unbounded)
    pub max_image_layers: Option<usize>,

    /// Shell used for every command
    pub shell_program: String,

    /// Arguments placed before the command string
    pub shell_args: Vec<String>,

    /// Value of CI_SERVER_NAME
    pub server_name: String,

    /// Value of CI_SERVER_VERSION
    pub server_version: Option<String>,

    /// Value of CI_SERVER_REVISION
    pub server_revision: Option<String>,
}

impl Config {
    /// Creates a new configuration with defaults
    ///
    /// A relative `builds_dir` is resolved against the current directory.
    pub fn new(builds_dir: PathBuf) -> Self {
        Self {
            builds_dir: std::path::absolute(&builds_dir).unwrap_or(builds_dir),
            default_timeout: DEFAULT_TIMEOUT,
            container_runtime: "docker".to_string(),
            termination: TerminationPolicy::default(),
            max_image_layers: None,
            shell_program: "bash".to_string(),
            shell_args: vec!["--login".to_string(), "-c".to_string()],
            server_name: "Keel CI".to_string(),
            server_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            server_revision: None,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - KEEL_BUILDS_DIR (optional, default: <tmp>/keel-builds)
    /// - KEEL_BUILD_TIMEOUT (optional, seconds, default: 7200)
    /// - KEEL_CONTAINER_RUNTIME (optional, default: docker)
    /// - KEEL_KILL_GRACE (optional, seconds, overrides every escalation step)
    /// - KEEL_MAX_IMAGE_LAYERS (optional, default: unbounded)
    /// - KEEL_SERVER_NAME (optional, default: Keel CI)
    /// - KEEL_SERVER_REVISION (optional)
    pub fn from_env() -> anyhow::Result<Self> {
        let builds_dir = std::env::var("KEEL_BUILDS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_builds_dir());

        let mut config = Self::new(builds_dir);

        if let Ok(raw) = std::env::var("KEEL_BUILD_TIMEOUT") {
            let secs = raw
                .parse::<u64>()
                .map_err(|e| anyhow::anyhow!("invalid KEEL_BUILD_TIMEOUT '{}': {}", raw, e))?;
            config.default_timeout = Duration::from_secs(secs);
        }

        if let Ok(runtime) = std::env::var("KEEL_CONTAINER_RUNTIME") {
            config.container_runtime = runtime;
        }

        if let Ok(raw) = std::env::var("KEEL_KILL_GRACE") {
            let secs = raw
                .parse::<u64>()
                .map_err(|e| anyhow::anyhow!("invalid KEEL_KILL_GRACE '{}': {}", raw, e))?;
            config.termination = config.termination.with_grace(Duration::from_secs(secs));
        }

        if let Ok(raw) = std::env::var("KEEL_MAX_IMAGE_LAYERS") {
            let max = raw
                .parse::<usize>()
                .map_err(|e| anyhow::anyhow!("invalid KEEL_MAX_IMAGE_LAYERS '{}': {}", raw, e))?;
            config.max_image_layers = Some(max);
        }

        if let Ok(name) = std::env::var("KEEL_SERVER_NAME") {
            config.server_name = name;
        }

        config.server_revision = std::env::var("KEEL_SERVER_REVISION").ok();

        Ok(config)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_termination(mut self, termination: TerminationPolicy) -> Self {
        self.termination = termination;
        self
    }

    pub fn with_max_image_layers(mut self, max: usize) -> Self {
        self.max_image_layers = Some(max);
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.builds_dir.as_os_str().is_empty() {
            anyhow::bail!("builds_dir cannot be empty");
        }

        if !self.builds_dir.is_absolute() {
            anyhow::bail!("builds_dir must be absolute: {}", self.builds_dir.display());
        }

        if self.default_timeout.is_zero() {
            anyhow::bail!("default_timeout must be greater than 0");
        }

        if self.container_runtime.trim().is_empty() {
            anyhow::bail!("container_runtime cannot be empty");
        }

        if self.shell_program.trim().is_empty() {
            anyhow::bail!("shell_program cannot be empty");
        }

        if self.termination.is_empty() {
            anyhow::bail!("termination policy needs at least one step");
        }

        if self.max_image_layers == Some(0) {
            anyhow::bail!("max_image_layers must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(default_builds_dir())
    }
}

fn default_builds_dir() -> PathBuf {
    std::env::temp_dir().join("keel-builds")
}
