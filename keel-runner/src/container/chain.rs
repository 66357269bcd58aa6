//! Container image chain
//!
//! User commands run one per container. Each container starts from the
//! chain head image; when a command leaves filesystem changes beyond the
//! baseline every container shows, the container is committed and the new
//! image becomes the head for the next command. Commands that change
//! nothing reuse the current head.
//!
//! The timeout is one wall-clock budget for the whole chain.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::container::engine::{ContainerEngine, significant_changes};
use crate::container::reaper;
use crate::context::BuildContext;
use crate::error::{Result, RunnerError};
use crate::process::TIMEOUT_MARKER;
use crate::shellwords;
use crate::termination::{StopSignal, Terminable, TerminationPolicy};

/// Images and containers created for one job
///
/// Dropping a chain that was never reaped schedules the cleanup on the
/// current tokio runtime.
pub struct ContainerChain {
    engine: Arc<dyn ContainerEngine>,
    images: Vec<String>,
    containers: Vec<String>,
    reaped: bool,
}

impl ContainerChain {
    pub fn new(engine: Arc<dyn ContainerEngine>, base_image: String) -> Self {
        Self {
            engine,
            images: vec![base_image],
            containers: Vec::new(),
            reaped: false,
        }
    }

    pub fn engine(&self) -> Arc<dyn ContainerEngine> {
        Arc::clone(&self.engine)
    }

    /// Image the next container is created from
    pub fn head(&self) -> &str {
        self.images.last().map(String::as_str).unwrap_or_default()
    }

    pub fn images(&self) -> &[String] {
        &self.images
    }

    pub fn containers(&self) -> &[String] {
        &self.containers
    }

    /// Number of images committed on top of the base image
    pub fn layer_count(&self) -> usize {
        self.images.len().saturating_sub(1)
    }

    pub fn push_image(&mut self, image: String) {
        self.images.push(image);
    }

    pub fn track_container(&mut self, container: String) {
        self.containers.push(container);
    }

    pub fn is_reaped(&self) -> bool {
        self.reaped
    }

    /// Hands every tracked resource to the caller and marks the chain reaped
    pub(crate) fn take_resources(&mut self) -> (Vec<String>, Vec<String>) {
        self.reaped = true;
        (
            std::mem::take(&mut self.containers),
            std::mem::take(&mut self.images),
        )
    }
}

impl Drop for ContainerChain {
    fn drop(&mut self) {
        if self.reaped || (self.containers.is_empty() && self.images.is_empty()) {
            return;
        }

        let (containers, images) = self.take_resources();
        let engine = Arc::clone(&self.engine);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("Container chain dropped without cleanup, reaping in background");
                handle.spawn(async move {
                    if let Err(e) = reaper::reap(engine.as_ref(), &containers, &images).await {
                        warn!("Background cleanup failed: {}", e);
                    }
                });
            }
            Err(_) => {
                error!(
                    "Container chain dropped outside a runtime; leaking {} container(s) and {} image(s)",
                    containers.len(),
                    images.len()
                );
            }
        }
    }
}

/// How a chain run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainOutcome {
    Succeeded,
    Failed,
    TimedOut,
    /// A commit would have exceeded the configured layer cap
    LayerLimit,
}

impl ChainOutcome {
    pub fn success(self) -> bool {
        self == ChainOutcome::Succeeded
    }
}

enum StepResult {
    Continue,
    Stop(ChainOutcome),
}

/// Runs user commands through a container chain
pub struct ContainerRunner {
    termination: TerminationPolicy,
    max_layers: Option<usize>,
}

impl ContainerRunner {
    pub fn new(config: &Config) -> Self {
        Self {
            termination: config.termination.clone(),
            max_layers: config.max_image_layers,
        }
    }

    /// Executes `commands` in order, stopping at the first failure or timeout
    pub async fn execute_chain(
        &self,
        context: &BuildContext,
        chain: &mut ContainerChain,
        commands: &[String],
        budget: Duration,
    ) -> ChainOutcome {
        let started = Instant::now();

        for command in commands {
            let remaining = budget.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                warn!("Job {}: timeout budget exhausted", context.job_id());
                context.append_str(TIMEOUT_MARKER);
                return ChainOutcome::TimedOut;
            }

            let command = command.trim();
            context.append_str(&format!("\n{}\n", command));

            match self.run_step(context, chain, command, remaining).await {
                Ok(StepResult::Continue) => {}
                Ok(StepResult::Stop(outcome)) => {
                    info!("Job {}: chain stopped ({:?})", context.job_id(), outcome);
                    return outcome;
                }
                Err(e) => {
                    error!("Job {}: '{}' failed: {}", context.job_id(), command, e);
                    context.append_str(&e.to_string());
                    return ChainOutcome::Failed;
                }
            }
        }

        ChainOutcome::Succeeded
    }

    async fn run_step(
        &self,
        context: &BuildContext,
        chain: &mut ContainerChain,
        command: &str,
        remaining: Duration,
    ) -> Result<StepResult> {
        let argv =
            shellwords::split(command).map_err(|e| RunnerError::Tokenize(e.to_string()))?;
        if argv.is_empty() {
            return Err(RunnerError::Tokenize("empty command".to_string()));
        }

        let engine = chain.engine();
        let container = engine.create_container(chain.head(), &argv).await?;
        chain.track_container(container.clone());
        debug!("Created container {} from {}", container, chain.head());

        engine.start_container(&container).await?;

        let mut failed = false;
        match tokio::time::timeout(remaining, engine.wait_container(&container)).await {
            Ok(Ok(0)) => {}
            Ok(Ok(code)) => {
                info!("Container {} exited with {}", container, code);
                failed = true;
            }
            Ok(Err(e)) => {
                warn!("Waiting on container {} failed: {}", container, e);
                context.append_str(&e.to_string());
                failed = true;
            }
            Err(_) => {
                warn!("Container {} timed out", container);
                context.append_str(TIMEOUT_MARKER);
                let mut target = RunningContainer {
                    engine: engine.as_ref(),
                    container: &container,
                };
                if !self.termination.terminate(&mut target).await {
                    warn!("Container {} survived termination", container);
                }
                self.drain_logs(context, engine.as_ref(), &container).await;
                return Ok(StepResult::Stop(ChainOutcome::TimedOut));
            }
        }

        self.drain_logs(context, engine.as_ref(), &container).await;

        let changes = significant_changes(engine.container_changes(&container).await?);
        if !changes.is_empty() {
            debug!("Container {} changed {} path(s)", container, changes.len());

            if self.max_layers.is_some_and(|max| chain.layer_count() >= max) {
                if failed {
                    return Ok(StepResult::Stop(ChainOutcome::Failed));
                }
                context.append_str(&format!(
                    "\nimage layer limit ({}) reached\n",
                    chain.layer_count()
                ));
                return Ok(StepResult::Stop(ChainOutcome::LayerLimit));
            }

            let image = engine.commit_container(&container).await?;
            debug!("Committed {} as new head {}", container, image);
            chain.push_image(image);
        }

        if failed {
            Ok(StepResult::Stop(ChainOutcome::Failed))
        } else {
            Ok(StepResult::Continue)
        }
    }

    /// Appends the container's stdout, then stderr, to the trace
    async fn drain_logs(
        &self,
        context: &BuildContext,
        engine: &dyn ContainerEngine,
        container: &str,
    ) {
        match engine.container_logs(container).await {
            Ok(logs) => {
                context.append_bytes(&logs.stdout);
                context.append_bytes(&logs.stderr);
            }
            Err(e) => {
                warn!("Failed to read logs of {}: {}", container, e);
                context.append_str(&e.to_string());
            }
        }
    }
}

struct RunningContainer<'a> {
    engine: &'a dyn ContainerEngine,
    container: &'a str,
}

#[async_trait]
impl Terminable for RunningContainer<'_> {
    async fn send_signal(&mut self, signal: StopSignal) -> std::io::Result<()> {
        self.engine
            .kill_container(self.container, signal)
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))
    }

    async fn wait_exit(&mut self, grace: Duration) -> bool {
        matches!(
            tokio::time::timeout(grace, self.engine.wait_container(self.container)).await,
            Ok(Ok(_))
        )
    }
}
