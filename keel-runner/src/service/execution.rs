//! Execution service
//!
//! Drives one job from `waiting` to a terminal state:
//! - Preparing the checkout (clone or fetch, then checkout)
//! - Running the commands on the host, or in a container image chain
//! - Reaping every container and image the chain created
//!
//! Nothing escapes as an error. Every failure ends the build in `failed`
//! with the details in the trace or the runner log.

use async_trait::async_trait;
use keel_core::domain::build::{BuildReport, BuildState};
use keel_core::domain::job::{Job, JobError};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::container::{
    CliEngine, ContainerChain, ContainerEngine, ContainerRunner, ResourceReaper,
};
use crate::context::BuildContext;
use crate::error::{Result, RunnerError};
use crate::preparer::{RepositoryPreparer, SetupPlan};
use crate::process::{CiEnvironment, ProcessRunner};

/// Name of the image definition required for containerized builds
const IMAGE_DEFINITION: &str = "Dockerfile";

/// Service trait for executing build jobs
#[async_trait]
pub trait ExecutionService: Send + Sync {
    /// Executes a job, recording progress in `context`
    ///
    /// # Returns
    /// The terminal state (`success` or `failed`)
    async fn execute_job(&self, job: &Job, context: Arc<BuildContext>) -> BuildState;
}

/// Orchestrates one build at a time
pub struct BuildOrchestrator {
    config: Config,
    engine: Arc<dyn ContainerEngine>,
    preparer: RepositoryPreparer,
    process_runner: ProcessRunner,
    container_runner: ContainerRunner,
    reaper: ResourceReaper,
}

impl BuildOrchestrator {
    /// Creates an orchestrator driving the configured container CLI
    pub fn new(config: Config) -> Self {
        let engine = Arc::new(CliEngine::new(config.container_runtime.clone()));
        Self::with_engine(config, engine)
    }

    pub fn with_engine(config: Config, engine: Arc<dyn ContainerEngine>) -> Self {
        Self {
            preparer: RepositoryPreparer::new(config.builds_dir.clone()),
            process_runner: ProcessRunner::new(&config),
            container_runner: ContainerRunner::new(&config),
            reaper: ResourceReaper::new(),
            engine,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs a job to completion and returns its report
    pub async fn run(&self, job: &Job) -> BuildReport {
        let started_at = chrono::Utc::now();
        let context = BuildContext::new(job.id);
        let state = self.run_with_context(job, &context).await;

        BuildReport {
            job_id: job.id,
            state,
            trace: context.trace(),
            started_at,
            finished_at: chrono::Utc::now(),
        }
    }

    /// Runs a job against a caller-owned context so progress can be observed
    pub async fn run_with_context(&self, job: &Job, context: &BuildContext) -> BuildState {
        let timeout = match self.admit(job) {
            Ok(timeout) => timeout,
            Err(e) => {
                warn!("Rejecting job {}: {}", job.id, e);
                context.append_str(&format!("{}\n", e));
                return self.finish(context, BuildState::Failed);
            }
        };

        if let Err(e) = context.transition(BuildState::Running) {
            error!("Job {} cannot start: {}", job.id, e);
            return context.state();
        }

        info!(
            "Starting job {} (project {}, ref {}, {} command(s), {})",
            job.id,
            job.project_id,
            job.git_ref,
            job.commands.len(),
            if job.opts.use_docker { "docker" } else { "bare" }
        );

        let env = CiEnvironment::for_job(job, &self.config);
        let project_dir = self.preparer.project_dir(job);

        let plan = match self.prepare(job) {
            Ok(plan) => plan,
            Err(e) => {
                error!("Failed to prepare {}: {}", project_dir.display(), e);
                context.append_str(&format!("{}\n", e));
                return self.finish(context, BuildState::Failed);
            }
        };

        let success = if job.opts.use_docker {
            self.run_containerized(job, context, &plan, &env, &project_dir, timeout)
                .await
        } else {
            self.run_bare(job, context, &plan, &env, &project_dir, timeout)
                .await
        };

        let state = if success {
            BuildState::Success
        } else {
            BuildState::Failed
        };
        info!("Job {} finished: {}", job.id, state);
        self.finish(context, state)
    }

    /// Checks the job and returns its effective timeout, which must be nonzero
    fn admit(&self, job: &Job) -> Result<Duration> {
        job.validate()?;
        let timeout = job.timeout_or(self.config.default_timeout);
        if timeout.is_zero() {
            return Err(RunnerError::InvalidJob(JobError::ZeroTimeout(job.id)));
        }
        Ok(timeout)
    }

    /// Plans the setup commands, wiping the project directory for a fresh clone
    fn prepare(&self, job: &Job) -> Result<SetupPlan> {
        let plan = self.preparer.plan(job);
        if plan.fresh_clone {
            self.preparer.reset_project_dir(job)?;
        }
        Ok(plan)
    }

    fn finish(&self, context: &BuildContext, state: BuildState) -> BuildState {
        if let Err(e) = context.transition(state) {
            error!("Job {}: {}", context.job_id(), e);
        }
        context.state()
    }

    /// Setup and user commands run as one host sequence
    ///
    /// Every command gets the full timeout; the first failure stops the run.
    async fn run_bare(
        &self,
        job: &Job,
        context: &BuildContext,
        plan: &SetupPlan,
        env: &CiEnvironment,
        project_dir: &Path,
        timeout: Duration,
    ) -> bool {
        for command in plan.commands.iter().chain(job.commands.iter()) {
            if !self
                .process_runner
                .execute(context, command, project_dir, env, timeout)
                .await
            {
                return false;
            }
        }
        true
    }

    /// Setup on the host, user commands in a container chain, then cleanup
    async fn run_containerized(
        &self,
        job: &Job,
        context: &BuildContext,
        plan: &SetupPlan,
        env: &CiEnvironment,
        project_dir: &Path,
        timeout: Duration,
    ) -> bool {
        let mut chain = match self
            .setup_container_build(context, plan, env, project_dir, timeout)
            .await
        {
            Ok(chain) => chain,
            Err(e) if e.is_setup_error() => {
                warn!("Container setup for job {} failed: {}", job.id, e);
                return false;
            }
            Err(e) => {
                error!("Container engine error in job {}: {}", job.id, e);
                return false;
            }
        };

        let outcome = self
            .container_runner
            .execute_chain(context, &mut chain, &job.commands, timeout)
            .await;

        if let Err(e) = self.reaper.cleanup(&mut chain).await {
            warn!("Failed to clean up after job {}: {}", job.id, e);
        }

        outcome.success()
    }

    /// Checks the engine, runs setup commands and builds the base image
    async fn setup_container_build(
        &self,
        context: &BuildContext,
        plan: &SetupPlan,
        env: &CiEnvironment,
        project_dir: &Path,
        timeout: Duration,
    ) -> Result<ContainerChain> {
        self.engine.ping().await?;

        for command in &plan.commands {
            if !self
                .process_runner
                .execute(context, command, project_dir, env, timeout)
                .await
            {
                return Err(RunnerError::SetupFailed(command.clone()));
            }
        }

        if !project_dir.join(IMAGE_DEFINITION).is_file() {
            return Err(RunnerError::MissingImageDefinition(project_dir.to_path_buf()));
        }

        let base_image = self.engine.build_image(project_dir).await?;
        Ok(ContainerChain::new(Arc::clone(&self.engine), base_image))
    }
}

#[async_trait]
impl ExecutionService for BuildOrchestrator {
    async fn execute_job(&self, job: &Job, context: Arc<BuildContext>) -> BuildState {
        self.run_with_context(job, &context).await
    }
}
