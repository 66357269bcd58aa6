//! In-memory container engine for tests
//!
//! Behaviour is keyed by the container's command line (argv joined with
//! spaces). Unknown commands exit 0, print nothing and change nothing
//! beyond the baseline.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use crate::container::engine::{
    ChangeKind, ContainerEngine, ContainerLogs, FsChange, baseline_changes,
};
use crate::error::{Result, RunnerError};
use crate::termination::StopSignal;

#[derive(Debug, Clone, Default)]
pub struct FakeCommand {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    /// Leaves a file behind, so the container differs from the baseline
    pub mutates: bool,
    /// Runs until killed
    pub hangs: bool,
}

impl FakeCommand {
    pub fn prints(stdout: &str) -> Self {
        Self {
            stdout: stdout.to_string(),
            ..Default::default()
        }
    }

    pub fn exits(exit_code: i64) -> Self {
        Self {
            exit_code,
            ..Default::default()
        }
    }

    pub fn mutating(mut self) -> Self {
        self.mutates = true;
        self
    }

    pub fn hanging(mut self) -> Self {
        self.hangs = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct CreatedContainer {
    pub id: String,
    pub image: String,
    pub argv: Vec<String>,
}

#[derive(Default)]
struct FakeState {
    next_id: usize,
    created: Vec<CreatedContainer>,
    live_containers: Vec<String>,
    live_images: Vec<String>,
    killed: HashMap<String, Vec<StopSignal>>,
    builds: usize,
}

pub struct FakeEngine {
    available: bool,
    fail_container_removal: bool,
    /// Operations ("start", "diff", "commit") that always fail
    failing: HashSet<&'static str>,
    commands: HashMap<String, FakeCommand>,
    state: Mutex<FakeState>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            available: true,
            fail_container_removal: false,
            failing: HashSet::new(),
            commands: HashMap::new(),
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    pub fn failing_container_removal(mut self) -> Self {
        self.fail_container_removal = true;
        self
    }

    pub fn failing_on(mut self, operation: &'static str) -> Self {
        self.failing.insert(operation);
        self
    }

    pub fn with_command(mut self, command: &str, behaviour: FakeCommand) -> Self {
        self.commands.insert(command.to_string(), behaviour);
        self
    }

    pub fn created(&self) -> Vec<CreatedContainer> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn live_containers(&self) -> Vec<String> {
        self.state.lock().unwrap().live_containers.clone()
    }

    pub fn live_images(&self) -> Vec<String> {
        self.state.lock().unwrap().live_images.clone()
    }

    pub fn builds(&self) -> usize {
        self.state.lock().unwrap().builds
    }

    pub fn signals_sent(&self, container: &str) -> Vec<StopSignal> {
        self.state
            .lock()
            .unwrap()
            .killed
            .get(container)
            .cloned()
            .unwrap_or_default()
    }

    fn next_id(&self, prefix: &str) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        format!("{}-{}", prefix, state.next_id)
    }

    fn behaviour(&self, container: &str) -> FakeCommand {
        let state = self.state.lock().unwrap();
        state
            .created
            .iter()
            .find(|c| c.id == container)
            .and_then(|c| self.commands.get(&c.argv.join(" ")))
            .cloned()
            .unwrap_or_default()
    }

    fn check(&self, operation: &'static str) -> Result<()> {
        if self.failing.contains(operation) {
            return Err(RunnerError::engine(operation, "injected failure"));
        }
        Ok(())
    }

    fn is_killed(&self, container: &str) -> bool {
        self.state.lock().unwrap().killed.contains_key(container)
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn ping(&self) -> Result<String> {
        if self.available {
            Ok("fake".to_string())
        } else {
            Err(RunnerError::EngineUnavailable("fake engine is down".to_string()))
        }
    }

    async fn build_image(&self, _context_dir: &Path) -> Result<String> {
        let image = self.next_id("base");
        let mut state = self.state.lock().unwrap();
        state.builds += 1;
        state.live_images.push(image.clone());
        Ok(image)
    }

    async fn create_container(&self, image: &str, argv: &[String]) -> Result<String> {
        let id = self.next_id("ctr");
        let mut state = self.state.lock().unwrap();
        state.created.push(CreatedContainer {
            id: id.clone(),
            image: image.to_string(),
            argv: argv.to_vec(),
        });
        state.live_containers.push(id.clone());
        Ok(id)
    }

    async fn start_container(&self, _container: &str) -> Result<()> {
        self.check("start")
    }

    async fn wait_container(&self, container: &str) -> Result<i64> {
        let behaviour = self.behaviour(container);
        if behaviour.hangs {
            while !self.is_killed(container) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            return Ok(137);
        }
        Ok(behaviour.exit_code)
    }

    async fn kill_container(&self, container: &str, signal: StopSignal) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .killed
            .entry(container.to_string())
            .or_default()
            .push(signal);
        Ok(())
    }

    async fn container_logs(&self, container: &str) -> Result<ContainerLogs> {
        let behaviour = self.behaviour(container);
        Ok(ContainerLogs {
            stdout: behaviour.stdout.into_bytes(),
            stderr: behaviour.stderr.into_bytes(),
        })
    }

    async fn container_changes(&self, container: &str) -> Result<Vec<FsChange>> {
        self.check("diff")?;
        let mut changes = baseline_changes().to_vec();
        if self.behaviour(container).mutates {
            changes.push(FsChange::new(
                ChangeKind::Added,
                format!("/work/{}", container),
            ));
        }
        Ok(changes)
    }

    async fn commit_container(&self, _container: &str) -> Result<String> {
        self.check("commit")?;
        let image = self.next_id("img");
        self.state.lock().unwrap().live_images.push(image.clone());
        Ok(image)
    }

    async fn remove_container(&self, container: &str) -> Result<()> {
        if self.fail_container_removal {
            return Err(RunnerError::engine("rm", "device or resource busy"));
        }
        self.state
            .lock()
            .unwrap()
            .live_containers
            .retain(|c| c != container);
        Ok(())
    }

    async fn remove_image(&self, image: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let before = state.live_images.len();
        state.live_images.retain(|i| i != image);
        if state.live_images.len() == before {
            return Err(RunnerError::engine("rmi", format!("no such image: {}", image)));
        }
        Ok(())
    }
}
