//! Run state for a single build
//!
//! Holds everything that changes while a job executes:
//! - Lifecycle state (forward transitions only)
//! - The trace sink collecting build output
//! - Path of the most recent temporary output file
//!
//! The orchestrator is the only writer. Observers may hold an `Arc` to the
//! context and poll `state()` / `trace()` while the build runs.

use keel_core::domain::build::{BuildState, StateError};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::service::{InMemoryTrace, OutputSink};

pub struct BuildContext {
    job_id: u64,
    state: Mutex<BuildState>,
    trace: Arc<dyn OutputSink>,
    output_file: Mutex<Option<PathBuf>>,
}

impl BuildContext {
    /// Creates a waiting build context with an in-memory trace
    pub fn new(job_id: u64) -> Arc<Self> {
        Self::with_sink(job_id, Arc::new(InMemoryTrace::new()))
    }

    /// Creates a waiting build context writing to the given sink
    pub fn with_sink(job_id: u64, trace: Arc<dyn OutputSink>) -> Arc<Self> {
        Arc::new(Self {
            job_id,
            state: Mutex::new(BuildState::Waiting),
            trace,
            output_file: Mutex::new(None),
        })
    }

    pub fn job_id(&self) -> u64 {
        self.job_id
    }

    pub fn state(&self) -> BuildState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Moves the build to `next`, refusing backward or sideways moves
    pub fn transition(&self, next: BuildState) -> Result<(), StateError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *state = state.transition(next)?;
        debug!("Job {} is now {}", self.job_id, next);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.state() == BuildState::Running
    }

    pub fn is_success(&self) -> bool {
        self.state() == BuildState::Success
    }

    pub fn is_failed(&self) -> bool {
        self.state() == BuildState::Failed
    }

    pub fn is_completed(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn append_str(&self, text: &str) {
        self.trace.append_str(text);
    }

    pub fn append_bytes(&self, chunk: &[u8]) {
        self.trace.append_bytes(chunk);
    }

    /// Records the temporary file the running command writes to
    pub fn set_output_file(&self, path: &Path) {
        *self.output_file.lock().unwrap_or_else(|e| e.into_inner()) = Some(path.to_path_buf());
    }

    pub fn output_file(&self) -> Option<PathBuf> {
        self.output_file
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Trace so far plus whatever the running command has written
    ///
    /// The temporary file is deleted once its contents move into the trace,
    /// so finished commands are never counted twice.
    pub fn trace(&self) -> String {
        let mut trace = self.trace.contents();
        if let Some(path) = self.output_file() {
            if let Ok(bytes) = std::fs::read(&path) {
                trace.push_str(&String::from_utf8_lossy(&bytes));
            }
        }
        trace
    }
}
