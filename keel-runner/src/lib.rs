//! Keel Runner
//!
//! Executes a single CI job: prepares the project checkout, runs the job's
//! commands on the host or inside a chain of containers, captures a
//! combined output trace, enforces a wall-clock timeout and reaps every
//! process, temporary file, container and image it created.
//!
//! Architecture:
//! - Configuration: settings from environment or defaults
//! - Context: per-build state and trace
//! - Preparer: git setup command plans
//! - Process: host command execution with process-group termination
//! - Container: engine seam, image chaining and resource reaping
//! - Services: the build orchestrator

pub mod config;
pub mod container;
pub mod context;
pub mod error;
pub mod preparer;
pub mod process;
pub mod service;
pub mod shellwords;
pub mod termination;

pub use config::Config;
pub use context::BuildContext;
pub use error::{Result, RunnerError};
pub use service::{BuildOrchestrator, ExecutionService, InMemoryTrace, OutputSink};
