//! Service layer
//!
//! Services contain the build logic of the runner: the orchestrator that
//! drives a job through its lifecycle, and the trace sink it writes to.
//!
//! Both are trait-based to enable testing and embedding.

mod execution;
mod trace;

// Re-export traits
pub use execution::ExecutionService;
pub use trace::OutputSink;

// Re-export implementations
pub use execution::BuildOrchestrator;
pub use trace::InMemoryTrace;
