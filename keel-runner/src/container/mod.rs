//! Containerized execution
//!
//! - `engine`: container engine seam and its CLI implementation
//! - `chain`: runs commands in a chain of containers, committing a new
//!   image layer after every command that changed the filesystem
//! - `reaper`: removes every container and image a chain created

pub mod chain;
pub mod engine;
pub mod reaper;

#[cfg(test)]
pub(crate) mod testing;

pub use chain::{ChainOutcome, ContainerChain, ContainerRunner};
pub use engine::{ChangeKind, CliEngine, ContainerEngine, ContainerLogs, FsChange};
pub use reaper::ResourceReaper;
