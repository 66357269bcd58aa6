//! Core domain types
//!
//! These types are shared between the runner (which executes a job) and
//! whatever scheduler embeds it (which builds job descriptions and reads
//! the resulting reports).

pub mod build;
pub mod job;
