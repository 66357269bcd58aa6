//! Keel Core
//!
//! Core types for the Keel build execution engine.
//!
//! This crate contains:
//! - Domain types: the job description handed over by a scheduler, the
//!   build lifecycle state and the terminal build report

pub mod domain;
