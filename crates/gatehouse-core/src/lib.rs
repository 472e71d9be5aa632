//! Gatehouse Core
//!
//! Core domain types, traits, and error handling for Gatehouse.
//! This crate has minimal dependencies and defines the shared vocabulary
//! used across all other crates: the triggering event, the pipeline
//! definition, run results, and the job runner port.

pub mod error;
pub mod event;
pub mod ids;
pub mod pipeline;
pub mod ports;
pub mod run;
pub mod secrets;

pub use error::{ArtifactError, ConfigError, Error, Result};
pub use ids::*;
