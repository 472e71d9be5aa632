//! Dependency graph, gating policy and execution driver for Gatehouse.

pub mod artifacts;
pub mod condition;
pub mod dag;
pub mod driver;
pub mod matrix;
pub mod policy;
pub mod scheduler;

pub use artifacts::ArtifactExchange;
pub use condition::{Condition, ConditionError};
pub use dag::{DagBuilder, JobGraph};
pub use driver::{ExecutionDriver, Transition};
pub use matrix::MatrixExpander;
pub use scheduler::Scheduler;
