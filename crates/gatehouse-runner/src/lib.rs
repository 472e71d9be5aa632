//! Job runners for Gatehouse.

pub mod dry_run;
pub mod runner;
pub mod shell;

pub use dry_run::DryRunRunner;
pub use runner::{OutputLine, OutputStream, RunnerConfig};
pub use shell::ShellRunner;
