//! Runner that executes nothing.

use async_trait::async_trait;
use gatehouse_core::Result;
use gatehouse_core::ports::{JobOutcome, JobRequest, JobRunner};
use tracing::info;

/// Succeeds every node and publishes an empty payload for each declared
/// artifact, so a whole pipeline can be walked without side effects.
#[derive(Debug, Default)]
pub struct DryRunRunner;

#[async_trait]
impl JobRunner for DryRunRunner {
    async fn run(&self, request: JobRequest) -> Result<JobOutcome> {
        info!(
            node = %request.node,
            command = request.command.as_deref().unwrap_or("<none>"),
            secrets = request.secrets.len(),
            "Dry run, skipping execution"
        );

        Ok(request
            .produces
            .iter()
            .fold(JobOutcome::succeeded(), |outcome, key| {
                outcome.with_artifact(key.clone(), Vec::new())
            }))
    }

    fn name(&self) -> &str {
        "dry-run"
    }
}
