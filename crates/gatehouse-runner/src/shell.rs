//! Shell-based job execution on the host.
//!
//! Each node gets a scratch directory holding `in/` (consumed artifacts,
//! one file per key) and `out/` (files the job writes for the keys it
//! produces). Their paths are exported as `GATEHOUSE_ARTIFACTS_IN` and
//! `GATEHOUSE_ARTIFACTS_OUT`; matrix values are exported as `MATRIX_<AXIS>`.

use crate::runner::{OutputLine, OutputStream, PASS_THROUGH_ENV, RunnerConfig};
use async_trait::async_trait;
use gatehouse_core::ports::{JobOutcome, JobRequest, JobRunner};
use gatehouse_core::secrets::SecretValue;
use gatehouse_core::{Error, Result};
use gatehouse_secrets::{SecretManager, mask_values};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};
use tracing::{debug, error, info, warn};

/// Shell runner for executing job commands on the host.
pub struct ShellRunner {
    config: RunnerConfig,
    secrets: Arc<SecretManager>,
    output: Option<mpsc::Sender<OutputLine>>,
}

/// How the command ended.
enum Exit {
    Code(i32),
    TimedOut(u64),
}

impl ShellRunner {
    pub fn new(config: RunnerConfig, secrets: Arc<SecretManager>) -> Self {
        Self {
            config,
            secrets,
            output: None,
        }
    }

    /// Forward masked output lines to `tx` instead of the debug log.
    pub fn with_output(mut self, tx: mpsc::Sender<OutputLine>) -> Self {
        self.output = Some(tx);
        self
    }

    fn build_env(
        &self,
        request: &JobRequest,
        scratch: &Scratch,
        secrets: &HashMap<String, SecretValue>,
    ) -> HashMap<String, String> {
        let mut env: HashMap<String, String> = PASS_THROUGH_ENV
            .iter()
            .filter_map(|&name| std::env::var(name).ok().map(|value| (name.to_string(), value)))
            .collect();
        env.extend(request.env.clone());

        for (axis, value) in request.node.variant.iter() {
            env.insert(matrix_var(axis), value.to_string());
        }

        env.insert("GATEHOUSE_RUN_ID".to_string(), request.run_id.to_string());
        env.insert("GATEHOUSE_JOB".to_string(), request.node.job.clone());
        env.insert("GATEHOUSE_NODE".to_string(), request.node.to_string());
        env.insert(
            "GATEHOUSE_ARTIFACTS_IN".to_string(),
            scratch.inputs.display().to_string(),
        );
        env.insert(
            "GATEHOUSE_ARTIFACTS_OUT".to_string(),
            scratch.outputs.display().to_string(),
        );

        for (name, value) in secrets {
            env.insert(name.clone(), value.expose().to_string());
        }
        env
    }

    async fn execute_command(
        &self,
        command: &str,
        request: &JobRequest,
        env: &HashMap<String, String>,
        secrets: &HashMap<String, SecretValue>,
    ) -> Result<Exit> {
        info!(
            node = %request.node,
            workspace = %self.config.workspace.display(),
            "Executing shell command"
        );

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.config.workspace)
            .env_clear()
            .envs(env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Runner(format!("Failed to spawn process: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Runner("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Runner("stderr not captured".to_string()))?;

        let masks: Vec<SecretValue> = secrets.values().cloned().collect();
        let stdout_handle = tokio::spawn(forward_lines(
            stdout,
            OutputStream::Stdout,
            request.node.clone(),
            masks.clone(),
            self.output.clone(),
        ));
        let stderr_handle = tokio::spawn(forward_lines(
            stderr,
            OutputStream::Stderr,
            request.node.clone(),
            masks,
            self.output.clone(),
        ));

        let wait_result = if let Some(timeout_secs) = self.config.timeout_seconds {
            match timeout(Duration::from_secs(timeout_secs), child.wait()).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(node = %request.node, timeout_secs, "Command timed out, killing process");
                    let _ = child.kill().await;
                    return Ok(Exit::TimedOut(timeout_secs));
                }
            }
        } else {
            child.wait().await
        };

        let _ = stdout_handle.await;
        let _ = stderr_handle.await;

        let status =
            wait_result.map_err(|e| Error::Runner(format!("Failed to wait for process: {}", e)))?;
        Ok(Exit::Code(status.code().unwrap_or(-1)))
    }
}

#[async_trait]
impl JobRunner for ShellRunner {
    async fn run(&self, request: JobRequest) -> Result<JobOutcome> {
        let Some(command) = request.command.clone() else {
            debug!(node = %request.node, "No command, nothing to execute");
            return Ok(JobOutcome::succeeded());
        };

        let start = std::time::Instant::now();
        let secrets = self.secrets.resolve_all(&request.secrets).await?;
        let scratch = Scratch::prepare(&request).await?;
        let env = self.build_env(&request, &scratch, &secrets);

        let exit = self
            .execute_command(&command, &request, &env, &secrets)
            .await
            .inspect_err(|e| error!(node = %request.node, error = %e, "Command could not run"))?;

        let duration_ms = start.elapsed().as_millis() as u64;
        let mut outcome = match exit {
            Exit::Code(0) => scratch.collect(&request.produces).await?,
            Exit::Code(code) => {
                warn!(node = %request.node, code, "Command failed");
                JobOutcome::failed(format!("exit code {}", code))
            }
            Exit::TimedOut(secs) => JobOutcome::failed(format!("timed out after {}s", secs)),
        };
        outcome.duration_ms = Some(duration_ms);

        debug!(node = %request.node, duration_ms, status = ?outcome.status, "Command completed");
        Ok(outcome)
    }

    fn name(&self) -> &str {
        "shell"
    }
}

/// Per-node scratch directory, removed on drop.
struct Scratch {
    _dir: tempfile::TempDir,
    inputs: PathBuf,
    outputs: PathBuf,
}

impl Scratch {
    async fn prepare(request: &JobRequest) -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("gatehouse-").tempdir()?;
        let inputs = dir.path().join("in");
        let outputs = dir.path().join("out");
        tokio::fs::create_dir_all(&inputs).await?;
        tokio::fs::create_dir_all(&outputs).await?;

        for artifact in &request.artifacts {
            tokio::fs::write(artifact_path(&inputs, &artifact.key), &artifact.payload).await?;
        }

        Ok(Self {
            _dir: dir,
            inputs,
            outputs,
        })
    }

    /// Successful outcome carrying every declared artifact the job wrote.
    /// Missing files are left out.
    async fn collect(&self, produces: &[String]) -> Result<JobOutcome> {
        let mut outcome = JobOutcome::succeeded();
        for key in produces {
            let path = artifact_path(&self.outputs, key);
            match tokio::fs::read(&path).await {
                Ok(payload) => outcome = outcome.with_artifact(key.clone(), payload),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!(key = %key, "Declared artifact was not written");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(outcome)
    }
}

/// Keys are plain file names; graph validation rejects path separators.
fn artifact_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(key)
}

/// `MATRIX_PYTHON_VERSION` for axis `python-version`.
fn matrix_var(axis: &str) -> String {
    let name: String = axis
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("MATRIX_{}", name)
}

async fn forward_lines<R>(
    reader: R,
    stream: OutputStream,
    node: gatehouse_core::pipeline::NodeKey,
    masks: Vec<SecretValue>,
    tx: Option<mpsc::Sender<OutputLine>>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut line_num = 0u32;

    while let Ok(Some(line)) = lines.next_line().await {
        line_num += 1;
        let content = mask_values(&line, &masks);
        match &tx {
            Some(tx) => {
                let output = OutputLine {
                    node: node.clone(),
                    stream,
                    content,
                    line_number: line_num,
                    timestamp: chrono::Utc::now(),
                };
                if tx.send(output).await.is_err() {
                    break;
                }
            }
            None => debug!(node = %node, stream = ?stream, "{}", content),
        }
    }
}
