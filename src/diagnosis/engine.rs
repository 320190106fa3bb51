//! # Diagnostic Engine
//!
//! The engine is the external program that extracts acoustic features, runs the
//! classifier and renders the PDF report. This service never looks inside it; it
//! hands over three paths and expects JSON back.
//!
//! ## Contract:
//! - **Input**: the staged audio file, plus where the rendered report and the
//!   structured-data dump should be written for *this* request
//! - **Output**: the diagnosis as a JSON document (see `formatter` for the key paths read)
//! - **Failure**: any error, which the orchestrator surfaces as a processing error

use crate::config::EngineConfig;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info};

/// Paths the engine works with for one request.
#[derive(Debug, Clone)]
pub struct EngineJob {
    pub audio_path: PathBuf,
    pub report_path: PathBuf,
    pub data_path: PathBuf,
}

#[async_trait]
pub trait DiagnosticEngine: Send + Sync {
    async fn process(&self, job: &EngineJob) -> Result<serde_json::Value, EngineError>;

    /// Short description for the health endpoint.
    fn describe(&self) -> String;
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to start diagnostic engine: {0}")]
    Spawn(String),
    #[error("{0}")]
    Failed(String),
    #[error("diagnostic engine timed out after {0}s")]
    TimedOut(u64),
    #[error("diagnostic engine returned malformed output: {0}")]
    MalformedOutput(String),
}

/// Runs the report-generation program as a child process.
///
/// ## Output discovery:
/// The JSON diagnosis is read from stdout. Programs that only write the
/// structured-data file (and print progress to stdout) are supported too: when
/// stdout doesn't parse, the data file is tried before giving up.
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            timeout: (config.timeout_secs > 0).then(|| Duration::from_secs(config.timeout_secs)),
        }
    }

    /// Substitute the per-request paths into the configured argument list.
    fn render_args(&self, job: &EngineJob) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{audio}", &job.audio_path.to_string_lossy())
                    .replace("{report}", &job.report_path.to_string_lossy())
                    .replace("{data}", &job.data_path.to_string_lossy())
            })
            .collect()
    }

    async fn read_data_file(path: &Path) -> Option<serde_json::Value> {
        let contents = tokio::fs::read(path).await.ok()?;
        serde_json::from_slice(&contents).ok()
    }
}

#[async_trait]
impl DiagnosticEngine for CommandEngine {
    async fn process(&self, job: &EngineJob) -> Result<serde_json::Value, EngineError> {
        let args = self.render_args(job);
        debug!(program = %self.program, ?args, "Starting diagnostic engine");

        let start = Instant::now();
        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::Spawn(format!("{}: {}", self.program, e)))?;

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| EngineError::TimedOut(limit.as_secs()))?,
            None => child.wait_with_output().await,
        }
        .map_err(|e| EngineError::Failed(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .map(|line| line.trim().to_string())
                .unwrap_or_else(|| format!("engine exited with {}", output.status));
            return Err(EngineError::Failed(detail));
        }

        info!(
            duration_ms = %start.elapsed().as_millis(),
            audio = %job.audio_path.display(),
            "Diagnostic engine finished"
        );

        match serde_json::from_slice::<serde_json::Value>(&output.stdout) {
            Ok(value) => Ok(value),
            Err(stdout_err) => Self::read_data_file(&job.data_path)
                .await
                .ok_or_else(|| EngineError::MalformedOutput(stdout_err.to_string())),
        }
    }

    fn describe(&self) -> String {
        format!("command: {} {}", self.program, self.args.join(" "))
    }
}
