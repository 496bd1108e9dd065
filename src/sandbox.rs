//! Code execution for the coding stage.
//!
//! Each snippet runs in a fresh interpreter process inside the run's work
//! directory. Files the snippet creates there are reported as artifacts.

use crate::error::{Error, Result};
use crate::{mlog_debug, mlog_warn};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Longest stderr excerpt kept in an error message.
const MAX_ERROR_CHARS: usize = 4000;

/// Result of running one snippet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// Captured stdout followed by stderr.
    pub output: String,
    /// Present when the snippet failed or timed out.
    pub error: Option<String>,
    /// Files created in the work directory.
    pub artifacts: Vec<PathBuf>,
}

impl ExecutionOutcome {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Self::default()
        }
    }

    pub fn failure(output: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            error: Some(error.into()),
            artifacts: Vec::new(),
        }
    }

    pub fn error_occurred(&self) -> bool {
        self.error.is_some()
    }
}

/// Runs code on behalf of the coding stage.
///
/// Failures of the code itself are reported through
/// [`ExecutionOutcome::error`]; `Err` is reserved for the executor being
/// unable to run anything at all.
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    async fn execute(&self, code: &str) -> Result<ExecutionOutcome>;

    /// Directory snippets run in.
    fn work_dir(&self) -> &Path;
}

/// Executes snippets with an external interpreter reading from stdin.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    interpreter: PathBuf,
    work_dir: PathBuf,
    timeout: Duration,
}

impl ProcessExecutor {
    /// # Errors
    ///
    /// Returns `Validation` if `interpreter` is not on `PATH`.
    pub fn new(interpreter: &str, work_dir: impl Into<PathBuf>, timeout: Duration) -> Result<Self> {
        let interpreter = which::which(interpreter)
            .map_err(|_| Error::Validation(format!("interpreter not found: {}", interpreter)))?;
        Ok(Self::with_interpreter(interpreter, work_dir, timeout))
    }

    pub fn with_interpreter(
        interpreter: PathBuf,
        work_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            interpreter,
            work_dir: work_dir.into(),
            timeout,
        }
    }

    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }

    fn snapshot(&self) -> BTreeSet<PathBuf> {
        std::fs::read_dir(&self.work_dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| p.is_file())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl CodeExecutor for ProcessExecutor {
    async fn execute(&self, code: &str) -> Result<ExecutionOutcome> {
        tokio::fs::create_dir_all(&self.work_dir).await?;
        let before = self.snapshot();

        mlog_debug!(
            "[sandbox] run {} bytes with {}",
            code.len(),
            self.interpreter.display()
        );

        let mut child = Command::new(&self.interpreter)
            .arg("-")
            .current_dir(&self.work_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let run = async {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(code.as_bytes()).await?;
                stdin.shutdown().await?;
            }
            Ok::<_, std::io::Error>(child.wait_with_output().await?)
        };

        let output = match tokio::time::timeout(self.timeout, run).await {
            Ok(output) => output?,
            Err(_) => {
                mlog_warn!("[sandbox] snippet timed out after {:?}", self.timeout);
                return Ok(ExecutionOutcome::failure(
                    String::new(),
                    format!("execution timed out after {}s", self.timeout.as_secs()),
                ));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let mut text = stdout;
        if !stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&stderr);
        }

        let artifacts: Vec<PathBuf> = self.snapshot().difference(&before).cloned().collect();

        let mut outcome = if output.status.success() {
            ExecutionOutcome::success(text)
        } else {
            let error = if stderr.trim().is_empty() {
                format!("exited with code {}", output.status.code().unwrap_or(-1))
            } else {
                tail(stderr.trim(), MAX_ERROR_CHARS)
            };
            ExecutionOutcome::failure(text, error)
        };
        outcome.artifacts = artifacts;
        Ok(outcome)
    }

    fn work_dir(&self) -> &Path {
        &self.work_dir
    }
}

fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    text.chars().skip(count - max_chars).collect()
}
