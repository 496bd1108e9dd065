//! Headless LLM CLI oracle.
//!
//! Runs `<binary> [args] -p --output-format json` with the rendered
//! conversation on stdin and parses the JSON envelope the CLI prints.

use super::TextOracle;
use crate::conversation::Conversation;
use crate::error::{Error, Result};
use crate::{mlog_debug, mlog_trace};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Outcome reported by the CLI.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultType {
    Success { output: String },
    Error { message: String },
}

/// Parsed CLI envelope.
#[derive(Debug, Clone)]
pub struct OracleResponse {
    pub session_id: Option<String>,
    pub result: ResultType,
    pub cost_usd: Option<f64>,
    pub duration_ms: Option<u64>,
    pub num_turns: Option<u32>,
}

impl OracleResponse {
    fn plain(result: ResultType) -> Self {
        Self {
            session_id: None,
            result,
            cost_usd: None,
            duration_ms: None,
            num_turns: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.result, ResultType::Success { .. })
    }

    pub fn output(&self) -> Option<&str> {
        match &self.result {
            ResultType::Success { output } => Some(output),
            ResultType::Error { .. } => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.result {
            ResultType::Success { .. } => None,
            ResultType::Error { message } => Some(message),
        }
    }

    /// The completion text, or `Error::Oracle` when the CLI reported failure.
    pub fn into_output(self) -> Result<String> {
        match self.result {
            ResultType::Success { output } => Ok(output),
            ResultType::Error { message } => Err(Error::Oracle(message)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    subtype: Option<String>,
    result: Option<String>,
    session_id: Option<String>,
    total_cost_usd: Option<f64>,
    duration_ms: Option<u64>,
    num_turns: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CommandOracle {
    binary: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    cwd: Option<PathBuf>,
}

impl CommandOracle {
    /// Build an oracle from a command line such as `claude --model sonnet`.
    ///
    /// The first word is resolved on `PATH`; the rest are passed through
    /// before the headless flags.
    ///
    /// # Errors
    ///
    /// Returns `OracleNotFound` if the binary cannot be located, or
    /// `Validation` if the command line is blank.
    pub fn from_command_line(command_line: &str, timeout: Duration) -> Result<Self> {
        let mut words = command_line.split_whitespace();
        let program = words
            .next()
            .ok_or_else(|| Error::Validation("oracle command is empty".to_string()))?;
        let binary =
            which::which(program).map_err(|_| Error::OracleNotFound(program.to_string()))?;
        Ok(Self {
            binary,
            args: words.map(str::to_string).collect(),
            timeout,
            cwd: None,
        })
    }

    /// Use an explicit binary path without a `PATH` lookup.
    pub fn with_binary(binary: PathBuf, timeout: Duration) -> Self {
        Self {
            binary,
            args: Vec::new(),
            timeout,
            cwd: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send `prompt` to the CLI and parse its envelope.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if the CLI does not finish in time and `Io` if it
    /// cannot be spawned. A CLI that runs but reports failure yields
    /// `Ok` with [`ResultType::Error`].
    pub async fn execute(&self, prompt: &str) -> Result<OracleResponse> {
        let mut command = Command::new(&self.binary);
        command
            .args(&self.args)
            .arg("-p")
            .arg("--output-format")
            .arg("json")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }

        mlog_debug!(
            "[oracle] spawn {} prompt_len={}",
            self.binary.display(),
            prompt.len()
        );

        let run = async {
            let mut child = command.spawn()?;
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(prompt.as_bytes()).await?;
                stdin.shutdown().await?;
            }
            Ok::<_, std::io::Error>(child.wait_with_output().await?)
        };

        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| Error::Timeout(self.timeout))??;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        mlog_trace!("[oracle] raw stdout: {}", stdout);

        if let Ok(response) = Self::parse_envelope(&stdout) {
            return Ok(response);
        }

        if !output.status.success() {
            let message = if stderr.trim().is_empty() {
                format!(
                    "oracle exited with code {}",
                    output.status.code().unwrap_or(-1)
                )
            } else {
                stderr.trim().to_string()
            };
            return Ok(OracleResponse::plain(ResultType::Error { message }));
        }

        Ok(OracleResponse::plain(ResultType::Success {
            output: stdout.trim().to_string(),
        }))
    }

    /// Parse the CLI's JSON envelope.
    pub fn parse_envelope(text: &str) -> Result<OracleResponse> {
        let raw: RawEnvelope = serde_json::from_str(text.trim())?;

        let result = match raw.subtype.as_deref() {
            Some("success") => ResultType::Success {
                output: raw.result.unwrap_or_default(),
            },
            Some(subtype) if subtype.starts_with("error") => ResultType::Error {
                message: raw
                    .error
                    .or(raw.result)
                    .unwrap_or_else(|| subtype.to_string()),
            },
            _ => match (raw.error, raw.result) {
                (Some(error), _) => ResultType::Error { message: error },
                (None, Some(result)) => ResultType::Success { output: result },
                (None, None) => ResultType::Error {
                    message: "unknown response format".to_string(),
                },
            },
        };

        Ok(OracleResponse {
            session_id: raw.session_id,
            result,
            cost_usd: raw.total_cost_usd,
            duration_ms: raw.duration_ms,
            num_turns: raw.num_turns,
        })
    }
}

#[async_trait]
impl TextOracle for CommandOracle {
    async fn chat(&self, conversation: &Conversation) -> Result<String> {
        let response = self.execute(&conversation.render()).await?;
        if let (Some(cost), Some(ms)) = (response.cost_usd, response.duration_ms) {
            mlog_debug!(
                "[oracle] {} completed in {}ms, cost ${:.4}",
                self.name(),
                ms,
                cost
            );
        }
        response.into_output()
    }

    fn name(&self) -> &str {
        self.binary
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("command")
    }
}
