//! The coding stage: a chat loop between the oracle and a code executor.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_MAX_CHAT_TURNS, DEFAULT_MAX_RETRIES};
use crate::conversation::Conversation;
use crate::error::{Error, Result};
use crate::extract::extract_code_block;
use crate::oracle::TextOracle;
use crate::orchestration::{CodeStage, Stage, StageInput};
use crate::prompts;
use crate::sandbox::CodeExecutor;
use crate::{mlog, mlog_debug, mlog_warn};

/// What the coding stage hands to the writer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeReport {
    /// The oracle's closing summary.
    pub response: String,
    /// Output of every executed snippet, in order.
    pub transcript: String,
    /// Files produced while executing.
    pub artifacts: Vec<PathBuf>,
}

impl CodeReport {
    /// Artifact file names, without directories.
    pub fn artifact_names(&self) -> Vec<String> {
        self.artifacts
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect()
    }
}

pub struct CoderAgent {
    oracle: Arc<dyn TextOracle>,
    executor: Arc<dyn CodeExecutor>,
    max_retries: usize,
    max_chat_turns: usize,
}

impl CoderAgent {
    pub fn new(oracle: Arc<dyn TextOracle>, executor: Arc<dyn CodeExecutor>) -> Self {
        Self {
            oracle,
            executor,
            max_retries: DEFAULT_MAX_RETRIES,
            max_chat_turns: DEFAULT_MAX_CHAT_TURNS,
        }
    }

    pub fn with_limits(mut self, max_retries: usize, max_chat_turns: usize) -> Self {
        self.max_retries = max_retries;
        self.max_chat_turns = max_chat_turns.max(1);
        self
    }

    /// Work `prompt` to completion.
    ///
    /// A reply carrying a fenced code block is executed and answered with
    /// either a reflection prompt (on failure) or a completion check (on
    /// success). A reply without code ends the loop.
    ///
    /// # Errors
    ///
    /// Returns `StageExecution` once failures exceed `max_retries` or the
    /// turn budget runs out, and propagates oracle and executor errors.
    pub async fn solve(&self, key: &str, prompt: &str, model_solution: &str) -> Result<CodeReport> {
        let mut conversation =
            Conversation::with_system_prompt(prompts::CODER_SYSTEM).with_user(prompt);
        let mut transcript: Vec<String> = Vec::new();
        let mut artifacts: Vec<PathBuf> = Vec::new();
        let mut retries = 0usize;

        for turn in 1..=self.max_chat_turns {
            let reply = self.oracle.chat(&conversation).await?;
            conversation = conversation.with_assistant(reply.as_str());

            let Some(code) = extract_code_block(&reply) else {
                mlog!(
                    "[coder] {} finished after {} turns ({} snippets)",
                    key,
                    turn,
                    transcript.len()
                );
                return Ok(CodeReport {
                    response: reply,
                    transcript: transcript.join("\n\n"),
                    artifacts,
                });
            };

            mlog_debug!("[coder] {} turn {}: executing snippet", key, turn);
            let outcome = self.executor.execute(code).await?;
            for path in outcome.artifacts.iter() {
                if !artifacts.contains(path) {
                    artifacts.push(path.clone());
                }
            }

            match &outcome.error {
                Some(error) => {
                    retries += 1;
                    mlog_warn!(
                        "[coder] {} snippet failed ({}/{}): {}",
                        key,
                        retries,
                        self.max_retries,
                        error.lines().last().unwrap_or_default()
                    );
                    if retries > self.max_retries {
                        return Err(Error::StageExecution {
                            task: key.to_string(),
                            stage: Stage::Code.to_string(),
                            message: format!(
                                "code still failing after {} retries: {}",
                                self.max_retries, error
                            ),
                        });
                    }
                    conversation = conversation.with_user(prompts::code_reflection(
                        error,
                        code,
                        Some(model_solution),
                    ));
                }
                None => {
                    transcript.push(outcome.output.clone());
                    conversation = conversation
                        .with_user(prompts::completion_check(prompt, &outcome.output));
                }
            }
        }

        Err(Error::StageExecution {
            task: key.to_string(),
            stage: Stage::Code.to_string(),
            message: format!("no final response within {} turns", self.max_chat_turns),
        })
    }
}

#[async_trait]
impl CodeStage for CoderAgent {
    async fn code(&self, input: &StageInput<'_>, model_solution: &str) -> Result<CodeReport> {
        let prompt = prompts::coding_task(input.key, input.description(), model_solution);
        self.solve(input.key.as_str(), &prompt, model_solution).await
    }
}
