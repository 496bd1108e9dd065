//! Task-set bootstrap: turns the problem text into a [`TaskSet`].

use std::sync::Arc;

use crate::conversation::Conversation;
use crate::core::task::TaskSet;
use crate::error::{Error, Result};
use crate::extract::extract_payload;
use crate::oracle::TextOracle;
use crate::prompts;
use crate::{mlog, mlog_error, mlog_warn};

/// Attempts made before bootstrap gives up: one initial call plus three
/// corrective retries.
pub const MAX_ATTEMPTS: usize = 4;

/// A successfully extracted task set and the conversation that produced it.
#[derive(Debug, Clone)]
pub struct Bootstrap {
    pub task_set: TaskSet,
    /// History ending with the accepted completion; dependency analysis
    /// continues from here.
    pub conversation: Conversation,
    pub attempts: usize,
}

pub struct CoordinatorAgent {
    oracle: Arc<dyn TextOracle>,
    max_attempts: usize,
}

impl CoordinatorAgent {
    pub fn new(oracle: Arc<dyn TextOracle>) -> Self {
        Self {
            oracle,
            max_attempts: MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub async fn extract_task_set(&self, problem: &str) -> Result<TaskSet> {
        Ok(self.bootstrap(problem).await?.task_set)
    }

    /// Ask the oracle to restate `problem` as a task set.
    ///
    /// Each unusable completion is kept in the history, followed by a
    /// corrective system message naming what was wrong, before the next
    /// call. Oracle failures are not retried here.
    ///
    /// # Errors
    ///
    /// Returns `ExtractionFailed` once every attempt produced an unusable
    /// payload, or the oracle's own error.
    pub async fn bootstrap(&self, problem: &str) -> Result<Bootstrap> {
        let mut conversation =
            Conversation::with_system_prompt(prompts::COORDINATOR_SYSTEM).with_user(problem);
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            let reply = self.oracle.chat(&conversation).await?;
            conversation = conversation.with_assistant(reply.as_str());

            match extract_payload(&reply).and_then(|payload| TaskSet::from_payload(&payload)) {
                Ok(task_set) => {
                    mlog!(
                        "[coordinator] extracted {} tasks on attempt {}",
                        task_set.len(),
                        attempt
                    );
                    if task_set.declared_count() != task_set.len() {
                        mlog_warn!(
                            "[coordinator] ques_count={} but {} tasks present",
                            task_set.declared_count(),
                            task_set.len()
                        );
                    }
                    return Ok(Bootstrap {
                        task_set,
                        conversation,
                        attempts: attempt,
                    });
                }
                Err(e) => {
                    last_error = e.to_string();
                    mlog_warn!(
                        "[coordinator] attempt {}/{} unusable: {}",
                        attempt,
                        self.max_attempts,
                        last_error
                    );
                    conversation =
                        conversation.with_system(prompts::coordinator_correction(&last_error));
                }
            }
        }

        mlog_error!(
            "[coordinator] giving up after {} attempts",
            self.max_attempts
        );
        Err(Error::ExtractionFailed {
            attempts: self.max_attempts,
            last_error,
        })
    }
}
