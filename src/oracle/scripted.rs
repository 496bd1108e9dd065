//! Oracle that replays a fixed script of completions.

use super::TextOracle;
use crate::conversation::Conversation;
use crate::error::{Error, Result};
use crate::mlog_trace;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Reply {
    Text(String),
    Failure { error: String },
}

/// Replays completions in order and records every conversation it is sent.
///
/// Once the script runs out, each further call fails with `Error::Oracle`.
#[derive(Debug, Default)]
pub struct ScriptedOracle {
    replies: Mutex<VecDeque<Reply>>,
    received: Mutex<Vec<Conversation>>,
    delay: Option<Duration>,
}

impl ScriptedOracle {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Reply::Text(r.into())).collect()),
            received: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Load a script from a JSON array.
    ///
    /// Entries are completion strings or `{"error": "..."}` objects, which
    /// make the corresponding call fail.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let replies: Vec<Reply> = serde_json::from_str(&text)?;
        Ok(Self {
            replies: Mutex::new(replies.into()),
            received: Mutex::new(Vec::new()),
            delay: None,
        })
    }

    /// Queue a failing call after the current script.
    pub fn then_fail(self, message: impl Into<String>) -> Self {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(Reply::Failure {
                error: message.into(),
            });
        }
        self
    }

    /// Wait this long before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Conversations received so far, oldest first.
    pub fn received(&self) -> Vec<Conversation> {
        self.received
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> usize {
        self.received.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl TextOracle for ScriptedOracle {
    async fn chat(&self, conversation: &Conversation) -> Result<String> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let calls = {
            let mut received = self
                .received
                .lock()
                .map_err(|_| Error::Oracle("scripted oracle poisoned".to_string()))?;
            received.push(conversation.clone());
            received.len()
        };

        let reply = self
            .replies
            .lock()
            .map_err(|_| Error::Oracle("scripted oracle poisoned".to_string()))?
            .pop_front();

        match reply {
            Some(Reply::Text(text)) => {
                mlog_trace!("[oracle] {} reply #{}: {}", self.name(), calls, text);
                Ok(text)
            }
            Some(Reply::Failure { error }) => Err(Error::Oracle(error)),
            None => Err(Error::Oracle(format!(
                "scripted oracle exhausted at call {}",
                calls
            ))),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
